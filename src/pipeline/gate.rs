//! Contract staleness gate: compares the active contract hash with the hash
//! last ingested for the group and re-ingests on mismatch.

use crate::datasource::{ContractIngestor, ContractStore, ContractStoreError, IngestError};
use crate::domain::{Contract, ProductGroup};
use crate::engine::content_hash;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Done,
    TimedOut,
    Failed(IngestError),
}

/// Active contracts of a group and their content hash.
#[derive(Debug, Clone)]
pub struct ContractCheck {
    pub contracts: Vec<Contract>,
    pub hash: String,
    pub fresh: bool,
}

#[derive(Debug)]
pub struct ContractGate {
    store: Arc<dyn ContractStore>,
    ingestor: Arc<dyn ContractIngestor>,
    ingest_timeout: Duration,
    ingested: RwLock<HashMap<ProductGroup, String>>,
}

impl ContractGate {
    pub fn new(
        store: Arc<dyn ContractStore>,
        ingestor: Arc<dyn ContractIngestor>,
        ingest_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ingestor,
            ingest_timeout,
            ingested: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContractStore> {
        &self.store
    }

    pub async fn check(&self, group: ProductGroup) -> Result<ContractCheck, ContractStoreError> {
        let contracts = self.store.active_contracts(group).await?;
        let hash = content_hash(&contracts);
        let fresh = self.ingested.read().await.get(&group) == Some(&hash);
        Ok(ContractCheck {
            contracts,
            hash,
            fresh,
        })
    }

    pub async fn last_ingested(&self, group: ProductGroup) -> Option<String> {
        self.ingested.read().await.get(&group).cloned()
    }

    /// Re-ingest under the configured timeout. Only a completed ingestion
    /// updates the cached hash; concurrent stale callers each ingest.
    pub async fn ingest(&self, group: ProductGroup, check: &ContractCheck) -> IngestStatus {
        let attempt = self.ingestor.ingest(group, &check.hash, &check.contracts);
        match tokio::time::timeout(self.ingest_timeout, attempt).await {
            Ok(Ok(())) => {
                self.ingested.write().await.insert(group, check.hash.clone());
                tracing::info!(group = %group, hash = %check.hash, "contracts ingested");
                IngestStatus::Done
            }
            Ok(Err(err)) => {
                tracing::warn!(group = %group, error = %err, "contract ingestion failed");
                IngestStatus::Failed(err)
            }
            Err(_) => {
                tracing::warn!(
                    group = %group,
                    timeout_ms = self.ingest_timeout.as_millis() as u64,
                    "contract ingestion timed out"
                );
                IngestStatus::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{MockContractStore, MockIngestor};
    use crate::domain::{Direction, Incoterm, Tonnes};

    fn contract() -> Contract {
        Contract {
            contract_number: "P-1".to_string(),
            counterparty: "Koch".to_string(),
            product_group: ProductGroup::AmmoniaDomestic,
            direction: Direction::Purchase,
            incoterm: Incoterm::Fob,
            total_qty_mt: Tonnes::from(1000),
            delivered_qty_mt: Tonnes::zero(),
        }
    }

    #[tokio::test]
    async fn test_ingest_caches_hash() {
        let store = Arc::new(MockContractStore::new().with_contract(contract()));
        let gate = ContractGate::new(store, Arc::new(MockIngestor::new()), Duration::from_secs(1));

        let check = gate.check(ProductGroup::AmmoniaDomestic).await.unwrap();
        assert!(!check.fresh);
        assert_eq!(gate.ingest(ProductGroup::AmmoniaDomestic, &check).await, IngestStatus::Done);
        assert!(gate.check(ProductGroup::AmmoniaDomestic).await.unwrap().fresh);
    }

    #[tokio::test]
    async fn test_timeout_leaves_hash_unchanged() {
        let store = Arc::new(MockContractStore::new().with_contract(contract()));
        let ingestor = Arc::new(MockIngestor::new().with_delay(Duration::from_millis(200)));
        let gate = ContractGate::new(store, ingestor, Duration::from_millis(20));

        let check = gate.check(ProductGroup::AmmoniaDomestic).await.unwrap();
        assert_eq!(
            gate.ingest(ProductGroup::AmmoniaDomestic, &check).await,
            IngestStatus::TimedOut
        );
        assert!(gate.last_ingested(ProductGroup::AmmoniaDomestic).await.is_none());
    }
}
