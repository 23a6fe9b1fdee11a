//! Contract repository over SQLite.

use crate::datasource::{ContractStore, ContractStoreError};
use crate::domain::{Contract, Direction, Incoterm, ProductGroup, TimeMs, Tonnes};
use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

/// Contract store backed by the SQLite pool from `init_db`.
///
/// Tonnage columns hold canonical decimal text, so a row read back hashes
/// the same as the contract that was written.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// The underlying pool, for ad-hoc queries in tests and tooling.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or overwrite a contract line and mark it active.
    ///
    /// # Errors
    /// Returns an error if the upsert fails.
    pub async fn upsert_contract(&self, contract: &Contract) -> Result<(), sqlx::Error> {
        Self::upsert_with(&self.pool, contract).await
    }

    /// Upsert a whole import in one transaction. Returns the number of rows
    /// written.
    ///
    /// # Errors
    /// Returns an error if any row fails; the transaction is rolled back and
    /// nothing from the import is kept.
    pub async fn upsert_contracts(&self, contracts: &[Contract]) -> Result<usize, sqlx::Error> {
        if contracts.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        for contract in contracts {
            Self::upsert_with(&mut *tx, contract).await?;
        }
        tx.commit().await?;
        Ok(contracts.len())
    }

    async fn upsert_with<'e, E>(executor: E, contract: &Contract) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO contracts (
                contract_number, product_group, counterparty, direction, incoterm,
                total_qty_mt, delivered_qty_mt, active, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(product_group, contract_number) DO UPDATE SET
                counterparty = excluded.counterparty,
                direction = excluded.direction,
                incoterm = excluded.incoterm,
                total_qty_mt = excluded.total_qty_mt,
                delivered_qty_mt = excluded.delivered_qty_mt,
                active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(contract.contract_number.clone())
        .bind(contract.product_group.as_str())
        .bind(contract.counterparty.clone())
        .bind(contract.direction.as_str())
        .bind(contract.incoterm.as_str())
        .bind(contract.total_qty_mt.to_canonical_string())
        .bind(contract.delivered_qty_mt.to_canonical_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Add a delivery to a contract's running total and log it.
    ///
    /// Returns the updated contract, or `None` when no such contract exists.
    ///
    /// # Errors
    /// `ContractStoreError::Backend` if a query fails, `InvalidRow` if the
    /// stored row cannot be decoded.
    pub async fn record_delivery(
        &self,
        group: ProductGroup,
        contract_number: &str,
        qty: Tonnes,
        at: TimeMs,
    ) -> Result<Option<Contract>, ContractStoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let row = sqlx::query(
            r#"
            SELECT contract_number, product_group, counterparty, direction, incoterm,
                   total_qty_mt, delivered_qty_mt
            FROM contracts
            WHERE product_group = ? AND contract_number = ?
            "#,
        )
        .bind(group.as_str())
        .bind(contract_number)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut contract = contract_from_row(&row)?;
        contract.delivered_qty_mt += qty;

        sqlx::query(
            "UPDATE contracts SET delivered_qty_mt = ?, updated_at = ? WHERE product_group = ? AND contract_number = ?",
        )
        .bind(contract.delivered_qty_mt.to_canonical_string())
        .bind(at.as_ms())
        .bind(group.as_str())
        .bind(contract_number)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        sqlx::query(
            "INSERT INTO contract_deliveries (product_group, contract_number, qty_mt, delivered_at) VALUES (?, ?, ?, ?)",
        )
        .bind(group.as_str())
        .bind(contract_number)
        .bind(qty.to_canonical_string())
        .bind(at.as_ms())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;

        tracing::info!(
            group = %group,
            contract = %contract_number,
            qty_mt = %qty,
            delivered_mt = %contract.delivered_qty_mt,
            "delivery recorded"
        );
        Ok(Some(contract))
    }

    /// Take a contract out of the active set. Returns false if it was not
    /// active.
    ///
    /// # Errors
    /// Returns an error if the update fails.
    pub async fn close_contract(&self, group: ProductGroup, contract_number: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE contracts SET active = 0, updated_at = ? WHERE product_group = ? AND contract_number = ? AND active = 1",
        )
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(group.as_str())
        .bind(contract_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn backend(err: sqlx::Error) -> ContractStoreError {
    ContractStoreError::Backend(err.to_string())
}

fn contract_from_row(row: &SqliteRow) -> Result<Contract, ContractStoreError> {
    let number: String = row.get("contract_number");
    let invalid = |what: &str, detail: String| {
        ContractStoreError::InvalidRow(format!("{}: {} ({})", number, what, detail))
    };
    let group: String = row.get("product_group");
    let direction: String = row.get("direction");
    let incoterm: String = row.get("incoterm");
    let total: String = row.get("total_qty_mt");
    let delivered: String = row.get("delivered_qty_mt");

    Ok(Contract {
        product_group: group
            .parse::<ProductGroup>()
            .map_err(|e| invalid("product_group", e.to_string()))?,
        counterparty: row.get("counterparty"),
        direction: direction
            .parse::<Direction>()
            .map_err(|e| invalid("direction", e))?,
        incoterm: incoterm
            .parse::<Incoterm>()
            .map_err(|e| invalid("incoterm", e))?,
        total_qty_mt: Tonnes::parse(&total).map_err(|e| invalid("total_qty_mt", e.to_string()))?,
        delivered_qty_mt: Tonnes::parse(&delivered)
            .map_err(|e| invalid("delivered_qty_mt", e.to_string()))?,
        contract_number: number.clone(),
    })
}

#[async_trait]
impl ContractStore for Repository {
    async fn active_contracts(&self, group: ProductGroup) -> Result<Vec<Contract>, ContractStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT contract_number, product_group, counterparty, direction, incoterm,
                   total_qty_mt, delivered_qty_mt
            FROM contracts
            WHERE product_group = ? AND active = 1
            ORDER BY contract_number ASC
            "#,
        )
        .bind(group.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(contract_from_row).collect()
    }
}
