//! Contract position book and contract-set content hashing.

use crate::domain::{
    Contract, ContractConstraint, ConstraintSet, Direction, Incoterm, ProductGroup, Tonnes,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One open contract line inside a counterparty position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLine {
    pub contract_number: String,
    pub direction: Direction,
    pub incoterm: Incoterm,
    pub total_qty_mt: Tonnes,
    pub delivered_qty_mt: Tonnes,
    pub open_qty_mt: Tonnes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterpartyPosition {
    pub purchase_open: Tonnes,
    pub sale_open: Tonnes,
    pub lines: Vec<PositionLine>,
}

impl CounterpartyPosition {
    /// Purchase minus sale open tonnage for this counterparty.
    pub fn net(&self) -> Tonnes {
        self.purchase_open - self.sale_open
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSummary {
    pub product_group: ProductGroup,
    pub positions: BTreeMap<String, CounterpartyPosition>,
    pub total_purchase_open: Tonnes,
    pub total_sale_open: Tonnes,
    pub net_position: Tonnes,
}

/// Aggregate a contract set into per-counterparty open positions.
///
/// Contracts from other product groups are ignored.
pub fn book_summary(group: ProductGroup, contracts: &[Contract]) -> BookSummary {
    let mut positions: BTreeMap<String, CounterpartyPosition> = BTreeMap::new();
    let mut total_purchase_open = Tonnes::zero();
    let mut total_sale_open = Tonnes::zero();

    for c in contracts.iter().filter(|c| c.product_group == group) {
        let open = c.open_qty_mt();
        let entry = positions.entry(c.counterparty.clone()).or_default();
        match c.direction {
            Direction::Purchase => {
                entry.purchase_open += open;
                total_purchase_open += open;
            }
            Direction::Sale => {
                entry.sale_open += open;
                total_sale_open += open;
            }
        }
        entry.lines.push(PositionLine {
            contract_number: c.contract_number.clone(),
            direction: c.direction,
            incoterm: c.incoterm,
            total_qty_mt: c.total_qty_mt,
            delivered_qty_mt: c.delivered_qty_mt,
            open_qty_mt: open,
        });
    }

    for position in positions.values_mut() {
        position
            .lines
            .sort_by(|a, b| a.contract_number.cmp(&b.contract_number));
    }

    BookSummary {
        product_group: group,
        positions,
        total_purchase_open,
        total_sale_open,
        net_position: total_purchase_open - total_sale_open,
    }
}

/// Order-independent content hash of a contract set.
///
/// Contracts are sorted by number and every field is length-prefixed before
/// hashing. Tonnage goes through its canonical text form, so `1500.0` and
/// `1500` hash the same.
pub fn content_hash(contracts: &[Contract]) -> String {
    use sha2::{Digest, Sha256};

    fn hash_var(hasher: &mut Sha256, data: &str) {
        hasher.update((data.len() as u32).to_le_bytes());
        hasher.update(data.as_bytes());
    }

    let mut sorted: Vec<&Contract> = contracts.iter().collect();
    sorted.sort_by(|a, b| {
        a.contract_number
            .cmp(&b.contract_number)
            .then_with(|| a.counterparty.cmp(&b.counterparty))
    });

    let mut hasher = Sha256::new();
    hasher.update((sorted.len() as u64).to_le_bytes());
    for c in sorted {
        hash_var(&mut hasher, &c.contract_number);
        hash_var(&mut hasher, &c.counterparty);
        hash_var(&mut hasher, c.product_group.as_str());
        hash_var(&mut hasher, c.direction.as_str());
        hash_var(&mut hasher, c.incoterm.as_str());
        hash_var(&mut hasher, &c.total_qty_mt.to_canonical_string());
        hash_var(&mut hasher, &c.delivered_qty_mt.to_canonical_string());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Solver bounds for the active contract set. Fully delivered contracts
/// carry no obligation and are left out.
pub fn constraint_set(group: ProductGroup, contracts: &[Contract], route_keys: Vec<String>) -> ConstraintSet {
    let mut open: Vec<ContractConstraint> = contracts
        .iter()
        .filter(|c| c.product_group == group && !c.open_qty_mt().is_zero())
        .map(|c| ContractConstraint {
            contract_number: c.contract_number.clone(),
            counterparty: c.counterparty.clone(),
            direction: c.direction,
            open_qty_mt: c.open_qty_mt(),
        })
        .collect();
    open.sort_by(|a, b| a.contract_number.cmp(&b.contract_number));

    ConstraintSet {
        product_group: group,
        contract_hash: content_hash(contracts),
        contracts: open,
        route_keys,
    }
}
