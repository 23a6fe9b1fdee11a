//! Physical contracts as read from the contract store.

use super::decimal::Tonnes;
use super::primitives::ProductGroup;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Purchase,
    Sale,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Purchase => "purchase",
            Direction::Sale => "sale",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "purchase" | "buy" => Ok(Direction::Purchase),
            "sale" | "sell" => Ok(Direction::Sale),
            other => Err(format!("unknown direction: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Incoterm {
    Fob,
    Cfr,
    Cif,
    Dap,
    Ddp,
    Fca,
    Exw,
}

impl Incoterm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Incoterm::Fob => "FOB",
            Incoterm::Cfr => "CFR",
            Incoterm::Cif => "CIF",
            Incoterm::Dap => "DAP",
            Incoterm::Ddp => "DDP",
            Incoterm::Fca => "FCA",
            Incoterm::Exw => "EXW",
        }
    }
}

impl fmt::Display for Incoterm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Incoterm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FOB" => Ok(Incoterm::Fob),
            "CFR" => Ok(Incoterm::Cfr),
            "CIF" => Ok(Incoterm::Cif),
            "DAP" => Ok(Incoterm::Dap),
            "DDP" => Ok(Incoterm::Ddp),
            "FCA" => Ok(Incoterm::Fca),
            "EXW" => Ok(Incoterm::Exw),
            other => Err(format!("unknown incoterm: {}", other)),
        }
    }
}

/// An active contract line for one product group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_number: String,
    pub counterparty: String,
    pub product_group: ProductGroup,
    pub direction: Direction,
    pub incoterm: Incoterm,
    pub total_qty_mt: Tonnes,
    pub delivered_qty_mt: Tonnes,
}

impl Contract {
    /// Remaining undelivered quantity; never negative even when a contract
    /// was over-delivered.
    pub fn open_qty_mt(&self) -> Tonnes {
        (self.total_qty_mt - self.delivered_qty_mt).non_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_qty_never_negative() {
        let c = Contract {
            contract_number: "P-1".to_string(),
            counterparty: "Koch".to_string(),
            product_group: ProductGroup::AmmoniaDomestic,
            direction: Direction::Purchase,
            incoterm: Incoterm::Fob,
            total_qty_mt: Tonnes::from(1000),
            delivered_qty_mt: Tonnes::from(1200),
        };
        assert_eq!(c.open_qty_mt(), Tonnes::zero());
    }

    #[test]
    fn test_parse_direction_and_incoterm() {
        assert_eq!("Sale".parse::<Direction>().unwrap(), Direction::Sale);
        assert_eq!("buy".parse::<Direction>().unwrap(), Direction::Purchase);
        assert_eq!("cif".parse::<Incoterm>().unwrap(), Incoterm::Cif);
        assert!("XYZ".parse::<Incoterm>().is_err());
    }
}
