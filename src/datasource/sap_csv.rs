//! SAP open-position export import.
//!
//! Expected header:
//! `contract_number,counterparty,direction,incoterm,total_qty_mt,delivered_qty_mt`

use crate::domain::{Contract, Direction, Incoterm, ProductGroup, Tonnes};
use std::io::Read;
use thiserror::Error;

/// Error type for export parsing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CsvImportError {
    /// Unreadable input or a missing header column
    #[error("csv error: {0}")]
    Csv(String),
    /// A row with a bad direction, incoterm or quantity; `line` is 1-based
    /// and counts the header
    #[error("line {line}: {message}")]
    InvalidRow { line: u64, message: String },
}

#[derive(Debug, serde::Deserialize)]
struct Row {
    contract_number: String,
    counterparty: String,
    direction: String,
    incoterm: String,
    total_qty_mt: String,
    #[serde(default)]
    delivered_qty_mt: Option<String>,
}

fn quantity(raw: &str, field: &str) -> Result<Tonnes, String> {
    // SAP exports thousands separators.
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != ' ').collect();
    let qty = Tonnes::parse(&cleaned).map_err(|e| format!("invalid {}: {}", field, e))?;
    if qty.is_negative() {
        return Err(format!("{} must not be negative", field));
    }
    Ok(qty)
}

fn parse_row(row: Row, group: ProductGroup) -> Result<Contract, String> {
    let contract_number = row.contract_number.trim().to_string();
    if contract_number.is_empty() {
        return Err("empty contract_number".to_string());
    }
    let direction: Direction = row.direction.parse()?;
    let incoterm: Incoterm = row.incoterm.parse()?;
    let total_qty_mt = quantity(&row.total_qty_mt, "total_qty_mt")?;
    let delivered_qty_mt = match row.delivered_qty_mt.as_deref().map(str::trim) {
        None | Some("") => Tonnes::zero(),
        Some(raw) => quantity(raw, "delivered_qty_mt")?,
    };
    Ok(Contract {
        contract_number,
        counterparty: row.counterparty.trim().to_string(),
        product_group: group,
        direction,
        incoterm,
        total_qty_mt,
        delivered_qty_mt,
    })
}

/// Parse an open-position export into contracts of `group`. The first bad
/// row aborts the import.
///
/// Quantities may carry thousands separators. An empty `delivered_qty_mt`
/// reads as zero.
///
/// # Errors
/// `Csv` when the reader or header fails, `InvalidRow` with the line number
/// of the first row that does not convert.
pub fn parse_open_positions<R: Read>(reader: R, group: ProductGroup) -> Result<Vec<Contract>, CsvImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| CsvImportError::Csv(e.to_string()))?
        .clone();
    let mut record = csv::StringRecord::new();
    let mut contracts = Vec::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(CsvImportError::Csv(e.to_string())),
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let invalid = |message: String| CsvImportError::InvalidRow { line, message };
        let row: Row = record
            .deserialize(Some(&headers))
            .map_err(|e| invalid(e.to_string()))?;
        contracts.push(parse_row(row, group).map_err(invalid)?);
    }
    tracing::info!(group = %group, contracts = contracts.len(), "imported open positions");
    Ok(contracts)
}
