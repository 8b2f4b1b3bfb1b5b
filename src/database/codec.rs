//! Record encoding for stored transaction logs: one JSON document per transaction.

use crate::database::Record;
use crate::models::Transaction;

pub fn encode_transactions(txs: &[Transaction]) -> Result<Vec<Record>, serde_json::Error> {
    txs.iter().map(serde_json::to_vec).collect()
}

pub fn decode_transactions(records: &[Record]) -> Result<Vec<Transaction>, serde_json::Error> {
    records.iter().map(|record| serde_json::from_slice(record)).collect()
}

/// Append `new_txs` to an existing log, preserving order
pub fn append_records(mut records: Vec<Record>, new_txs: &[Transaction]) -> Result<Vec<Record>, serde_json::Error> {
    records.reserve(new_txs.len());
    for tx in new_txs {
        records.push(serde_json::to_vec(tx)?);
    }
    Ok(records)
}
