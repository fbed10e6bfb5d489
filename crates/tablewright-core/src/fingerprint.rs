//! Table fingerprints.
//!
//! A fingerprint is the lowercase hex SHA-256 of the JSON encoding of a
//! table's `spec.schema`. Field order is fixed by the type definitions, so
//! equal schemas always hash equal.

use sha2::{Digest, Sha256};

use crate::types::TableSchema;

pub fn fingerprint(schema: &TableSchema) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(schema)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
