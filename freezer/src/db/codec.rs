//! Wrapping of archive bytes into the `data_blob` column.
//!
//! A blob is a map from storage id to raw archive bytes. The engine only
//! depends on [`BlobCodec`]; [`BincodeCodec`] is the default encoding.

use crate::utils::errors::{FreezerError, Result};
use std::collections::HashMap;

pub type Payload = HashMap<String, Vec<u8>>;

pub trait BlobCodec: Send + Sync {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> Result<Payload>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BlobCodec for BincodeCodec {
    fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        bincode::serialize(payload).map_err(|e| FreezerError::Codec(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Payload> {
        // NULL or empty column
        if data.is_empty() {
            return Ok(Payload::new());
        }
        bincode::deserialize(data).map_err(|e| FreezerError::Codec(e.to_string()))
    }
}
