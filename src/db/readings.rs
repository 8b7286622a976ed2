// Readings are stored as a MessagePack array of f64, one value per interval.

use crate::error::SyncError;

pub fn encode(readings: &[f64]) -> Result<Vec<u8>, SyncError> {
    Ok(rmp_serde::to_vec(readings)?)
}

pub fn decode(bytes: &[u8]) -> Result<Vec<f64>, SyncError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
