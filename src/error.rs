use std::{io, path::PathBuf};

use itertools::Itertools;
use thiserror::Error;

use crate::interval::month::{Month, MonthParseError};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Can't read password from {}: {source}", .path.display())]
    Credential { path: PathBuf, source: io::Error },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed usage export: {0}")]
    Export(String),

    #[error("Malformed usage export: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Malformed usage export: {0}")]
    Csv(#[from] csv::Error),

    /// A file in the data directory that is not a `YYYY-MM.msgpack` artifact.
    #[error("Unexpected file {name:?} in {}: {reason}", .dir.display())]
    MalformedArtifact {
        name: String,
        dir: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Failed to encode readings: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode readings: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Month(#[from] MonthParseError),

    #[error("Failed to sync {} month(s): {}", .0.len(), join_failures(.0))]
    MonthsFailed(Vec<(Month, String)>),
}

fn join_failures(failures: &[(Month, String)]) -> String {
    failures
        .iter()
        .map(|(month, reason)| format!("{} ({})", month, reason))
        .join(", ")
}
