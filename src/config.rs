use std::{env, fs, path::PathBuf};

use crate::error::SyncError;
use crate::interval::month::{month, Month};

/// First month with interval data at the utility.
pub fn default_epoch() -> Month {
    month(2020, 10)
}

/// Parse a download limit, which has to be at least 1.
pub fn parse_max_concurrency(s: &str) -> Result<usize, SyncError> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err(SyncError::Config(
            "max concurrency must be positive".to_string(),
        )),
        Ok(n) => Ok(n),
        Err(e) => Err(SyncError::Config(format!(
            "can't parse max concurrency {:?}: {}",
            s, e
        ))),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Directory with one file per month
    pub data_dir: PathBuf,
    /// File with the account password, nothing else
    pub password_file: PathBuf,
    /// Where to start when the data directory is empty
    pub epoch: Month,
    pub username: String,
    /// Max number of months downloaded at the same time.  All of them if `None`.
    pub max_concurrent_downloads: Option<usize>,
}

impl SyncConfig {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        password_file: impl Into<PathBuf>,
        username: &str,
    ) -> Self {
        SyncConfig {
            data_dir: data_dir.into(),
            password_file: password_file.into(),
            epoch: default_epoch(),
            username: username.to_string(),
            max_concurrent_downloads: None,
        }
    }

    /// Read the settings from the environment.  Only `PGE_USERNAME` is required.
    ///  - PGE_USERNAME
    ///  - PGE_PASSWORD_FILE, defaults to `password`
    ///  - INTERVAL_DATA_DIR, defaults to `interval_data`
    ///  - SYNC_EPOCH, e.g. `2020-10`
    ///  - SYNC_MAX_CONCURRENCY
    pub fn from_env() -> Result<SyncConfig, SyncError> {
        SyncConfig::from_env_with_username(None)
    }

    /// Same as [SyncConfig::from_env], `username` takes precedence over `PGE_USERNAME`.
    pub fn from_env_with_username(username: Option<String>) -> Result<SyncConfig, SyncError> {
        let username = match username {
            Some(username) => username,
            None => env::var("PGE_USERNAME")
                .map_err(|_| SyncError::Config("PGE_USERNAME is not set".to_string()))?,
        };
        let mut config = SyncConfig::new(
            env::var("INTERVAL_DATA_DIR").unwrap_or_else(|_| "interval_data".to_string()),
            env::var("PGE_PASSWORD_FILE").unwrap_or_else(|_| "password".to_string()),
            &username,
        );
        if let Ok(epoch) = env::var("SYNC_EPOCH") {
            config.epoch = epoch.parse()?;
        }
        if let Ok(n) = env::var("SYNC_MAX_CONCURRENCY") {
            config.max_concurrent_downloads = Some(parse_max_concurrency(&n)?);
        }
        Ok(config)
    }

    /// Read the password, without the trailing newline.
    pub fn password(&self) -> Result<String, SyncError> {
        let contents =
            fs::read_to_string(&self.password_file).map_err(|source| SyncError::Credential {
                path: self.password_file.clone(),
                source,
            })?;
        Ok(contents.trim_end().to_string())
    }
}
