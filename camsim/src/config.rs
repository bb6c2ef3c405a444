//! Runtime configuration, read from the environment
//!
//! Device identity and the GATT table are constants in `camsim_proto`; only
//! where the simulator writes its command log can be changed at runtime.

use std::path::PathBuf;

/// Overrides the command log path
pub const COMMAND_LOG_ENV: &str = "CAMSIM_COMMAND_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub command_log: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let command_log = lookup(COMMAND_LOG_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(camsim_proto::COMMAND_LOG_FILE));

        Self { command_log }
    }
}
