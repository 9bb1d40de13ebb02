//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;

/// Program name the remote host runs to connect back
pub const DEFAULT_REMOTE_PROGRAM: &str = "socketpipe";

/// Remote shell snippet printing the client address of the login session.
///
/// OpenSSH sets `SSH_CLIENT` to "address port localport"; the first word is
/// how the remote end sees us.
pub const DEFAULT_ADDRESS_PROBE: &str = "set -- $SSH_CLIENT && echo $1";

/// Configuration for a client invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Name or path of socketpipe on the remote host
    pub remote_program: String,

    /// Command run through the login method to learn our address
    pub address_probe: String,

    /// Accept timeout in seconds, 0 waits forever
    #[serde(with = "duration_secs")]
    pub accept_timeout: Duration,

    /// Run the login method in batch mode
    pub batch: bool,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_program: DEFAULT_REMOTE_PROGRAM.to_string(),
            address_probe: DEFAULT_ADDRESS_PROBE.to_string(),
            accept_timeout: Duration::ZERO,
            batch: false,
            log_level: "warn".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load the configuration.
    ///
    /// An explicitly named file must exist; the default file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => super::load_config(path),
            None => {
                let path = super::default_config_path();
                match super::load_config(&path) {
                    Err(ConfigError::NotFound(_)) => Ok(Self::default()),
                    other => other,
                }
            }
        }
    }

    /// Accept timeout, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        (!self.accept_timeout.is_zero()).then_some(self.accept_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.remote_program, "socketpipe");
        assert_eq!(config.timeout(), None);
        assert!(!config.batch);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "remote_program = \"/opt/bin/socketpipe\"\naccept_timeout = 30\n",
        )
        .unwrap();

        let config = ClientConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.remote_program, "/opt/bin/socketpipe");
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.address_probe, DEFAULT_ADDRESS_PROBE);
    }

    #[test]
    fn test_explicit_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ClientConfig::load(Some(dir.path().join("missing.toml").as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "batch = \"sometimes\"").unwrap();
        assert!(matches!(
            ClientConfig::load(Some(path.as_path())),
            Err(ConfigError::Parse(_))
        ));
    }
}
