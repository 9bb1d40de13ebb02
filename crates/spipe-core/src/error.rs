//! Core error types for socketpipe

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Exit code for command-line misuse (no resource acquired yet)
pub const EXIT_USAGE: i32 = 1;

/// Exit code for any fatal runtime failure
pub const EXIT_FATAL: i32 = 2;

/// Top-level error type for socketpipe.
///
/// Every variant except [`SocketpipeError::Usage`] is fatal: the process
/// reports it and exits with [`EXIT_FATAL`]. Nothing is retried.
#[derive(Error, Debug)]
pub enum SocketpipeError {
    /// Malformed command line
    #[error("{0}")]
    Usage(String),

    /// The probe run through the login command did not yield an address
    #[error("error executing [{command}] to get our IP address: {reason}")]
    AddressResolution { command: String, reason: String },

    /// socket/bind/listen/accept/setsockopt/shutdown failure
    #[error("{op} failed: {source}")]
    Socket {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Server-side connect-back failure
    #[error("connect({address}) failed: {source}")]
    Connection {
        address: String,
        #[source]
        source: io::Error,
    },

    /// Spawning or exec'ing a role program failed
    #[error("execution of {program} failed: {source}")]
    Execution {
        program: String,
        #[source]
        source: io::Error,
    },

    /// No peer connected back within the accept timeout
    #[error("client connection timeout of {}s expired", .0.as_secs())]
    Timeout(Duration),

    /// Backing up or replacing a standard stream failed
    #[error("{op} failed: {source}")]
    Redirect {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Observing a child's completion failed
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SocketpipeError {
    /// Build a usage error from a message
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Build a socket error for the named operation
    pub fn socket(op: &'static str, source: io::Error) -> Self {
        Self::Socket { op, source }
    }

    /// Build an execution error for the named program
    pub fn execution(program: impl Into<String>, source: io::Error) -> Self {
        Self::Execution {
            program: program.into(),
            source,
        }
    }

    /// Build a redirection error for the named operation
    pub fn redirect(op: &'static str, source: io::Error) -> Self {
        Self::Redirect { op, source }
    }

    /// Whether this is a command-line usage error
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Self::Usage(_) | Self::Config(ConfigError::NotFound(_))
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_usage() {
            EXIT_USAGE
        } else {
            EXIT_FATAL
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file explicitly requested but not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_exit_code() {
        assert_eq!(SocketpipeError::usage("invalid option").exit_code(), 1);
        assert_eq!(
            SocketpipeError::Config(ConfigError::NotFound(PathBuf::from("/nope"))).exit_code(),
            1
        );
    }

    #[test]
    fn test_fatal_exit_code() {
        let err = SocketpipeError::socket("listen", io::Error::from(io::ErrorKind::AddrInUse));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(SocketpipeError::Timeout(Duration::from_secs(3)).exit_code(), 2);
    }

    #[test]
    fn test_messages_carry_os_error() {
        let err = SocketpipeError::execution(
            "no-such-program",
            io::Error::from(io::ErrorKind::NotFound),
        );
        let msg = err.to_string();
        assert!(msg.starts_with("execution of no-such-program failed: "));
        assert!(msg.len() > "execution of no-such-program failed: ".len());

        let err = SocketpipeError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "client connection timeout of 5s expired");
    }
}
