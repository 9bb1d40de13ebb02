//! Core data model for socketpipe

use std::fmt;
use std::net::Shutdown;
use std::process::ExitStatus;
use std::time::Duration;

use crate::error::SocketpipeError;
use crate::roles::RoleSet;

/// An immutable program-plus-arguments vector naming one pluggable program.
///
/// Token boundaries are preserved exactly as given; nothing is ever
/// re-split or shell-quoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCommand(Vec<String>);

impl RoleCommand {
    /// Create a role command; an empty vector is a usage error
    pub fn new<I, S>(tokens: I) -> Result<Self, SocketpipeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(SocketpipeError::usage("command can not be empty"));
        }
        Ok(Self(tokens))
    }

    /// The program to run
    pub fn program(&self) -> &str {
        &self.0[0]
    }

    /// Arguments following the program
    pub fn args(&self) -> &[String] {
        &self.0[1..]
    }

    /// All tokens, program first
    pub fn tokens(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for RoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// The processes the client coordinator tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Remote login child that relays the rendezvous address
    Gateway,
    /// Local input-producer, writes into the connection
    Producer,
    /// Local output-consumer, reads from the connection
    Consumer,
}

impl Role {
    /// The connection direction released when this role completes
    pub fn half_close(self) -> Option<Direction> {
        match self {
            Role::Gateway => None,
            Role::Producer => Some(Direction::Write),
            Role::Consumer => Some(Direction::Read),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Gateway => write!(f, "gateway"),
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

/// One independently closable direction of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl From<Direction> for Shutdown {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Read => Shutdown::Read,
            Direction::Write => Shutdown::Write,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "SHUT_RD"),
            Direction::Write => write!(f, "SHUT_WR"),
        }
    }
}

/// Where the server coordinator must connect back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendezvousAddress {
    /// Address of the client as seen by the remote host
    pub host: String,
    /// Ephemeral port the client is listening on
    pub port: u16,
}

impl RendezvousAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The `-s <address> <port>` positional tokens understood by the server
    pub fn server_args(&self) -> [String; 3] {
        ["-s".to_string(), self.host.clone(), self.port.to_string()]
    }
}

impl fmt::Display for RendezvousAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable description of one client invocation
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    /// Local input-producer
    pub input: Option<RoleCommand>,
    /// Local output-consumer
    pub output: Option<RoleCommand>,
    /// Command run on the remote host with its stdio on the connection
    pub remote: RoleCommand,
    /// Remote-execution mechanism used to launch the server
    pub login: RoleCommand,
    /// Keep the gateway away from the coordinator's stdin/stdout
    pub batch: bool,
    /// Accept timeout; `None` waits forever
    pub timeout: Option<Duration>,
    /// Explicit address to advertise instead of probing for it
    pub local_address: Option<String>,
}

impl PipelineSpec {
    /// Validate resolved roles into a pipeline description.
    ///
    /// Requires the remote and login commands and at least one of the
    /// producer or consumer.
    pub fn new(
        roles: RoleSet,
        batch: bool,
        timeout: Option<Duration>,
        local_address: Option<String>,
    ) -> Result<Self, SocketpipeError> {
        roles.validate()?;
        let RoleSet {
            input,
            output,
            remote: Some(remote),
            login: Some(login),
        } = roles
        else {
            return Err(SocketpipeError::usage("must specify remote command"));
        };

        Ok(Self {
            input,
            output,
            remote,
            login,
            batch,
            timeout: timeout.filter(|t| !t.is_zero()),
            local_address,
        })
    }

    /// The role whose status becomes the pipeline's exit status
    pub fn authoritative_role(&self) -> Role {
        if self.output.is_some() {
            Role::Consumer
        } else {
            Role::Gateway
        }
    }
}

/// Final outcome of a client invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineResult {
    /// Role whose status was propagated
    pub role: Role,
    /// Exit code, 128+signal for signal termination
    pub status: i32,
}

/// Map a child's exit status to a shell-style exit code.
///
/// Normal exit yields the code, termination by a signal yields 128+signal.
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
