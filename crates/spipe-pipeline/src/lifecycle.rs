//! Lifecycle tracking
//!
//! Consumes child completions in arrival order, releases the connection
//! direction owned by each completing role, and records the authoritative
//! exit status.

use std::io;
use std::net::TcpStream;
use std::process::ExitStatus;

use spipe_core::{exit_code, Direction, PipelineResult, Role, SocketpipeError};

/// Half-close bookkeeping for one pipeline
#[derive(Debug)]
pub struct LifecycleTracker {
    /// The coordinator's own handle on the connection
    connection: TcpStream,
    /// Role whose status becomes the pipeline's
    authoritative: Role,
    /// Children not yet collected
    outstanding: usize,
    /// Directions shut down so far, in order
    closed: Vec<Direction>,
    /// Status of the authoritative role once it completes
    result: Option<PipelineResult>,
}

impl LifecycleTracker {
    /// Start tracking `outstanding` children sharing `connection`
    pub fn new(connection: TcpStream, authoritative: Role, outstanding: usize) -> Self {
        Self {
            connection,
            authoritative,
            outstanding,
            closed: Vec::new(),
            result: None,
        }
    }

    /// Whether children remain to be collected
    pub fn is_waiting(&self) -> bool {
        self.outstanding > 0
    }

    /// Directions shut down so far
    pub fn closed(&self) -> &[Direction] {
        &self.closed
    }

    /// Record one child's completion.
    ///
    /// A producer releases the write direction, a consumer the read
    /// direction; a failed shutdown is fatal.
    pub fn on_completion(&mut self, role: Role, status: ExitStatus) -> Result<(), SocketpipeError> {
        self.outstanding = self.outstanding.saturating_sub(1);
        let code = exit_code(&status);
        tracing::debug!(%role, code, outstanding = self.outstanding, "Child completed");

        if let Some(direction) = role.half_close() {
            self.shutdown(direction)?;
        }
        if role == self.authoritative {
            self.result = Some(PipelineResult { role, status: code });
        }
        Ok(())
    }

    fn shutdown(&mut self, direction: Direction) -> Result<(), SocketpipeError> {
        let op = match direction {
            Direction::Read => "shutdown(SHUT_RD)",
            Direction::Write => "shutdown(SHUT_WR)",
        };
        match self.connection.shutdown(direction.into()) {
            Ok(()) => tracing::debug!("Connection {} done", direction),
            // The peer already tore the connection down; nothing left to release.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                tracing::debug!("Connection {} already released by peer", direction)
            }
            Err(e) => return Err(SocketpipeError::socket(op, e)),
        }
        self.closed.push(direction);
        Ok(())
    }

    /// The pipeline result, once every child has been collected
    pub fn finish(self) -> Result<PipelineResult, SocketpipeError> {
        if self.is_waiting() {
            return Err(SocketpipeError::Wait(io::Error::other(format!(
                "{} children still running",
                self.outstanding
            ))));
        }
        self.result.ok_or_else(|| {
            SocketpipeError::Wait(io::Error::other(format!(
                "no status collected for the {}",
                self.authoritative
            )))
        })
    }
}
