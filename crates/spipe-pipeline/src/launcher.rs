//! Pipeline launcher
//!
//! Spawns the local producer and consumer with one standard stream each on
//! the accepted connection, then drives the lifecycle tracker until every
//! child (gateway included) has completed.

use std::net::TcpStream;
use std::os::fd::OwnedFd;
use std::process::{ExitStatus, Stdio};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::process::{Child, Command};

use spipe_core::{PipelineResult, PipelineSpec, Role, RoleCommand, SocketpipeError};
use spipe_rendezvous::{ProducerInput, Rendezvous};

use crate::lifecycle::LifecycleTracker;

/// A running child and the role it plays
#[derive(Debug)]
pub struct TrackedChild {
    pub role: Role,
    pub child: Child,
}

/// Every process of one invocation, bound to the connection
#[derive(Debug)]
pub struct Pipeline {
    children: Vec<TrackedChild>,
    tracker: LifecycleTracker,
}

impl Pipeline {
    /// Spawn the producer and consumer configured in `spec`.
    ///
    /// The producer writes into the connection and reads `input`; the
    /// consumer reads from the connection and writes to our stdout. A role
    /// that is not configured gets no stand-in process.
    pub fn launch(
        spec: &PipelineSpec,
        rendezvous: Rendezvous,
        input: ProducerInput,
    ) -> Result<Self, SocketpipeError> {
        let Rendezvous {
            gateway,
            connection,
        } = rendezvous;
        let mut children = vec![TrackedChild {
            role: Role::Gateway,
            child: gateway,
        }];

        if let Some(command) = &spec.input {
            let stdin = match input {
                ProducerInput::Detached(fd) => Stdio::from(fd),
                ProducerInput::Inherited => Stdio::inherit(),
            };
            let stdout = Stdio::from(share(&connection, "input process output redirection")?);
            children.push(spawn(Role::Producer, command, stdin, stdout)?);
        }

        if let Some(command) = &spec.output {
            let stdin = Stdio::from(share(&connection, "output process input redirection")?);
            children.push(spawn(Role::Consumer, command, stdin, Stdio::inherit())?);
        }

        let tracker = LifecycleTracker::new(connection, spec.authoritative_role(), children.len());
        Ok(Self { children, tracker })
    }

    /// Roles that were spawned
    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.children.iter().map(|c| c.role)
    }

    /// Wait for every child, shutting down each connection direction as its
    /// owner completes.
    ///
    /// On error the remaining children are killed as they are dropped.
    pub async fn wait(self) -> Result<PipelineResult, SocketpipeError> {
        let Pipeline {
            children,
            mut tracker,
        } = self;

        let mut pending: FuturesUnordered<_> = children
            .into_iter()
            .map(|TrackedChild { role, mut child }| async move {
                let status: std::io::Result<ExitStatus> = child.wait().await;
                (role, status)
            })
            .collect();

        while let Some((role, status)) = pending.next().await {
            let status = status.map_err(SocketpipeError::Wait)?;
            tracker.on_completion(role, status)?;
        }

        let result = tracker.finish()?;
        tracing::info!("Pipeline finished with status {} from {}", result.status, result.role);
        Ok(result)
    }
}

/// Another handle on the connection for a child's standard stream
fn share(connection: &TcpStream, op: &'static str) -> Result<OwnedFd, SocketpipeError> {
    connection
        .try_clone()
        .map(OwnedFd::from)
        .map_err(|e| SocketpipeError::redirect(op, e))
}

fn spawn(
    role: Role,
    command: &RoleCommand,
    stdin: Stdio,
    stdout: Stdio,
) -> Result<TrackedChild, SocketpipeError> {
    let child = Command::new(command.program())
        .args(command.args())
        .stdin(stdin)
        .stdout(stdout)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SocketpipeError::execution(command.program(), e))?;
    tracing::debug!(pid = child.id(), "Spawned {}: {}", role, command);
    Ok(TrackedChild { role, child })
}
