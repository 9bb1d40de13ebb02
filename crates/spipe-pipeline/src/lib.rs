//! spipe-pipeline: local process plumbing for socketpipe
//!
//! Binds the producer and consumer to the rendezvous connection, tracks
//! every child to completion, and turns their statuses into the pipeline's
//! exit status.

pub mod launcher;
pub mod lifecycle;

pub use launcher::{Pipeline, TrackedChild};
pub use lifecycle::LifecycleTracker;

use spipe_core::config::ClientConfig;
use spipe_core::{PipelineResult, PipelineSpec, SocketpipeError};
use spipe_rendezvous::{detach_stdin, ClientCoordinator};

/// Run one client invocation end to end.
///
/// Reserves stdin for the producer, performs the rendezvous, launches the
/// pipeline and waits for it. Any error is fatal; children still running
/// when it is returned are killed.
pub async fn run_client(
    spec: &PipelineSpec,
    config: &ClientConfig,
) -> Result<PipelineResult, SocketpipeError> {
    let input = detach_stdin(spec.batch)?;
    if input.is_detached() {
        tracing::debug!("Standard input reserved for the producer");
    }

    let coordinator =
        ClientCoordinator::new(spec, config.remote_program.as_str(), config.address_probe.as_str());
    let rendezvous = coordinator.rendezvous().await?;

    let pipeline = Pipeline::launch(spec, rendezvous, input)?;
    pipeline.wait().await
}
