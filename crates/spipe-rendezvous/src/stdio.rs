//! Standard input detachment
//!
//! When piped data arrives on our stdin, only the producer may consume it;
//! the gateway (and anything it runs) must see the null device instead.
//! The inherited descriptor is parked on a close-on-exec backup and handed to
//! the producer later.

use std::fs::OpenOptions;
use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use spipe_core::SocketpipeError;

/// Path of the null device
const DEV_NULL: &str = "/dev/null";

/// Where the producer's standard input comes from
#[derive(Debug)]
pub enum ProducerInput {
    /// Our stdin was left in place and is inherited as-is
    Inherited,
    /// Our stdin was moved aside; this is the only remaining handle to it
    Detached(OwnedFd),
}

impl ProducerInput {
    /// Whether stdin was moved aside
    pub fn is_detached(&self) -> bool {
        matches!(self, ProducerInput::Detached(_))
    }
}

/// Move our stdin aside if it must be reserved for the producer.
///
/// This happens in batch mode and whenever stdin is not a terminal. Fd 0 is
/// then replaced with the null device.
pub fn detach_stdin(batch: bool) -> Result<ProducerInput, SocketpipeError> {
    let stdin = io::stdin();
    if !batch && stdin.is_terminal() {
        return Ok(ProducerInput::Inherited);
    }

    // F_DUPFD_CLOEXEC: the backup leaks into no child unless handed over.
    let backup = stdin
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| SocketpipeError::redirect("stdin backup", e))?;

    let null = OpenOptions::new()
        .read(true)
        .write(true)
        .open(DEV_NULL)
        .map_err(|e| SocketpipeError::redirect("open /dev/null", e))?;

    // Safety: both descriptors are open; dup2 onto fd 0 atomically replaces it.
    if unsafe { libc::dup2(null.as_raw_fd(), libc::STDIN_FILENO) } < 0 {
        return Err(SocketpipeError::redirect(
            "stdin replacement",
            io::Error::last_os_error(),
        ));
    }

    tracing::debug!(backup_fd = backup.as_raw_fd(), "Detached stdin for the producer");
    Ok(ProducerInput::Detached(backup))
}
