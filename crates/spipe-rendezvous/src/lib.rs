//! spipe-rendezvous: address exchange and connection setup for socketpipe
//!
//! The client side listens on an ephemeral port and relays its address
//! through the login command; the server side, started by that login
//! command on the remote host, connects back and becomes the remote command.

pub mod client;
pub mod server;
pub mod stdio;
pub mod transport;

pub use client::{ClientCoordinator, Listening, Rendezvous};
pub use server::{run_server, ServerInvocation};
pub use stdio::{detach_stdin, ProducerInput};
pub use transport::acquire_transport_socket;
