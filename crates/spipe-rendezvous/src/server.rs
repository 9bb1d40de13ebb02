//! Server rendezvous coordinator
//!
//! Runs on the remote host as `socketpipe -s <address> <port> <command...>`.
//! Connects back to the client, puts the connection on both stdin and
//! stdout, and replaces itself with the remote command.

use std::convert::Infallible;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};

use spipe_core::{RendezvousAddress, RoleCommand, SocketpipeError};

use crate::transport;

/// A parsed server-side invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInvocation {
    /// Where the client is listening
    pub address: RendezvousAddress,
    /// The remote command to hand the connection to
    pub command: RoleCommand,
}

impl ServerInvocation {
    /// Parse the positional arguments following `-s`.
    ///
    /// The port must be a plain decimal number that fits in 16 bits.
    pub fn parse(args: &[String]) -> Result<Self, SocketpipeError> {
        let [host, port, command @ ..] = args else {
            return Err(SocketpipeError::usage(
                "server mode expects an address, a port and a command",
            ));
        };
        if command.is_empty() {
            return Err(SocketpipeError::usage("server mode expects a command"));
        }

        let port = parse_port(port)?;
        Ok(Self {
            address: RendezvousAddress::new(host.clone(), port),
            command: RoleCommand::new(command.iter().cloned())?,
        })
    }

    /// Connect back to the client with keep-alive enabled.
    ///
    /// There is no connect timeout; the OS default applies. The returned
    /// stream is blocking, ready to become the remote command's stdio.
    pub async fn connect(&self) -> Result<TcpStream, SocketpipeError> {
        let target = resolve(&self.address).await?;
        tracing::debug!("Connecting back to {}", target);

        let socket = transport::stream_socket(&target)?;
        let stream = socket
            .connect(target)
            .await
            .map_err(|e| SocketpipeError::Connection {
                address: self.address.host.clone(),
                source: e,
            })?
            .into_std()
            .map_err(|e| SocketpipeError::socket("connection deregistration", e))?;
        stream
            .set_nonblocking(false)
            .map_err(|e| SocketpipeError::socket("fcntl(O_NONBLOCK)", e))?;
        Ok(stream)
    }

    /// Hand the connection to the remote command.
    ///
    /// On success this never returns: the process image is replaced and the
    /// command inherits the connection as its stdin and stdout.
    pub fn exec(&self, connection: TcpStream) -> Result<Infallible, SocketpipeError> {
        let input: OwnedFd = connection
            .try_clone()
            .map_err(|e| SocketpipeError::redirect("input redirection", e))?
            .into();
        let output: OwnedFd = connection.into();

        tracing::debug!("Replacing process with {}", self.command);
        let err = Command::new(self.command.program())
            .args(self.command.args())
            .stdin(Stdio::from(input))
            .stdout(Stdio::from(output))
            .exec();
        Err(SocketpipeError::execution(self.command.program(), err))
    }
}

fn parse_port(token: &str) -> Result<u16, SocketpipeError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SocketpipeError::usage(format!(
            "bad port specification: {}",
            token
        )));
    }
    token
        .parse()
        .map_err(|_| SocketpipeError::usage(format!("bad port specification: {}", token)))
}

/// Resolve a literal address or host name, preferring IPv4 since the client
/// listens on the IPv4 wildcard.
async fn resolve(address: &RendezvousAddress) -> Result<SocketAddr, SocketpipeError> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((address.host.as_str(), address.port))
        .await
        .map_err(|e| SocketpipeError::Connection {
            address: address.host.clone(),
            source: e,
        })?
        .collect();

    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| SocketpipeError::Connection {
            address: address.host.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no addresses found for host",
            ),
        })
}

/// Server entry point: connect back, redirect, exec.
pub async fn run_server(args: &[String]) -> Result<Infallible, SocketpipeError> {
    let invocation = ServerInvocation::parse(args)?;
    let connection = invocation.connect().await?;
    tracing::info!("Connected back to {}", invocation.address);
    invocation.exec(connection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_parse_invocation() {
        let inv = ServerInvocation::parse(&args("10.0.0.1 40000 tar xf -")).unwrap();
        assert_eq!(inv.address, RendezvousAddress::new("10.0.0.1", 40000));
        assert_eq!(inv.command.tokens(), ["tar", "xf", "-"]);
    }

    #[test]
    fn test_bad_port_is_usage_error() {
        for port in ["", "12ab", "-1", "+80", "65536", " 80"] {
            let mut argv = vec!["127.0.0.1".to_string(), port.to_string()];
            argv.push("cat".to_string());
            let err = ServerInvocation::parse(&argv).unwrap_err();
            assert!(err.is_usage(), "port {:?} accepted", port);
        }
    }

    #[tokio::test]
    async fn test_bad_port_never_connects() {
        // Nothing listens here; a connect attempt would yield a Connection error.
        let err = run_server(&args("127.0.0.1 80x cat")).await.unwrap_err();
        assert!(err.is_usage());
        assert_eq!(err.to_string(), "bad port specification: 80x");
    }

    #[test]
    fn test_missing_command() {
        assert!(ServerInvocation::parse(&args("127.0.0.1 4000"))
            .unwrap_err()
            .is_usage());
        assert!(ServerInvocation::parse(&args("127.0.0.1")).unwrap_err().is_usage());
    }

    #[tokio::test]
    async fn test_connect_enables_keepalive() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let inv = ServerInvocation::parse(&args(&format!("localhost {} cat", port))).unwrap();
        let stream = inv.connect().await.unwrap();
        assert!(transport::keepalive_enabled(&stream).unwrap());
        listener.accept().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = {
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let inv = ServerInvocation::parse(&args(&format!("127.0.0.1 {} cat", port))).unwrap();
        assert!(matches!(
            inv.connect().await,
            Err(SocketpipeError::Connection { .. })
        ));
    }
}
