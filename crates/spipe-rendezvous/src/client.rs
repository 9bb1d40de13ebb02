//! Client rendezvous coordinator
//!
//! Learns how the remote host sees us, listens on an ephemeral port, runs
//! the login command with `socketpipe -s <address> <port>` spliced in front
//! of the remote command, and accepts the single connection made back.

use std::net::TcpStream;
use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::process::{Child, Command};

use spipe_core::{PipelineSpec, RendezvousAddress, RoleCommand, SocketpipeError};

use crate::transport;

/// Outcome of a successful rendezvous
#[derive(Debug)]
pub struct Rendezvous {
    /// Login child that launched the server end
    pub gateway: Child,
    /// The single data connection, in blocking mode
    pub connection: TcpStream,
}

/// An ephemeral listening socket waiting for the connect-back
#[derive(Debug)]
pub struct Listening {
    listener: TcpListener,
    address: RendezvousAddress,
}

impl Listening {
    /// Start listening; `host` is the address advertised to the remote end.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(host: impl Into<String>) -> Result<Self, SocketpipeError> {
        let listener = transport::listen_ephemeral()?;
        let port = listener
            .local_addr()
            .map_err(|e| SocketpipeError::socket("getsockname", e))?
            .port();

        let address = RendezvousAddress::new(host, port);
        tracing::debug!("Listening for the rendezvous on port {}", port);
        Ok(Self { listener, address })
    }

    /// The address the server end must connect to
    pub fn address(&self) -> &RendezvousAddress {
        &self.address
    }

    /// Accept exactly one connection, then close the listening socket.
    ///
    /// The returned stream is blocking with keep-alive enabled, ready to be
    /// shared with child processes.
    pub async fn accept(self, timeout: Option<Duration>) -> Result<TcpStream, SocketpipeError> {
        let accepted = match timeout {
            Some(limit) => tokio::time::timeout(limit, self.listener.accept())
                .await
                .map_err(|_| SocketpipeError::Timeout(limit))?,
            None => self.listener.accept().await,
        };
        let (stream, peer) = accepted.map_err(|e| SocketpipeError::socket("accept", e))?;
        drop(self.listener);
        tracing::info!("Accepted rendezvous connection from {}", peer);

        let stream = stream
            .into_std()
            .map_err(|e| SocketpipeError::socket("connection deregistration", e))?;
        // O_NONBLOCK lives on the open file description, which children share.
        stream
            .set_nonblocking(false)
            .map_err(|e| SocketpipeError::socket("fcntl(O_NONBLOCK)", e))?;
        Ok(stream)
    }
}

/// Build `login ++ [program, "-s", host, port] ++ remote`, keeping every
/// token boundary as given.
pub fn compose_remote_invocation(
    login: &RoleCommand,
    remote_program: &str,
    address: &RendezvousAddress,
    remote: &RoleCommand,
) -> Vec<String> {
    let mut argv = Vec::with_capacity(login.tokens().len() + 4 + remote.tokens().len());
    argv.extend_from_slice(login.tokens());
    argv.push(remote_program.to_string());
    argv.extend(address.server_args());
    argv.extend_from_slice(remote.tokens());
    argv
}

/// Ask the remote session which address it sees us connecting from.
///
/// Runs `login ++ [probe]` and takes the first whitespace-delimited token
/// of its output.
pub async fn probe_address(login: &RoleCommand, probe: &str) -> Result<String, SocketpipeError> {
    let command = format!("{} {}", login, probe);
    tracing::debug!("Probing local address with [{}]", command);

    let output = Command::new(login.program())
        .args(login.args())
        .arg(probe)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SocketpipeError::AddressResolution {
            command: command.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(SocketpipeError::AddressResolution {
            command,
            reason: format!("probe {}", output.status),
        });
    }

    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .next()
        .map(str::to_string)
        .ok_or_else(|| SocketpipeError::AddressResolution {
            command,
            reason: "no address in probe output".to_string(),
        })
}

/// Drives the client side of a rendezvous for one pipeline
pub struct ClientCoordinator<'a> {
    spec: &'a PipelineSpec,
    remote_program: String,
    address_probe: String,
}

impl<'a> ClientCoordinator<'a> {
    /// Create a coordinator for the given pipeline
    pub fn new(
        spec: &'a PipelineSpec,
        remote_program: impl Into<String>,
        address_probe: impl Into<String>,
    ) -> Self {
        Self {
            spec,
            remote_program: remote_program.into(),
            address_probe: address_probe.into(),
        }
    }

    /// The explicit local address, or the one reported by the probe
    pub async fn local_address(&self) -> Result<String, SocketpipeError> {
        match &self.spec.local_address {
            Some(address) => Ok(address.clone()),
            None => {
                let address = probe_address(&self.spec.login, &self.address_probe).await?;
                tracing::info!("Remote host sees us as {}", address);
                Ok(address)
            }
        }
    }

    /// Full argument vector for the gateway
    pub fn compose(&self, address: &RendezvousAddress) -> Vec<String> {
        compose_remote_invocation(
            &self.spec.login,
            &self.remote_program,
            address,
            &self.spec.remote,
        )
    }

    /// Launch the gateway.
    ///
    /// In batch mode it gets the null device for stdin and stdout: login
    /// clients run non-interactively switch an inherited stdout to
    /// non-blocking mode, which would corrupt the consumer's output.
    pub fn spawn_gateway(&self, argv: &[String]) -> Result<Child, SocketpipeError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SocketpipeError::usage("must specify remote login method"))?;

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if self.spec.batch {
            command.stdin(Stdio::null()).stdout(Stdio::null());
        }

        let child = command
            .spawn()
            .map_err(|e| SocketpipeError::execution(program.as_str(), e))?;
        tracing::debug!(pid = child.id(), "Spawned gateway: {}", argv.join(" "));
        Ok(child)
    }

    /// Run the whole rendezvous: address, listen, gateway, accept.
    ///
    /// If the accept times out the gateway is killed before returning.
    pub async fn rendezvous(&self) -> Result<Rendezvous, SocketpipeError> {
        let host = self.local_address().await?;
        let listening = Listening::bind(host)?;
        let argv = self.compose(listening.address());
        let mut gateway = self.spawn_gateway(&argv)?;

        match listening.accept(self.spec.timeout).await {
            Ok(connection) => Ok(Rendezvous {
                gateway,
                connection,
            }),
            Err(e) => {
                if let Err(kill_err) = gateway.kill().await {
                    tracing::warn!("Failed to terminate gateway: {}", kill_err);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spipe_core::RoleSet;
    use std::io::{Read, Write};
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn cmd(tokens: &[&str]) -> RoleCommand {
        RoleCommand::new(tokens.iter().copied()).unwrap()
    }

    fn spec(login: &[&str], timeout: Option<Duration>) -> PipelineSpec {
        PipelineSpec::new(
            RoleSet {
                input: Some(cmd(&["cat"])),
                output: None,
                remote: Some(cmd(&["cat"])),
                login: Some(cmd(login)),
            },
            false,
            timeout,
            Some("127.0.0.1".to_string()),
        )
        .unwrap()
    }

    #[test]
    fn test_compose_preserves_tokens() {
        let argv = compose_remote_invocation(
            &cmd(&["ssh", "-T", "user@host"]),
            "socketpipe",
            &RendezvousAddress::new("192.0.2.1", 4321),
            &cmd(&["tar", "xf", "-", "-C", "dir with space"]),
        );
        assert_eq!(
            argv,
            [
                "ssh", "-T", "user@host", "socketpipe", "-s", "192.0.2.1", "4321", "tar", "xf",
                "-", "-C", "dir with space"
            ]
        );
    }

    #[tokio::test]
    async fn test_probe_takes_first_token() {
        let address = probe_address(&cmd(&["sh", "-c"]), "echo 192.0.2.5 51000 22")
            .await
            .unwrap();
        assert_eq!(address, "192.0.2.5");
    }

    #[tokio::test]
    async fn test_probe_failure() {
        let err = probe_address(&cmd(&["sh", "-c"]), "exit 3").await.unwrap_err();
        assert!(matches!(err, SocketpipeError::AddressResolution { .. }));
    }

    #[tokio::test]
    async fn test_probe_empty_output() {
        let err = probe_address(&cmd(&["sh", "-c"]), "true").await.unwrap_err();
        assert!(matches!(err, SocketpipeError::AddressResolution { .. }));
    }

    #[tokio::test]
    async fn test_probe_missing_login_program() {
        let err = probe_address(&cmd(&["/nonexistent/login"]), "true")
            .await
            .unwrap_err();
        assert!(matches!(err, SocketpipeError::AddressResolution { .. }));
    }

    #[tokio::test]
    async fn test_explicit_address_skips_probe() {
        let spec = spec(&["/nonexistent/login"], None);
        let coordinator = ClientCoordinator::new(&spec, "socketpipe", "exit 1");
        assert_eq!(coordinator.local_address().await.unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_accept_timeout() {
        let listening = Listening::bind("127.0.0.1").unwrap();
        let limit = Duration::from_millis(200);
        let start = Instant::now();

        let err = listening.accept(Some(limit)).await.unwrap_err();
        assert!(matches!(err, SocketpipeError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_rendezvous_timeout_kills_gateway() {
        let spec = spec(&["sh", "-c", "sleep 30"], Some(Duration::from_millis(300)));
        let coordinator = ClientCoordinator::new(&spec, "socketpipe", "");
        let start = Instant::now();

        let err = coordinator.rendezvous().await.unwrap_err();
        assert!(matches!(err, SocketpipeError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_accepted_connection_is_blocking_and_keepalive() {
        let listening = Listening::bind("127.0.0.1").unwrap();
        let port = listening.address().port;

        let peer = std::thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
            stream.write_all(b"hello").unwrap();
        });

        let mut connection = listening.accept(None).await.unwrap();
        assert!(transport::keepalive_enabled(&connection).unwrap());

        let mut received = Vec::new();
        connection.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hello");
        peer.join().unwrap();
    }
}
