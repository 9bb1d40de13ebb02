//! Command-line parsing
//!
//! Role blocks (`-i { ... }` etc.) are pulled out first by the role
//! resolver; the remaining flags go through clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};

use spipe_core::config::ClientConfig;
use spipe_core::{resolve_roles, PipelineSpec, RoleSet, SocketpipeError};

/// Usage synopsis shown with usage errors and in `--help`
pub const USAGE: &str = "\
usage:\tsocketpipe [-b] [-h host] [-t timeout] [-i|o|r|l { command [args ...] }]
\t(must specify a -l and a -r command and at least one of -i or -o)";

/// What this process was asked to do
#[derive(Debug)]
pub enum Invocation {
    /// Local end: rendezvous and pipeline
    Client(ClientArgs),
    /// Remote end: `-s <address> <port> <command...>`
    Server(Vec<String>),
}

#[derive(Parser, Debug)]
#[command(name = "socketpipe")]
#[command(version, about = "Connect local and remote processes through a single TCP connection")]
#[command(disable_help_flag = true)]
#[command(after_help = USAGE)]
pub struct ClientArgs {
    /// Batch mode: keep the login command off our stdin and stdout
    #[arg(short = 'b')]
    pub batch: bool,

    /// Local address to advertise instead of asking the remote host
    #[arg(short = 'h', value_name = "HOST")]
    pub host: Option<String>,

    /// Seconds to wait for the remote end to connect back (0 waits forever)
    #[arg(short = 't', value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Path to configuration file
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Name or path of socketpipe on the remote host
    #[arg(long, value_name = "PROGRAM", env = "SOCKETPIPE_REMOTE_PROGRAM")]
    pub remote_program: Option<String>,

    /// Enable verbose output
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Role blocks, filled in by the role resolver
    #[arg(skip)]
    pub roles: RoleSet,
}

impl ClientArgs {
    /// Load the configuration file and apply command-line overrides
    pub fn load_config(&self) -> Result<ClientConfig, SocketpipeError> {
        let mut config = ClientConfig::load(self.config.as_deref())?;
        if let Some(program) = &self.remote_program {
            config.remote_program = program.clone();
        }
        if let Some(secs) = self.timeout {
            config.accept_timeout = Duration::from_secs(secs);
        }
        config.batch |= self.batch;
        Ok(config)
    }

    /// Log filter implied by -q/-v, falling back to the configured level
    pub fn log_level<'a>(&self, config: &'a ClientConfig) -> &'a str {
        match (self.quiet, self.verbose) {
            (true, _) => "error",
            (false, 0) => config.log_level.as_str(),
            (false, 1) => "info",
            (false, 2) => "debug",
            (false, _) => "trace",
        }
    }

    /// Validate the roles into an immutable pipeline description
    pub fn pipeline_spec(&self, config: &ClientConfig) -> Result<PipelineSpec, SocketpipeError> {
        PipelineSpec::new(
            self.roles.clone(),
            config.batch,
            config.timeout(),
            self.host.clone(),
        )
    }
}

/// Classify and parse the full argument vector (program name first).
///
/// Help and version requests print and exit directly, as clap does.
pub fn parse(argv: Vec<String>) -> Result<Invocation, SocketpipeError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(SocketpipeError::usage("no arguments specified"));
    };
    match args.first().map(String::as_str) {
        None => return Err(SocketpipeError::usage("no arguments specified")),
        Some("-s") => return Ok(Invocation::Server(args[1..].to_vec())),
        Some(_) => {}
    }

    let (roles, rest) = resolve_roles(args)?;
    let mut client = ClientArgs::try_parse_from(std::iter::once(program.clone()).chain(rest))
        .map_err(|e| match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => SocketpipeError::usage(clap_message(&e)),
        })?;
    client.roles = roles;
    Ok(Invocation::Client(client))
}

/// First line of a clap error without its `error: ` prefix
fn clap_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    first.strip_prefix("error: ").unwrap_or(first).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spipe_core::RendezvousAddress;
    use spipe_rendezvous::ClientCoordinator;

    fn argv(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    fn client(line: &str) -> ClientArgs {
        match parse(argv(line)).unwrap() {
            Invocation::Client(args) => args,
            other => panic!("expected client invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_server_form() {
        match parse(argv("socketpipe -s 10.0.0.1 4000 cat -u")).unwrap() {
            Invocation::Server(args) => assert_eq!(args, ["10.0.0.1", "4000", "cat", "-u"]),
            other => panic!("expected server invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_no_arguments() {
        let err = parse(argv("socketpipe")).unwrap_err();
        assert_eq!(err.to_string(), "no arguments specified");
    }

    fn write_config(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "remote_program = \"/opt/file/socketpipe\"\naccept_timeout = 30\nbatch = false\n",
        )
        .unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(&dir);
        let line = format!(
            "socketpipe -c {} --remote-program /usr/local/bin/socketpipe -b -h 192.0.2.9 -t 10 \
             -i {{ cat }} -l {{ ssh host }} -r {{ cat }}",
            config_path
        );
        let args = client(&line);

        let config = args.load_config().unwrap();
        assert_eq!(config.remote_program, "/usr/local/bin/socketpipe");
        assert_eq!(config.timeout(), Some(Duration::from_secs(10)));
        assert!(config.batch);

        let spec = args.pipeline_spec(&config).unwrap();
        assert!(spec.batch);
        assert_eq!(spec.timeout, Some(Duration::from_secs(10)));
        assert_eq!(spec.local_address.as_deref(), Some("192.0.2.9"));
        assert_eq!(spec.login.tokens(), ["ssh", "host"]);

        // The overridden program is what the remote host is asked to run
        let coordinator = ClientCoordinator::new(
            &spec,
            config.remote_program.as_str(),
            config.address_probe.as_str(),
        );
        let argv = coordinator.compose(&RendezvousAddress::new("192.0.2.9", 4000));
        assert_eq!(
            argv,
            ["ssh", "host", "/usr/local/bin/socketpipe", "-s", "192.0.2.9", "4000", "cat"]
        );
    }

    #[test]
    fn test_config_file_applies_without_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = write_config(&dir);
        let args = client(&format!("socketpipe -c {} -o {{ cat }}", config_path));

        let config = args.load_config().unwrap();
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
        assert!(!config.batch);
        if std::env::var_os("SOCKETPIPE_REMOTE_PROGRAM").is_none() {
            assert_eq!(config.remote_program, "/opt/file/socketpipe");
        }
    }

    #[test]
    fn test_invalid_option_is_usage_error() {
        let err = parse(argv("socketpipe -x -i { cat }")).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_bad_timeout_is_usage_error() {
        let err = parse(argv("socketpipe -t soon -i { cat }")).unwrap_err();
        assert!(err.is_usage());
    }

    #[test]
    fn test_log_level() {
        let config = ClientConfig::default();
        assert_eq!(client("socketpipe -q -o { cat }").log_level(&config), "error");
        assert_eq!(client("socketpipe -o { cat }").log_level(&config), "warn");
        assert_eq!(client("socketpipe -vv -o { cat }").log_level(&config), "debug");
    }
}
