//! socketpipe
//!
//! One binary for both ends of the connection:
//! - Client (default): rendezvous over the login command, then run the
//!   local producer and consumer on the accepted connection
//! - Server (`-s`): connect back to the client and exec the remote command

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use socketpipe::cli::{self, ClientArgs, Invocation};
use socketpipe::output::{print_error, print_usage};
use spipe_core::error::EXIT_FATAL;
use spipe_core::SocketpipeError;
use spipe_pipeline::run_client;
use spipe_rendezvous::run_server;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<SocketpipeError>() {
            Some(e) if e.is_usage() => {
                print_usage(&e.to_string());
                e.exit_code()
            }
            Some(e) => {
                print_error(&e.to_string());
                e.exit_code()
            }
            None => {
                print_error(&format!("{:#}", err));
                EXIT_FATAL
            }
        },
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    match cli::parse(std::env::args().collect())? {
        Invocation::Server(args) => {
            init_logging("warn");
            match run_server(&args).await? {}
        }
        Invocation::Client(args) => run_local(args).await,
    }
}

async fn run_local(args: ClientArgs) -> Result<i32> {
    // Role errors are usage errors and must not depend on the config file
    args.roles.validate()?;
    let config = args.load_config()?;
    init_logging(args.log_level(&config));

    let spec = args.pipeline_spec(&config)?;
    tracing::debug!(?spec, "Starting client");

    let result = run_client(&spec, &config).await?;
    Ok(result.status)
}

/// Log to stderr; stdout carries pipeline data
fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
