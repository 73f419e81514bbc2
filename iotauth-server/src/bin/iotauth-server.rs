//! Auth & authorization core server binary.
//!
//! Parses [`iotauth_server::Config`] from the environment per §6's
//! recognized-options table and serves the HTTP and gRPC surfaces until
//! `ctrl_c`, mirroring the teacher's `covert server` subcommand generalized
//! from a subcommand of a multi-purpose CLI into this crate's own binary —
//! there is no pluggable-secrets-engine management surface left to share a
//! binary with once `covert-cli`'s `kv`/`psql`/`userpass`/`operator`
//! subcommands are dropped.

use clap::Parser;
use iotauth_server::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Auth & authorization core server", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.config.log_level))
        .init();

    iotauth_server::start(cli.config, iotauth_server::shutdown_signal()).await
}
