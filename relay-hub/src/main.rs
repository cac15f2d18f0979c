use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use relay_hub::{
    RelayConfig, Server,
    cli::{Cli, Command},
    client,
};

fn init_tracing(command: &Command) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);

    // The client owns stdout for relayed lines, so its logs go to stderr.
    let _ = match command {
        Command::Serve(_) => builder
            .with_ansi(std::io::stdout().is_terminal())
            .try_init(),
        Command::Client(_) => builder
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.command);

    match cli.command {
        Command::Serve(args) => {
            let server = Server::bind(RelayConfig::from(args)).await?;
            let addr = server.local_addr()?;
            info!("relay hub listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("relay hub exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
