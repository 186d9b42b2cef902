use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use reprice_server::ConfigOverrides;
use reprice_server::ServerConfig;
use reprice_server::init_tracing;
use reprice_server::run_main;

#[derive(Debug, Parser)]
#[command(name = "reprice-server")]
#[command(about = "Serve the pricing recalculation ledger and run recalculations")]
struct ServerArgs {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(long, value_name = "FILE", env = "REPRICE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides `listen` from the config file.
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// State directory. Overrides `home` from the config file.
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    let config = ServerConfig::load(
        args.config.as_deref(),
        ConfigOverrides {
            listen: args.listen,
            home: args.home,
        },
    )?;
    init_tracing();
    run_main(config).await
}
