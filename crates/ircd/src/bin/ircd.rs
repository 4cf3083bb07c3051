use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use flexi_logger::{Duplicate, Logger};
use log::error;

use ircd::config::Config;
use ircd::server::{Server, full_version};

#[derive(Parser, Debug)]
#[command(name = "ircd", about = "A single-node IRC daemon")]
struct Args {
    /// Display version information
    #[arg(short = 'v', long)]
    version: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Config file
    #[arg(short = 'c', long, default_value = "ircd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.version {
        println!("{}", full_version());
        return ExitCode::SUCCESS;
    }

    let level = if args.debug { "debug" } else { "info" };
    Logger::try_with_str(level)
        .and_then(|logger| logger.log_to_stderr().duplicate_to_stderr(Duplicate::None).start())
        .ok();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            error!("config file did not load successfully: {err}");
            return ExitCode::FAILURE;
        }
    };

    let server = Server::new(config, args.config);
    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
