//! cloude-relay binary entry point.

use std::process::ExitCode;

use cloude_relay::cli::{self, parse_args};
use cloude_relay::{api, logging, Config, ServerContext};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'cloude-relay --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.log_filter());
    info!("cloude-relay v{}", env!("CARGO_PKG_VERSION"));

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if !config.auth.enabled {
        info!("authentication disabled");
    }

    let ctx = match ServerContext::build(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("failed to initialise relay: {}", e);
            return ExitCode::FAILURE;
        }
    };
    ctx.start().await;

    match api::serve(server_config, ctx).await {
        Ok(()) => {
            info!("cloude-relay stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
