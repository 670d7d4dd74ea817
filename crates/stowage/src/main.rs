mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    init_tracing(cli.global.verbose);
    cli.global.resolve_output(&stowage_config::load_config_or_default().defaults.output);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "stowage", &mut std::io::stdout());
            Ok(())
        }

        Command::Fetch(ref args) => {
            tracing::debug!(command = "fetch", "dispatching command");
            commands::fetch::handle(args, &cli.global).await
        }

        Command::Join(ref args) => {
            tracing::debug!(command = "join", "dispatching command");
            commands::join::handle(args, &cli.global).await
        }
    }
}
