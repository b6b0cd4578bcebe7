mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use modelsync_config::{Config, ConfigError, LoggingSection};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging settings come from the config file, so load it first; a bad
    // file only fails commands that need it.
    let loaded = modelsync_config::load_config_from(&commands::config_cmd::config_file(&cli.global));
    let logging = loaded
        .as_ref()
        .map(|cfg| cfg.logging.clone())
        .unwrap_or_default();
    init_tracing(cli.global.verbose, &logging);

    if let Err(err) = run(cli, loaded).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, logging: &LoggingSection) {
    let filter = match verbosity {
        0 => logging.filter.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, loaded: Result<Config, ConfigError>) -> Result<(), CliError> {
    match cli.command {
        // Config commands read the file themselves
        Command::Config(args) => commands::config_cmd::handle(&args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "modelsync", &mut std::io::stdout());
            Ok(())
        }

        Command::Replay(args) => {
            let sync = loaded?.to_sync_config()?;
            tracing::debug!(feed = %args.feed.display(), "replaying feed");
            commands::replay::handle(&args, &cli.global, sync)
        }

        Command::Plan(args) => {
            let sync = loaded?.to_sync_config()?;
            tracing::debug!(script = %args.script.display(), apply = args.apply, "planning script");
            commands::plan::handle(&args, &cli.global, sync).await
        }
    }
}
