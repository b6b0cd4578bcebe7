//! Config subcommand handlers.

use std::path::PathBuf;

use modelsync_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// The file `--config` names, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config_file(global);
    match &args.command {
        ConfigCommand::Show => {
            let cfg = config::load_config_from(&path)?;
            let text = toml::to_string_pretty(&cfg)?;
            let out = output::render(global.output, &cfg, |_| text)?;
            output::print_output(out.trim_end(), global.quiet);
        }
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
        }
        ConfigCommand::Init { force } => {
            if *force {
                config::save_config_to(&Config::default(), &path)?;
            } else {
                config::init_config(&path)?;
            }
            output::print_output(&format!("Wrote {}", path.display()), global.quiet);
        }
    }
    Ok(())
}
