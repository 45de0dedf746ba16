use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};

use super::Context;
use crate::cli::ExitStatus;
use crate::config::{Config, Settings};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Display the merged configuration
    Show {
        #[arg(short, long, value_enum, default_value = "toml")]
        format: ConfigFormat,
    },
    /// Compile every signature and glob and report problems
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

pub fn execute(args: ConfigArgs, ctx: &Context) -> Result<ExitStatus> {
    let config = load(ctx)?;

    match args.command {
        ConfigCommand::Show { format } => {
            let rendered = match format {
                ConfigFormat::Toml => toml::to_string_pretty(&config)?,
                ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
            };
            println!("{rendered}");
        }
        ConfigCommand::Validate => {
            let settings = Settings::from_config(&config)?;
            ctx.output.success("Configuration is valid");
            ctx.output
                .key_value("Signatures", &settings.signatures.len().to_string(), false);
            ctx.output
                .key_value("Ignore patterns", &settings.ignore.patterns().len().to_string(), false);
            ctx.output
                .key_value("Scan workers", &settings.pool.worker_count().to_string(), false);
        }
    }
    Ok(ExitStatus::Clean)
}

/// Config commands also work outside a repository, rooted at `-C`.
fn load(ctx: &Context) -> Result<Config> {
    let root = match ctx.repo() {
        Ok(handle) => super::repo_root(&handle),
        Err(_) => ctx.directory.clone(),
    };
    ctx.load_config(&root)
}
