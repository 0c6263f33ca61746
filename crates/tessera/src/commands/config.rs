//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::Style;

use tessera_config::TesseraConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration with defaults filled in
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Write a config file with all defaults
    Init {
        /// Target file
        #[arg(default_value = "tessera.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the user configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { path, force } => cmd_init(&path, force),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let effective = ctx.config().effective();
    // Fail early on values the manager would reject.
    ctx.config().manager_config()?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        print!("{}", effective.to_toml()?);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    let dim = Style::new().dim();
    for (i, source) in ctx.loaded.sources.iter().enumerate() {
        let status = if source.loaded { "loaded" } else { "not found" };
        println!(
            "{}. {} {}",
            i + 1,
            source.path.display(),
            dim.apply_to(format!("({})", status))
        );
    }
    for warning in &ctx.loaded.warnings {
        println!("{}", Style::new().yellow().apply_to(warning));
    }
    Ok(())
}

fn cmd_init(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    tessera_config::save_config(&TesseraConfig::new().effective(), path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_path() -> Result<()> {
    match tessera_config::xdg_config_path() {
        Some(path) => println!("{}", path.display()),
        None => bail!("could not determine the user config directory"),
    }
    Ok(())
}
