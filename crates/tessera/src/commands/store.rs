//! Store command - inspect and maintain the configured session store.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};

use super::{Context, format_interval, format_millis};

/// Arguments for the store command.
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// List stored session ids
    Keys {
        /// Only ids whose sessions have idled out
        #[arg(long)]
        expired: bool,
    },

    /// Show one stored session
    Show {
        /// Session id
        id: String,
    },

    /// Expire and delete idled-out sessions
    Purge,

    /// Delete every stored session
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

/// Run the store command.
pub async fn run(args: StoreArgs, ctx: &Context) -> Result<()> {
    match args.command {
        StoreCommand::Keys { expired } => cmd_keys(expired, ctx),
        StoreCommand::Show { id } => cmd_show(&id, ctx),
        StoreCommand::Purge => cmd_purge(ctx),
        StoreCommand::Clear { yes } => cmd_clear(yes, ctx),
    }
}

fn cmd_keys(expired: bool, ctx: &Context) -> Result<()> {
    let store = ctx.require_store()?;
    let mut keys = store.keys(expired)?;
    keys.sort();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    if keys.is_empty() {
        println!("{}", dim.apply_to(format!("No sessions in {} store", store.name())));
        return Ok(());
    }
    for key in &keys {
        println!("{}", key);
    }
    if ctx.verbose {
        println!();
        println!("{}", dim.apply_to(format!("{} session(s)", keys.len())));
    }
    Ok(())
}

fn cmd_show(id: &str, ctx: &Context) -> Result<()> {
    let store = ctx.require_store()?;
    let Some(session) = store.load(id)? else {
        bail!("session '{}' not found in {} store", id, store.name());
    };
    let data = session.to_data();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(format!("Session {}", data.id)).bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  Created:        {}", format_millis(data.creation_time));
    println!("  Last accessed:  {}", format_millis(data.last_accessed_time));
    println!(
        "  Timeout:        {}",
        format_interval(data.max_inactive_interval)
    );
    println!("  Valid:          {}", data.is_valid);
    if data.attributes.is_empty() {
        println!("  {}", dim.apply_to("(no attributes)"));
    } else {
        println!();
        for (name, value) in &data.attributes {
            println!("  {} = {}", style(name).cyan(), value);
        }
    }
    Ok(())
}

fn cmd_purge(ctx: &Context) -> Result<()> {
    let store = ctx.require_store()?;
    let manager = ctx.build_manager(Some(store.clone()))?;
    let purged = store.process_expires(&manager);

    if ctx.json_output {
        println!("{}", serde_json::json!({ "purged": purged }));
    } else {
        println!("Purged {} expired session(s)", style(purged).cyan());
    }
    Ok(())
}

fn cmd_clear(yes: bool, ctx: &Context) -> Result<()> {
    if !yes {
        bail!("refusing to clear the store without --yes");
    }
    let store = ctx.require_store()?;
    let before = store.size()?;
    store.clear()?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "removed": before }));
    } else {
        println!("Removed {} session(s)", style(before).cyan());
    }
    Ok(())
}
