//! Run command - host a session manager with a background expiration ticker.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use tessera_session::{SessionManager, StatsSnapshot};
use tracing::{debug, info};

use super::Context;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Create this many demo sessions after start
    #[arg(long, default_value = "0")]
    pub seed: usize,

    /// Seconds between background ticks (overrides the config)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Stop after this many ticks instead of waiting for Ctrl-C
    #[arg(long)]
    pub ticks: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    ticks: u64,
    expired_by_sweeps: usize,
    stats: StatsSnapshot,
}

/// Run the manager until Ctrl-C or the tick limit.
pub async fn run(args: RunArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let manager = ctx.build_manager(store)?;

    let starting = manager.clone();
    tokio::task::spawn_blocking(move || starting.start()).await??;
    info!(
        name = %manager.config().name,
        active = manager.active_sessions(),
        "Session manager started"
    );

    if args.seed > 0 {
        seed_sessions(&manager, args.seed)?;
    }

    let period = args
        .interval
        .unwrap_or(ctx.config().manager_section().background_interval_secs)
        .max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs(period));
    // The first tick completes immediately; consume it so ticks are spaced.
    ticker.tick().await;

    let mut ticks = 0u64;
    let mut expired_by_sweeps = 0usize;
    loop {
        if args.ticks.is_some_and(|limit| ticks >= limit) {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                ticks += 1;
                let ticking = manager.clone();
                let swept = tokio::task::spawn_blocking(move || ticking.background_process()).await?;
                if let Some(expired) = swept {
                    expired_by_sweeps += expired;
                    debug!(expired, active = manager.active_sessions(), "Expiration sweep finished");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, stopping");
                break;
            }
        }
    }

    let stopping = manager.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    let report = RunReport {
        ticks,
        expired_by_sweeps,
        stats: manager.stats(),
    };
    print_report(&report, ctx)
}

fn seed_sessions(manager: &SessionManager, count: usize) -> Result<()> {
    for n in 0..count {
        let session = manager.create_session(None)?;
        session.set_attribute("demo", serde_json::json!(n))?;
        session.set_attribute("user", serde_json::json!(format!("user-{}", n)))?;
    }
    info!(count, "Seeded demo sessions");
    Ok(())
}

fn print_report(report: &RunReport, ctx: &Context) -> Result<()> {
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    let stats = &report.stats;
    println!("{}", style("Session Manager Stopped").bold());
    println!("{}", dim.apply_to("─".repeat(50)));
    println!("  Ticks:          {}", style(report.ticks).cyan());
    println!("  Swept:          {}", style(report.expired_by_sweeps).cyan());
    println!("  Created:        {}", style(stats.created).cyan());
    println!("  Expired:        {}", style(stats.expired).cyan());
    println!("  Rejected:       {}", style(stats.rejected).cyan());
    println!("  Peak active:    {}", style(stats.max_active).cyan());
    println!("  Max alive:      {}s", stats.max_alive_secs);
    println!("  Average alive:  {:.1}s", stats.average_alive_secs);
    if ctx.verbose {
        println!("  Create rate:    {}/min", stats.create_rate);
        println!("  Expire rate:    {}/min", stats.expire_rate);
        println!("  Sweep time:     {}ms", stats.processing_time_ms);
        println!("  Duplicate ids:  {}", stats.duplicates);
    }
    Ok(())
}
