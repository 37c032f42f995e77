//! # CraftWatch — steel & silk job reminders
//!
//! Runs the reminder scheduler against the SQLite job store, and offers the
//! job commands (start, refuel, ack, complete, audience) as subcommands.
//!
//! Usage:
//!   craftwatch run                                  # Start the scheduler loop
//!   craftwatch run --dry-run                        # Log alerts instead of sending
//!   craftwatch steel start --channel 123            # Start a steel job
//!   craftwatch silk ack --channel 123               # Silence current silk stage
//!   craftwatch targets add --channel 123 --job silk 456 789

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use craftwatch_channels::{DiscordNotifier, LogNotifier};
use craftwatch_core::{ChannelId, Clock, CraftConfig, JobKind, JobStore, Notifier, SystemClock, UserId};
use craftwatch_scheduler::{JobCommands, JobDb, MemoryStore, Scheduler, spawn_scheduler};

#[derive(Parser)]
#[command(
    name = "craftwatch",
    version,
    about = "⏰ CraftWatch — steel & silk job reminders"
)]
struct Cli {
    /// Config file (default: ~/.craftwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path (overrides storage.db_path)
    #[arg(long)]
    db: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder scheduler until Ctrl-C
    Run {
        /// Log alerts instead of sending them to Discord
        #[arg(long)]
        dry_run: bool,
    },
    /// Steel job commands
    Steel {
        #[command(subcommand)]
        action: SteelAction,
    },
    /// Silk cycle commands
    Silk {
        #[command(subcommand)]
        action: SilkAction,
    },
    /// Manage who gets mentioned
    Targets {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Evaluate one tick at a given instant against a copy of the job state.
    /// Nothing is sent and the database is not modified.
    Tick {
        /// RFC 3339 instant (default: now)
        #[arg(long)]
        at: Option<String>,
    },
}

#[derive(Subcommand)]
enum SteelAction {
    Start {
        #[arg(long)]
        channel: ChannelId,
    },
    Status {
        #[arg(long)]
        channel: ChannelId,
    },
    Refuel {
        #[arg(long)]
        channel: ChannelId,
    },
    Complete {
        #[arg(long)]
        channel: ChannelId,
    },
}

#[derive(Subcommand)]
enum SilkAction {
    Start {
        #[arg(long)]
        channel: ChannelId,
    },
    Status {
        #[arg(long)]
        channel: ChannelId,
    },
    /// Stop repeat reminders for the current stage
    Ack {
        #[arg(long)]
        channel: ChannelId,
    },
    Complete {
        #[arg(long)]
        channel: ChannelId,
    },
}

#[derive(Subcommand)]
enum TargetAction {
    Add {
        #[arg(long)]
        channel: ChannelId,
        #[arg(long)]
        job: JobKind,
        /// User ids or mentions
        users: Vec<UserId>,
    },
    Remove {
        #[arg(long)]
        channel: ChannelId,
        #[arg(long)]
        job: JobKind,
        users: Vec<UserId>,
    },
    List {
        #[arg(long)]
        channel: ChannelId,
        #[arg(long)]
        job: JobKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "craftwatch=debug,craftwatch_scheduler=debug,craftwatch_channels=debug"
    } else {
        "craftwatch=info,craftwatch_scheduler=info,craftwatch_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => CraftConfig::load_from(path)?,
        None => CraftConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    let config = Arc::new(config);

    let db_path = config.storage.resolved_db_path();
    let store: Arc<dyn JobStore> = Arc::new(JobDb::open(&db_path)?);
    let commands = JobCommands::new(config.clone(), store.clone());
    let now = SystemClock.now();

    match cli.command {
        Command::Run { dry_run } => run(config, store, dry_run).await?,
        Command::Steel { action } => steel(&commands, action, now)?,
        Command::Silk { action } => silk(&commands, action, now)?,
        Command::Targets { action } => targets(&commands, action)?,
        Command::Tick { at } => {
            let at = match at {
                Some(raw) => DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc),
                None => now,
            };
            let snapshot: Arc<dyn JobStore> = Arc::new(MemoryStore::snapshot(store.as_ref())?);
            let scheduler = Scheduler::new(config, snapshot, Arc::new(LogNotifier));
            let alerts = scheduler.tick(at).await?;
            println!("⏱️  {} alert(s) at {}", alerts.len(), at.to_rfc3339());
            for alert in alerts {
                println!("   [{}] {}: {}", alert.channel, alert.kind, alert.text);
            }
        }
    }

    Ok(())
}

async fn run(config: Arc<CraftConfig>, store: Arc<dyn JobStore>, dry_run: bool) -> Result<()> {
    let notifier: Arc<dyn Notifier> = if dry_run {
        Arc::new(LogNotifier)
    } else if config.discord.bot_token.is_empty() {
        tracing::warn!("⚠️  No Discord token configured (set DISCORD_TOKEN); logging alerts only.");
        Arc::new(LogNotifier)
    } else {
        Arc::new(DiscordNotifier::new(config.discord.clone())?)
    };

    println!("⏰ CraftWatch v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database:  {}", config.storage.resolved_db_path().display());
    println!("   📡 Transport: {}", notifier.name());
    println!("   🔁 Tick:      every {}s (±{}s)", config.scheduler.tick_interval_secs, config.scheduler.tolerance_secs);
    println!();

    let scheduler = Arc::new(Scheduler::new(config, store, notifier));
    tokio::select! {
        _ = spawn_scheduler(scheduler, Arc::new(SystemClock)) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("👋 Shutting down");
        }
    }
    Ok(())
}

fn steel(commands: &JobCommands, action: SteelAction, now: DateTime<Utc>) -> Result<()> {
    match action {
        SteelAction::Start { channel } => {
            commands.start_steel(channel, now)?;
            println!("🔥 Steel job started in {channel}");
        }
        SteelAction::Status { channel } => {
            let status = commands.steel_status(channel, now)?;
            println!(
                "🔥 Steel job in {channel}: {} left (ends {})",
                fmt_duration(status.remaining),
                status.job_end.to_rfc3339()
            );
            match status.fuel_deadline {
                Some(deadline) => println!(
                    "   ⛽ Refuel by {} ({} from now)",
                    deadline.to_rfc3339(),
                    fmt_duration(deadline - now)
                ),
                None => println!("   ⛽ Fuel lasts until the job ends"),
            }
        }
        SteelAction::Refuel { channel } => {
            commands.refuel_steel(channel, now)?;
            println!("⛽ Steel refuelled in {channel}");
        }
        SteelAction::Complete { channel } => {
            commands.complete_steel(channel)?;
            println!("🏁 Steel timer reset in {channel}");
        }
    }
    Ok(())
}

fn silk(commands: &JobCommands, action: SilkAction, now: DateTime<Utc>) -> Result<()> {
    match action {
        SilkAction::Start { channel } => {
            commands.start_silk(channel, now)?;
            println!("🥚 Silk cycle started in {channel}: egg stage");
        }
        SilkAction::Status { channel } => {
            let status = commands.silk_status(channel, now)?;
            println!(
                "🐛 Silk in {channel}: {} ({} until next stage){}",
                status.position.stage,
                fmt_duration(status.position.next_transition - now),
                if status.acked { ", reminders silenced" } else { "" }
            );
        }
        SilkAction::Ack { channel } => {
            let status = commands.ack_silk(channel, now)?;
            println!("🔕 Silk {} reminders silenced in {channel}", status.position.stage);
        }
        SilkAction::Complete { channel } => {
            commands.complete_silk(channel)?;
            println!("🏁 Silk timer reset in {channel}");
        }
    }
    Ok(())
}

fn targets(commands: &JobCommands, action: TargetAction) -> Result<()> {
    match action {
        TargetAction::Add { channel, job, users } => {
            commands.add_targets(channel, job, &users)?;
            println!("👥 Added {} {job} target(s) in {channel}", users.len());
        }
        TargetAction::Remove { channel, job, users } => {
            commands.remove_targets(channel, job, &users)?;
            println!("👥 Removed {} {job} target(s) in {channel}", users.len());
        }
        TargetAction::List { channel, job } => {
            let users = commands.list_targets(channel, job)?;
            if users.is_empty() {
                println!("👥 No {job} targets in {channel}");
            }
            for user in users {
                println!("   {}", user.mention());
            }
        }
    }
    Ok(())
}

/// `"Xh Ym"`, negative spans shown as zero.
fn fmt_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    format!("{}h {}m", total / 3600, (total % 3600) / 60)
}
