//! Polyarc Ingest - incremental Polymarket archive crawler

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use polyarc_common::logging::{init_logging, LogConfig, LogLevel};
use polyarc_common::EntityKind;
use polyarc_ingest::config::{parse_entities, FanoutMode};
use polyarc_ingest::fanout::count_directory;
use polyarc_ingest::normalize::{format_timestamp, parse_timestamp};
use polyarc_ingest::{AcceptancePolicy, CrawlConfig, Crawler, EntityOutcome, RunReport};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "polyarc-ingest")]
#[command(author, version, about = "Incremental Polymarket archive crawler")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl now
    Crawl {
        /// Entities to crawl (comma separated: events,markets,series)
        #[arg(short, long)]
        entity: Option<String>,

        /// Page cap per entity
        #[arg(long)]
        max_pages: Option<usize>,

        /// Records requested per page
        #[arg(long)]
        page_limit: Option<usize>,

        /// Only write records dated in this year
        #[arg(long, conflicts_with = "undated_only")]
        target_year: Option<i32>,

        /// Only write records without a usable timestamp
        #[arg(long)]
        undated_only: bool,

        /// Archive root directory
        #[arg(long)]
        out_root: Option<PathBuf>,

        /// Fan-out mode (none, git, mirror)
        #[arg(long)]
        fanout: Option<String>,

        /// Skip when a crawl already completed today (UTC)
        #[arg(long)]
        once_per_day: bool,
    },

    /// Inspect or seed checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },

    /// Compute dataset counts for a directory
    Counts {
        /// Dataset directory
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCommand {
    /// Print the stored checkpoints
    Show,

    /// Advance a checkpoint (never moves it backward)
    Set {
        /// Entity (events, markets, series)
        entity: String,

        /// Timestamp, e.g. 2025-01-10T00:00:00Z
        timestamp: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("polyarc-ingest".to_string())
        .filter_directives("reqwest=warn,hyper=warn")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialise logging: {}", e);
            None
        },
    };

    let succeeded = match execute(cli.command).await {
        Ok(succeeded) => succeeded,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            false
        },
    };

    // flush file logs before exiting
    drop(guard);
    if !succeeded {
        process::exit(1);
    }
}

/// Run a command; `Ok(false)` means it finished but reported failures
async fn execute(command: Command) -> Result<bool> {
    match command {
        Command::Crawl {
            entity,
            max_pages,
            page_limit,
            target_year,
            undated_only,
            out_root,
            fanout,
            once_per_day,
        } => {
            let mut config = CrawlConfig::from_env()?;
            if let Some(list) = entity {
                config = config.with_entities(parse_entities(&list)?);
            }
            if let Some(max_pages) = max_pages {
                config.paging.max_pages = max_pages;
            }
            if let Some(page_limit) = page_limit {
                config.paging.page_limit = page_limit;
            }
            if let Some(year) = target_year {
                config = config.with_acceptance(AcceptancePolicy::Year(year));
            } else if undated_only {
                config = config.with_acceptance(AcceptancePolicy::UndatedOnly);
            }
            if let Some(out_root) = out_root {
                config = config.with_out_root(out_root);
            }
            if let Some(mode) = fanout {
                config.fanout.mode = mode.parse::<FanoutMode>()?;
            }
            config.validate()?;

            info!(
                entities = ?config.entities,
                acceptance = %config.acceptance,
                fanout = ?config.fanout.mode,
                "Starting crawl"
            );
            let report = Crawler::from_config(config)?.run(once_per_day).await?;
            print_report(&report);
            Ok(!report.has_failures())
        },

        Command::Checkpoint { command } => {
            let crawler = Crawler::from_config(CrawlConfig::from_env()?)?;
            let store = crawler.checkpoints();
            match command {
                CheckpointCommand::Show => {
                    let stored = store.load_all().await;
                    println!("checkpoint document: {}", store.key());
                    for kind in EntityKind::ALL {
                        let value = stored.get(&kind).map(format_timestamp);
                        println!("  {:<8} {}", kind.as_str(), value.as_deref().unwrap_or("-"));
                    }
                },
                CheckpointCommand::Set { entity, timestamp } => {
                    let kind: EntityKind = entity.parse()?;
                    let ts = parse_timestamp(&timestamp)
                        .ok_or_else(|| anyhow!("unparseable timestamp '{}'", timestamp))?;
                    let saved = store.save(kind, ts).await?;
                    if saved > ts {
                        warn!(entity = %kind, stored = %format_timestamp(&saved), "Stored checkpoint is newer; kept");
                    }
                    println!("{} = {}", kind, format_timestamp(&saved));
                },
            }
            Ok(true)
        },

        Command::Counts { dir } => {
            let counts = tokio::task::spawn_blocking(move || count_directory(&dir))
                .await
                .context("counting task panicked")??;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(true)
        },
    }
}

fn print_report(report: &RunReport) {
    if report.skipped_today {
        println!("Crawl already completed today; nothing to do.");
        return;
    }

    println!(
        "{:<8} {:>6} {:>8} {:>8} {:>8} {:>8}  {:<12} checkpoint",
        "entity", "pages", "seen", "written", "skipped", "rejected", "stop"
    );
    for entry in &report.entities {
        let after = entry
            .checkpoint_after
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());
        match &entry.outcome {
            EntityOutcome::Crawled(s) => println!(
                "{:<8} {:>6} {:>8} {:>8} {:>8} {:>8}  {:<12} {}",
                entry.entity.as_str(),
                s.pages,
                s.seen,
                s.written,
                s.skipped,
                s.rejected,
                s.stop_reason.to_string(),
                after
            ),
            EntityOutcome::Failed { error } => {
                println!("{:<8} FAILED: {}", entry.entity.as_str(), error)
            },
        }
    }

    for kind in report.cap_hits() {
        warn!(entity = %kind, "Page cap hit; older records may remain uncrawled until the next run");
    }

    if let Some(fanout) = &report.fanout {
        println!(
            "fan-out: {} dataset(s), {} changed",
            fanout.datasets.len(),
            fanout.changed()
        );
    }
}
