use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use drum_ledger::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::{drum, drum_history, monthly_usage_summary},
    events::{self, Event, EventSender},
    services::{
        consumption::{ConsumptionCoordinator, RecalculationOutcome, RecalculationReport},
        drum_registry, history,
        monthly_usage::{self, MonthResetReport},
    },
};
use serde::Serialize;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Recalculate { drum } => {
            let outcome = context
                .coordinator
                .recalculate(&drum)
                .await
                .with_context(|| format!("failed to recalculate drum {}", drum))?;
            if cli.json {
                print_json(&outcome)?;
            } else {
                render_recalculation(&outcome);
            }
        }
        Commands::RecalculateAll => {
            let report = context
                .coordinator
                .recalculate_all()
                .await
                .context("failed to recalculate drums")?;
            if cli.json {
                print_json(&report)?;
            } else {
                render_report(&report);
            }
        }
        Commands::ResetMonth { month, year } => {
            let report = context
                .coordinator
                .reset_month(month, year)
                .await
                .with_context(|| format!("failed to reset {:02}/{}", month, year))?;
            if cli.json {
                print_json(&report)?;
            } else {
                render_reset(&report);
            }
        }
        Commands::History { drum } => {
            let found = drum_registry::find_by_number(context.db.as_ref(), &drum)
                .await?
                .ok_or_else(|| anyhow!("drum {} not found", drum))?;
            let entries = history::history_for_drum(context.db.as_ref(), found.id).await?;
            if cli.json {
                print_json(&entries)?;
            } else {
                render_history(&found, &entries);
            }
        }
        Commands::Summary { month, year } => {
            monthly_usage::validate_period(month, year)?;
            let summaries =
                monthly_usage::summaries_for_period(context.db.as_ref(), month, year).await?;
            if cli.json {
                print_json(&summaries)?;
            } else {
                render_summaries(month, year, &summaries);
            }
        }
        Commands::Drums { low } => {
            let drums = if low {
                drum_registry::list_low_quantity(
                    context.db.as_ref(),
                    context.config.ledger_policy().low_quantity_threshold,
                )
                .await?
            } else {
                drum_registry::list_drums(context.db.as_ref()).await?
            };
            if cli.json {
                print_json(&drums)?;
            } else {
                drums.iter().for_each(render_drum);
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "drum-ledger", about = "Maintenance tooling for the cable drum ledger", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Recompute one drum from its usage history
    Recalculate {
        #[arg(long)]
        drum: String,
    },
    /// Recompute every drum and rebuild catalog stock
    RecalculateAll,
    /// Restore a month's usage to catalog stock and clear its summaries
    ResetMonth {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    /// Show a drum's history trail
    History {
        #[arg(long)]
        drum: String,
    },
    /// Show monthly usage per item
    Summary {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    /// List drums
    Drums {
        /// Only drums at or under the low-quantity threshold
        #[arg(long, action = ArgAction::SetTrue)]
        low: bool,
    },
}

struct CliContext {
    config: AppConfig,
    db: Arc<DbPool>,
    coordinator: ConsumptionCoordinator,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let (event_tx, event_rx) = mpsc::channel::<Event>(config.event_channel_capacity);
        tokio::spawn(events::process_events(event_rx));

        let coordinator = ConsumptionCoordinator::new(
            db.clone(),
            EventSender::new(event_tx),
            config.ledger_policy(),
        );

        Ok(Self {
            config,
            db,
            coordinator,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_drum(drum: &drum::Model) {
    println!(
        "- {} • {}m of {}m • {}",
        drum.drum_number,
        drum.current_quantity.normalize(),
        drum.initial_quantity.normalize(),
        drum.status.as_str()
    );
}

fn render_recalculation(outcome: &RecalculationOutcome) {
    if outcome.adjusted {
        println!(
            "{}: {}m -> {}m ({} usage records, {}m wastage)",
            outcome.drum_number,
            outcome.previous_quantity.normalize(),
            outcome.new_quantity.normalize(),
            outcome.records_considered,
            outcome.total_wastage.normalize()
        );
    } else {
        println!(
            "{}: consistent at {}m",
            outcome.drum_number,
            outcome.new_quantity.normalize()
        );
    }
}

fn render_report(report: &RecalculationReport) {
    report.outcomes.iter().for_each(render_recalculation);
    for change in &report.catalog {
        println!(
            "item {}: stock {}m -> {}m",
            change.item_id,
            change.previous_stock.normalize(),
            change.new_stock.normalize()
        );
    }
    for failure in &report.failures {
        eprintln!("FAILED {}: {}", failure.target, failure.message);
    }
    println!(
        "{} drums checked, {} adjusted, {} failed",
        report.outcomes.len() + report.failures.iter().filter(|f| f.target != "catalog").count(),
        report.adjusted_count(),
        report.failures.len()
    );
}

fn render_reset(report: &MonthResetReport) {
    for item in &report.items {
        println!(
            "item {}: restored {}m ({}m -> {}m)",
            item.item_id,
            item.restored.normalize(),
            item.previous_stock.normalize(),
            item.new_stock.normalize()
        );
    }
    println!(
        "{:02}/{}: {} summaries cleared, {}m restored",
        report.month,
        report.year,
        report.summaries_cleared,
        report.total_restored.normalize()
    );
}

fn render_history(drum: &drum::Model, entries: &[drum_history::Model]) {
    println!("History for {}", drum.drum_number);
    for entry in entries {
        println!(
            "{} {:<17} {:>10} -> {:>10} ({:+}) {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.action.as_str(),
            entry
                .previous_quantity
                .map(|q| q.normalize().to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.new_quantity.normalize(),
            entry.quantity_change.normalize(),
            entry.notes.as_deref().unwrap_or("")
        );
    }
    if !history::is_continuous(entries) {
        eprintln!("warning: history for {} has gaps", drum.drum_number);
    }
}

fn render_summaries(month: u32, year: i32, summaries: &[monthly_usage_summary::Model]) {
    println!("Usage for {:02}/{}", month, year);
    for summary in summaries {
        println!(
            "- item {} • {}m • synced {}",
            summary.item_id,
            summary.total_used.normalize(),
            summary.last_synced_at.format("%Y-%m-%d %H:%M")
        );
    }
}
