//! claude-smi - usage dashboard for Claude Code session logs

use clap::Parser;
use claude_smi::{
    aggregation, cli::{Cli, ExportView, validate_date_flag},
    config,
    cost_calculator::Calculator,
    engine::{Engine, EngineEvent, EngineMsg},
    error::{Result, SmiError},
    filters, output, parser,
    pricing::PricingTable,
    pricing_fetcher::{self, LITELLM_PRICING_URL},
    scanner::{self, CancelFlag},
    timezone,
    types::CostMode,
    usage_api::SystemTokenProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Cap on retained entries in one-shot export mode
const MAX_EXPORT_ENTRIES: usize = claude_smi::engine::MAX_ENTRIES;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version render on stdout and exit cleanly; real
            // parse failures exit 1.
            let is_error = e.use_stderr();
            let _ = e.print();
            std::process::exit(if is_error { 1 } else { 0 });
        }
    };

    // stdout is reserved for --no-tui JSON, so logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let mut cfg = config::load(&config_path)?;

    if let Some(tz) = &cli.timezone {
        timezone::resolve(tz)?;
        cfg.general.timezone = tz.clone();
    }
    for flag in [&cli.since, &cli.until].into_iter().flatten() {
        validate_date_flag(flag)?;
    }

    let data_dir = cli.data_dir.clone().unwrap_or_else(config::default_data_dir);

    if cli.no_tui {
        export(cfg, data_dir, cli.view, cli.since, cli.until).await
    } else {
        run_engine(cfg, data_dir, cli.since, cli.until).await
    }
}

/// One-shot pipeline: scan, cap, dedup, price, filter, aggregate, print.
async fn export(
    cfg: config::Config,
    data_dir: PathBuf,
    view: ExportView,
    since: Option<String>,
    until: Option<String>,
) -> Result<()> {
    let tz = timezone::resolve(&cfg.general.timezone)?;

    let cancel = CancelFlag::new();
    let outcome = tokio::task::spawn_blocking(move || scanner::scan_and_parse(&cancel, &data_dir))
        .await
        .map_err(|e| SmiError::Io(std::io::Error::other(format!("scan task: {e}"))))?;

    let mut entries = outcome.entries;
    if entries.len() > MAX_EXPORT_ENTRIES {
        entries.drain(..entries.len() - MAX_EXPORT_ENTRIES);
    }
    let mut entries = parser::dedup(entries);

    let mut table = PricingTable::load_default()?;
    match pricing_fetcher::fetch_remote(LITELLM_PRICING_URL).await {
        Ok(fetched) => table.merge(fetched),
        Err(e) => warn!("pricing fetch failed, using embedded catalog: {e}"),
    }
    let calc = Calculator::new(table, CostMode::Auto);
    calc.apply_all(&mut entries);

    let entries = filters::filter_by_time_range(entries, since.as_deref(), until.as_deref(), tz)?;

    let payload = match view {
        ExportView::Daily => output::render_daily_json(&aggregation::aggregate_daily(&entries, tz))?,
        ExportView::Blocks => output::render_blocks_json(&aggregation::build_blocks(&entries))?,
    };
    println!("{payload}");
    Ok(())
}

/// Run the engine loop until Ctrl-C, surfacing notices on stderr. The
/// snapshot channel is the contract consumed by the dashboard surface.
async fn run_engine(
    cfg: config::Config,
    data_dir: PathBuf,
    since: Option<String>,
    until: Option<String>,
) -> Result<()> {
    let (engine, mut handle) =
        Engine::new(cfg, data_dir, since, until, Arc::new(SystemTokenProvider))?;
    let engine_task = tokio::spawn(engine.run());

    let mut snapshots = handle.snapshots.clone();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = handle.commands.send(EngineMsg::Shutdown).await;
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                info!(
                    entries = snapshot.entries.len(),
                    blocks = snapshot.blocks.len(),
                    days = snapshot.daily.len(),
                    "snapshot published"
                );
            }
            event = handle.events.recv() => {
                match event {
                    Some(EngineEvent::Notice(text)) => warn!("{text}"),
                    Some(EngineEvent::AnimationTick) => {}
                    None => break,
                }
            }
        }
    }

    engine_task
        .await
        .map_err(|e| SmiError::Io(std::io::Error::other(format!("engine task: {e}"))))?
}
