//! Event loop and snapshot orchestrator
//!
//! A single cooperative task owns all engine state: the entry list, the
//! file-offset map, the active pricing table and calculator, the last known
//! quota response, and the published snapshot. I/O runs as background jobs
//! that post a message back to the mailbox; state only changes between whole
//! message handlers, so no structural invariant is ever observable
//! half-updated.
//!
//! Snapshots are immutable and published through a `tokio::sync::watch`
//! channel; presentation keeps the previous snapshot until a new one lands.

use crate::aggregation::{self, DailyAggregate, SessionBlock};
use crate::config::Config;
use crate::cost_calculator::Calculator;
use crate::error::{Result, SmiError};
use crate::filters;
use crate::parser;
use crate::pricing::PricingTable;
use crate::pricing_fetcher::{self, LITELLM_PRICING_URL};
use crate::scanner::{self, CancelFlag, FileChange};
use crate::session::{self, SessionMetrics};
use crate::timezone;
use crate::types::{CostMode, UsageEntry};
use crate::usage_api::{self, ApiUsage, TokenProvider};
use crate::watcher::{LogWatcher, DEFAULT_POLL_INTERVAL};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Cap on retained entries; the oldest are evicted first
pub const MAX_ENTRIES: usize = 500_000;
/// Presentation animation cadence
const ANIMATION_INTERVAL: Duration = Duration::from_millis(250);
/// Mailbox depth for engine messages
const MAILBOX_DEPTH: usize = 64;

/// Messages consumed by the engine loop
#[derive(Debug)]
pub enum EngineMsg {
    /// A full scan finished; replace entries and install offsets wholesale
    FullLoaded {
        entries: Vec<UsageEntry>,
        offsets: HashMap<PathBuf, u64>,
    },
    /// An incremental read finished; append entries, merge offsets
    IncrementalLoaded {
        entries: Vec<UsageEntry>,
        offsets: HashMap<PathBuf, u64>,
    },
    /// The quota fetch finished
    QuotaFetched(std::result::Result<ApiUsage, SmiError>),
    /// The pricing fetch finished
    PricingFetched(std::result::Result<PricingTable, SmiError>),
    /// Configuration changed at runtime (settings UI)
    ConfigChanged(Config),
    /// The active project selection changed
    ProjectFilterChanged(HashSet<String>),
    /// Stop the loop
    Shutdown,
}

/// Side-channel events for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// 250 ms presentation tick; engine state unchanged
    AnimationTick,
    /// Transient error banner text
    Notice(String),
}

/// Immutable view published to presentation on every state change
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Deduped, cost-applied, time-filtered entries
    pub entries: Vec<UsageEntry>,
    /// Entries after the project filter
    pub filtered_entries: Vec<UsageEntry>,
    /// Five-hour session blocks over the filtered entries
    pub blocks: Vec<SessionBlock>,
    /// Daily aggregates over the filtered entries, most recent first
    pub daily: Vec<DailyAggregate>,
    /// Distinct project paths, sorted
    pub projects: Vec<String>,
    /// Burn metrics for the current session window
    pub session: Option<SessionMetrics>,
    /// Last successful quota response
    pub api_usage: Option<ApiUsage>,
    /// Incremented on every pricing table swap
    pub pricing_generation: u64,
    /// When this snapshot was built
    pub built_at: DateTime<Utc>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            filtered_entries: Vec::new(),
            blocks: Vec::new(),
            daily: Vec::new(),
            projects: Vec::new(),
            session: None,
            api_usage: None,
            pricing_generation: 0,
            built_at: Utc::now(),
        }
    }
}

/// Consumer-side handle to a running engine
pub struct EngineHandle {
    /// Send runtime commands (config, project filter, shutdown)
    pub commands: mpsc::Sender<EngineMsg>,
    /// Current snapshot; changes on every engine state transition
    pub snapshots: watch::Receiver<Arc<Snapshot>>,
    /// Animation ticks and transient notices
    pub events: mpsc::Receiver<EngineEvent>,
}

/// The kinds of load work that can be in flight; cancellation is tracked
/// per kind so a replacement only supersedes its own kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LoadKind {
    FullScan,
    TickWalk,
    WatcherParse,
}

struct LoadJob {
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// The engine loop and all state it owns
pub struct Engine {
    config: Config,
    tz: Tz,
    since: Option<String>,
    until: Option<String>,
    data_dir: PathBuf,
    max_entries: usize,
    pricing_url: String,

    entries: Vec<UsageEntry>,
    offsets: HashMap<PathBuf, u64>,
    calc: Calculator,
    api_usage: Option<ApiUsage>,
    pricing_generation: u64,
    initial_loaded: bool,
    active_projects: HashSet<String>,

    token_provider: Arc<dyn TokenProvider>,
    tx: mpsc::Sender<EngineMsg>,
    rx: Option<mpsc::Receiver<EngineMsg>>,
    snapshot_tx: watch::Sender<Arc<Snapshot>>,
    events_tx: mpsc::Sender<EngineEvent>,
    watcher: LogWatcher,
    watcher_rx: Option<mpsc::Receiver<Vec<FileChange>>>,

    load_jobs: HashMap<LoadKind, LoadJob>,
    quota_job: Option<JoinHandle<()>>,
    pricing_job: Option<JoinHandle<()>>,
}

impl Engine {
    /// Build an engine and its consumer handle.
    ///
    /// Fails on an unknown configured timezone or a broken embedded pricing
    /// catalog; both are startup errors.
    pub fn new(
        config: Config,
        data_dir: PathBuf,
        since: Option<String>,
        until: Option<String>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<(Self, EngineHandle)> {
        let tz = timezone::resolve(&config.general.timezone)?;
        let table = PricingTable::load_default()?;

        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        let (events_tx, events_rx) = mpsc::channel(MAILBOX_DEPTH);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Snapshot::empty()));
        let (watcher_tx, watcher_rx) = mpsc::channel(MAILBOX_DEPTH);

        let watcher = LogWatcher::new(
            vec![data_dir.clone()],
            DEFAULT_POLL_INTERVAL,
            watcher_tx,
        );

        let engine = Self {
            config,
            tz,
            since,
            until,
            data_dir,
            max_entries: MAX_ENTRIES,
            pricing_url: LITELLM_PRICING_URL.to_string(),
            entries: Vec::new(),
            offsets: HashMap::new(),
            calc: Calculator::new(table, CostMode::Auto),
            api_usage: None,
            pricing_generation: 0,
            initial_loaded: false,
            active_projects: HashSet::new(),
            token_provider,
            tx: tx.clone(),
            rx: Some(rx),
            snapshot_tx,
            events_tx,
            watcher,
            watcher_rx: Some(watcher_rx),
            load_jobs: HashMap::new(),
            quota_job: None,
            pricing_job: None,
        };

        let handle = EngineHandle {
            commands: tx,
            snapshots: snapshot_rx,
            events: events_rx,
        };

        Ok((engine, handle))
    }

    /// Override the remote pricing catalog URL (tests).
    pub fn with_pricing_url(mut self, url: impl Into<String>) -> Self {
        self.pricing_url = url.into();
        self
    }

    /// Run the loop until shutdown. Ticks drive loads and quota fetches;
    /// everything else arrives as a message.
    pub async fn run(mut self) -> Result<()> {
        let mut rx = self.rx.take().expect("engine already running");
        let mut watcher_rx = self.watcher_rx.take().expect("engine already running");

        let mut tick_period = self.tick_period();
        let mut next_tick = Instant::now() + tick_period;
        let mut animation = tokio::time::interval(ANIMATION_INTERVAL);
        animation.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.watcher.start();
        self.spawn_full_scan();
        self.spawn_pricing_fetch();
        self.spawn_quota_fetch();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_tick) => {
                    next_tick = Instant::now() + tick_period;
                    self.on_tick();
                }
                _ = animation.tick() => {
                    let _ = self.events_tx.try_send(EngineEvent::AnimationTick);
                }
                Some(changes) = watcher_rx.recv() => {
                    self.spawn_incremental_parse(changes);
                }
                msg = rx.recv() => {
                    match msg {
                        None | Some(EngineMsg::Shutdown) => break,
                        Some(msg) => {
                            if let Some(period) = self.handle_message(msg) {
                                tick_period = period;
                                next_tick = Instant::now() + tick_period;
                            }
                        }
                    }
                }
            }
        }

        self.shutdown().await;
        while rx.try_recv().is_ok() {}
        Ok(())
    }

    fn tick_period(&self) -> Duration {
        Duration::from_secs(self.config.general.interval.max(1))
    }

    fn on_tick(&mut self) {
        if self.initial_loaded {
            self.spawn_incremental_walk();
        } else {
            self.spawn_full_scan();
        }
        self.spawn_quota_fetch();
    }

    /// Apply one message. Returns a new tick period when it changed.
    fn handle_message(&mut self, msg: EngineMsg) -> Option<Duration> {
        match msg {
            EngineMsg::FullLoaded { entries, offsets } => {
                debug!(entries = entries.len(), files = offsets.len(), "full load");
                self.watcher.seed_offsets(offsets.clone());
                self.offsets = offsets;
                self.initial_loaded = true;
                self.process_and_publish(entries);
                None
            }
            EngineMsg::IncrementalLoaded { entries, offsets } => {
                if entries.is_empty() && offsets.is_empty() {
                    return None;
                }
                for (path, offset) in &offsets {
                    self.watcher.set_offset(path, *offset);
                }
                self.offsets.extend(offsets);
                if !entries.is_empty() {
                    debug!(entries = entries.len(), "incremental load");
                    let mut merged = self.entries.clone();
                    merged.extend(entries);
                    self.process_and_publish(merged);
                }
                None
            }
            EngineMsg::QuotaFetched(Ok(usage)) => {
                self.api_usage = Some(usage);
                self.publish();
                None
            }
            EngineMsg::QuotaFetched(Err(e)) => {
                self.notice(format!("API: {e}"));
                None
            }
            EngineMsg::PricingFetched(Ok(fetched)) => {
                let mut effective = PricingTable::load_default().unwrap_or_default();
                effective.merge(fetched);
                self.calc.update_table(effective);
                self.pricing_generation += 1;
                let entries = std::mem::take(&mut self.entries);
                self.process_and_publish(entries);
                None
            }
            EngineMsg::PricingFetched(Err(e)) => {
                // Keep the previously merged table.
                self.notice(format!("Pricing: {e}"));
                None
            }
            EngineMsg::ConfigChanged(config) => {
                match timezone::resolve(&config.general.timezone) {
                    Ok(tz) => self.tz = tz,
                    Err(e) => self.notice(format!("Config: {e}")),
                }
                self.config = config;
                let entries = std::mem::take(&mut self.entries);
                self.process_and_publish(entries);
                Some(self.tick_period())
            }
            EngineMsg::ProjectFilterChanged(projects) => {
                self.active_projects = projects;
                self.publish();
                None
            }
            EngineMsg::Shutdown => None,
        }
    }

    /// Dedup, price, time-filter and publish a fresh entry list.
    fn process_and_publish(&mut self, raw: Vec<UsageEntry>) {
        let mut entries = parser::dedup(raw);
        if entries.len() > self.max_entries {
            let excess = entries.len() - self.max_entries;
            entries.drain(..excess);
        }
        self.calc.apply_all(&mut entries);

        // Date flags are validated at startup; should the filter still
        // fail, the unfiltered list is kept rather than dropped.
        if self.since.is_none() && self.until.is_none() {
            self.entries = entries;
        } else {
            self.entries = match filters::filter_by_time_range(
                entries.clone(),
                self.since.as_deref(),
                self.until.as_deref(),
                self.tz,
            ) {
                Ok(filtered) => filtered,
                Err(e) => {
                    self.notice(format!("Filter: {e}"));
                    entries
                }
            };
        }

        self.publish();
    }

    /// Build and publish a snapshot from current state.
    fn publish(&mut self) {
        let projects = filters::collect_projects(&self.entries);
        let filtered = filters::filter_by_projects(&self.entries, &self.active_projects);
        let blocks = aggregation::build_blocks(&filtered);
        let daily = aggregation::aggregate_daily(&filtered, self.tz);
        let session = session::build_session_metrics(
            &filtered,
            &blocks,
            self.api_usage.as_ref(),
            &self.calc,
            Utc::now(),
        );

        let snapshot = Snapshot {
            entries: self.entries.clone(),
            filtered_entries: filtered,
            blocks,
            daily,
            projects,
            session,
            api_usage: self.api_usage.clone(),
            pricing_generation: self.pricing_generation,
            built_at: Utc::now(),
        };
        let _ = self.snapshot_tx.send(Arc::new(snapshot));
    }

    fn notice(&self, text: String) {
        warn!("{text}");
        let _ = self.events_tx.try_send(EngineEvent::Notice(text));
    }

    /// Cancel and forget the in-flight load job of one kind. Jobs of other
    /// kinds keep running.
    fn abort_load_job(&mut self, kind: LoadKind) {
        if let Some(job) = self.load_jobs.remove(&kind) {
            job.cancel.cancel();
            job.handle.abort();
        }
    }

    fn spawn_full_scan(&mut self) {
        // A tick while the initial scan is still walking is a retry, not a
        // replacement; let the running scan finish.
        if let Some(job) = self.load_jobs.get(&LoadKind::FullScan) {
            if !job.handle.is_finished() {
                return;
            }
        }
        self.abort_load_job(LoadKind::FullScan);

        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let tx = self.tx.clone();
        let data_dir = self.data_dir.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = scanner::scan_and_parse(&job_cancel, &data_dir);
            if job_cancel.is_cancelled() {
                return;
            }
            let _ = tx.blocking_send(EngineMsg::FullLoaded {
                entries: outcome.entries,
                offsets: outcome.offsets,
            });
        });
        self.load_jobs.insert(LoadKind::FullScan, LoadJob { cancel, handle });
    }

    /// Tick-driven incremental load: walk, diff against known offsets, parse
    /// whatever grew.
    fn spawn_incremental_walk(&mut self) {
        self.abort_load_job(LoadKind::TickWalk);

        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let tx = self.tx.clone();
        let data_dir = self.data_dir.clone();
        let offsets = self.offsets.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let changes = scanner::detect_changes(&job_cancel, &data_dir, &offsets);
            let (entries, new_offsets) = scanner::parse_incremental(&job_cancel, &changes);
            if job_cancel.is_cancelled() {
                return;
            }
            let _ = tx.blocking_send(EngineMsg::IncrementalLoaded {
                entries,
                offsets: new_offsets,
            });
        });
        self.load_jobs.insert(LoadKind::TickWalk, LoadJob { cancel, handle });
    }

    /// Watcher-driven incremental load for an explicit change batch.
    fn spawn_incremental_parse(&mut self, changes: Vec<FileChange>) {
        if changes.is_empty() {
            return;
        }
        self.abort_load_job(LoadKind::WatcherParse);

        let cancel = CancelFlag::new();
        let job_cancel = cancel.clone();
        let tx = self.tx.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let (entries, new_offsets) = scanner::parse_incremental(&job_cancel, &changes);
            if job_cancel.is_cancelled() {
                return;
            }
            let _ = tx.blocking_send(EngineMsg::IncrementalLoaded {
                entries,
                offsets: new_offsets,
            });
        });
        self.load_jobs
            .insert(LoadKind::WatcherParse, LoadJob { cancel, handle });
    }

    fn spawn_quota_fetch(&mut self) {
        if let Some(job) = self.quota_job.take() {
            job.abort();
        }
        let tx = self.tx.clone();
        let provider = self.token_provider.clone();
        self.quota_job = Some(tokio::spawn(async move {
            let result = usage_api::fetch_usage(provider).await;
            let _ = tx.send(EngineMsg::QuotaFetched(result)).await;
        }));
    }

    fn spawn_pricing_fetch(&mut self) {
        if let Some(job) = self.pricing_job.take() {
            job.abort();
        }
        let tx = self.tx.clone();
        let url = self.pricing_url.clone();
        self.pricing_job = Some(tokio::spawn(async move {
            let result = pricing_fetcher::fetch_remote(&url).await;
            let _ = tx.send(EngineMsg::PricingFetched(result)).await;
        }));
    }

    async fn shutdown(&mut self) {
        for (_, job) in self.load_jobs.drain() {
            job.cancel.cancel();
            job.handle.abort();
        }
        if let Some(job) = self.quota_job.take() {
            job.abort();
        }
        if let Some(job) = self.pricing_job.take() {
            job.abort();
        }
        self.watcher.stop().await;
        debug!("engine stopped");
    }
}
