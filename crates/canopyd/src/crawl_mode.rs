//! Crawl mode: crawls one tree while the control loops adapt the pool.
//!
//! In this mode, the daemon:
//! 1. Resolves configuration (file, then `CANOPY_*` env, then CLI flags)
//! 2. Builds the shared scheduler state and tuning handle
//! 3. Starts the resource monitor, scaling engine and auto-tuner loops
//! 4. Submits the root task and supervises workers until the crawl drains
//!    or Ctrl-C arrives
//! 5. Writes the crawled tree and the final metrics tick

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use canopy_autoscale::{pool_scale_fn, ScalingEngine};
use canopy_autotune::AutoTuner;
use canopy_core::CanopyConfig;
use canopy_crawl::{FsFetcher, Supervisor, TreeSink, WorkerContext, WorkerSettings};
use canopy_metrics::{render_prometheus, MetricsFacade, PerformanceCollector};
use canopy_pool::{RetryPolicy, SchedulerState, WorkerBounds};
use canopy_resources::{ResourceMonitor, SysinfoSampler};
use canopy_state::{Journal, TuningHandle};

/// Command-line overrides for a crawl.
#[derive(Debug, Default)]
pub struct CrawlOptions {
    pub config: Option<PathBuf>,
    pub root: Option<PathBuf>,
    pub workers: Option<u32>,
    pub journal: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub metrics: Option<PathBuf>,
}

/// Read the config file if given, then layer `CANOPY_*` variables on top.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CanopyConfig> {
    let mut config = match path {
        Some(p) => CanopyConfig::from_file(p)?,
        None => CanopyConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

/// CLI flags win over both the file and the environment.
fn apply_cli(config: &mut CanopyConfig, opts: &CrawlOptions) {
    if let Some(root) = &opts.root {
        config.crawl.get_or_insert_default().root = Some(root.display().to_string());
    }
    if let Some(workers) = opts.workers {
        config.crawl.get_or_insert_default().initial_workers = Some(workers);
    }
    if let Some(journal) = &opts.journal {
        config.journal.get_or_insert_default().path = Some(journal.clone());
    }
}

pub async fn run_crawl(opts: CrawlOptions) -> anyhow::Result<()> {
    info!("canopy daemon starting in crawl mode");

    let mut config = load_config(opts.config.as_deref())?;
    apply_cli(&mut config, &opts);

    let crawl = config.crawl_settings();
    let root = crawl
        .root
        .as_deref()
        .map(PathBuf::from)
        .context("no crawl root: pass --root or set [crawl].root")?;

    // ── Initialize subsystems ──────────────────────────────────

    let params = config.tuning_parameters()?;
    let bounds = WorkerBounds {
        min: params.min_workers,
        max: params.max_workers,
    };
    let monitoring_interval = params.monitoring_interval();
    let tuning = TuningHandle::new(params)?;

    let journal = match config.journal_path() {
        Some(path) => {
            let journal = Journal::open(path).await?;
            info!(path = %path.display(), "journal opened");
            Some(Arc::new(journal))
        }
        None => None,
    };

    let state = Arc::new(SchedulerState::new(bounds, crawl.initial_workers)?);
    let initial = state.workers().max_workers().await;
    info!(min = bounds.min, max = bounds.max, initial, "scheduler initialized");

    let collector = Arc::new(PerformanceCollector::new(state.clone()));
    let mut monitor = ResourceMonitor::new(Arc::new(SysinfoSampler::new()));
    if let Some(journal) = &journal {
        monitor = monitor.with_journal(journal.clone());
    }
    let monitor = Arc::new(monitor);
    let facade = Arc::new(MetricsFacade::new(collector.clone(), monitor.clone()));
    info!("metrics facade initialized");

    let mut engine =
        ScalingEngine::new(tuning.clone(), initial).with_scale_fn(pool_scale_fn(state.clone()));
    let mut tuner = AutoTuner::new(tuning.clone(), config.tuner_settings()?);
    if let Some(journal) = &journal {
        engine = engine.with_journal(journal.clone());
        tuner = tuner.with_journal(journal.clone());
    }

    let fetcher = FsFetcher::new(&root);
    let root_task = fetcher.root_task();
    let sink = Arc::new(TreeSink::new());
    let retry = config.retry_settings()?;
    let ctx = Arc::new(WorkerContext {
        state: state.clone(),
        fetcher: Arc::new(fetcher),
        sink: sink.clone(),
        collector,
        retry: RetryPolicy::new(retry.max_retries, retry.base_delay_secs, retry.multiplier),
        settings: WorkerSettings {
            idle_timeout: Duration::from_secs(crawl.idle_timeout_secs),
            max_idle_timeouts: crawl.max_idle_timeouts,
            startup_delay: Duration::from_millis(crawl.worker_startup_delay_ms),
        },
    });

    // ── Start background tasks ─────────────────────────────────

    let monitor_handle = {
        let monitor = monitor.clone();
        let shutdown = state.subscribe_shutdown();
        tokio::spawn(async move { monitor.run(monitoring_interval, shutdown).await })
    };
    let engine_handle = tokio::spawn(engine.run(facade.clone(), state.subscribe_shutdown()));
    let tuner_handle = tokio::spawn(tuner.run(facade.clone(), state.subscribe_shutdown()));

    // ── Crawl ──────────────────────────────────────────────────

    if !state.submit(root_task.clone()).await {
        anyhow::bail!("root task {} was rejected", root_task.id);
    }
    info!(root = %root.display(), "crawl started");
    let supervisor = tokio::spawn(Supervisor::new(ctx).run());

    tokio::select! {
        _ = state.wait_drained() => info!("crawl drained"),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutdown signal received");
        }
    }
    state.shutdown();

    let report = supervisor.await?;
    let loops_ok = [
        join_loop("resource monitor", monitor_handle).await,
        join_loop("scaling engine", engine_handle).await,
        join_loop("auto-tuner", tuner_handle).await,
    ]
    .iter()
    .all(|ok| *ok);

    // ── Results ────────────────────────────────────────────────

    let tick = facade.tick().await;
    let counters = state.counters().await;
    info!(
        submitted = counters.submitted,
        completed = counters.completed,
        failed = counters.failed,
        retries = counters.retries,
        workers_started = report.workers_started,
        elapsed_secs = state.elapsed().as_secs(),
        loops_ok,
        score = tick.performance_score,
        "crawl finished"
    );
    if counters.outstanding > 0 {
        warn!(outstanding = counters.outstanding, "crawl interrupted before drain");
    }

    if let Some(path) = &opts.output {
        sink.write_json(&root_task.id, path).await?;
    }
    if let Some(path) = &opts.metrics {
        tokio::fs::write(path, render_prometheus(&tick))
            .await
            .with_context(|| format!("writing metrics to {}", path.display()))?;
        info!(path = %path.display(), "metrics written");
    }

    info!("canopy daemon stopped");
    Ok(())
}

/// Await a control loop after shutdown; a panic is logged, not propagated.
async fn join_loop(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            error!(task = name, error = %e, "control loop panicked");
            false
        }
        Err(e) => {
            error!(task = name, error = %e, "control loop did not finish");
            false
        }
    }
}
