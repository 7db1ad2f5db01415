use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use skyfeed_sync::backfill::{BackfillService, BackfillSettings, HistoricalReport};
use skyfeed_sync::cleanup::run_cleanup;
use skyfeed_sync::clock::{Clock, SystemClock};
use skyfeed_sync::config::{self, Config};
use skyfeed_sync::db::SqliteStore;
use skyfeed_sync::feeds::{Feed, FeedSettings, FeedSyncer};
use skyfeed_sync::http::ReqwestFetcher;
use skyfeed_sync::imagery::ImageryBackfill;
use skyfeed_sync::lock::{process_holder, SyncGuard, HISTORICAL_LOCK, RECURRING_LOCK};
use skyfeed_sync::logfile::{self, LogFileLayer};
use skyfeed_sync::model::BackfillRequest;
use skyfeed_sync::progress::TracingReporter;
use skyfeed_sync::store::ResponseCache;

#[derive(Debug, Parser)]
#[command(author, version, about = "Sync astronomy and space-weather feeds into a local store")]
struct Args {
    /// Path to YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sync one recurring feed, or `all` enabled feeds
    Sync { feed: String },
    /// Show stored entries, last runs and held locks
    Status,
    /// Drop every cached feed response
    ClearCache,
    /// Print the tail of the log file
    Logs {
        #[arg(long, default_value_t = 50)]
        lines: usize,
    },
    /// Backfill the daily photo feed for [start, end]; end defaults to today
    SyncHistorical {
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
    /// Download images still marked as pending
    SyncHistoricalImagery,
    /// Backfill, download imagery, then clean up once
    SyncBothHistorical {
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
}

fn init_tracing(log_file: &Path) -> Result<()> {
    let file_layer = LogFileLayer::open(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    cfg.ensure_dirs()?;

    if let Command::Logs { lines } = args.command {
        for line in logfile::tail(Path::new(&cfg.app.log_file), lines)? {
            println!("{line}");
        }
        return Ok(());
    }

    init_tracing(Path::new(&cfg.app.log_file))?;
    let app = App::open(cfg).await?;
    info!(command = ?args.command, "starting");
    match args.command {
        Command::Sync { feed } => app.sync(&feed).await,
        Command::Status => app.status().await,
        Command::ClearCache => {
            let removed = app.store.clear().await?;
            println!("cleared {removed} cached responses");
            Ok(())
        }
        Command::SyncHistorical { start, end } => {
            let report = app.historical(start, end, false).await?;
            print_historical(&report);
            Ok(())
        }
        Command::SyncHistoricalImagery => {
            let report = app.with_lock(HISTORICAL_LOCK, app.imagery().run()).await?;
            let cleanup = run_cleanup(app.store.as_ref()).await;
            println!(
                "imagery: downloaded={} failed={} | cleanup: {cleanup}",
                report.downloaded, report.failed
            );
            Ok(())
        }
        Command::SyncBothHistorical { start, end } => {
            let report = app.historical(start, end, true).await?;
            print_historical(&report);
            Ok(())
        }
        Command::Logs { .. } => Ok(()),
    }
}

struct App {
    cfg: Config,
    store: Arc<SqliteStore>,
    fetcher: Arc<ReqwestFetcher>,
    clock: Arc<SystemClock>,
}

impl App {
    async fn open(cfg: Config) -> Result<Self> {
        let database_url = cfg.database_url();
        let store = SqliteStore::connect(&database_url)
            .await
            .with_context(|| format!("failed to open database {database_url}"))?;
        let fetcher = ReqwestFetcher::new(
            Duration::from_secs(cfg.api.request_timeout_seconds),
            cfg.api.max_redirects,
        )?;
        Ok(Self {
            cfg,
            store: Arc::new(store),
            fetcher: Arc::new(fetcher),
            clock: Arc::new(SystemClock),
        })
    }

    /// Run `work` while holding the advisory lock `name`, releasing it either way.
    async fn with_lock<T, E>(
        &self,
        name: &str,
        work: impl std::future::Future<Output = Result<T, E>>,
    ) -> Result<T>
    where
        E: Into<anyhow::Error>,
    {
        let ttl = Duration::from_secs(self.cfg.app.lock_ttl_seconds);
        let guard = SyncGuard::acquire(
            self.store.as_ref(),
            self.clock.as_ref(),
            name,
            &process_holder(),
            ttl,
        )
        .await?;
        let result = work.await.map_err(Into::into);
        if let Err(err) = guard.release().await {
            warn!(%err, lock = name, "failed to release sync lock");
        }
        result
    }

    fn imagery(&self) -> ImageryBackfill {
        ImageryBackfill::new(
            self.fetcher.clone(),
            self.clock.clone(),
            self.store.clone(),
            self.cfg.media_dir(),
            Duration::from_millis(self.cfg.backfill.scrape_delay_ms),
        )
    }

    async fn historical(
        &self,
        start: NaiveDate,
        end: Option<NaiveDate>,
        with_imagery: bool,
    ) -> Result<HistoricalReport> {
        let request = BackfillRequest {
            start_date: start,
            end_date: end.unwrap_or_else(|| self.clock.now().date_naive()),
            api_keys: self.cfg.api.keys.clone(),
        };
        let service = BackfillService::new(
            self.fetcher.clone(),
            self.clock.clone(),
            self.store.clone(),
            Arc::new(TracingReporter::new()),
            BackfillSettings::from_config(&self.cfg)?,
        );
        if with_imagery {
            let imagery = self.imagery();
            self.with_lock(HISTORICAL_LOCK, service.sync_both_historical(&request, &imagery))
                .await
        } else {
            self.with_lock(HISTORICAL_LOCK, service.sync_historical(&request))
                .await
        }
    }

    async fn sync(&self, target: &str) -> Result<()> {
        let syncer = FeedSyncer::new(
            self.fetcher.clone(),
            self.clock.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            FeedSettings::from_config(&self.cfg),
        );

        if target.eq_ignore_ascii_case("all") {
            let report = self
                .with_lock(RECURRING_LOCK, async { Ok::<_, anyhow::Error>(syncer.sync_all().await) })
                .await?;
            for r in &report.succeeded {
                println!("{:<14} {}{}", r.feed.name(), r.tally.summary_line(), if r.cached { " (cached)" } else { "" });
            }
            for f in &report.failed {
                println!("{:<14} FAILED: {}", f.feed.name(), f.error);
            }
            if report.succeeded.is_empty() && !report.failed.is_empty() {
                bail!("every feed failed");
            }
            return Ok(());
        }

        let feed = Feed::parse_feed(target).ok_or_else(|| {
            let names: Vec<&str> = Feed::ALL.iter().map(|f| f.name()).collect();
            anyhow!("unknown feed '{target}'; expected all or one of: {}", names.join(", "))
        })?;
        let report = self.with_lock(RECURRING_LOCK, syncer.sync(feed)).await?;
        println!(
            "{:<14} {}{}",
            report.feed.name(),
            report.tally.summary_line(),
            if report.cached { " (cached)" } else { "" }
        );
        Ok(())
    }

    async fn status(&self) -> Result<()> {
        let st = self.store.status().await?;
        println!("entries:");
        if st.kinds.is_empty() {
            println!("  (none)");
        }
        for k in &st.kinds {
            println!("  {:<14} {}", k.kind, k.entries);
        }
        println!("pending media: {}", st.pending_media);
        println!("cached responses: {}", st.cached_responses);
        println!("last runs:");
        for r in &st.runs {
            println!("  {:<14} {} {}", r.name, r.finished_at, r.summary);
        }
        let now = Utc::now().timestamp();
        for l in st.locks.iter().filter(|l| l.expires_at > now) {
            println!("lock held: {} by {} ({}s left)", l.name, l.holder, l.expires_at - now);
        }
        Ok(())
    }
}

fn print_historical(report: &HistoricalReport) {
    println!("data: {}", report.tally.summary_line());
    if let Some(images) = &report.imagery {
        println!("imagery: downloaded={} failed={}", images.downloaded, images.failed);
    }
    println!("cleanup: {}", report.cleanup);
}
