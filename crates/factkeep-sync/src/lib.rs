//! Collection cycle orchestration: fetch, dedupe, append, save, wait.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use factkeep_core::{Archive, FactRecord, FetchedFact};
use factkeep_storage::{ArchiveStore, HttpClientConfig, HttpFetcher};
use tokio::sync::watch;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "factkeep-sync";

pub const DEFAULT_ENDPOINT_URL: &str = "https://uselessfacts.jsph.pl/random.json?language=en";
pub const DEFAULT_ARCHIVE_PATH: &str = "facts.json";
pub const DEFAULT_INTERVAL_SECS: u64 = 30;

/// How fact texts are compared when checking for duplicates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextMatch {
    Exact,
    #[default]
    Normalized,
}

impl FromStr for TextMatch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "normalized" | "normalised" => Ok(Self::Normalized),
            other => Err(format!("unknown text match mode `{other}` (expected exact|normalized)")),
        }
    }
}

/// What to do when the archive file exists but does not parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorruptArchivePolicy {
    /// Fail the cycle and leave the file untouched.
    #[default]
    Abort,
    /// Start over from an empty archive; the next save overwrites the file.
    Reset,
}

impl FromStr for CorruptArchivePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "reset" => Ok(Self::Reset),
            other => Err(format!("unknown corrupt archive policy `{other}` (expected abort|reset)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub endpoint_url: String,
    pub archive_path: PathBuf,
    pub interval: Duration,
    pub http_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    pub text_match: TextMatch,
    /// Store every upstream payload field, not just the text.
    pub keep_payload: bool,
    pub on_corrupt: CorruptArchivePolicy,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            archive_path: PathBuf::from(DEFAULT_ARCHIVE_PATH),
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            http_timeout: None,
            user_agent: None,
            text_match: TextMatch::default(),
            keep_payload: false,
            on_corrupt: CorruptArchivePolicy::default(),
        }
    }
}

impl CollectorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or unparseable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            endpoint_url: lookup("FACTKEEP_URL").unwrap_or(defaults.endpoint_url),
            archive_path: lookup("FACTKEEP_ARCHIVE")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_path),
            interval: lookup("FACTKEEP_INTERVAL_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            http_timeout: lookup("FACTKEEP_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .map(Duration::from_secs),
            user_agent: lookup("FACTKEEP_USER_AGENT").filter(|v| !v.trim().is_empty()),
            text_match: lookup("FACTKEEP_TEXT_MATCH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.text_match),
            keep_payload: lookup("FACTKEEP_KEEP_PAYLOAD")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(defaults.keep_payload),
            on_corrupt: lookup("FACTKEEP_ON_CORRUPT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.on_corrupt),
        }
    }
}

/// Text-keyed duplicate detection over the whole archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupEngine {
    text_match: TextMatch,
}

impl DedupEngine {
    pub fn new(text_match: TextMatch) -> Self {
        Self { text_match }
    }

    /// Trim and collapse whitespace runs; case is preserved.
    pub fn normalize_text(input: &str) -> String {
        input.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn is_duplicate(&self, candidate: &str, archive: &Archive) -> bool {
        match self.text_match {
            TextMatch::Exact => archive.iter().any(|record| record.text == candidate),
            TextMatch::Normalized => {
                let key = Self::normalize_text(candidate);
                archive
                    .iter()
                    .any(|record| Self::normalize_text(&record.text) == key)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Added { id: u64, text: String, total: usize },
    Duplicate { text: String, total: usize },
    FetchFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cycles: usize,
    pub added: usize,
    pub duplicates: usize,
    pub fetch_failures: usize,
}

impl LoopSummary {
    fn start() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            cycles: 0,
            added: 0,
            duplicates: 0,
            fetch_failures: 0,
        }
    }

    fn record(&mut self, outcome: &CycleOutcome) {
        self.cycles += 1;
        match outcome {
            CycleOutcome::Added { .. } => self.added += 1,
            CycleOutcome::Duplicate { .. } => self.duplicates += 1,
            CycleOutcome::FetchFailed { .. } => self.fetch_failures += 1,
        }
    }
}

pub struct Collector {
    config: CollectorConfig,
    http: HttpFetcher,
    store: ArchiveStore,
    dedup: DedupEngine,
}

impl Collector {
    pub fn new(config: CollectorConfig) -> Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: config.user_agent.clone(),
        })?;
        let store = ArchiveStore::new(config.archive_path.clone());
        let dedup = DedupEngine::new(config.text_match);
        Ok(Self {
            config,
            http,
            store,
            dedup,
        })
    }

    /// One fetch → load → dedupe → append/save pass. Fetch failures are outcomes, not errors.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);
        async move {
            info!(url = %self.config.endpoint_url, "fetching a new fact");
            let fact = match self.http.fetch_fact(&self.config.endpoint_url).await {
                Ok(fact) => fact,
                Err(err) => {
                    warn!(error = %err, transport = err.is_transport(), "fetch failed; skipping cycle");
                    return Ok(CycleOutcome::FetchFailed {
                        reason: err.to_string(),
                    });
                }
            };

            info!(fetched_at = %fact.fetched_at, text = %fact.text, "fact received");

            let mut archive = self.load_archive().await?;
            if self.dedup.is_duplicate(&fact.text, &archive) {
                info!(total = archive.len(), "fact already archived; skipping");
                return Ok(CycleOutcome::Duplicate {
                    text: fact.text,
                    total: archive.len(),
                });
            }

            let record = self.build_record(&fact, archive.next_id());
            let id = record.id;
            archive.push(record);
            self.store.save(&archive).await.with_context(|| {
                format!("saving archive {}", self.store.path().display())
            })?;

            info!(id, total = archive.len(), "new unique fact archived");
            Ok(CycleOutcome::Added {
                id,
                text: fact.text,
                total: archive.len(),
            })
        }
        .instrument(span)
        .await
    }

    /// Run cycles until `stop` flips to true, waiting `interval` between them.
    pub async fn run_until_stopped(&self, mut stop: watch::Receiver<bool>) -> Result<LoopSummary> {
        info!(
            url = %self.config.endpoint_url,
            archive = %self.store.path().display(),
            interval_secs = self.config.interval.as_secs(),
            "collector started"
        );

        let mut summary = LoopSummary::start();
        loop {
            if *stop.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome?,
                _ = stop_requested(&mut stop) => {
                    info!("stop requested mid-cycle; abandoning it");
                    break;
                }
            };
            summary.record(&outcome);

            info!(
                wait_secs = self.config.interval.as_secs(),
                "waiting before next cycle"
            );
            if wait_or_stop(self.config.interval, &mut stop).await {
                break;
            }
        }

        summary.finished_at = Utc::now();
        info!(
            cycles = summary.cycles,
            added = summary.added,
            duplicates = summary.duplicates,
            fetch_failures = summary.fetch_failures,
            "collector stopped"
        );
        Ok(summary)
    }

    async fn load_archive(&self) -> Result<Archive> {
        match self.config.on_corrupt {
            CorruptArchivePolicy::Abort => self.store.load_strict().await.with_context(|| {
                format!(
                    "loading archive {} (left untouched)",
                    self.store.path().display()
                )
            }),
            CorruptArchivePolicy::Reset => Ok(self.store.load().await),
        }
    }

    fn build_record(&self, fact: &FetchedFact, id: u64) -> FactRecord {
        let record = FactRecord::new(id, fact.text.clone(), Some(fact.source_url.clone()));
        if self.config.keep_payload {
            record.with_passthrough(&fact.payload)
        } else {
            record
        }
    }
}

/// Resolves once the stop flag is raised; never resolves if the sender is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `interval`; returns true if the stop flag was raised first.
async fn wait_or_stop(interval: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = stop_requested(stop) => true,
    }
}
