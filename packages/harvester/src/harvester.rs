//! Main harvester service that ties all components together.
//!
//! The crawl itself is blocking (rendering, downloads, OCR). This module runs
//! it on tokio's blocking pool: one task per state, bounded by a semaphore of
//! `workers` permits, each task owning its own rendering session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::error::{HarvesterError, Result};
use crate::http::{ArtifactFetcher, HttpDownloader};
use crate::ledger::{Aggregator, FailureCounts, WardSummary};
use crate::navigator::{Navigator, TraversalStats};
use crate::recovery::TextRecoveryEngine;
use crate::render::{BrowserlessSessionProvider, SessionGuard, SessionProvider};
use crate::types::{HierarchyNode, PollingUnitResult};

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    #[serde(skip)]
    pub rows: Vec<PollingUnitResult>,
    pub ledger: Vec<WardSummary>,
    pub rows_recorded: usize,
    pub leaves_visited: usize,
    pub states_attempted: usize,
    pub states_failed: usize,
    pub subtrees_skipped: usize,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CrawlReport {
    /// Failure counters summed over every ward.
    #[must_use]
    pub fn totals(&self) -> FailureCounts {
        self.ledger
            .iter()
            .fold(FailureCounts::default(), |mut acc, entry| {
                acc.non_document += entry.counts.non_document;
                acc.unreadable += entry.counts.unreadable;
                acc.download_failures += entry.counts.download_failures;
                acc
            })
    }

    /// Whether every visited leaf ended up as a row or a ledger entry.
    #[must_use]
    pub fn is_fully_accounted(&self) -> bool {
        self.rows.len() as u64 + self.totals().total() == self.leaves_visited as u64
    }
}

/// Result of one state's worker.
struct StateOutcome {
    state: String,
    stats: TraversalStats,
    failed: bool,
}

/// Runs a complete crawl.
pub struct Harvester {
    config: Arc<CrawlConfig>,
    sessions: Arc<dyn SessionProvider>,
    navigator: Navigator,
}

impl Harvester {
    /// Assemble a harvester from its collaborators.
    ///
    /// # Arguments
    /// * `config` - crawl configuration, validated here
    /// * `sessions` - opens one rendering session per worker
    /// * `fetcher` - downloads polling-unit artifacts
    /// * `recovery` - turns artifacts into text
    pub fn new(
        config: CrawlConfig,
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn ArtifactFetcher>,
        recovery: TextRecoveryEngine,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let navigator = Navigator::new(
            Arc::clone(&config),
            fetcher,
            Arc::new(recovery),
            Arc::new(Aggregator::new()),
        );
        Ok(Self {
            config,
            sessions,
            navigator,
        })
    }

    /// Harvester backed by Browserless, HTTP downloads and the system OCR tools.
    pub fn from_config(config: CrawlConfig) -> Result<Self> {
        // Fail on bad settings before probing for external tools.
        config.validate()?;
        let sessions = BrowserlessSessionProvider::new(
            &config.browserless_url,
            config.browserless_token.as_deref(),
            config.render_timeout,
        );
        let fetcher = HttpDownloader::new(config.download.clone())?;
        let recovery = TextRecoveryEngine::with_system_tools(config.recovery.clone())?;
        Self::new(config, Arc::new(sessions), Arc::new(fetcher), recovery)
    }

    /// Live view of rows and failures, for progress reporting.
    #[must_use]
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        self.navigator.aggregator()
    }

    #[must_use]
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Crawl every state and collect the results.
    ///
    /// Cancelling `cancel` stops scheduling new states and makes running
    /// workers abandon their remaining siblings; rows recorded so far are
    /// kept in the report. A worker that fails or panics does not affect
    /// the others.
    pub async fn run(&self, cancel: CancellationToken) -> Result<CrawlReport> {
        let started_at = Utc::now();
        let states = self.discover_states().await?;
        tracing::info!(
            states = states.len(),
            workers = self.config.workers,
            "starting crawl"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        let mut workers = JoinSet::new();
        let mut states_attempted = 0;

        for state in states {
            let permit = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!("cancellation requested, not scheduling remaining states");
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            states_attempted += 1;
            let navigator = self.navigator.clone();
            let sessions = Arc::clone(&self.sessions);
            let cancel = cancel.clone();
            workers.spawn_blocking(move || {
                let _permit = permit;
                crawl_state(&navigator, sessions.as_ref(), &state, &cancel)
            });
        }

        let mut stats = TraversalStats::default();
        let mut states_failed = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    tracing::debug!(
                        state = %outcome.state,
                        leaves = outcome.stats.leaves_visited,
                        failed = outcome.failed,
                        "state worker finished"
                    );
                    if outcome.failed {
                        states_failed += 1;
                    }
                    stats.merge(&outcome.stats);
                }
                Err(e) => {
                    tracing::error!(error = %HarvesterError::from(e), "state worker aborted");
                    states_failed += 1;
                }
            }
        }

        let (rows, ledger) = self.aggregator().snapshot();
        let report = CrawlReport {
            rows_recorded: rows.len(),
            rows,
            ledger,
            leaves_visited: stats.leaves_visited,
            states_attempted,
            states_failed,
            subtrees_skipped: stats.subtrees_skipped,
            cancelled: cancel.is_cancelled(),
            started_at,
            finished_at: Utc::now(),
        };

        tracing::info!(
            rows = report.rows_recorded,
            leaves = report.leaves_visited,
            states_failed = report.states_failed,
            cancelled = report.cancelled,
            "crawl finished"
        );
        Ok(report)
    }

    async fn discover_states(&self) -> Result<Vec<Arc<HierarchyNode>>> {
        let navigator = self.navigator.clone();
        let sessions = Arc::clone(&self.sessions);
        tokio::task::spawn_blocking(move || {
            let mut session = SessionGuard::open(sessions.as_ref())?;
            navigator.discover_states(&mut *session)
        })
        .await?
    }
}

/// Crawl one state on the current (blocking) thread.
fn crawl_state(
    navigator: &Navigator,
    sessions: &dyn SessionProvider,
    state: &Arc<HierarchyNode>,
    cancel: &CancellationToken,
) -> StateOutcome {
    let mut stats = TraversalStats::default();
    let result = SessionGuard::open(sessions)
        .and_then(|mut session| navigator.crawl_state(&mut *session, state, cancel, &mut stats));

    let failed = match result {
        Ok(()) => {
            tracing::info!(
                state = %state.name,
                leaves = stats.leaves_visited,
                skipped = stats.subtrees_skipped,
                "state complete"
            );
            false
        }
        Err(HarvesterError::Cancelled) => {
            tracing::info!(
                state = %state.name,
                leaves = stats.leaves_visited,
                "state abandoned after cancellation"
            );
            false
        }
        Err(e) => {
            tracing::error!(state = %state.name, error = %e, "state worker stopped");
            true
        }
    };

    StateOutcome {
        state: state.name.clone(),
        stats,
        failed,
    }
}
