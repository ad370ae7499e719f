//! Hierarchical navigator.
//!
//! Walks State → LGA → Ward → Polling Unit through one rendering session and
//! runs every polling unit through download, text recovery and parsing.
//! Everything below a state happens sequentially on the calling thread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{CrawlConfig, LevelSignature};
use crate::error::{HarvesterError, Result};
use crate::http::ArtifactFetcher;
use crate::ledger::Aggregator;
use crate::links::{extract_links, extract_polling_units, Link, PollingUnitLinks};
use crate::parser::parse_polling_unit;
use crate::recovery::TextRecoveryEngine;
use crate::render::RenderSession;
use crate::types::{HierarchyNode, PollingUnitResult};

/// What happened to a single polling unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafOutcome {
    /// A row was appended to the result table.
    Recorded,
    /// The artifact was neither PDF nor image.
    NonDocument,
    /// No readable text could be recovered.
    Unreadable,
    /// The download exhausted its attempts.
    DownloadFailed,
}

/// Counters for one worker's traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    pub lgas_visited: usize,
    pub wards_visited: usize,
    pub leaves_visited: usize,
    /// Subtrees skipped because their page failed to render or had no links.
    pub subtrees_skipped: usize,
}

impl TraversalStats {
    pub fn merge(&mut self, other: &Self) {
        self.lgas_visited += other.lgas_visited;
        self.wards_visited += other.wards_visited;
        self.leaves_visited += other.leaves_visited;
        self.subtrees_skipped += other.subtrees_skipped;
    }
}

/// Drives traversal and the per-leaf pipeline.
#[derive(Clone)]
pub struct Navigator {
    config: Arc<CrawlConfig>,
    fetcher: Arc<dyn ArtifactFetcher>,
    recovery: Arc<TextRecoveryEngine>,
    aggregator: Arc<Aggregator>,
}

impl Navigator {
    #[must_use]
    pub fn new(
        config: Arc<CrawlConfig>,
        fetcher: Arc<dyn ArtifactFetcher>,
        recovery: Arc<TextRecoveryEngine>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            config,
            fetcher,
            recovery,
            aggregator,
        }
    }

    #[must_use]
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Render the root page and list its states.
    ///
    /// Unlike deeper levels, a root page that fails to render is an error:
    /// there is no sibling to continue with.
    pub fn discover_states(
        &self,
        session: &mut dyn RenderSession,
    ) -> Result<Vec<Arc<HierarchyNode>>> {
        let signature = &self.config.signatures.states;
        let html = session.render_when_present(
            &self.config.root_url,
            &signature.ready_selector,
            self.config.render_timeout,
        )?;
        let links = extract_links(&html, &self.config.root_url, &signature.link_selector)?;

        tracing::info!(
            root_url = %self.config.root_url,
            states = links.len(),
            "discovered states"
        );
        Ok(links
            .iter()
            .map(|link| HierarchyNode::state(&link.text, link.href.as_str()))
            .collect())
    }

    /// Crawl every LGA, ward and polling unit below `state`.
    ///
    /// Recoverable failures are logged, counted and skipped. Returns an error
    /// only for worker-fatal conditions: cancellation or a lost session.
    pub fn crawl_state(
        &self,
        session: &mut dyn RenderSession,
        state: &Arc<HierarchyNode>,
        cancel: &CancellationToken,
        stats: &mut TraversalStats,
    ) -> Result<()> {
        tracing::info!(state = %state.name, "crawling state");
        let signature = &self.config.signatures.lgas;
        let Some(links) = self.child_links(session, state, signature, stats)? else {
            return Ok(());
        };

        for link in links {
            check_cancelled(cancel)?;
            let Some(lga) = HierarchyNode::child(state, &link.text, link.href.as_str()) else {
                continue;
            };
            stats.lgas_visited += 1;
            self.crawl_lga(session, &lga, cancel, stats)?;
        }
        Ok(())
    }

    fn crawl_lga(
        &self,
        session: &mut dyn RenderSession,
        lga: &Arc<HierarchyNode>,
        cancel: &CancellationToken,
        stats: &mut TraversalStats,
    ) -> Result<()> {
        let signature = &self.config.signatures.wards;
        let Some(links) = self.child_links(session, lga, signature, stats)? else {
            return Ok(());
        };

        for link in links {
            check_cancelled(cancel)?;
            let Some(ward) = HierarchyNode::child(lga, &link.text, link.href.as_str()) else {
                continue;
            };
            stats.wards_visited += 1;
            self.crawl_ward(session, &ward, cancel, stats)?;
        }
        Ok(())
    }

    fn crawl_ward(
        &self,
        session: &mut dyn RenderSession,
        ward: &Arc<HierarchyNode>,
        cancel: &CancellationToken,
        stats: &mut TraversalStats,
    ) -> Result<()> {
        self.aggregator.touch_ward(ward);

        let signature = &self.config.signatures.polling_units;
        let Some(html) = self.render(session, ward, &signature.ready_selector, stats)? else {
            return Ok(());
        };

        let links = match extract_polling_units(&html, &ward.source_url, signature) {
            Ok(PollingUnitLinks::Paired(links)) => links,
            Ok(PollingUnitLinks::Mismatched { names, links }) => {
                tracing::warn!(
                    hierarchy = %ward.path_label(),
                    names,
                    links,
                    "polling-unit names and links do not line up, skipping ward"
                );
                stats.subtrees_skipped += 1;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(hierarchy = %ward.path_label(), error = %e, "link extraction failed");
                stats.subtrees_skipped += 1;
                return Ok(());
            }
        };

        if links.is_empty() {
            tracing::warn!(hierarchy = %ward.path_label(), "no polling units found, skipping ward");
            stats.subtrees_skipped += 1;
            return Ok(());
        }

        let mut stems = HashSet::new();
        for link in links {
            check_cancelled(cancel)?;
            let Some(polling_unit) = HierarchyNode::child(ward, &link.text, link.href.as_str())
            else {
                continue;
            };
            let stem = unique_stem(&mut stems, &polling_unit.name);
            if stem != polling_unit.name {
                tracing::warn!(
                    hierarchy = %polling_unit.path_label(),
                    file = %stem,
                    "polling-unit name repeats within ward, storing under a suffixed name"
                );
            }
            let destination = self.ward_dir(ward).join(&stem);
            self.fetch_and_record(&polling_unit, &link.href, destination)?;
            stats.leaves_visited += 1;
        }
        Ok(())
    }

    /// Download, recover, parse and record one polling unit.
    ///
    /// Every outcome lands in the result table or the failure ledger.
    pub fn process_polling_unit(
        &self,
        node: &Arc<HierarchyNode>,
        url: &str,
    ) -> Result<LeafOutcome> {
        let mut destination = self.config.output_dir.clone();
        destination.extend(node.names());
        self.fetch_and_record(node, url, destination)
    }

    fn fetch_and_record(
        &self,
        node: &Arc<HierarchyNode>,
        url: &str,
        destination: PathBuf,
    ) -> Result<LeafOutcome> {
        let artifact = match self.fetcher.fetch(node, url, &destination) {
            Ok(artifact) => artifact,
            Err(e) if e.is_worker_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(
                    hierarchy = %node.path_label(),
                    url,
                    error = %e,
                    "download failed"
                );
                self.aggregator.record_download_failure(node);
                return Ok(LeafOutcome::DownloadFailed);
            }
        };

        if !artifact.kind.is_document() {
            tracing::warn!(
                hierarchy = %node.path_label(),
                url,
                content_type = %artifact.content_type,
                "non-document file"
            );
            self.aggregator.record_non_document(node);
            return Ok(LeafOutcome::NonDocument);
        }
        if !artifact.is_recoverable() {
            tracing::warn!(hierarchy = %node.path_label(), url, "artifact was not stored");
            self.aggregator.record_download_failure(node);
            return Ok(LeafOutcome::DownloadFailed);
        }

        let recovered = self.recovery.recover(&artifact);
        let text = match recovered.text {
            Some(text) if recovered.readable => text,
            _ => {
                tracing::warn!(
                    hierarchy = %node.path_label(),
                    path = %artifact.local_path.display(),
                    method = ?recovered.method,
                    "unreadable document"
                );
                self.aggregator.record_unreadable(node);
                return Ok(LeafOutcome::Unreadable);
            }
        };

        let fields = parse_polling_unit(&text);
        tracing::debug!(
            hierarchy = %node.path_label(),
            method = ?recovered.method,
            parties = fields.party_results.len(),
            "recorded polling unit"
        );
        self.aggregator
            .record(PollingUnitResult::new(node, artifact.local_path, fields));
        Ok(LeafOutcome::Recorded)
    }

    /// `<output>/<State>/<LGA>/<Ward>`.
    fn ward_dir(&self, ward: &HierarchyNode) -> PathBuf {
        let mut path = self.config.output_dir.clone();
        path.extend(ward.names());
        path
    }

    /// Render `node`'s page and extract the next level's links.
    ///
    /// `Ok(None)` means the subtree was skipped.
    fn child_links(
        &self,
        session: &mut dyn RenderSession,
        node: &Arc<HierarchyNode>,
        signature: &LevelSignature,
        stats: &mut TraversalStats,
    ) -> Result<Option<Vec<Link>>> {
        let Some(html) = self.render(session, node, &signature.ready_selector, stats)? else {
            return Ok(None);
        };

        match extract_links(&html, &node.source_url, &signature.link_selector) {
            Ok(links) if links.is_empty() => {
                tracing::warn!(
                    hierarchy = %node.path_label(),
                    level = %node.level,
                    "no links found, skipping subtree"
                );
                stats.subtrees_skipped += 1;
                Ok(None)
            }
            Ok(links) => Ok(Some(links)),
            Err(e) => {
                tracing::warn!(hierarchy = %node.path_label(), error = %e, "link extraction failed");
                stats.subtrees_skipped += 1;
                Ok(None)
            }
        }
    }

    fn render(
        &self,
        session: &mut dyn RenderSession,
        node: &HierarchyNode,
        ready_selector: &str,
        stats: &mut TraversalStats,
    ) -> Result<Option<String>> {
        match session.render_when_present(
            &node.source_url,
            ready_selector,
            self.config.render_timeout,
        ) {
            Ok(html) => Ok(Some(html)),
            Err(e) if e.is_worker_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(
                    hierarchy = %node.path_label(),
                    url = %node.source_url,
                    error = %e,
                    "rendering failed, skipping subtree"
                );
                stats.subtrees_skipped += 1;
                Ok(None)
            }
        }
    }
}

/// File stem for a polling unit, suffixed `_2`, `_3`, ... when an earlier
/// unit in the same ward already claimed the name.
fn unique_stem(taken: &mut HashSet<String>, name: &str) -> String {
    let mut stem = name.to_string();
    let mut n = 2;
    while !taken.insert(stem.clone()) {
        stem = format!("{name}_{n}");
        n += 1;
    }
    stem
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(HarvesterError::Cancelled);
    }
    Ok(())
}
