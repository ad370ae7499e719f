//! Configuration constants, level signatures and crawl configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{HarvesterError, Result};
use crate::links::parse_selector;

/// Results portal for the 2023 presidential election.
pub const DEFAULT_ROOT_URL: &str =
    "https://www.inecelectionresults.ng/pres/elections/63f8f25b594e164f8146a213?type=pres";

/// Root directory for downloaded artifacts and exports.
pub const DEFAULT_OUTPUT_DIR: &str = "Election_Results";

/// Minimum number of characters recovered text needs to count as readable.
pub const MIN_READABLE_CHARS: usize = 50;

/// Number of OCR attempts per page (0°, 90°, 180°, 270°).
pub const ROTATION_ATTEMPTS: u32 = 4;

/// Maximum number of download attempts per artifact.
pub const MAX_DOWNLOAD_ATTEMPTS: u32 = 10;

/// Fixed delay between download attempts (milliseconds).
pub const RETRY_DELAY_MS: u64 = 2000;

/// Per-attempt HTTP timeout in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// How long to wait for a level's ready marker in seconds.
pub const RENDER_TIMEOUT_SECS: u64 = 20;

/// Number of states crawled in parallel.
pub const DEFAULT_WORKERS: usize = 4;

/// Default maximum artifact size in bytes (50 MB).
pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

/// Contrast adjustment applied before OCR.
///
/// `image` scales contrast by `((100 + c) / 100)^2`, so ~41 doubles it.
pub const OCR_CONTRAST_BOOST: f32 = 41.4;

/// Resolution used when rasterizing PDF pages for OCR.
pub const PDF_RENDER_DPI: u32 = 200;

/// Default tesseract language.
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

/// Default Browserless endpoint.
pub const DEFAULT_BROWSERLESS_URL: &str = "http://localhost:3000";

/// Strip every non-alphanumeric character from a hierarchy name.
///
/// The result is safe to use as a path component.
///
/// # Examples
/// ```
/// use election_harvester::config::sanitize_name;
///
/// assert_eq!(sanitize_name("Lagos State!"), "LagosState");
/// assert_eq!(sanitize_name("PU 001 / Ward-2"), "PU001Ward2");
/// ```
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    raw.chars().filter(|c| c.is_alphanumeric()).collect()
}

/// Link signature for one hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSignature {
    /// Element whose presence marks the rendered page as ready.
    pub ready_selector: String,

    /// Anchors leading to the next level.
    pub link_selector: String,
}

impl LevelSignature {
    /// Create a signature from a ready marker and a link selector.
    #[must_use]
    pub fn new(ready_selector: impl Into<String>, link_selector: impl Into<String>) -> Self {
        Self {
            ready_selector: ready_selector.into(),
            link_selector: link_selector.into(),
        }
    }
}

/// Signature of a ward page listing polling units.
///
/// When `container_selector` is set, each container yields one polling unit
/// whose name and link are taken from inside that container. Without a
/// container the name and link lists are paired by position, and only when
/// both lists have the same length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingUnitSignature {
    pub ready_selector: String,
    pub container_selector: Option<String>,
    pub link_selector: String,
    pub name_selector: String,
}

impl PollingUnitSignature {
    /// Create a signature without a shared container.
    #[must_use]
    pub fn new(
        ready_selector: impl Into<String>,
        link_selector: impl Into<String>,
        name_selector: impl Into<String>,
    ) -> Self {
        Self {
            ready_selector: ready_selector.into(),
            container_selector: None,
            link_selector: link_selector.into(),
            name_selector: name_selector.into(),
        }
    }

    /// Scope name and link lookup to a shared container element.
    #[must_use]
    pub fn with_container(mut self, container_selector: impl Into<String>) -> Self {
        self.container_selector = Some(container_selector.into());
        self
    }
}

/// Per-level link signatures for the whole hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSignatures {
    /// Root page listing states.
    pub states: LevelSignature,
    /// State page listing LGAs.
    pub lgas: LevelSignature,
    /// LGA page listing wards.
    pub wards: LevelSignature,
    /// Ward page listing polling units.
    pub polling_units: PollingUnitSignature,
}

impl Default for LevelSignatures {
    fn default() -> Self {
        Self {
            states: LevelSignature::new(".bold", "a[href]:not([class]), a[href][class=\"\"]"),
            lgas: LevelSignature::new(".bold", "a.bold[href]"),
            wards: LevelSignature::new(".bold", "a.bold[href]"),
            polling_units: PollingUnitSignature::new(
                ".btn.btn-link",
                "a.btn.btn-link.ms-2[href]",
                "div.pl-4.bold",
            ),
        }
    }
}

impl LevelSignatures {
    /// Check that every selector parses.
    pub fn validate(&self) -> Result<()> {
        let mut selectors = vec![
            &self.states.ready_selector,
            &self.states.link_selector,
            &self.lgas.ready_selector,
            &self.lgas.link_selector,
            &self.wards.ready_selector,
            &self.wards.link_selector,
            &self.polling_units.ready_selector,
            &self.polling_units.link_selector,
            &self.polling_units.name_selector,
        ];
        if let Some(container) = &self.polling_units.container_selector {
            selectors.push(container);
        }
        for selector in selectors {
            parse_selector(selector)?;
        }
        Ok(())
    }
}

/// Retry and size policy for the artifact downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
    pub max_response_size: u64,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_DOWNLOAD_ATTEMPTS,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
            attempt_timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

/// Thresholds for the text recovery engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPolicy {
    pub min_readable_chars: usize,
    pub rotation_attempts: u32,
    pub contrast_boost: f32,
    pub render_dpi: u32,
    pub ocr_language: String,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            min_readable_chars: MIN_READABLE_CHARS,
            rotation_attempts: ROTATION_ATTEMPTS,
            contrast_boost: OCR_CONTRAST_BOOST,
            render_dpi: PDF_RENDER_DPI,
            ocr_language: DEFAULT_OCR_LANGUAGE.to_string(),
        }
    }
}

/// Configuration for a full crawl run.
///
/// NOTE: `browserless_token` is a credential; do not log this struct at
/// `info` level or above.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub root_url: String,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub render_timeout: Duration,
    pub signatures: LevelSignatures,
    pub download: DownloadPolicy,
    pub recovery: RecoveryPolicy,
    pub browserless_url: String,
    pub browserless_token: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            root_url: DEFAULT_ROOT_URL.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            workers: DEFAULT_WORKERS,
            render_timeout: Duration::from_secs(RENDER_TIMEOUT_SECS),
            signatures: LevelSignatures::default(),
            download: DownloadPolicy::default(),
            recovery: RecoveryPolicy::default(),
            browserless_url: DEFAULT_BROWSERLESS_URL.to_string(),
            browserless_token: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl CrawlConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let root_url = std::env::var("HARVESTER_ROOT_URL").unwrap_or(defaults.root_url);

        let output_dir = std::env::var("HARVESTER_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let workers = env_parse("HARVESTER_WORKERS").unwrap_or(defaults.workers);

        let render_timeout = env_parse("HARVESTER_RENDER_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.render_timeout);

        let mut download = defaults.download;
        if let Some(attempts) = env_parse("HARVESTER_MAX_ATTEMPTS") {
            download.max_attempts = attempts;
        }
        if let Some(ms) = env_parse("HARVESTER_RETRY_DELAY_MS") {
            download.retry_delay = Duration::from_millis(ms);
        }
        if let Some(mb) = env_parse::<u64>("HARVESTER_MAX_SIZE_MB") {
            download.max_response_size = mb * 1024 * 1024;
        }

        let mut recovery = defaults.recovery;
        if let Ok(language) = std::env::var("HARVESTER_OCR_LANGUAGE") {
            recovery.ocr_language = language;
        }

        let browserless_url =
            std::env::var("BROWSERLESS_URL").unwrap_or(defaults.browserless_url);
        let browserless_token = std::env::var("BROWSERLESS_TOKEN").ok();

        Self {
            root_url,
            output_dir,
            workers,
            render_timeout,
            signatures: defaults.signatures,
            download,
            recovery,
            browserless_url,
            browserless_token,
        }
    }

    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_render_timeout(mut self, render_timeout: Duration) -> Self {
        self.render_timeout = render_timeout;
        self
    }

    pub fn with_signatures(mut self, signatures: LevelSignatures) -> Self {
        self.signatures = signatures;
        self
    }

    pub fn with_download_policy(mut self, download: DownloadPolicy) -> Self {
        self.download = download;
        self
    }

    pub fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_browserless(mut self, url: impl Into<String>, token: Option<String>) -> Self {
        self.browserless_url = url.into();
        self.browserless_token = token;
        self
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(HarvesterError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.download.max_attempts == 0 {
            return Err(HarvesterError::Config(
                "download attempts must be at least 1".to_string(),
            ));
        }
        if self.recovery.rotation_attempts == 0 {
            return Err(HarvesterError::Config(
                "rotation attempts must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.root_url)?;
        self.signatures.validate()
    }
}
