//! End-to-end crawl tests with a scripted portal.
//!
//! Rendering, downloading, PDF decoding and OCR are replaced with in-memory
//! fakes, so the whole pipeline runs without network or external tools.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use election_harvester::config::{CrawlConfig, RecoveryPolicy};
use election_harvester::export::export_all;
use election_harvester::http::ArtifactFetcher;
use election_harvester::recovery::{OcrEngine, PdfBackend, TextRecoveryEngine};
use election_harvester::render::{RenderSession, SessionProvider};
use election_harvester::types::{ArtifactKind, ArtifactRecord, ArtifactStatus, HierarchyNode};
use election_harvester::{Harvester, HarvesterError, Result};
use image::DynamicImage;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const ROOT: &str = "https://portal.test/pres";

/// Portal pages by URL, plus URLs that make the session unavailable.
#[derive(Default)]
struct Portal {
    pages: HashMap<String, String>,
    broken: Vec<String>,
}

struct PortalSessions {
    portal: Arc<Portal>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl SessionProvider for PortalSessions {
    fn open(&self) -> Result<Box<dyn RenderSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(PortalSession {
            portal: Arc::clone(&self.portal),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct PortalSession {
    portal: Arc<Portal>,
    closed: Arc<AtomicUsize>,
}

impl RenderSession for PortalSession {
    fn render_when_present(&mut self, url: &str, selector: &str, timeout: Duration) -> Result<String> {
        if self.portal.broken.iter().any(|b| b == url) {
            return Err(HarvesterError::SessionUnavailable("browser crashed".to_string()));
        }
        self.portal
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| HarvesterError::RenderTimeout {
                url: url.to_string(),
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis(),
            })
    }

    fn close(&mut self) -> Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Serves documents from memory; `.html` URLs are non-documents and
/// `.missing` URLs exhaust their retries. Optionally cancels the run on the
/// first fetch.
struct MemoryFetcher {
    documents: HashMap<String, String>,
    cancel_on_fetch: Option<CancellationToken>,
}

impl ArtifactFetcher for MemoryFetcher {
    fn fetch(&self, node: &Arc<HierarchyNode>, url: &str, destination: &Path) -> Result<ArtifactRecord> {
        if let Some(cancel) = &self.cancel_on_fetch {
            cancel.cancel();
        }
        if url.ends_with(".missing") {
            return Err(HarvesterError::DownloadFailure {
                url: url.to_string(),
                attempts: 10,
                last_error: "HTTP status 404 Not Found".to_string(),
            });
        }

        let content_type = if url.ends_with(".html") {
            "text/html"
        } else {
            "application/pdf"
        };
        let kind = ArtifactKind::from_content_type(content_type);
        let local_path = destination.with_extension(kind.extension(content_type));
        let status = if kind.is_document() {
            fs::create_dir_all(local_path.parent().unwrap())?;
            fs::write(&local_path, self.documents.get(url).cloned().unwrap_or_default())?;
            ArtifactStatus::Downloaded
        } else {
            ArtifactStatus::Failed
        };

        Ok(ArtifactRecord {
            node: Arc::clone(node),
            local_path,
            kind,
            content_type: content_type.to_string(),
            status,
        })
    }
}

/// A "PDF" whose single page of text is the file's contents.
struct PlainTextPdf;

impl PdfBackend for PlainTextPdf {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>> {
        Ok(vec![fs::read_to_string(path)?])
    }

    fn render_pages(&self, _: &Path, _: u32) -> Result<Vec<DynamicImage>> {
        Ok(vec![DynamicImage::new_luma8(8, 8)])
    }
}

/// OCR that never finds enough text, counting calls.
struct NoisyOcr {
    calls: Arc<AtomicUsize>,
}

impl OcrEngine for NoisyOcr {
    fn recognize(&self, _: &DynamicImage) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("~~ ## ~~".to_string())
    }
}

fn sheet(apc: u64, lp: u64) -> String {
    format!(
        "Number of Voters on the Register : 1200\n\
         Number of Accredited Voters : 400\n\
         APC : {apc}\n\
         LP : {lp}\n\
         Total Valid Votes : {}\n\
         Presiding Officer : Chinedu Okafor",
        apc + lp
    )
}

fn page(ready: &str, anchors: &[(&str, &str, &str)]) -> String {
    let mut html = format!("<html><body><span class=\"{ready}\">ready</span>");
    for (class, href, text) in anchors {
        if class.is_empty() {
            html.push_str(&format!("<a href=\"{href}\">{text}</a>"));
        } else {
            html.push_str(&format!("<a class=\"{class}\" href=\"{href}\">{text}</a>"));
        }
    }
    html.push_str("</body></html>");
    html
}

fn ward_page(units: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body><button class=\"btn btn-link\">Back</button>");
    for (name, href) in units {
        html.push_str(&format!(
            "<div class=\"pl-4 bold\">{name}</div><a class=\"btn btn-link ms-2\" href=\"{href}\">View</a>"
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Two healthy states and one whose session dies on its LGA page.
///
/// Kano:   Nassarawa / Ward A: 1 readable, 1 non-document, 1 garbage PDF
/// Lagos:  Ikeja / Ward 01: 2 readable, 1 missing
///         Epe: fails to render (skipped)
/// Rivers: session lost (worker-fatal)
fn portal() -> (Portal, HashMap<String, String>) {
    let mut pages = HashMap::new();
    pages.insert(
        ROOT.to_string(),
        page(
            "bold",
            &[
                ("", "/pres/kano", "KANO"),
                ("", "/pres/lagos", "LAGOS"),
                ("", "/pres/rivers", "RIVERS"),
            ],
        ),
    );

    pages.insert(
        "https://portal.test/pres/kano".to_string(),
        page("bold", &[("bold", "/pres/kano/nassarawa", "Nassarawa")]),
    );
    pages.insert(
        "https://portal.test/pres/kano/nassarawa".to_string(),
        page("bold", &[("bold", "/pres/kano/nassarawa/a", "Ward A")]),
    );
    pages.insert(
        "https://portal.test/pres/kano/nassarawa/a".to_string(),
        ward_page(&[
            ("PU 001 - Primary School", "/docs/kano/1.pdf"),
            ("PU 002 - Market", "/docs/kano/2.html"),
            ("PU 003 - Mosque", "/docs/kano/3.pdf"),
        ]),
    );

    pages.insert(
        "https://portal.test/pres/lagos".to_string(),
        page(
            "bold",
            &[
                ("bold", "/pres/lagos/ikeja", "Ikeja"),
                ("bold", "/pres/lagos/epe", "Epe"),
            ],
        ),
    );
    pages.insert(
        "https://portal.test/pres/lagos/ikeja".to_string(),
        page("bold", &[("bold", "/pres/lagos/ikeja/01", "Ward 01")]),
    );
    pages.insert(
        "https://portal.test/pres/lagos/ikeja/01".to_string(),
        ward_page(&[
            ("PU 001", "/docs/lagos/1.pdf"),
            ("PU 002", "/docs/lagos/2.pdf"),
            ("PU 003", "/docs/lagos/3.missing"),
        ]),
    );

    let portal = Portal {
        pages,
        broken: vec!["https://portal.test/pres/rivers".to_string()],
    };

    let mut documents = HashMap::new();
    documents.insert("https://portal.test/docs/kano/1.pdf".to_string(), sheet(210, 35));
    documents.insert("https://portal.test/docs/kano/3.pdf".to_string(), "@@##!!".to_string());
    documents.insert("https://portal.test/docs/lagos/1.pdf".to_string(), sheet(80, 190));
    documents.insert("https://portal.test/docs/lagos/2.pdf".to_string(), sheet(95, 160));
    (portal, documents)
}

struct Fixture {
    harvester: Harvester,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    ocr_calls: Arc<AtomicUsize>,
}

fn fixture(output: &Path, workers: usize, cancel_on_fetch: Option<CancellationToken>) -> Fixture {
    let (portal, documents) = portal();
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let ocr_calls = Arc::new(AtomicUsize::new(0));

    let sessions = PortalSessions {
        portal: Arc::new(portal),
        opened: Arc::clone(&opened),
        closed: Arc::clone(&closed),
    };
    let fetcher = MemoryFetcher {
        documents,
        cancel_on_fetch,
    };
    let recovery = TextRecoveryEngine::new(
        Box::new(PlainTextPdf),
        Box::new(NoisyOcr {
            calls: Arc::clone(&ocr_calls),
        }),
        RecoveryPolicy::default(),
    );
    let config = CrawlConfig::default()
        .with_root_url(ROOT)
        .with_output_dir(output)
        .with_workers(workers);

    let harvester = Harvester::new(config, Arc::new(sessions), Arc::new(fetcher), recovery).unwrap();
    Fixture {
        harvester,
        opened,
        closed,
        ocr_calls,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_crawl_accounts_for_every_polling_unit() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = fixture(dir.path(), 2, None);

    let report = fixture.harvester.run(CancellationToken::new()).await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.states_attempted, 3);
    assert_eq!(report.states_failed, 1);
    assert_eq!(report.leaves_visited, 6);
    assert_eq!(report.rows.len(), 3);
    assert!(report.is_fully_accounted());

    let totals = report.totals();
    assert_eq!(totals.non_document, 1);
    assert_eq!(totals.unreadable, 1);
    assert_eq!(totals.download_failures, 1);

    // The garbage PDF went through all four rotations once.
    assert_eq!(fixture.ocr_calls.load(Ordering::SeqCst), 4);

    // One session for discovery plus one per state, all released.
    assert_eq!(fixture.opened.load(Ordering::SeqCst), 4);
    assert_eq!(fixture.closed.load(Ordering::SeqCst), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rows_carry_sanitized_hierarchy_and_fields() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = fixture(dir.path(), 1, None);

    let report = fixture.harvester.run(CancellationToken::new()).await.unwrap();

    let kano = report
        .rows
        .iter()
        .find(|row| row.state == "KANO")
        .expect("Kano row");
    assert_eq!(kano.lga, "Nassarawa");
    assert_eq!(kano.ward, "WardA");
    assert_eq!(kano.polling_unit, "PU001PrimarySchool");
    assert_eq!(kano.fields.number_of_voters, Some(1200));
    assert_eq!(kano.fields.valid_votes, Some(245));
    assert_eq!(kano.fields.party_results.get("APC"), Some(&210));
    assert_eq!(kano.fields.presiding_officer.as_deref(), Some("Chinedu Okafor"));
    assert!(kano
        .file_path
        .starts_with(dir.path().join("KANO").join("Nassarawa").join("WardA")));

    // Lagos rows stay in traversal order within the state.
    let lagos: Vec<&str> = report
        .rows
        .iter()
        .filter(|row| row.state == "LAGOS")
        .map(|row| row.polling_unit.as_str())
        .collect();
    assert_eq!(lagos, vec!["PU001", "PU002"]);

    let wards: Vec<String> = report.ledger.iter().map(|e| e.ward.to_string()).collect();
    assert_eq!(
        wards,
        vec!["KANO -> Nassarawa -> WardA", "LAGOS -> Ikeja -> Ward01"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_before_start_schedules_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = fixture(dir.path(), 2, None);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = fixture.harvester.run(cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.states_attempted, 0);
    assert!(report.rows.is_empty());
    assert_eq!(fixture.opened.load(Ordering::SeqCst), fixture.closed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_mid_crawl_keeps_recorded_rows() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let fixture = fixture(dir.path(), 1, Some(cancel.clone()));

    let report = fixture.harvester.run(cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.states_attempted, 1);
    assert_eq!(report.states_failed, 0);
    assert_eq!(report.leaves_visited, 1);
    assert_eq!(report.rows.len(), 1);
    assert!(report.is_fully_accounted());
    assert_eq!(fixture.opened.load(Ordering::SeqCst), fixture.closed.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_crawl_then_export() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = fixture(dir.path(), 3, None);
    let report = fixture.harvester.run(CancellationToken::new()).await.unwrap();

    let paths = export_all(&report, dir.path()).unwrap();

    let csv = fs::read_to_string(&paths.results).unwrap();
    assert_eq!(csv.lines().count(), 1 + report.rows.len());
    assert!(csv.contains("APC:210;LP:35"));

    let failures = fs::read_to_string(&paths.failures).unwrap();
    assert!(failures.contains(
        "KANO -> Nassarawa -> WardA: 1 non-document files, 1 unreadable documents, 0 failed downloads"
    ));
    assert!(failures.contains(
        "LAGOS -> Ikeja -> Ward01: 0 non-document files, 0 unreadable documents, 1 failed downloads"
    ));

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&paths.summary).unwrap()).unwrap();
    assert_eq!(summary["leaves_visited"], 6);
    assert_eq!(summary["rows_recorded"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (portal, _) = portal();
    let sessions = PortalSessions {
        portal: Arc::new(portal),
        opened: Arc::default(),
        closed: Arc::default(),
    };
    let recovery = TextRecoveryEngine::new(
        Box::new(PlainTextPdf),
        Box::new(NoisyOcr {
            calls: Arc::default(),
        }),
        RecoveryPolicy::default(),
    );
    let config = CrawlConfig::default()
        .with_output_dir(dir.path())
        .with_workers(0);

    let result = Harvester::new(
        config,
        Arc::new(sessions),
        Arc::new(MemoryFetcher {
            documents: HashMap::new(),
            cancel_on_fetch: None,
        }),
        recovery,
    );
    assert!(matches!(result, Err(HarvesterError::Config(_))));
}
