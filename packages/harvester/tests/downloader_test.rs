//! Artifact downloader against a local HTTP server.
//!
//! The downloader uses reqwest's blocking client, so every fetch runs inside
//! `spawn_blocking` while the mock server lives on the async runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use election_harvester::config::DownloadPolicy;
use election_harvester::http::{ArtifactFetcher, HttpDownloader};
use election_harvester::types::{ArtifactKind, ArtifactRecord, ArtifactStatus, HierarchyNode};
use election_harvester::{HarvesterError, Result};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_policy(max_attempts: u32) -> DownloadPolicy {
    DownloadPolicy {
        max_attempts,
        retry_delay: Duration::from_millis(10),
        attempt_timeout: Duration::from_secs(5),
        ..DownloadPolicy::default()
    }
}

fn polling_unit(url: &str) -> Arc<HierarchyNode> {
    let state = HierarchyNode::state("Lagos", "https://results.test/s");
    let lga = HierarchyNode::child(&state, "Ikeja", "https://results.test/l").unwrap();
    let ward = HierarchyNode::child(&lga, "Ward 01", "https://results.test/w").unwrap();
    HierarchyNode::child(&ward, "PU 001", url).unwrap()
}

/// Fetch `url` on the blocking pool.
async fn fetch(policy: DownloadPolicy, url: String, destination: PathBuf) -> Result<ArtifactRecord> {
    tokio::task::spawn_blocking(move || {
        let downloader = HttpDownloader::new(policy)?;
        let node = polling_unit(&url);
        downloader.fetch(&node, &url, &destination)
    })
    .await
    .unwrap()
}

fn destination(root: &Path) -> PathBuf {
    root.join("Lagos").join("Ikeja").join("Ward01").join("PU001")
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retries_until_pdf_arrives() {
    let mock_server = MockServer::start().await;
    let body = b"%PDF-1.4 result sheet".to_vec();

    Mock::given(method("GET"))
        .and(path("/doc/1"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/doc/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(body.clone()),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let record = fetch(
        fast_policy(10),
        format!("{}/doc/1", mock_server.uri()),
        destination(dir.path()),
    )
    .await
    .unwrap();

    assert_eq!(record.kind, ArtifactKind::Pdf);
    assert_eq!(record.status, ArtifactStatus::Downloaded);
    assert_eq!(record.local_path, destination(dir.path()).with_extension("pdf"));
    assert_eq!(std::fs::read(&record.local_path).unwrap(), body);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_html_is_classified_other_and_not_stored() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc/2"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html>No result uploaded</html>"),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let record = fetch(
        fast_policy(3),
        format!("{}/doc/2", mock_server.uri()),
        destination(dir.path()),
    )
    .await
    .unwrap();

    assert_eq!(record.kind, ArtifactKind::Other);
    assert_eq!(record.status, ArtifactStatus::Failed);
    assert!(!record.is_recoverable());
    assert!(!record.local_path.exists());
    assert!(!dir.path().join("Lagos").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_image_gets_subtype_extension() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc/3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let record = fetch(
        fast_policy(3),
        format!("{}/doc/3", mock_server.uri()),
        destination(dir.path()),
    )
    .await
    .unwrap();

    assert_eq!(record.kind, ArtifactKind::Image);
    assert!(record.local_path.ends_with("Ward01/PU001.jpg"));
    assert!(record.local_path.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exhausted_retries_report_last_error() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc/4"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetch(
        fast_policy(3),
        format!("{}/doc/4", mock_server.uri()),
        destination(dir.path()),
    )
    .await
    .unwrap_err();

    match err {
        HarvesterError::DownloadFailure {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("503"), "unexpected error: {last_error}");
        }
        other => panic!("expected DownloadFailure, got {other:?}"),
    }
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_response_is_not_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(vec![b'x'; 1024]),
        )
        .mount(&mock_server)
        .await;

    let policy = DownloadPolicy {
        max_response_size: 100,
        ..fast_policy(5)
    };
    let dir = tempfile::tempdir().unwrap();
    let err = fetch(
        policy,
        format!("{}/doc/5", mock_server.uri()),
        destination(dir.path()),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HarvesterError::ResponseTooLarge { max_bytes: 100, .. }));
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
}
