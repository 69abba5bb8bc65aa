//! Snapshot downloads: progress reporting and cleanup of failed transfers

mod common;

use alchemist_ingest::http::build_client;
use alchemist_ingest::{DownloadProgress, IngestError, ProgressObserver, SnapshotDownloader};
use common::{cards_snapshot, mount_snapshot, test_config, ALL_CARDS_FILE};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

#[derive(Default)]
struct RecordingObserver {
    started: Mutex<Option<Option<u64>>>,
    percents: Mutex<Vec<u8>>,
    finished: Mutex<Option<u64>>,
}

impl ProgressObserver for RecordingObserver {
    fn on_start(&self, _url: &str, total_bytes: Option<u64>) {
        *self.started.lock().unwrap() = Some(total_bytes);
    }

    fn on_progress(&self, progress: DownloadProgress) {
        self.percents.lock().unwrap().push(progress.percent);
    }

    fn on_finish(&self, bytes_downloaded: u64) {
        *self.finished.lock().unwrap() = Some(bytes_downloaded);
    }
}

fn downloader(server: &MockServer, dir: &TempDir) -> SnapshotDownloader {
    let config = test_config(server, dir.path());
    SnapshotDownloader::new(build_client(&config).unwrap(), &config)
}

/// Serves one response that promises 1000 bytes and then hangs up early
async fn truncating_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Type: application/json\r\n\
                      Content-Length: 1000\r\n\
                      \r\n\
                      [{\"name\":\"Opt\"},{\"name\":",
                )
                .await;
            let _ = socket.shutdown().await;
        }
    });
    format!("http://{addr}/files/all_cards.json")
}

#[tokio::test]
async fn test_download_writes_file_and_reports_progress() {
    let server = MockServer::start().await;
    let body = cards_snapshot(200);
    mount_snapshot(&server, "all_cards", body.clone()).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join(ALL_CARDS_FILE);
    let observer = Arc::new(RecordingObserver::default());
    let downloader = downloader(&server, &dir).with_observer(observer.clone());

    let url = format!("{}/files/all_cards.json", server.uri());
    let written = downloader
        .download(&url, &dest, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!dir.path().join(format!("{ALL_CARDS_FILE}.part")).exists());

    assert_eq!(*observer.started.lock().unwrap(), Some(Some(body.len() as u64)));
    assert_eq!(*observer.finished.lock().unwrap(), Some(body.len() as u64));
    let percents = observer.percents.lock().unwrap().clone();
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] < w[1]));
    assert!(percents.iter().all(|p| p % 5 == 0));
}

#[tokio::test]
async fn test_redirected_download_is_followed() {
    let server = MockServer::start().await;
    let body = cards_snapshot(20);
    Mock::given(method("GET"))
        .and(path("/bulk/latest.json"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/files/all_cards.json", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_snapshot(&server, "all_cards", body.clone()).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join(ALL_CARDS_FILE);
    let url = format!("{}/bulk/latest.json", server.uri());

    let written = downloader(&server, &dir)
        .download(&url, &dest, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(written, dest);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert!(!dir.path().join(format!("{ALL_CARDS_FILE}.part")).exists());
}

#[tokio::test]
async fn test_error_status_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/all_cards.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join(ALL_CARDS_FILE);
    let url = format!("{}/files/all_cards.json", server.uri());

    let err = downloader(&server, &dir)
        .download(&url, &dest, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::DownloadStatus { status: 404 }));
    assert!(err.to_string().contains("HTTP 404"));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_interrupted_transfer_leaves_no_file() {
    let server = MockServer::start().await;
    let url = truncating_server().await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join(ALL_CARDS_FILE);

    let err = downloader(&server, &dir)
        .download(&url, &dest, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            IngestError::DownloadTransport(_) | IngestError::DownloadTruncated { .. }
        ),
        "unexpected error: {err}"
    );
    assert!(!dest.exists());
    assert!(!dir.path().join(format!("{ALL_CARDS_FILE}.part")).exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_cancelled_download_leaves_no_file() {
    let server = MockServer::start().await;
    mount_snapshot(&server, "all_cards", cards_snapshot(10)).await;

    let dir = TempDir::new().unwrap();
    let dest = dir.path().join(ALL_CARDS_FILE);
    let url = format!("{}/files/all_cards.json", server.uri());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = downloader(&server, &dir)
        .download(&url, &dest, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Cancelled));
    assert!(!dest.exists());
}
