//! End-to-end runs: resumption, deduplication, failure containment.

use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use pretty_assertions::assert_eq;
use thumbsync::{
    fingerprint, record_key, CatalogEntry, CheckpointStore, GroupDescriptor, PipelineConfig,
    PipelineCoordinator, RunReport, RunState, StaticCatalogSource, WorkRecord, WorkStatus,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(pixel));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn test_config(tmp: &Path) -> PipelineConfig {
    PipelineConfig {
        output_dir: tmp.join("out"),
        checkpoint_dir: tmp.join("ckpt"),
        fetch_concurrency: 4,
        transcode_concurrency: 2,
        max_retries: 2,
        retry_base_delay: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        min_asset_bytes: 10,
        max_dimension: 64,
        quality: 80,
        user_agent: "thumbsync-tests".into(),
        ..PipelineConfig::default()
    }
}

fn entry(id: &str, name: &str, url: String) -> CatalogEntry {
    CatalogEntry {
        entity_id: id.to_string(),
        group_key: "prov".to_string(),
        display_name: name.to_string(),
        asset_url: url,
    }
}

fn source_with(entries: Vec<CatalogEntry>) -> StaticCatalogSource {
    StaticCatalogSource::new(vec![(
        GroupDescriptor {
            key: "prov".into(),
            display_name: "Prov".into(),
        },
        entries,
    )])
}

async fn mount_png(server: &MockServer, route: &str, pixel: [u8; 4], expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(png_bytes(24, 24, pixel), "image/png"),
        )
        .expect(expected_hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn second_run_performs_zero_additional_fetches() {
    let server = MockServer::start().await;
    mount_png(&server, "/a.png", [200, 10, 10, 255], 1).await;
    mount_png(&server, "/b.png", [10, 200, 10, 255], 1).await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let source = source_with(vec![
        entry("a", "Game A", format!("{}/a.png", server.uri())),
        entry("b", "Game B", format!("{}/b.png", server.uri())),
    ]);

    let mut first = PipelineCoordinator::new(config.clone()).unwrap();
    let report_one = first
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();
    assert_eq!(report_one.completed, 2);
    assert_eq!(report_one.failed, 0);

    let mut second = PipelineCoordinator::new(config).unwrap();
    let report_two = second
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();

    assert_eq!(report_two.completed, report_one.completed);
    assert_eq!(report_two.failed, report_one.failed);
    assert_eq!(report_two.skipped, 2);
    // Each mock allows exactly one hit; a second fetch would fail the
    // expectation when the server drops.
}

#[tokio::test]
async fn identical_content_produces_exactly_one_artifact() {
    let server = MockServer::start().await;
    let pixel = [77, 77, 77, 255];
    mount_png(&server, "/x.png", pixel, 1).await;
    mount_png(&server, "/y.png", pixel, 1).await;

    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    // Serialize the two fetches so the first entry deterministically wins.
    config.fetch_concurrency = 1;
    let source = source_with(vec![
        entry("x", "First Name", format!("{}/x.png", server.uri())),
        entry("y", "Second Name", format!("{}/y.png", server.uri())),
    ]);

    let mut coordinator = PipelineCoordinator::new(config.clone()).unwrap();
    let report = coordinator
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.skipped_duplicates, 1);

    let group_dir = config.output_dir.join("Prov");
    let webp_files: Vec<_> = std::fs::read_dir(&group_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|n| n.ends_with(".webp"))
        .collect();
    assert_eq!(webp_files, vec!["Prov - First Name.webp".to_string()]);

    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    let x: WorkRecord = store.get(&record_key("prov", "x")).unwrap().unwrap();
    let y: WorkRecord = store.get(&record_key("prov", "y")).unwrap().unwrap();
    assert_eq!(x.status, WorkStatus::Completed);
    assert_eq!(y.status, WorkStatus::Completed);
    assert!(!x.duplicate);
    assert!(y.duplicate);
    assert_eq!(y.output_path, x.output_path);
    assert_eq!(y.content_fingerprint, x.content_fingerprint);
}

#[tokio::test]
async fn interrupted_entries_are_retried_and_completed_ones_left_alone() {
    let server = MockServer::start().await;
    let done_body = png_bytes(24, 24, [1, 2, 3, 255]);
    mount_png(&server, "/done.png", [1, 2, 3, 255], 0).await;
    mount_png(&server, "/stuck.png", [9, 8, 7, 255], 1).await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());

    // State left behind by a run that was killed mid-flight.
    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    let mut done = WorkRecord::pending();
    done.status = WorkStatus::Completed;
    done.attempts = 1;
    done.content_fingerprint = Some(fingerprint(&done_body));
    done.output_path = Some(
        config
            .output_dir
            .join("Prov/Prov - Done.webp")
            .display()
            .to_string(),
    );
    store.put(&record_key("prov", "done"), &done).unwrap();

    let mut stuck = WorkRecord::pending();
    stuck.status = WorkStatus::InProgress;
    stuck.attempts = 1;
    store.put(&record_key("prov", "stuck"), &stuck).unwrap();
    drop(store);

    let source = source_with(vec![
        entry("done", "Done", format!("{}/done.png", server.uri())),
        entry("stuck", "Stuck", format!("{}/stuck.png", server.uri())),
    ]);

    let mut coordinator = PipelineCoordinator::new(config.clone()).unwrap();
    let report = coordinator
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(report.failed, 0);

    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    let done_after: WorkRecord = store.get(&record_key("prov", "done")).unwrap().unwrap();
    assert_eq!(done_after.status, WorkStatus::Completed);
    assert_eq!(done_after.attempts, 1);
    assert_eq!(done_after.content_fingerprint, done.content_fingerprint);

    let stuck_after: WorkRecord = store.get(&record_key("prov", "stuck")).unwrap().unwrap();
    assert_eq!(stuck_after.status, WorkStatus::Completed);
    assert_eq!(stuck_after.attempts, 2);
    assert!(stuck_after.output_path.is_some());
}

#[tokio::test]
async fn entry_failures_are_contained_and_reported() {
    let server = MockServer::start().await;
    mount_png(&server, "/good.png", [0, 120, 240, 255], 1).await;
    Mock::given(method("GET"))
        .and(path("/bad.png"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let source = source_with(vec![
        entry("good", "Good", format!("{}/good.png", server.uri())),
        entry("bad", "Bad", format!("{}/bad.png", server.uri())),
        entry("no-art", "No Art", String::new()),
    ]);

    let mut coordinator = PipelineCoordinator::new(config.clone()).unwrap();
    let report = coordinator
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();

    assert_eq!(coordinator.state(), RunState::Done);
    assert_eq!(report.total_entries, 3);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entity_id, "bad");
    assert!(report.failures[0].reason.contains("transient_fetch"));

    // Entries without an asset URL are skipped, never recorded.
    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    assert!(!store.exists(&record_key("prov", "no-art")));

    // The report on disk matches what the run returned.
    let written: RunReport = serde_json::from_str(
        &std::fs::read_to_string(config.output_dir.join("run_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written.completed, report.completed);
    assert_eq!(written.failed, report.failed);
    assert_eq!(written.groups.len(), 1);
    assert_eq!(written.groups[0].display_name, "Prov");
}

#[tokio::test]
async fn cancelled_runs_dispatch_nothing_new() {
    let server = MockServer::start().await;
    mount_png(&server, "/a.png", [50, 50, 50, 255], 0).await;

    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let source = source_with(vec![entry("a", "A", format!("{}/a.png", server.uri()))]);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut coordinator = PipelineCoordinator::new(config.clone()).unwrap();
    let report = coordinator.run(&source, cancel, false).await.unwrap();

    assert_eq!(report.completed, 0);
    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    assert!(store.group_keys("prov").unwrap().is_empty());
}

#[tokio::test]
async fn clean_start_discards_prior_checkpoints() {
    let server = MockServer::start().await;
    mount_png(&server, "/a.png", [90, 10, 160, 255], 1).await;

    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());

    let store = CheckpointStore::open(&config.checkpoint_dir).unwrap();
    let mut done = WorkRecord::pending();
    done.status = WorkStatus::Completed;
    store.put(&record_key("prov", "a"), &done).unwrap();
    drop(store);

    config.clean_start = true;
    let source = source_with(vec![entry("a", "Game A", format!("{}/a.png", server.uri()))]);
    let mut coordinator = PipelineCoordinator::new(config.clone()).unwrap();
    let report = coordinator
        .run(&source, CancellationToken::new(), false)
        .await
        .unwrap();

    // The completed checkpoint was discarded, so the entry is re-fetched.
    assert_eq!(report.completed, 1);
    assert_eq!(report.skipped, 0);
}
