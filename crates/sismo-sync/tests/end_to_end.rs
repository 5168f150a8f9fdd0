//! Full invocations against a `wiremock` upstream and a file-backed table.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sismo_core::IngestionStrategy;
use sismo_storage::{FileTableStore, HttpClientConfig, HttpFetcher, TableStore};
use sismo_sync::{SyncConfig, SyncPhase, SyncPipeline};

fn fixture(source_id: &str, file: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(source_id)
        .join("sample")
        .join(file);
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

fn config_for(server: &MockServer, strategy: IngestionStrategy, table: &Path) -> SyncConfig {
    SyncConfig {
        strategy,
        api_url: format!("{}/api/ultimo-sismo/ajaxb/2025", server.uri()),
        html_url: format!("{}/ultimo-sismo/sismos-reportados", server.uri()),
        store_url: table.display().to_string(),
        http_timeout_secs: 2,
        ..SyncConfig::default()
    }
}

fn pipeline(config: SyncConfig, table: &Path) -> (SyncPipeline, Arc<FileTableStore>) {
    let fetcher = HttpFetcher::new(HttpClientConfig {
        timeout: config.http_timeout(),
        user_agent: Some(config.user_agent.clone()),
    })
    .expect("http client");
    let store = Arc::new(FileTableStore::new(table));
    (
        SyncPipeline::new(config, Arc::new(fetcher), store.clone()),
        store,
    )
}

fn table_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("sismos.json")
}

async fn mount_api(server: &MockServer, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path("/api/ultimo-sismo/ajaxb/2025"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn api_run_replaces_file_table_with_first_ten_reports() {
    let server = MockServer::start().await;
    mount_api(&server, fixture("igp-api", "listing.json")).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);
    let (pipeline, store) = pipeline(config_for(&server, IngestionStrategy::Api, &table), &table);

    let result = pipeline.invoke(&JsonValue::Null).await;
    assert_eq!(result.status_code, 200, "body: {}", result.body);

    let body = result.body_json().unwrap();
    assert_eq!(body["total"], json!(10));
    assert_eq!(body["data"][0]["report_code"], json!("IGP/CENSIS/RS 2025-0199"));
    assert_eq!(body["data"][0]["sequence_number"], json!("1"));
    assert_eq!(body["data"][9]["sequence_number"], json!("10"));

    let stored = pipeline.current_snapshot().await.unwrap();
    assert_eq!(stored.len(), 10);
    assert_eq!(store.scan_all().await.unwrap().len(), 10);
    let seq: Vec<_> = stored.iter().map(|r| r.sequence_number.clone()).collect();
    let expected: Vec<_> = (1..=10).map(|n| n.to_string()).collect();
    assert_eq!(seq, expected);
}

#[tokio::test]
async fn repeated_runs_keep_values_but_mint_new_ids() {
    let server = MockServer::start().await;
    mount_api(&server, fixture("igp-api", "listing.json")).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);
    let (pipeline, _store) = pipeline(config_for(&server, IngestionStrategy::Api, &table), &table);

    assert!(pipeline.invoke(&JsonValue::Null).await.is_success());
    let first = pipeline.current_snapshot().await.unwrap();
    let second_run = pipeline.run_once().await;
    assert!(second_run.result.is_success());
    assert_eq!(second_run.summary.deleted_rows, 10);
    let second = pipeline.current_snapshot().await.unwrap();

    assert_eq!(first.len(), second.len());
    let first_ids: HashSet<_> = first.iter().map(|r| r.record_id.clone()).collect();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.fields, b.fields);
        assert!(!first_ids.contains(&b.record_id));
    }
}

#[tokio::test]
async fn html_run_stores_header_labelled_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ultimo-sismo/sismos-reportados"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(fixture("igp-html", "listing.html"), "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);
    let (pipeline, _store) = pipeline(config_for(&server, IngestionStrategy::Html, &table), &table);

    let result = pipeline.invoke(&json!({"source": "aws.events"})).await;
    assert_eq!(result.status_code, 200, "body: {}", result.body);
    let body = result.body_json().unwrap();
    assert_eq!(body["total"], json!(5));
    assert_eq!(body["data"][0]["Reporte sísmico"], json!("IGP/CENSIS/RS 2025-0199"));
    assert_eq!(body["data"][0]["sequence_number"], json!("1"));
    assert!(body["data"][0]["record_id"].as_str().is_some());

    let keys: Vec<_> = body["data"][0].as_object().unwrap().keys().cloned().collect();
    assert_eq!(keys[..3], ["record_id", "sequence_number", "Reporte sísmico"]);
    assert_eq!(keys.len(), 6);
}

#[tokio::test]
async fn html_without_table_is_404_and_previous_snapshot_survives() {
    let server = MockServer::start().await;
    mount_api(&server, fixture("igp-api", "listing.json")).await;
    let page = format!("<html><body><h1>Mantenimiento</h1>{}</body></html>", "x".repeat(900));
    Mock::given(method("GET"))
        .and(path("/ultimo-sismo/sismos-reportados"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);

    let (api, _) = pipeline(config_for(&server, IngestionStrategy::Api, &table), &table);
    assert!(api.invoke(&JsonValue::Null).await.is_success());

    let (html, store) = pipeline(config_for(&server, IngestionStrategy::Html, &table), &table);
    let run = html.run_once().await;
    assert_eq!(run.result.status_code, 404);
    assert_eq!(run.summary.failed_phase, Some(SyncPhase::Extracting));
    let body = run.result.body_json().unwrap();
    assert_eq!(body["error"], json!("No se encontró la tabla en la página"));
    assert!(body["html_preview"].as_str().unwrap().chars().count() <= 500);
    assert_eq!(store.scan_all().await.unwrap().len(), 10);
}

#[tokio::test]
async fn upstream_503_is_passed_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);
    let (pipeline, _) = pipeline(config_for(&server, IngestionStrategy::Api, &table), &table);

    let result = pipeline.invoke(&JsonValue::Null).await;
    assert_eq!(result.status_code, 503);
    assert_eq!(
        result.body_json().unwrap(),
        json!({"error": "Error al acceder a la API: 503"})
    );
}

#[tokio::test]
async fn timeout_is_a_500_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().expect("tempdir");
    let table = table_path(&dir);
    let mut config = config_for(&server, IngestionStrategy::Api, &table);
    config.http_timeout_secs = 1;
    let (pipeline, _) = pipeline(config, &table);

    let run = pipeline.run_once().await;
    assert_eq!(run.result.status_code, 500);
    assert_eq!(run.summary.failed_phase, Some(SyncPhase::Fetching));
    let error = run.result.body_json().unwrap()["error"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(error.starts_with("Error en la solicitud: "), "{error}");
}
