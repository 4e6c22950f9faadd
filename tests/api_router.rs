use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use flyerscrape::app::api::{ApiState, router};
use flyerscrape::app::catalog_store::{CatalogStore, LocalFsCatalogStore};
use flyerscrape::app::queue::InProcessQueue;
use flyerscrape::app::runner::AcquisitionRunner;
use flyerscrape::config::AcquisitionSettings;
use flyerscrape::coordinator::Coordinator;
use flyerscrape::fetch::AssetFetcher;
use flyerscrape::formats::{CatalogRecord, PageRecord};
use flyerscrape::render::HttpRenderer;
use tower::ServiceExt as _;

struct Fixture {
    _temp: tempfile::TempDir,
    store: Arc<LocalFsCatalogStore>,
    app: axum::Router,
}

fn fixture() -> Fixture {
    let temp = tempfile::TempDir::new().unwrap();
    let data_dir = temp.path().join("data");
    let configs_dir = temp.path().join("configs");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::create_dir_all(&configs_dir).unwrap();
    std::fs::write(
        configs_dir.join("lidl.json"),
        r#"{"id":"lidl-x","cover_image":"http://127.0.0.1:9/c","first_page":"http://127.0.0.1:9/f/page/1","last_page":"http://127.0.0.1:9/f/page/2"}"#,
    )
    .unwrap();

    let store = Arc::new(LocalFsCatalogStore::new(&data_dir));
    let coordinator = Coordinator::new(
        Arc::new(HttpRenderer::new().unwrap()),
        AssetFetcher::new().unwrap(),
        AcquisitionSettings::default(),
        &data_dir,
    )
    .unwrap();
    let runner = Arc::new(AcquisitionRunner::new(
        Arc::clone(&store) as Arc<dyn CatalogStore>,
        coordinator,
    ));
    let state = ApiState {
        store: Arc::clone(&store) as Arc<dyn CatalogStore>,
        runner,
        queue: InProcessQueue::new(1),
        configs_dir,
    };
    let app = router(state, &data_dir, None::<&Path>);

    Fixture {
        _temp: temp,
        store,
        app,
    }
}

fn record(id: &str) -> CatalogRecord {
    CatalogRecord {
        id: id.to_string(),
        store: "Lidl".to_string(),
        title: "Lidl catalog".to_string(),
        valid_from: "2025-01-06".to_string(),
        valid_until: "2025-01-12".to_string(),
        cover_image_path: format!("/newsletters/{id}/cover-image.jpg"),
        pages: vec![PageRecord {
            page_number: 1,
            image_path: format!("/newsletters/{id}/pages/page-01.jpg"),
        }],
        last_updated: Utc::now(),
        pages_expected: Some(1),
    }
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn lists_and_gets_catalogs() {
    let fx = fixture();
    fx.store.upsert(record("lidl-1")).await.unwrap();

    let (status, body) = send(&fx.app, "GET", "/api/newsletters").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value[0]["id"], "lidl-1");
    assert_eq!(value[0]["pages"][0]["imageUrl"], "/newsletters/lidl-1/pages/page-01.jpg");

    let (status, body) = send(&fx.app, "GET", "/api/newsletters/lidl-1").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["coverImage"], "/newsletters/lidl-1/cover-image.jpg");

    let (status, _) = send(&fx.app, "GET", "/api/newsletters/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn lists_store_configs() {
    let fx = fixture();
    let (status, body) = send(&fx.app, "GET", "/api/stores").await;
    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value, serde_json::json!({"configs": ["lidl.json"]}));
}

#[tokio::test]
async fn scrape_is_accepted_for_known_configs_only() {
    let fx = fixture();

    let (status, body) = send(&fx.app, "POST", "/api/scrape/lidl").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "processing");

    let (status, _) = send(&fx.app, "POST", "/api/scrape/penny").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&fx.app, "POST", "/api/scrape/..%2Fsecrets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn serves_downloaded_images_and_fallback_page() {
    let fx = fixture();
    let pages_dir = fx.store.base_dir().join("lidl-1").join("pages");
    std::fs::create_dir_all(&pages_dir).unwrap();
    std::fs::write(pages_dir.join("page-01.jpg"), b"jpeg").unwrap();

    let (status, body) = send(&fx.app, "GET", "/newsletters/lidl-1/pages/page-01.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"jpeg");

    let (status, body) = send(&fx.app, "GET", "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("flyerscrape"));

    let (status, body) = send(&fx.app, "GET", "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok\n");
}
