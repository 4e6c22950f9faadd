use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::app::catalog_store::CatalogStore;
use crate::app::model::{ErrorBody, ScrapeAccepted, ScrapeStatus, StoresResponse};
use crate::app::queue::InProcessQueue;
use crate::app::runner::AcquisitionRunner;
use crate::assemble::PUBLIC_PREFIX;
use crate::config::{config_path, list_catalog_configs};
use crate::formats::CatalogRecord;

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn CatalogStore>,
    pub runner: Arc<AcquisitionRunner>,
    pub queue: InProcessQueue,
    pub configs_dir: PathBuf,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

/// JSON API, downloaded images under `/newsletters`, and the web frontend (or
/// a placeholder page) for every other path.
pub fn router(state: ApiState, data_dir: &FsPath, web_dir: Option<&FsPath>) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/newsletters", get(list_catalogs))
        .route("/api/newsletters/:id", get(get_catalog))
        .route("/api/scrape/:store", post(start_scrape))
        .route("/api/stores", get(list_stores))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(data_dir))
        .with_state(state);

    let web_index = web_dir.map(|dir| (dir, dir.join("index.html")));
    match web_index {
        Some((dir, index)) if index.exists() => {
            app = app.fallback_service(ServeDir::new(dir).not_found_service(ServeFile::new(index)));
        }
        _ => {
            app = app.fallback(|| async {
                Html(
                    r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>flyerscrape</title></head>
  <body>
    <h1>flyerscrape</h1>
    <p>web assets not found. Pass <code>--web-dir</code> pointing at a built frontend.</p>
  </body>
</html>
"#,
                )
            });
        }
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn list_catalogs(
    State(state): State<ApiState>,
) -> Result<Json<Vec<CatalogRecord>>, ApiError> {
    let records = state.store.list().await.map_err(|err| {
        tracing::error!(?err, "list catalogs");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read catalogs")
    })?;
    Ok(Json(records))
}

async fn get_catalog(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<CatalogRecord>, ApiError> {
    let record = state.store.get(id.trim()).await.map_err(|err| {
        tracing::error!(%id, ?err, "get catalog");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read catalogs")
    })?;
    record
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "newsletter not found"))
}

async fn start_scrape(
    State(state): State<ApiState>,
    Path(store): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let path = config_path(&state.configs_dir, &store)
        .map_err(|err| api_error(StatusCode::BAD_REQUEST, format!("{err:#}")))?;
    if !path.is_file() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no config for store {store:?}"),
        ));
    }

    tracing::info!(%store, config = %path.display(), "scrape requested");
    let runner = Arc::clone(&state.runner);
    state.queue.spawn(async move {
        runner.run_config(path).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ScrapeAccepted {
            message: format!("Scraping started for {store}"),
            status: ScrapeStatus::Processing,
        }),
    ))
}

async fn list_stores(State(state): State<ApiState>) -> Result<Json<StoresResponse>, ApiError> {
    let configs = list_catalog_configs(&state.configs_dir).map_err(|err| {
        tracing::error!(?err, "list configs");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read configs")
    })?;
    Ok(Json(StoresResponse { configs }))
}
