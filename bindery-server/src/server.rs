use crate::config::Config;
use bindery_core::{
    CatalogEngine, CatalogError, DeleteDistributionRequest, FlavorSpec, PublishBundleRequest,
    Result, UpdateDistributionRequest,
};
use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub engine: CatalogEngine,
    pub flavors: FlavorSpec,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn fail(error: CatalogError) -> Response {
    let status = match &error {
        CatalogError::NotFound(_)
        | CatalogError::UnknownBundle(_)
        | CatalogError::UnknownVersion { .. }
        | CatalogError::UnknownDistribution { .. } => StatusCode::NOT_FOUND,
        CatalogError::DuplicateVersion { .. }
        | CatalogError::VersionConflict { .. }
        | CatalogError::ReferencedVersionDelete { .. } => StatusCode::CONFLICT,
        CatalogError::InvalidFlavorRule(_) | CatalogError::InvalidBundleName(_) => {
            StatusCode::BAD_REQUEST
        }
        CatalogError::AcquireTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(ApiResponse::<()>::err(error.to_string())),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct PublishQuery {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    skip_master_archive: bool,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    bundle: String,
    version: u64,
    created: bool,
    files: usize,
    flavors: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ArchiveQuery {
    #[serde(default)]
    flavor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateDistributionBody {
    version: u64,
    #[serde(default = "default_true")]
    save_previous: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteDistributionQuery {
    #[serde(default = "default_true")]
    delete_previous: bool,
}

#[derive(Debug, Deserialize)]
struct CleanQuery {
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct CleanResponse {
    dry_run: bool,
    removed: Vec<String>,
}

fn default_true() -> bool {
    true
}

pub async fn run_server(state: Arc<ServerState>, config: &Config) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/catalog", get(get_catalog))
        .route("/bundles", get(list_bundles))
        .route("/bundles/:bundle", put(publish_bundle))
        .route(
            "/bundles/:bundle/versions/:version",
            get(get_manifest).delete(delete_version),
        )
        .route("/bundles/:bundle/archives/:version", get(get_archive))
        .route("/bundles/:bundle/distributions", get(list_distributions))
        .route(
            "/bundles/:bundle/distributions/:distribution",
            get(resolve_distribution)
                .put(update_distribution)
                .delete(delete_distribution),
        )
        .route("/objects/:sha", get(get_object))
        .route("/clean", post(clean))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = serde_json::json!({
        "catalog": state.engine.catalog_id(),
        "status": "ok",
    });
    (StatusCode::OK, axum::Json(response))
}

async fn get_catalog(State(state): State<Arc<ServerState>>) -> Response {
    match state.engine.get_index().await {
        Ok(index) => (StatusCode::OK, axum::Json(ApiResponse::ok(index))).into_response(),
        Err(error) => fail(error),
    }
}

async fn list_bundles(State(state): State<Arc<ServerState>>) -> Response {
    match state.engine.list_bundles().await {
        Ok(bundles) => (StatusCode::OK, axum::Json(ApiResponse::ok(bundles))).into_response(),
        Err(error) => fail(error),
    }
}

/// Publish a bundle version. The request body is a tar archive of the
/// directory tree; entry paths become manifest paths.
async fn publish_bundle(
    State(state): State<Arc<ServerState>>,
    Path(bundle): Path<String>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> Response {
    let files = match unpack_tree(&body) {
        Ok(files) => files,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(ApiResponse::<()>::err(format!(
                    "invalid tar payload: {}",
                    error
                ))),
            )
                .into_response();
        }
    };

    let request = PublishBundleRequest {
        bundle,
        files,
        flavors: state.flavors.clone(),
        force: query.force,
        skip_master_archive: query.skip_master_archive,
    };

    match state.engine.publish_bundle(request).await {
        Ok(published) => {
            let status = if published.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            let response = PublishResponse {
                bundle: published.manifest.bundle.clone(),
                version: published.manifest.version,
                created: published.created,
                files: published.manifest.file_count(),
                flavors: published.manifest.flavors.iter().cloned().collect(),
            };
            (status, axum::Json(ApiResponse::ok(response))).into_response()
        }
        Err(error) => fail(error),
    }
}

async fn get_manifest(
    State(state): State<Arc<ServerState>>,
    Path((bundle, version)): Path<(String, u64)>,
) -> Response {
    match state.engine.get_manifest(&bundle, version).await {
        Ok(manifest) => (StatusCode::OK, axum::Json(ApiResponse::ok(manifest))).into_response(),
        Err(error) => fail(error),
    }
}

async fn delete_version(
    State(state): State<Arc<ServerState>>,
    Path((bundle, version)): Path<(String, u64)>,
) -> Response {
    match state.engine.delete_bundle_version(&bundle, version).await {
        Ok(()) => (StatusCode::OK, axum::Json(ApiResponse::ok(()))).into_response(),
        Err(error) => fail(error),
    }
}

async fn get_archive(
    State(state): State<Arc<ServerState>>,
    Path((bundle, version)): Path<(String, u64)>,
    Query(query): Query<ArchiveQuery>,
) -> Response {
    match state
        .engine
        .get_archive(&bundle, version, query.flavor.as_deref())
        .await
    {
        Ok(data) => (
            StatusCode::OK,
            [("content-type", "application/x-tar")],
            data,
        )
            .into_response(),
        Err(error) => fail(error),
    }
}

async fn list_distributions(
    State(state): State<Arc<ServerState>>,
    Path(bundle): Path<String>,
) -> Response {
    match state.engine.get_index().await {
        Ok(index) => {
            let distributions = index.distributions_for_bundle(&bundle);
            (StatusCode::OK, axum::Json(ApiResponse::ok(distributions))).into_response()
        }
        Err(error) => fail(error),
    }
}

async fn resolve_distribution(
    State(state): State<Arc<ServerState>>,
    Path((bundle, distribution)): Path<(String, String)>,
) -> Response {
    match state
        .engine
        .resolve_distribution(&bundle, &distribution)
        .await
    {
        Ok(version) => (
            StatusCode::OK,
            axum::Json(ApiResponse::ok(serde_json::json!({ "version": version }))),
        )
            .into_response(),
        Err(error) => fail(error),
    }
}

async fn update_distribution(
    State(state): State<Arc<ServerState>>,
    Path((bundle, distribution)): Path<(String, String)>,
    axum::Json(body): axum::Json<UpdateDistributionBody>,
) -> Response {
    let request = UpdateDistributionRequest {
        distribution,
        bundle,
        version: body.version,
        save_previous: body.save_previous,
    };
    match state.engine.update_distribution(request).await {
        Ok(()) => (StatusCode::OK, axum::Json(ApiResponse::ok(()))).into_response(),
        Err(error) => fail(error),
    }
}

async fn delete_distribution(
    State(state): State<Arc<ServerState>>,
    Path((bundle, distribution)): Path<(String, String)>,
    Query(query): Query<DeleteDistributionQuery>,
) -> Response {
    let request = DeleteDistributionRequest {
        distribution,
        bundle,
        delete_previous: query.delete_previous,
    };
    match state.engine.delete_distribution(request).await {
        Ok(()) => (StatusCode::OK, axum::Json(ApiResponse::ok(()))).into_response(),
        Err(error) => fail(error),
    }
}

async fn get_object(State(state): State<Arc<ServerState>>, Path(sha): Path<String>) -> Response {
    match state.engine.get_object(&sha).await {
        Ok(data) => (
            StatusCode::OK,
            [("content-type", "application/octet-stream")],
            data,
        )
            .into_response(),
        Err(error) => fail(error),
    }
}

async fn clean(State(state): State<Arc<ServerState>>, Query(query): Query<CleanQuery>) -> Response {
    match state.engine.clean(query.dry_run).await {
        Ok(result) => (
            StatusCode::OK,
            axum::Json(ApiResponse::ok(CleanResponse {
                dry_run: result.dry_run,
                removed: result.removed,
            })),
        )
            .into_response(),
        Err(error) => fail(error),
    }
}

/// Unpack an uploaded tar archive into path to bytes, regular files only.
fn unpack_tree(data: &[u8]) -> std::io::Result<BTreeMap<String, bytes::Bytes>> {
    let mut files = BTreeMap::new();
    let mut archive = tar::Archive::new(data);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        files.insert(path, bytes::Bytes::from(contents));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_tree_reads_regular_files() {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in [("a.txt", b"alpha".as_slice()), ("dir/b.txt", b"beta")] {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, data).unwrap();
        }
        let archive = builder.into_inner().unwrap();

        let files = unpack_tree(&archive).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files["a.txt"].as_ref(), b"alpha");
        assert_eq!(files["dir/b.txt"].as_ref(), b"beta");
    }

    #[test]
    fn test_unpack_tree_rejects_garbage() {
        assert!(unpack_tree(b"definitely not a tar archive").is_err());
    }
}
