//! Package search, lookup and publishing routes

use crate::{
    error::{ApiError, Result},
    repository::{NewVersion, RepositoryError},
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use rulepack_cache::{read_archive, SecurityPolicy};
use rulepack_core::types::{
    PackageInfo, PackageManifest, SearchQuery, Version, VersionInfo, MANIFEST_FILE_NAME,
};
use rulepack_core::utils::sha256_hex;
use rulepack_registry::api::{self, PublishResponse, SearchResponse};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Upper bound on `limit` for a single search page
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Create package routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/packages", get(search_packages).post(publish_package))
        .route("/packages/{name}", get(get_package))
        .route("/packages/{name}/versions/{version}", get(get_version))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchParams {
    fn into_query(self) -> SearchQuery {
        SearchQuery {
            query: self.q.unwrap_or_default(),
            tag: self.tag.filter(|t| !t.is_empty()),
            target: self.target.filter(|t| !t.is_empty()),
            limit: Some(
                self.limit
                    .unwrap_or(SearchQuery::DEFAULT_LIMIT)
                    .clamp(1, MAX_SEARCH_LIMIT),
            ),
        }
    }
}

async fn search_packages(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>> {
    let query = params.into_query();
    debug!("Searching packages: {:?}", query);
    let page = state.repository.search(&query).await?;
    Ok(Json(SearchResponse {
        packages: page.packages,
        total: page.total,
    }))
}

async fn get_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PackageInfo>> {
    Ok(Json(state.repository.get_package(&name).await?))
}

async fn get_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<VersionInfo>> {
    let version: Version = version
        .parse()
        .map_err(|e| ApiError::bad_request(format!("Invalid version '{}': {}", version, e)))?;
    Ok(Json(state.repository.get_version(&name, &version).await?))
}

/// Check the bearer token: missing is 401, unknown is 403
async fn authorize(state: &AppState, headers: &HeaderMap) -> Result<()> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("a bearer token is required to publish".to_string()))?;

    if state.repository.validate_token(token).await? {
        Ok(())
    } else {
        warn!("Rejected publish with an unknown token");
        Err(ApiError::Forbidden("token is not allowed to publish".to_string()))
    }
}

async fn publish_package(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<PublishResponse>)> {
    authorize(&state, &headers).await?;

    let mut manifest_bytes: Option<Bytes> = None;
    let mut archive_bytes: Option<Bytes> = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(api::MANIFEST_FIELD) => manifest_bytes = Some(field.bytes().await?),
            Some(api::ARCHIVE_FIELD) => archive_bytes = Some(field.bytes().await?),
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }
    let manifest_bytes =
        manifest_bytes.ok_or_else(|| ApiError::bad_request("missing 'manifest' field"))?;
    let archive_bytes =
        archive_bytes.ok_or_else(|| ApiError::bad_request("missing 'archive' field"))?;

    let manifest: PackageManifest = serde_json::from_slice(&manifest_bytes)
        .map_err(|e| ApiError::bad_request(format!("Invalid manifest: {}", e)))?;
    if !PackageManifest::is_valid_name(&manifest.name) {
        return Err(ApiError::bad_request(format!(
            "Invalid package name '{}'",
            manifest.name
        )));
    }
    let files = inspect_archive(archive_bytes.clone(), &manifest).await?;

    let sha256 = sha256_hex(&archive_bytes);
    match state
        .repository
        .get_version(&manifest.name, &manifest.version)
        .await
    {
        Ok(_) => {
            return Err(ApiError::Conflict(format!(
                "{}@{} already exists",
                manifest.name, manifest.version
            )))
        },
        Err(RepositoryError::NotFound(_)) => {},
        Err(e) => return Err(e.into()),
    }

    state.blobs.put(&sha256, &archive_bytes).await?;
    state.repository.create_package(&manifest).await?;
    let recorded = state
        .repository
        .create_version(&NewVersion {
            manifest: manifest.clone(),
            sha256: sha256.clone(),
            size_bytes: archive_bytes.len() as u64,
            files,
        })
        .await?;

    info!(
        "Published {}@{} ({} bytes, sha256 {})",
        recorded.name, recorded.version, recorded.size_bytes, recorded.sha256
    );
    Ok((
        StatusCode::CREATED,
        Json(PublishResponse {
            name: recorded.name.clone(),
            version: recorded.version.clone(),
            sha256,
            download_url: api::blob_path(&recorded.sha256),
            message: Some(format!("Published {}@{}", recorded.name, recorded.version)),
        }),
    ))
}

/// Validate the archive and return the rule files it carries
///
/// The archive must pass the security filter and hold a manifest at its root
/// that names the same package and version as the form field.
async fn inspect_archive(archive: Bytes, manifest: &PackageManifest) -> Result<Vec<String>> {
    let contents = tokio::task::spawn_blocking(move || {
        read_archive(&archive[..], &SecurityPolicy::default())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("archive inspection panicked: {}", e)))?
    .map_err(|e| ApiError::bad_request(format!("Invalid archive: {}", e)))?;

    let embedded = contents.get(MANIFEST_FILE_NAME).ok_or_else(|| {
        ApiError::bad_request(format!("archive has no {} at its root", MANIFEST_FILE_NAME))
    })?;
    let embedded: PackageManifest = serde_json::from_slice(embedded)
        .map_err(|e| ApiError::bad_request(format!("Invalid embedded manifest: {}", e)))?;
    if embedded.name != manifest.name || embedded.version != manifest.version {
        return Err(ApiError::bad_request(format!(
            "archive holds {}@{} but the manifest declares {}@{}",
            embedded.name, embedded.version, manifest.name, manifest.version
        )));
    }

    Ok(contents
        .into_keys()
        .filter(|name| name != MANIFEST_FILE_NAME)
        .collect())
}
