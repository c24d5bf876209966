//! Archive download route

use crate::{error::Result, AppState};
use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/blobs/{sha256}", get(download_blob))
}

async fn download_blob(
    State(state): State<AppState>,
    Path(sha256): Path<String>,
) -> Result<impl IntoResponse> {
    let bytes = state.blobs.get(&sha256).await?;
    Ok(([(header::CONTENT_TYPE, "application/gzip")], bytes))
}
