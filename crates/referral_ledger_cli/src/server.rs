//! HTTP surface over `ReferralApi`.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use referral_ledger::api::{ApiError, ClaimRequest, LinkRequest, VolumeRequest};
use referral_ledger::ReferralApi;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize, Debug)]
pub struct ReferralQuery {
    pub address: Option<String>,
    #[serde(default)]
    pub leaderboard: bool,
}

#[derive(Deserialize, Debug)]
pub struct AddressQuery {
    pub address: String,
}

pub struct HttpError(ApiError);

impl From<ApiError> for HttpError {
    fn from(e: ApiError) -> Self {
        Self(e)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0.body)).into_response()
    }
}

pub fn router(api: Arc<ReferralApi>) -> Router {
    Router::new()
        .route("/api/referral", get(referral).post(link).patch(claim))
        .route("/api/referral/volume", post(volume))
        .route("/api/credits", get(credits))
        .layer(Extension(api))
}

pub async fn serve(api: Arc<ReferralApi>, bind: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(api)).await
}

/// `?leaderboard=true` returns the top accounts; otherwise `?address=` is required.
async fn referral(
    Query(q): Query<ReferralQuery>,
    Extension(api): Extension<Arc<ReferralApi>>,
) -> Result<Response, HttpError> {
    if q.leaderboard {
        return Ok(Json(api.leaderboard().await?).into_response());
    }
    let address = q
        .address
        .ok_or_else(|| ApiError::bad_request("address query parameter is required"))?;
    Ok(Json(api.referral(&address).await?).into_response())
}

async fn link(
    Extension(api): Extension<Arc<ReferralApi>>,
    Json(req): Json<LinkRequest>,
) -> Result<Response, HttpError> {
    Ok(Json(api.link(&req).await?).into_response())
}

async fn claim(
    Extension(api): Extension<Arc<ReferralApi>>,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, HttpError> {
    Ok(Json(api.claim(&req).await?).into_response())
}

async fn volume(
    Extension(api): Extension<Arc<ReferralApi>>,
    Json(req): Json<VolumeRequest>,
) -> Result<Response, HttpError> {
    Ok(Json(api.record_volume(&req).await?).into_response())
}

async fn credits(
    Query(q): Query<AddressQuery>,
    Extension(api): Extension<Arc<ReferralApi>>,
) -> Result<Response, HttpError> {
    Ok(Json(api.credits(&q.address).await?).into_response())
}
