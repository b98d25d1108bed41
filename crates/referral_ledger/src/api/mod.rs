//! Typed endpoint layer: referral read, link, claim, leaderboard, credits and
//! volume ingestion. Transport-agnostic; the CLI mounts it on HTTP routes.

mod service;
mod views;

pub use service::ReferralApi;
pub use views::{
    AccruedRow, ApiError, ClaimRequest, ClaimResponse, CreditsView, ErrorBody, LeaderboardRow,
    LinkRequest, LinkResponse, ReferralView, VolumeInput, VolumeRequest, VolumeResponse,
};
