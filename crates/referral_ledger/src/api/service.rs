//! Endpoint operations over a shared `Ledger`, with bounded retry of
//! `StoreUnavailable` at the request boundary.

use crate::api::views::{
    ApiError, ClaimRequest, ClaimResponse, CreditsView, LeaderboardRow, LinkRequest, LinkResponse,
    ReferralView, VolumeRequest, VolumeResponse,
};
use crate::account::{AccountRecord, AddressKey};
use crate::compute::credit_profile;
use crate::error::{invalid_volume, LedgerError};
use crate::ledger::{Ledger, PayoutSink};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cap on the backoff exponent.
const MAX_BACKOFF_SHIFT: u32 = 16;

pub struct ReferralApi {
    ledger: Arc<Ledger>,
    payout: Option<Arc<dyn PayoutSink>>,
}

impl ReferralApi {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            payout: None,
        }
    }

    /// Run `sink` after every successful claim.
    pub fn with_payout(mut self, sink: Arc<dyn PayoutSink>) -> Self {
        self.payout = Some(sink);
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Retry `f` with exponential backoff while it fails with a retryable error.
    async fn retrying<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T, LedgerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let config = self.ledger.config();
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    let ms = config
                        .retry_backoff_ms
                        .saturating_mul(1 << attempt.min(MAX_BACKOFF_SHIFT));
                    warn!(op, attempt, ms, error = %e, "retry after error");
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn reject(op: &'static str, e: LedgerError) -> ApiError {
        if e.status_code() >= 500 {
            warn!(op, kind = e.kind(), error = %e, "request failed");
        } else {
            debug!(op, kind = e.kind(), error = %e, "request rejected");
        }
        ApiError::from(e)
    }

    /// Read endpoint. Registers the caller on first visit so their code resolves.
    pub async fn referral(&self, address: &str) -> Result<ReferralView, ApiError> {
        let ledger = &self.ledger;
        let account = self
            .retrying("referral", move || ledger.register(address))
            .await
            .map_err(|e| Self::reject("referral", e))?;
        let profile = credit_profile(&account, ledger.config());
        let link = ledger.referral_link(&account.address);
        Ok(ReferralView::new(&account, &profile, link))
    }

    /// Link endpoint. Re-linking reports success without changing anything.
    pub async fn link(&self, req: &LinkRequest) -> Result<LinkResponse, ApiError> {
        let ledger = &self.ledger;
        let (address, code) = (req.address.as_str(), req.code.as_str());
        self.retrying("link", move || ledger.link_referrer(address, code))
            .await
            .map(LinkResponse::from)
            .map_err(|e| Self::reject("link", e))
    }

    /// Claim endpoint. A failed payout after a committed claim still reports the
    /// claimed amount; the claim stays unsettled for reconciliation.
    pub async fn claim(&self, req: &ClaimRequest) -> Result<ClaimResponse, ApiError> {
        let ledger = &self.ledger;
        let address = req.address.as_str();
        let claim = self
            .retrying("claim", move || ledger.claim(address))
            .await
            .map_err(|e| Self::reject("claim", e))?;
        let amount = claim.amount.to_f64();
        if let Some(sink) = &self.payout {
            let id = claim.id;
            if let Err(e) = ledger.pay_out(claim, sink.as_ref()) {
                warn!(claim_id = id, error = %e, "could not record settlement");
            }
        }
        Ok(ClaimResponse {
            success: true,
            amount,
        })
    }

    /// Leaderboard query: top `leaderboard_size` accounts by credit score.
    pub async fn leaderboard(&self) -> Result<Vec<LeaderboardRow>, ApiError> {
        let ledger = &self.ledger;
        let n = ledger.config().leaderboard_size;
        let standings = self
            .retrying("leaderboard", move || async move { ledger.leaderboard(n) })
            .await
            .map_err(|e| Self::reject("leaderboard", e))?;
        Ok(standings.into_iter().map(LeaderboardRow::from).collect())
    }

    /// Credits endpoint. Unknown addresses report the baseline profile.
    pub async fn credits(&self, address: &str) -> Result<CreditsView, ApiError> {
        let ledger = &self.ledger;
        let (key, account) = self
            .retrying("credits", move || async move {
                let key = AddressKey::parse(address)?;
                let account = ledger.account(address)?;
                Ok::<_, LedgerError>((key, account))
            })
            .await
            .map_err(|e| Self::reject("credits", e))?;
        let account = account.unwrap_or_else(|| AccountRecord::new(key, 0));
        let profile = credit_profile(&account, ledger.config());
        Ok(CreditsView {
            address: account.address.to_string(),
            credits: profile.credit_score,
            multiplier: profile.multiplier(),
            tier: profile.tier,
            referrals: account.referral_count,
        })
    }

    /// Volume ingestion: accrue tiered commissions for a deposit/trade.
    pub async fn record_volume(&self, req: &VolumeRequest) -> Result<VolumeResponse, ApiError> {
        let volume = req
            .volume
            .to_amount()
            .map_err(|e| Self::reject("volume", invalid_volume(e)))?;
        let ledger = &self.ledger;
        let address = req.address.as_str();
        self.retrying("volume", move || ledger.record_volume(address, volume))
            .await
            .map(VolumeResponse::from)
            .map_err(|e| Self::reject("volume", e))
    }
}
