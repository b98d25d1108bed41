//! Referral graph: write-once referrer links, no self-links, no cycles.

use crate::account::{AddressKey, ReferralCode};
use crate::error::LedgerError;
use crate::ledger::accrual::MAX_TIERS;
use crate::ledger::{Ledger, CHAIN_ATTEMPTS};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Result of a link request. Re-linking an already linked address is not an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked { referrer: AddressKey },
    /// The address already had a referrer; nothing changed.
    AlreadyLinked { referrer: AddressKey },
}

impl LinkOutcome {
    pub fn referrer(&self) -> &AddressKey {
        match self {
            LinkOutcome::Linked { referrer } | LinkOutcome::AlreadyLinked { referrer } => referrer,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, LinkOutcome::Linked { .. })
    }
}

impl Ledger {
    /// Attach `address` to the referrer named by `referrer_code` (a referral code or a
    /// full address) if it has none yet.
    ///
    /// Locks the referee, the referrer and the referrer's whole upline. Any other link
    /// that could close a cycle through this one writes an account in that set, so such
    /// links serialize while links on unrelated chains run in parallel.
    pub async fn link_referrer(
        &self,
        address: &str,
        referrer_code: &str,
    ) -> Result<LinkOutcome, LedgerError> {
        let referee = AddressKey::parse(address)?;
        if names_self(&referee, referrer_code) {
            return Err(LedgerError::SelfReferral(referee));
        }
        // Links are write-once, so an existing referrer seen here is final.
        if let Some(existing) = self.store.load(&referee)?.and_then(|a| a.referrer) {
            info!(
                address = %referee,
                %existing,
                requested = referrer_code,
                "already linked; ignoring re-link"
            );
            return Ok(LinkOutcome::AlreadyLinked { referrer: existing });
        }
        let referrer = self.resolve_referrer(referrer_code)?;
        if referrer == referee {
            return Err(LedgerError::SelfReferral(referee));
        }

        for _ in 0..CHAIN_ATTEMPTS {
            let upline = self.upline(&referrer, usize::MAX)?;
            let mut keys = Vec::with_capacity(upline.len() + 2);
            keys.push(referee.clone());
            keys.push(referrer.clone());
            keys.extend(upline.iter().cloned());

            let _held = self.locks.acquire(&keys).await?;
            if self.upline(&referrer, usize::MAX)? != upline {
                debug!(address = %referee, %referrer, "upline changed while locking; retrying");
                continue;
            }

            if let Some(existing) = self.store.load(&referee)?.and_then(|a| a.referrer) {
                info!(
                    address = %referee,
                    %existing,
                    requested = %referrer,
                    "already linked; ignoring re-link"
                );
                return Ok(LinkOutcome::AlreadyLinked { referrer: existing });
            }
            if upline.contains(&referee) {
                return Err(LedgerError::CyclicReferral {
                    address: referee,
                    referrer,
                });
            }

            self.store.transact(&keys[..2], &mut |batch| {
                batch.account_mut(&referee)?.referrer = Some(referrer.clone());
                let upstream = batch.account_mut(&referrer)?;
                upstream.referral_count = upstream
                    .referral_count
                    .checked_add(1)
                    .ok_or_else(|| LedgerError::AmountOverflow(referrer.clone()))?;
                Ok(())
            })?;
            info!(address = %referee, %referrer, "referral linked");
            return Ok(LinkOutcome::Linked { referrer });
        }
        Err(LedgerError::StoreUnavailable(format!(
            "upline of {referrer} kept changing"
        )))
    }

    /// Direct referrer of `address`, if any.
    pub fn referrer_of(&self, address: &str) -> Result<Option<AddressKey>, LedgerError> {
        let key = AddressKey::parse(address)?;
        Ok(self.store.load(&key)?.and_then(|a| a.referrer))
    }

    /// Resolve a referral code (or full address) to the referrer's key.
    /// A full address needs no existing account; it is created by the link itself.
    pub fn resolve_referrer(&self, referrer_code: &str) -> Result<AddressKey, LedgerError> {
        if let Ok(key) = AddressKey::parse(referrer_code) {
            return Ok(key);
        }
        let code = ReferralCode::parse(referrer_code)?;
        let mut found = self.store.find_by_code(&code)?;
        if found.len() > 1 {
            warn!(%code, matches = found.len(), "referral code collision; using oldest account");
        }
        if found.is_empty() {
            return Err(LedgerError::UnknownReferralCode(code.to_string()));
        }
        Ok(found.swap_remove(0).address)
    }

    /// Shareable link `<base>/terminal?ref=<code>` for `address`.
    pub fn referral_link(&self, address: &AddressKey) -> String {
        link_for(&self.config.referral_link_base, &address.referral_code())
    }

    /// Up to `depth` ancestors of `address`, nearest first. Stops early if the
    /// chain revisits a node.
    pub(crate) fn upline(
        &self,
        address: &AddressKey,
        depth: usize,
    ) -> Result<Vec<AddressKey>, LedgerError> {
        let mut chain = Vec::with_capacity(depth.min(MAX_TIERS));
        let mut seen = HashSet::from([address.clone()]);
        let mut cursor = address.clone();
        while chain.len() < depth {
            match self.store.load(&cursor)?.and_then(|a| a.referrer) {
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        warn!(%next, "referrer chain revisits a node");
                        break;
                    }
                    chain.push(next.clone());
                    cursor = next;
                }
                None => break,
            }
        }
        Ok(chain)
    }
}

/// True when `referrer_code` names `referee` itself, as a code or a full address.
fn names_self(referee: &AddressKey, referrer_code: &str) -> bool {
    if let Ok(key) = AddressKey::parse(referrer_code) {
        return &key == referee;
    }
    ReferralCode::parse(referrer_code).ok().as_ref() == Some(&referee.referral_code())
}

/// `<base>/terminal?ref=<code>`, keeping any path the base already has.
fn link_for(base: &str, code: &ReferralCode) -> String {
    if let Ok(mut link) = url::Url::parse(base) {
        let pushed = match link.path_segments_mut() {
            Ok(mut segments) => {
                segments.pop_if_empty().push("terminal");
                true
            }
            Err(()) => false,
        };
        if pushed {
            link.query_pairs_mut().append_pair("ref", code.as_str());
            return link.into();
        }
    }
    format!("{}/terminal?ref={}", base.trim_end_matches('/'), code)
}
