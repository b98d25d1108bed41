//! End-to-end ledger behaviour over the in-memory and SQLite stores.

use referral_ledger::account::ReferralCode;
use referral_ledger::api::{ClaimRequest, LinkRequest, VolumeInput, VolumeRequest};
use referral_ledger::store::ApplyFn;
use referral_ledger::{
    snapshot_hash, AccountRecord, AddressKey, Amount, ClaimFilter, ClaimRecord, Ledger,
    LedgerConfig, LedgerError, LedgerSnapshot, LedgerStore, LinkOutcome, MemoryStore, PayoutError,
    PayoutSink, ReferralApi, ReportData, SqliteStore, StoreError, StoreSnapshot,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use time::OffsetDateTime;

const ALICE: &str = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA1111";
const BOB: &str = "0xBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB2222";

fn addr(c: char) -> String {
    format!("0x{}", c.to_string().repeat(40))
}

fn code(address: &str) -> String {
    AddressKey::parse(address)
        .unwrap()
        .referral_code()
        .to_string()
}

fn units(n: u64) -> Amount {
    Amount::from_units(n).unwrap()
}

fn memory_ledger() -> Arc<Ledger> {
    Arc::new(Ledger::new(
        Arc::new(MemoryStore::new()),
        LedgerConfig::default(),
    ))
}

async fn pending(ledger: &Ledger, address: &str) -> Amount {
    ledger
        .account(address)
        .unwrap()
        .map(|a| a.pending_commission)
        .unwrap_or_default()
}

#[tokio::test]
async fn first_link_wins() {
    let ledger = memory_ledger();
    let (a, b, c) = (addr('a'), addr('b'), addr('c'));
    ledger.register(&b).await.unwrap();
    ledger.register(&c).await.unwrap();

    let first = ledger.link_referrer(&a, &code(&b)).await.unwrap();
    assert!(first.is_new());
    let second = ledger.link_referrer(&a, &code(&c)).await.unwrap();
    assert_eq!(
        second,
        LinkOutcome::AlreadyLinked {
            referrer: AddressKey::parse(&b).unwrap()
        }
    );
    assert_eq!(
        ledger.referrer_of(&a).unwrap(),
        Some(AddressKey::parse(&b).unwrap())
    );
    let b_account = ledger.account(&b).unwrap().unwrap();
    let c_account = ledger.account(&c).unwrap().unwrap();
    assert_eq!(b_account.referral_count, 1);
    assert_eq!(c_account.referral_count, 0);
}

#[tokio::test]
async fn relink_with_unknown_code_reports_existing_referrer() {
    let ledger = memory_ledger();
    let (a, b) = (addr('a'), addr('b'));
    ledger.register(&b).await.unwrap();
    ledger.link_referrer(&a, &code(&b)).await.unwrap();

    let outcome = ledger.link_referrer(&a, "DEADBEEF").await.unwrap();
    assert_eq!(
        outcome,
        LinkOutcome::AlreadyLinked {
            referrer: AddressKey::parse(&b).unwrap()
        }
    );
    let api = ReferralApi::new(Arc::clone(&ledger));
    let linked = api
        .link(&LinkRequest {
            address: a.clone(),
            code: "DEADBEEF".into(),
        })
        .await
        .unwrap();
    assert!(linked.already_linked);
    assert_eq!(linked.referrer, AddressKey::parse(&b).unwrap().to_string());
}

#[tokio::test]
async fn self_referral_is_rejected() {
    let ledger = memory_ledger();
    let a = addr('a');
    ledger.register(&a).await.unwrap();
    assert!(matches!(
        ledger.link_referrer(&a, &code(&a)).await,
        Err(LedgerError::SelfReferral(_))
    ));
    assert!(matches!(
        ledger.link_referrer(&a, &a.to_lowercase()).await,
        Err(LedgerError::SelfReferral(_))
    ));
    assert_eq!(ledger.referrer_of(&a).unwrap(), None);
}

#[tokio::test]
async fn cycles_are_rejected() {
    let ledger = memory_ledger();
    let (a, b, c) = (addr('a'), addr('b'), addr('c'));
    ledger.register(&a).await.unwrap();
    ledger.link_referrer(&b, &code(&a)).await.unwrap();
    ledger.link_referrer(&c, &code(&b)).await.unwrap();

    assert!(matches!(
        ledger.link_referrer(&a, &code(&b)).await,
        Err(LedgerError::CyclicReferral { .. })
    ));
    assert!(matches!(
        ledger.link_referrer(&a, &code(&c)).await,
        Err(LedgerError::CyclicReferral { .. })
    ));
    assert_eq!(ledger.referrer_of(&a).unwrap(), None);
}

#[tokio::test]
async fn unknown_and_malformed_codes() {
    let ledger = memory_ledger();
    let a = addr('a');
    assert!(matches!(
        ledger.link_referrer(&a, "DEADBEEF").await,
        Err(LedgerError::UnknownReferralCode(_))
    ));
    assert!(matches!(
        ledger.link_referrer(&a, "not-a-code").await,
        Err(LedgerError::InvalidReferralCode(_))
    ));
    assert!(matches!(
        ledger.link_referrer("0x1234", &code(&a)).await,
        Err(LedgerError::InvalidAddressFormat(_))
    ));
}

#[tokio::test]
async fn volume_accrues_exact_tier_commissions() {
    let ledger = memory_ledger();
    let (r2, r1, subject) = (addr('2'), addr('1'), addr('5'));
    ledger.register(&r2).await.unwrap();
    ledger.link_referrer(&r1, &code(&r2)).await.unwrap();
    ledger.link_referrer(&subject, &code(&r1)).await.unwrap();

    let volume = Amount::parse("123.456789").unwrap();
    let accrual = ledger.record_volume(&subject, volume).await.unwrap();
    assert_eq!(accrual.credits.len(), 2);
    assert_eq!(pending(&ledger, &r1).await, Amount::from_micros(12_345_678));
    assert_eq!(pending(&ledger, &r2).await, Amount::from_micros(6_172_839));
    assert_eq!(pending(&ledger, &subject).await, Amount::ZERO);

    let r1_account = ledger.account(&r1).unwrap().unwrap();
    assert_eq!(r1_account.total_volume_referred, volume);

    assert!(matches!(
        ledger.record_volume(&subject, Amount::ZERO).await,
        Err(LedgerError::InvalidVolume(_))
    ));
    assert_eq!(pending(&ledger, &r1).await, Amount::from_micros(12_345_678));
}

#[tokio::test]
async fn volume_without_referrer_credits_nobody() {
    let ledger = memory_ledger();
    let a = addr('a');
    let accrual = ledger.record_volume(&a, units(50)).await.unwrap();
    assert!(accrual.credits.is_empty());
    assert_eq!(pending(&ledger, &a).await, Amount::ZERO);
}

#[tokio::test]
async fn claim_moves_pending_to_earned_once() {
    let ledger = memory_ledger();
    let (a, b) = (addr('a'), addr('b'));
    ledger.register(&a).await.unwrap();
    ledger.link_referrer(&b, &code(&a)).await.unwrap();
    ledger.record_volume(&b, units(40)).await.unwrap();

    let claim = ledger.claim(&a).await.unwrap();
    assert_eq!(claim.amount, units(4));
    let account = ledger.account(&a).unwrap().unwrap();
    assert_eq!(account.pending_commission, Amount::ZERO);
    assert_eq!(account.total_earned, units(4));

    assert!(matches!(
        ledger.claim(&a).await,
        Err(LedgerError::NothingToClaim(_))
    ));
    let claims = ledger.claims(&ClaimFilter::default()).unwrap();
    assert_eq!(claims.len(), 1);
    assert!(!claims[0].is_settled());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_pay_exactly_once() {
    let ledger = memory_ledger();
    let (a, b) = (addr('a'), addr('b'));
    ledger.register(&a).await.unwrap();
    ledger.link_referrer(&b, &code(&a)).await.unwrap();
    ledger.record_volume(&b, units(100)).await.unwrap();

    let tasks: Vec<_> = (0..2)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let a = a.clone();
            tokio::spawn(async move { ledger.claim(&a).await })
        })
        .collect();
    let mut paid = Vec::new();
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(claim) => paid.push(claim.amount),
            Err(LedgerError::NothingToClaim(_)) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(paid, vec![units(10)]);
    assert_eq!(refused, 1);
    assert_eq!(
        ledger.account(&a).unwrap().unwrap().total_earned,
        units(10)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accruals_are_not_lost() {
    let ledger = memory_ledger();
    let a = addr('a');
    ledger.register(&a).await.unwrap();
    let referees: Vec<String> = ['1', '2', '3', '4', '5', '6'].iter().map(|c| addr(*c)).collect();
    for r in &referees {
        ledger.link_referrer(r, &code(&a)).await.unwrap();
    }

    let mut tasks = Vec::new();
    for r in &referees {
        for _ in 0..5 {
            let ledger = Arc::clone(&ledger);
            let r = r.clone();
            tasks.push(tokio::spawn(async move {
                ledger.record_volume(&r, units(10)).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let account = ledger.account(&a).unwrap().unwrap();
    assert_eq!(account.pending_commission, units(30));
    assert_eq!(account.total_volume_referred, units(300));
    assert_eq!(account.referral_count, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposite_links_cannot_both_succeed() {
    for _ in 0..20 {
        let ledger = memory_ledger();
        let (a, b) = (addr('a'), addr('b'));
        ledger.register(&a).await.unwrap();
        ledger.register(&b).await.unwrap();
        let l1 = Arc::clone(&ledger);
        let l2 = Arc::clone(&ledger);
        let (a1, b1, a2, b2) = (a.clone(), b.clone(), a.clone(), b.clone());
        let t1 = tokio::spawn(async move { l1.link_referrer(&a1, &code(&b1)).await });
        let t2 = tokio::spawn(async move { l2.link_referrer(&b2, &code(&a2)).await });
        let (r1, r2) = (t1.await.unwrap(), t2.await.unwrap());
        assert!(r1.is_ok() ^ r2.is_ok(), "{r1:?} / {r2:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crossing_chains_accrue_exactly() {
    let config = LedgerConfig {
        lock_timeout_ms: 500,
        ..LedgerConfig::default()
    };
    let ledger = Arc::new(Ledger::new(Arc::new(MemoryStore::new()), config));
    let (q, p, x, r, y, z) = (addr('1'), addr('9'), addr('5'), addr('3'), addr('7'), addr('2'));
    ledger.register(&q).await.unwrap();
    for (referee, referrer) in [(&p, &q), (&x, &p), (&r, &q), (&y, &r), (&z, &x)] {
        ledger.link_referrer(referee, referrer).await.unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..10 {
        for source in [&x, &p, &y, &z, &r] {
            let ledger = Arc::clone(&ledger);
            let source = source.clone();
            tasks.push(tokio::spawn(async move {
                ledger.record_volume(&source, units(10)).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(pending(&ledger, &q).await, units(30));
    assert_eq!(pending(&ledger, &p).await, units(15));
    assert_eq!(pending(&ledger, &x).await, units(10));
    assert_eq!(pending(&ledger, &r).await, units(10));
    assert_eq!(pending(&ledger, &y).await, Amount::ZERO);
    assert_eq!(pending(&ledger, &z).await, Amount::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sqlite_claims_pay_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("ledger.sqlite"), Duration::from_secs(2)).unwrap();
    let ledger = Arc::new(Ledger::new(Arc::new(store), LedgerConfig::default()));
    let (a, b) = (addr('a'), addr('b'));
    ledger.register(&a).await.unwrap();
    ledger.link_referrer(&b, &code(&a)).await.unwrap();
    ledger.record_volume(&b, units(100)).await.unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            let a = a.clone();
            tokio::spawn(async move { ledger.claim(&a).await })
        })
        .collect();
    let mut paid = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(claim) => {
                assert_eq!(claim.amount, units(10));
                paid += 1;
            }
            Err(LedgerError::NothingToClaim(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(paid, 1);
    assert_eq!(ledger.claims(&ClaimFilter::default()).unwrap().len(), 1);
    assert_eq!(ledger.account(&a).unwrap().unwrap().total_earned, units(10));
}

/// Stalls every transaction that touches `slow_key` once `armed` is set.
struct SlowStore {
    inner: MemoryStore,
    slow_key: AddressKey,
    armed: AtomicBool,
}

impl LedgerStore for SlowStore {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError> {
        self.inner.load(address)
    }

    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.find_by_code(code)
    }

    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.accounts()
    }

    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError> {
        if self.armed.load(Ordering::SeqCst) && keys.contains(&self.slow_key) {
            std::thread::sleep(Duration::from_millis(600));
        }
        self.inner.transact(keys, apply)
    }

    fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
        self.inner.claims(filter)
    }

    fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.snapshot()
    }

    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError> {
        self.inner.settle_claim(id, settlement_ref, at)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unrelated_links_do_not_wait_on_each_other() {
    let (a, b, c, d) = (addr('a'), addr('b'), addr('c'), addr('d'));
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        slow_key: AddressKey::parse(&a).unwrap(),
        armed: AtomicBool::new(false),
    });
    let ledger = Arc::new(Ledger::new(store.clone(), LedgerConfig::default()));
    ledger.register(&b).await.unwrap();
    ledger.register(&d).await.unwrap();
    store.armed.store(true, Ordering::SeqCst);

    let slow = {
        let ledger = Arc::clone(&ledger);
        let (a, b) = (a.clone(), b.clone());
        tokio::spawn(async move { ledger.link_referrer(&a, &b).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    let outcome = ledger.link_referrer(&c, &d).await.unwrap();
    let elapsed = started.elapsed();
    assert!(outcome.is_new());
    assert!(elapsed < Duration::from_millis(300), "waited {elapsed:?}");

    assert!(slow.await.unwrap().unwrap().is_new());
    assert_eq!(
        ledger.referrer_of(&a).unwrap(),
        Some(AddressKey::parse(&b).unwrap())
    );
}

/// Serves only whole snapshots; the per-table reads fail.
struct SnapshotOnlyStore {
    inner: MemoryStore,
}

impl LedgerStore for SnapshotOnlyStore {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError> {
        self.inner.load(address)
    }

    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.find_by_code(code)
    }

    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        Err(StoreError::Corrupt("accounts read outside a snapshot".into()))
    }

    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError> {
        self.inner.transact(keys, apply)
    }

    fn claims(&self, _filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
        Err(StoreError::Corrupt("claims read outside a snapshot".into()))
    }

    fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.snapshot()
    }

    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError> {
        self.inner.settle_claim(id, settlement_ref, at)
    }
}

#[tokio::test]
async fn export_and_report_read_one_consistent_state() {
    let ledger = Ledger::new(
        Arc::new(SnapshotOnlyStore {
            inner: MemoryStore::new(),
        }),
        LedgerConfig::default(),
    );
    ledger.register(ALICE).await.unwrap();
    ledger.link_referrer(BOB, ALICE).await.unwrap();
    ledger.record_volume(BOB, units(100)).await.unwrap();
    ledger.claim(ALICE).await.unwrap();
    ledger.record_volume(BOB, units(50)).await.unwrap();

    let snapshot = LedgerSnapshot::capture(&ledger).unwrap();
    let earned: u64 = snapshot.accounts.iter().map(|a| a.total_earned.micros()).sum();
    let claimed: u64 = snapshot.claims.iter().map(|c| c.amount.micros()).sum();
    assert_eq!(earned, claimed);
    assert_eq!(snapshot.claims.len(), 1);

    let report = ReportData::build(&ledger).unwrap();
    assert_eq!(report.totals.accounts, 2);
    assert_eq!(report.totals.total_earned, units(10));
    assert_eq!(report.totals.pending_commission, units(5));
    assert_eq!(report.unsettled_claims.len(), 1);
    assert_eq!(report.leaderboard.len(), 2);
}

#[tokio::test]
async fn referral_scenario_through_api() {
    let api = ReferralApi::new(memory_ledger());
    let view = api.referral(ALICE).await.unwrap();
    assert_eq!(view.code, "AAAAAAAA");
    assert_eq!(view.link, "http://localhost:8080/terminal?ref=AAAAAAAA");
    assert_eq!(view.pending_commissions, "0.0000");
    assert_eq!(view.wealth_velocity, "0.00%");

    let linked = api
        .link(&LinkRequest {
            address: BOB.into(),
            code: view.code.clone(),
        })
        .await
        .unwrap();
    assert!(linked.success);
    assert!(!linked.already_linked);

    api.record_volume(&VolumeRequest {
        address: BOB.into(),
        volume: VolumeInput::Text("100".into()),
    })
    .await
    .unwrap();

    assert_eq!(
        api.ledger().referrer_of(BOB).unwrap(),
        Some(AddressKey::parse(ALICE).unwrap())
    );
    let view = api.referral(ALICE).await.unwrap();
    assert_eq!(view.pending_commissions, "10.0000");
    assert_eq!(view.total_volume, "100.00");
    assert_eq!(view.referrals, 1);
    assert_eq!(view.wealth_velocity, "10.00%");

    let claim = api
        .claim(&ClaimRequest {
            address: ALICE.into(),
        })
        .await
        .unwrap();
    assert!(claim.success);
    assert_eq!(claim.amount, 10.0);

    let repeat = api
        .claim(&ClaimRequest {
            address: ALICE.into(),
        })
        .await
        .unwrap_err();
    assert_eq!(repeat.status, 400);
    assert_eq!(repeat.body.kind, "NothingToClaim");
    assert!(!repeat.body.success);

    let view = api.referral(ALICE).await.unwrap();
    assert_eq!(view.total_earned, "10.0000");
    assert_eq!(view.pending_commissions, "0.0000");
}

#[tokio::test]
async fn credits_endpoint_reports_baseline_for_unknown() {
    let api = ReferralApi::new(memory_ledger());
    let credits = api.credits(&addr('f')).await.unwrap();
    assert_eq!(credits.credits, 0);
    assert_eq!(credits.multiplier, 1.0);
    assert_eq!(credits.tier, "Bronze");
    assert!(api.ledger().account(&addr('f')).unwrap().is_none());

    let err = api.credits("garbage").await.unwrap_err();
    assert_eq!(err.status, 400);
}

#[tokio::test]
async fn leaderboard_returns_top_three_in_order() {
    let ledger = memory_ledger();
    let referrers = ['1', '2', '3', '4', '5'];
    let referees = ['a', 'b', 'c', 'd', 'e'];
    for (i, (r, e)) in referrers.iter().zip(referees.iter()).enumerate() {
        let (r, e) = (addr(*r), addr(*e));
        ledger.register(&r).await.unwrap();
        ledger.link_referrer(&e, &code(&r)).await.unwrap();
        ledger
            .record_volume(&e, units((i as u64 + 1) * 10))
            .await
            .unwrap();
    }

    let top = ledger.leaderboard(3).unwrap();
    let order: Vec<String> = top.iter().map(|s| s.address.to_string()).collect();
    assert_eq!(order, vec![addr('5'), addr('4'), addr('3')]);
    assert_eq!(top[0].credit_score, 150);
    assert_eq!(top[2].credit_score, 130);
    assert_eq!(top.iter().map(|s| s.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(ledger.leaderboard(3).unwrap(), top);
}

#[tokio::test]
async fn sqlite_ledger_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.sqlite");
    let (a, b) = (addr('a'), addr('b'));
    {
        let store = SqliteStore::open(&path, Duration::from_secs(2)).unwrap();
        let ledger = Ledger::new(Arc::new(store), LedgerConfig::default());
        ledger.register(&a).await.unwrap();
        ledger.link_referrer(&b, &code(&a)).await.unwrap();
        ledger.record_volume(&b, units(100)).await.unwrap();
        ledger.claim(&a).await.unwrap();
        ledger.record_volume(&b, units(20)).await.unwrap();
    }
    let store = SqliteStore::open(&path, Duration::from_secs(2)).unwrap();
    let ledger = Ledger::new(Arc::new(store), LedgerConfig::default());
    let account = ledger.account(&a).unwrap().unwrap();
    assert_eq!(account.total_earned, units(10));
    assert_eq!(account.pending_commission, units(2));
    assert_eq!(account.referral_count, 1);
    assert_eq!(
        ledger.referrer_of(&b).unwrap(),
        Some(AddressKey::parse(&a).unwrap())
    );
    assert_eq!(ledger.claims(&ClaimFilter::default()).unwrap().len(), 1);
    assert_eq!(
        ledger.resolve_referrer(&code(&a)).unwrap(),
        AddressKey::parse(&a).unwrap()
    );
}

/// Delegates to a `MemoryStore` but fails the first `failures` transactions.
struct FlakyStore {
    inner: MemoryStore,
    failures: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl LedgerStore for FlakyStore {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError> {
        self.inner.load(address)
    }

    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.find_by_code(code)
    }

    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        self.inner.accounts()
    }

    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Poisoned("injected".into()).into());
        }
        self.inner.transact(keys, apply)
    }

    fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
        self.inner.claims(filter)
    }

    fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        self.inner.snapshot()
    }

    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError> {
        self.inner.settle_claim(id, settlement_ref, at)
    }
}

fn flaky_api(failures: usize) -> ReferralApi {
    let config = LedgerConfig {
        retry_backoff_ms: 1,
        max_retries: 3,
        ..LedgerConfig::default()
    };
    ReferralApi::new(Arc::new(Ledger::new(
        Arc::new(FlakyStore::new(failures)),
        config,
    )))
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let api = flaky_api(2);
    let linked = api
        .link(&LinkRequest {
            address: BOB.into(),
            code: ALICE.into(),
        })
        .await
        .unwrap();
    assert!(linked.success);
    assert_eq!(linked.referrer, AddressKey::parse(ALICE).unwrap().to_string());
}

#[tokio::test]
async fn persistent_store_failure_surfaces_as_unavailable() {
    let api = flaky_api(10);
    let err = api
        .link(&LinkRequest {
            address: BOB.into(),
            code: ALICE.into(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status, 503);
    assert_eq!(err.body.kind, "StoreUnavailable");
    assert_eq!(api.ledger().referrer_of(BOB).unwrap(), None);
}

struct RecordingSink {
    fail: bool,
    seen: Mutex<Vec<u64>>,
}

impl PayoutSink for RecordingSink {
    fn transfer(&self, claim: &ClaimRecord) -> Result<String, PayoutError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(claim.id);
        }
        if self.fail {
            return Err(PayoutError("bridge offline".into()));
        }
        Ok(format!("tx-{}", claim.id))
    }
}

async fn api_with_pending(sink: Arc<RecordingSink>) -> ReferralApi {
    let api = ReferralApi::new(memory_ledger()).with_payout(sink);
    let ledger = api.ledger();
    ledger.register(ALICE).await.unwrap();
    ledger.link_referrer(BOB, ALICE).await.unwrap();
    ledger.record_volume(BOB, units(100)).await.unwrap();
    api
}

#[tokio::test]
async fn successful_payout_settles_claim() {
    let sink = Arc::new(RecordingSink {
        fail: false,
        seen: Mutex::new(Vec::new()),
    });
    let api = api_with_pending(Arc::clone(&sink)).await;
    let claimed = api
        .claim(&ClaimRequest {
            address: ALICE.into(),
        })
        .await
        .unwrap();
    assert_eq!(claimed.amount, 10.0);

    let claims = api.ledger().claims(&ClaimFilter::default()).unwrap();
    assert_eq!(claims.len(), 1);
    assert!(claims[0].is_settled());
    assert_eq!(claims[0].settlement_ref.as_deref(), Some("tx-1"));
    assert_eq!(*sink.seen.lock().unwrap(), vec![claims[0].id]);
}

#[tokio::test]
async fn failed_payout_leaves_claim_for_manual_settlement() {
    let sink = Arc::new(RecordingSink {
        fail: true,
        seen: Mutex::new(Vec::new()),
    });
    let api = api_with_pending(sink).await;
    let claimed = api
        .claim(&ClaimRequest {
            address: ALICE.into(),
        })
        .await
        .unwrap();
    assert_eq!(claimed.amount, 10.0);

    let ledger = api.ledger();
    let unsettled = ledger
        .claims(&ClaimFilter {
            address: None,
            unsettled_only: true,
        })
        .unwrap();
    assert_eq!(unsettled.len(), 1);
    assert_eq!(
        ledger.account(ALICE).unwrap().unwrap().total_earned,
        units(10)
    );

    let settled = ledger.settle_claim(unsettled[0].id, "manual-42").unwrap();
    assert!(settled.is_settled());
    assert!(matches!(
        ledger.settle_claim(settled.id, "again"),
        Err(LedgerError::ClaimAlreadySettled(_))
    ));
    assert!(matches!(
        ledger.settle_claim(999, "nope"),
        Err(LedgerError::UnknownClaim(_))
    ));
    assert_eq!(
        ledger.account(ALICE).unwrap().unwrap().total_earned,
        units(10)
    );
}

#[tokio::test]
async fn snapshot_hash_tracks_ledger_state() {
    let ledger = memory_ledger();
    ledger.register(ALICE).await.unwrap();
    ledger.link_referrer(BOB, ALICE).await.unwrap();

    let snapshot = LedgerSnapshot::capture(&ledger).unwrap();
    assert_eq!(snapshot.accounts.len(), 2);
    let hash = snapshot_hash(&snapshot).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    std::fs::write(&path, serde_json::to_string_pretty(&snapshot).unwrap()).unwrap();
    let reloaded = LedgerSnapshot::load(&path).unwrap();
    assert_eq!(snapshot_hash(&reloaded).unwrap(), hash);
}
