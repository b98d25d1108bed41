//! SQLite-backed durable ledger store.

use crate::account::{AccountRecord, AddressKey, Amount, ClaimRecord, ReferralCode};
use crate::error::LedgerError;
use crate::store::{
    now_utc_seconds, ApplyFn, Batch, ClaimFilter, LedgerStore, NewClaim, StoreError,
    StoreSnapshot,
};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::debug;

const ACCOUNT_COLUMNS: &str = "address, referrer, referral_count, total_volume_referred, \
     pending_commission, total_earned, seq, created_utc";
const CLAIM_COLUMNS: &str = "id, address, amount, claimed_utc, settled_utc, settlement_ref";
/// Poll interval while another caller holds the connection.
const CONN_POLL: Duration = Duration::from_millis(2);

/// Ledger persisted in a single SQLite file. Writers use `BEGIN IMMEDIATE` so a
/// batch is applied in one serialized transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    /// Bounds the wait for both the in-process connection and the database lock.
    busy_timeout: Duration,
}

impl SqliteStore {
    /// Open or create the ledger at `path`. Creates parent dirs if needed.
    /// `busy_timeout` bounds how long a writer waits for the database lock.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        Self::init(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                address TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                referrer TEXT,
                referral_count INTEGER NOT NULL DEFAULT 0,
                total_volume_referred INTEGER NOT NULL DEFAULT 0,
                pending_commission INTEGER NOT NULL DEFAULT 0,
                total_earned INTEGER NOT NULL DEFAULT 0,
                seq INTEGER NOT NULL UNIQUE,
                created_utc INTEGER NOT NULL,
                CHECK (pending_commission >= 0),
                CHECK (referrer IS NULL OR referrer <> address)
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_code ON accounts(code);
            CREATE TABLE IF NOT EXISTS claims (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                address TEXT NOT NULL,
                amount INTEGER NOT NULL,
                claimed_utc INTEGER NOT NULL,
                settled_utc INTEGER,
                settlement_ref TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_claims_address ON claims(address);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            busy_timeout,
        })
    }

    /// Take the connection, giving up with `Busy` after `busy_timeout`.
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let deadline = Instant::now() + self.busy_timeout;
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(e)) => return Err(StoreError::Poisoned(e.to_string())),
                Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                    std::thread::sleep(CONN_POLL);
                }
                Err(TryLockError::WouldBlock) => {
                    return Err(StoreError::Busy(format!(
                        "connection held longer than {:?}",
                        self.busy_timeout
                    )))
                }
            }
        }
    }

    fn write_batch(
        tx: &Transaction<'_>,
        accounts: Vec<AccountRecord>,
        new_claims: Vec<NewClaim>,
        now: OffsetDateTime,
    ) -> Result<Vec<ClaimRecord>, StoreError> {
        let mut next_seq: i64 =
            tx.query_row("SELECT COALESCE(MAX(seq), 0) FROM accounts", [], |r| {
                r.get(0)
            })?;
        for mut record in accounts {
            if !record.is_persisted() {
                next_seq += 1;
                record.seq = to_u64(next_seq)?;
            }
            upsert_account(tx, &record)?;
        }
        let mut written = Vec::with_capacity(new_claims.len());
        for claim in new_claims {
            tx.execute(
                "INSERT INTO claims (address, amount, claimed_utc) VALUES (?1, ?2, ?3)",
                params![
                    claim.address.as_str(),
                    to_i64(claim.amount.micros())?,
                    now.unix_timestamp()
                ],
            )?;
            written.push(ClaimRecord {
                id: to_u64(tx.last_insert_rowid())?,
                address: claim.address,
                amount: claim.amount,
                claimed_at: now,
                settled_at: None,
                settlement_ref: None,
            });
        }
        Ok(written)
    }
}

impl LedgerStore for SqliteStore {
    fn load(&self, address: &AddressKey) -> Result<Option<AccountRecord>, StoreError> {
        let conn = self.conn()?;
        select_account(&conn, address)
    }

    fn find_by_code(&self, code: &ReferralCode) -> Result<Vec<AccountRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE code = ?1 ORDER BY seq"
        ))?;
        let mut found = Vec::new();
        for row in stmt.query_map([code.as_str()], raw_account)? {
            found.push(decode_account(row?)?);
        }
        Ok(found)
    }

    fn accounts(&self) -> Result<Vec<AccountRecord>, StoreError> {
        let conn = self.conn()?;
        select_accounts(&conn)
    }

    fn transact(
        &self,
        keys: &[AddressKey],
        apply: &mut ApplyFn<'_>,
    ) -> Result<Vec<ClaimRecord>, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let now = now_utc_seconds();
        let mut batch = Batch::new(now);
        for key in keys {
            let record = select_account(&tx, key)?
                .unwrap_or_else(|| AccountRecord::new(key.clone(), now.unix_timestamp()));
            batch.stage(record);
        }
        // Dropping `tx` on error rolls the transaction back.
        apply(&mut batch)?;
        let (accounts, new_claims) = batch.into_parts();
        let written = Self::write_batch(&tx, accounts, new_claims, now)?;
        tx.commit().map_err(StoreError::from)?;
        debug!(keys = keys.len(), claims = written.len(), "batch committed");
        Ok(written)
    }

    fn claims(&self, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
        let conn = self.conn()?;
        select_claims(&conn, filter)
    }

    fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let mut conn = self.conn()?;
        // One read transaction: WAL readers see a single committed state throughout.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let accounts = select_accounts(&tx)?;
        let claims = select_claims(&tx, &ClaimFilter::default())?;
        tx.commit()?;
        Ok(StoreSnapshot { accounts, claims })
    }

    fn settle_claim(
        &self,
        id: u64,
        settlement_ref: &str,
        at: OffsetDateTime,
    ) -> Result<ClaimRecord, LedgerError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let raw = tx
            .query_row(
                &format!("SELECT {CLAIM_COLUMNS} FROM claims WHERE id = ?1"),
                [to_i64(id)?],
                raw_claim,
            )
            .optional()
            .map_err(StoreError::from)?
            .ok_or(LedgerError::UnknownClaim(id))?;
        let mut claim = decode_claim(raw)?;
        if claim.is_settled() {
            return Err(LedgerError::ClaimAlreadySettled(id));
        }
        tx.execute(
            "UPDATE claims SET settled_utc = ?1, settlement_ref = ?2 WHERE id = ?3",
            params![at.unix_timestamp(), settlement_ref, to_i64(id)?],
        )
        .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        claim.settled_at = Some(at);
        claim.settlement_ref = Some(settlement_ref.to_string());
        Ok(claim)
    }
}

type RawAccount = (String, Option<String>, i64, i64, i64, i64, i64, i64);
type RawClaim = (i64, String, i64, i64, Option<i64>, Option<String>);

fn raw_account(r: &Row<'_>) -> rusqlite::Result<RawAccount> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
        r.get(6)?,
        r.get(7)?,
    ))
}

fn raw_claim(r: &Row<'_>) -> rusqlite::Result<RawClaim> {
    Ok((
        r.get(0)?,
        r.get(1)?,
        r.get(2)?,
        r.get(3)?,
        r.get(4)?,
        r.get(5)?,
    ))
}

fn select_accounts(conn: &Connection) -> Result<Vec<AccountRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY seq"
    ))?;
    let mut all = Vec::new();
    for row in stmt.query_map([], raw_account)? {
        all.push(decode_account(row?)?);
    }
    Ok(all)
}

fn select_claims(conn: &Connection, filter: &ClaimFilter) -> Result<Vec<ClaimRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLAIM_COLUMNS} FROM claims \
         WHERE (?1 IS NULL OR address = ?1) AND (?2 = 0 OR settled_utc IS NULL) \
         ORDER BY id"
    ))?;
    let address = filter.address.as_ref().map(|a| a.as_str().to_string());
    let mut claims = Vec::new();
    for row in stmt.query_map(params![address, filter.unsettled_only], raw_claim)? {
        claims.push(decode_claim(row?)?);
    }
    Ok(claims)
}

fn select_account(
    conn: &Connection,
    address: &AddressKey,
) -> Result<Option<AccountRecord>, StoreError> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE address = ?1"),
        [address.as_str()],
        raw_account,
    )
    .optional()?
    .map(decode_account)
    .transpose()
}

fn upsert_account(tx: &Transaction<'_>, a: &AccountRecord) -> Result<(), StoreError> {
    tx.execute(
        r#"
        INSERT INTO accounts (address, code, referrer, referral_count, total_volume_referred,
                              pending_commission, total_earned, seq, created_utc)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(address) DO UPDATE SET
            referrer = excluded.referrer,
            referral_count = excluded.referral_count,
            total_volume_referred = excluded.total_volume_referred,
            pending_commission = excluded.pending_commission,
            total_earned = excluded.total_earned
        "#,
        params![
            a.address.as_str(),
            a.address.referral_code().as_str(),
            a.referrer.as_ref().map(|r| r.as_str()),
            to_i64(a.referral_count)?,
            to_i64(a.total_volume_referred.micros())?,
            to_i64(a.pending_commission.micros())?,
            to_i64(a.total_earned.micros())?,
            to_i64(a.seq)?,
            a.created_utc,
        ],
    )?;
    Ok(())
}

fn decode_account(raw: RawAccount) -> Result<AccountRecord, StoreError> {
    let (address, referrer, count, volume, pending, earned, seq, created_utc) = raw;
    Ok(AccountRecord {
        address: parse_key(&address)?,
        referrer: referrer.as_deref().map(parse_key).transpose()?,
        referral_count: to_u64(count)?,
        total_volume_referred: Amount::from_micros(to_u64(volume)?),
        pending_commission: Amount::from_micros(to_u64(pending)?),
        total_earned: Amount::from_micros(to_u64(earned)?),
        seq: to_u64(seq)?,
        created_utc,
    })
}

fn decode_claim(raw: RawClaim) -> Result<ClaimRecord, StoreError> {
    let (id, address, amount, claimed_utc, settled_utc, settlement_ref) = raw;
    Ok(ClaimRecord {
        id: to_u64(id)?,
        address: parse_key(&address)?,
        amount: Amount::from_micros(to_u64(amount)?),
        claimed_at: to_time(claimed_utc)?,
        settled_at: settled_utc.map(to_time).transpose()?,
        settlement_ref,
    })
}

fn parse_key(s: &str) -> Result<AddressKey, StoreError> {
    AddressKey::parse(s).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn to_i64(v: u64) -> Result<i64, StoreError> {
    i64::try_from(v).map_err(|_| StoreError::Corrupt(format!("{v} exceeds i64")))
}

fn to_u64(v: i64) -> Result<u64, StoreError> {
    u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative value {v}")))
}

fn to_time(ts: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|e| StoreError::Corrupt(e.to_string()))
}
