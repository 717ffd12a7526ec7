//! SQLite backend for the core storage contracts.
//!
//! One connection behind a mutex; every compound write runs in an immediate
//! transaction on that connection, which is the per-run serialization point
//! the engine's guarded-write contracts assume. Async callers (the expiry
//! sweep) wrap calls in `tokio::task::spawn_blocking`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use muster_core::keypop::KeyPopSnapshot;
use muster_core::roster::{ParticipantEntry, ParticipantState};
use muster_core::settlement::{CreditEntry, OrganizerCreditEvent, SettlementRecord};
use muster_core::store::{AttributionStore, RosterStore, RunStore, StoreError};
use muster_core::{Run, RunId, RunStatus};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id                TEXT PRIMARY KEY,
    guild_id              TEXT NOT NULL,
    organizer_id          TEXT NOT NULL,
    activity_key          TEXT NOT NULL,
    status                TEXT NOT NULL,
    key_pop_count         INTEGER NOT NULL DEFAULT 0,
    key_window_ends_at_ms INTEGER,
    chain_amount          INTEGER,
    party                 TEXT,
    location              TEXT,
    description           TEXT,
    auto_end_minutes      INTEGER NOT NULL,
    created_at_ms         INTEGER NOT NULL,
    started_at_ms         INTEGER,
    ended_at_ms           INTEGER
);
CREATE INDEX IF NOT EXISTS idx_runs_guild_status ON runs (guild_id, status);

CREATE TABLE IF NOT EXISTS participants (
    run_id        TEXT NOT NULL,
    user_id       TEXT NOT NULL,
    state         TEXT NOT NULL,
    attribute     TEXT,
    updated_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, user_id)
);

CREATE TABLE IF NOT EXISTS offers (
    run_id     TEXT NOT NULL,
    user_id    TEXT NOT NULL,
    offer_type TEXT NOT NULL,
    enabled    INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (run_id, user_id, offer_type)
);

CREATE TABLE IF NOT EXISTS key_pop_snapshots (
    run_id         TEXT NOT NULL,
    pop_number     INTEGER NOT NULL,
    user_ids       TEXT NOT NULL,
    captured_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, pop_number)
);

CREATE TABLE IF NOT EXISTS settlement_records (
    run_id        TEXT NOT NULL,
    pop_number    INTEGER NOT NULL,
    settled_at_ms INTEGER NOT NULL,
    PRIMARY KEY (run_id, pop_number)
);

CREATE TABLE IF NOT EXISTS credit_entries (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id        TEXT NOT NULL,
    pop_number    INTEGER NOT NULL,
    user_id       TEXT NOT NULL,
    points        INTEGER NOT NULL,
    settled_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_credit_entries_run ON credit_entries (run_id);

CREATE TABLE IF NOT EXISTS organizer_events (
    event_id      TEXT PRIMARY KEY,
    run_id        TEXT NOT NULL,
    pop_number    INTEGER,
    organizer_id  TEXT NOT NULL,
    event_type    TEXT NOT NULL,
    payload       TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_organizer_events_run ON organizer_events (run_id);
";

/// SQLite-backed store implementing all core storage contracts.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and applies the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns a backend failure if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns a backend failure if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl RunStore for SqliteStore {
    fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO runs (
                 run_id, guild_id, organizer_id, activity_key, status,
                 key_pop_count, key_window_ends_at_ms, chain_amount, party,
                 location, description, auto_end_minutes, created_at_ms,
                 started_at_ms, ended_at_ms
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                run.run_id.as_str(),
                run.guild_id,
                run.organizer_id,
                run.activity_key,
                run.status.as_str(),
                i64::from(run.key_pop_count),
                run.key_window_ends_at_ms.map(to_sql_ms),
                run.chain_amount.map(i64::from),
                run.party,
                run.location,
                run.description,
                i64::from(run.auto_end_minutes),
                to_sql_ms(run.created_at_ms),
                run.started_at_ms.map(to_sql_ms),
                run.ended_at_ms.map(to_sql_ms),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::Conflict {
                    key: format!("run {}", run.run_id),
                })
            },
            Err(err) => Err(backend(err)),
        }
    }

    fn get_run(&self, run_id: &RunId) -> Result<Option<Run>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("{RUN_SELECT} WHERE run_id = ?1"),
            params![run_id.as_str()],
            row_to_run,
        )
        .optional()
        .map_err(backend)
    }

    fn update_run_guarded(
        &self,
        run: &Run,
        expected_status: RunStatus,
        expected_pop_count: u32,
    ) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE runs SET
                     status = ?1,
                     key_pop_count = ?2,
                     key_window_ends_at_ms = ?3,
                     chain_amount = ?4,
                     party = ?5,
                     location = ?6,
                     description = ?7,
                     started_at_ms = ?8,
                     ended_at_ms = ?9
                 WHERE run_id = ?10 AND status = ?11 AND key_pop_count = ?12",
                params![
                    run.status.as_str(),
                    i64::from(run.key_pop_count),
                    run.key_window_ends_at_ms.map(to_sql_ms),
                    run.chain_amount.map(i64::from),
                    run.party,
                    run.location,
                    run.description,
                    run.started_at_ms.map(to_sql_ms),
                    run.ended_at_ms.map(to_sql_ms),
                    run.run_id.as_str(),
                    expected_status.as_str(),
                    i64::from(expected_pop_count),
                ],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    fn list_expired(&self, now_ms: u64) -> Result<Vec<Run>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{RUN_SELECT}
                 WHERE status != 'ended'
                   AND (created_at_ms + auto_end_minutes * 60000) <= ?1
                 ORDER BY created_at_ms ASC"
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![to_sql_ms(now_ms)], row_to_run)
            .map_err(backend)?;
        collect_rows(rows)
    }

    fn list_active(&self, guild_id: &str) -> Result<Vec<Run>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "{RUN_SELECT}
                 WHERE status != 'ended' AND guild_id = ?1
                 ORDER BY created_at_ms ASC"
            ))
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![guild_id], row_to_run)
            .map_err(backend)?;
        collect_rows(rows)
    }
}

impl RosterStore for SqliteStore {
    fn upsert_joined(
        &self,
        run_id: &RunId,
        user_id: &str,
        attribute: Option<&str>,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        if !run_accepts_writes(&tx, run_id)? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO participants (run_id, user_id, state, attribute, updated_at_ms)
             VALUES (?1, ?2, 'joined', ?3, ?4)
             ON CONFLICT (run_id, user_id) DO UPDATE SET
                 state = 'joined',
                 attribute = COALESCE(excluded.attribute, participants.attribute),
                 updated_at_ms = excluded.updated_at_ms",
            params![run_id.as_str(), user_id, attribute, to_sql_ms(now_ms)],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(true)
    }

    fn mark_left(&self, run_id: &RunId, user_id: &str, now_ms: u64) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        if !run_accepts_writes(&tx, run_id)? {
            return Ok(false);
        }
        tx.execute(
            "UPDATE participants SET state = 'left', updated_at_ms = ?1
             WHERE run_id = ?2 AND user_id = ?3",
            params![to_sql_ms(now_ms), run_id.as_str(), user_id],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(true)
    }

    fn toggle_offer(
        &self,
        run_id: &RunId,
        user_id: &str,
        offer_type: &str,
    ) -> Result<Option<bool>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        if !run_accepts_writes(&tx, run_id)? {
            return Ok(None);
        }
        tx.execute(
            "INSERT INTO offers (run_id, user_id, offer_type, enabled)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT (run_id, user_id, offer_type) DO UPDATE SET
                 enabled = 1 - offers.enabled",
            params![run_id.as_str(), user_id, offer_type],
        )
        .map_err(backend)?;
        let enabled: bool = tx
            .query_row(
                "SELECT enabled FROM offers
                 WHERE run_id = ?1 AND user_id = ?2 AND offer_type = ?3",
                params![run_id.as_str(), user_id, offer_type],
                |row| row.get(0),
            )
            .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(Some(enabled))
    }

    fn get_participant(
        &self,
        run_id: &RunId,
        user_id: &str,
    ) -> Result<Option<ParticipantEntry>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT run_id, user_id, state, attribute, updated_at_ms
             FROM participants WHERE run_id = ?1 AND user_id = ?2",
            params![run_id.as_str(), user_id],
            row_to_participant,
        )
        .optional()
        .map_err(backend)
    }

    fn joined_users(&self, run_id: &RunId) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id FROM participants
                 WHERE run_id = ?1 AND state = 'joined'
                 ORDER BY user_id ASC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| row.get::<_, String>(0))
            .map_err(backend)?;
        collect_rows(rows)
    }

    fn counts_by_attribute(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, u32>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT attribute, COUNT(*) FROM participants
                 WHERE run_id = ?1 AND state = 'joined' AND attribute IS NOT NULL
                 GROUP BY attribute",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(backend)?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let (attribute, count) = row.map_err(backend)?;
            counts.insert(attribute, u32::try_from(count).unwrap_or(u32::MAX));
        }
        Ok(counts)
    }

    fn users_by_offer(
        &self,
        run_id: &RunId,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT offer_type, user_id FROM offers
                 WHERE run_id = ?1 AND enabled = 1
                 ORDER BY offer_type ASC, user_id ASC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(backend)?;
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (offer_type, user_id) = row.map_err(backend)?;
            grouped.entry(offer_type).or_default().push(user_id);
        }
        Ok(grouped)
    }
}

impl AttributionStore for SqliteStore {
    fn insert_snapshot(&self, snapshot: &KeyPopSnapshot) -> Result<bool, StoreError> {
        let user_ids = serde_json::to_string(&snapshot.user_ids).map_err(backend)?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO key_pop_snapshots
                     (run_id, pop_number, user_ids, captured_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    snapshot.run_id.as_str(),
                    i64::from(snapshot.pop_number),
                    user_ids,
                    to_sql_ms(snapshot.captured_at_ms),
                ],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    fn get_snapshot(
        &self,
        run_id: &RunId,
        pop_number: u32,
    ) -> Result<Option<KeyPopSnapshot>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT user_ids, captured_at_ms FROM key_pop_snapshots
                 WHERE run_id = ?1 AND pop_number = ?2",
                params![run_id.as_str(), i64::from(pop_number)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .map_err(backend)?;
        row.map(|(user_ids, captured_at_ms)| {
            let user_ids: Vec<String> = serde_json::from_str(&user_ids).map_err(backend)?;
            Ok(KeyPopSnapshot {
                run_id: run_id.clone(),
                pop_number,
                user_ids,
                captured_at_ms: from_sql_ms(captured_at_ms),
            })
        })
        .transpose()
    }

    fn settlement_exists(&self, run_id: &RunId, pop_number: u32) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM settlement_records
                           WHERE run_id = ?1 AND pop_number = ?2)",
            params![run_id.as_str(), i64::from(pop_number)],
            |row| row.get(0),
        )
        .map_err(backend)
    }

    fn settle_once(
        &self,
        record: &SettlementRecord,
        credits: &[CreditEntry],
        event: &OrganizerCreditEvent,
    ) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(&event.payload).map_err(backend)?;
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        let taken = tx
            .execute(
                "INSERT OR IGNORE INTO settlement_records
                     (run_id, pop_number, settled_at_ms)
                 VALUES (?1, ?2, ?3)",
                params![
                    record.run_id.as_str(),
                    i64::from(record.pop_number),
                    to_sql_ms(record.settled_at_ms),
                ],
            )
            .map_err(backend)?;
        if taken == 0 {
            // Another settlement won; nothing was written.
            return Ok(false);
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO credit_entries
                         (run_id, pop_number, user_id, points, settled_at_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(backend)?;
            for credit in credits {
                stmt.execute(params![
                    credit.run_id.as_str(),
                    i64::from(credit.pop_number),
                    credit.user_id,
                    i64::from(credit.points),
                    to_sql_ms(credit.settled_at_ms),
                ])
                .map_err(backend)?;
            }
        }

        tx.execute(
            "INSERT OR IGNORE INTO organizer_events
                 (event_id, run_id, pop_number, organizer_id, event_type,
                  payload, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                event.run_id.as_str(),
                event.pop_number.map(i64::from),
                event.organizer_id,
                event.event_type,
                payload,
                to_sql_ms(event.created_at_ms),
            ],
        )
        .map_err(backend)?;

        tx.commit().map_err(backend)?;
        Ok(true)
    }

    fn append_organizer_event(&self, event: &OrganizerCreditEvent) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(&event.payload).map_err(backend)?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "INSERT OR IGNORE INTO organizer_events
                     (event_id, run_id, pop_number, organizer_id, event_type,
                      payload, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.event_id,
                    event.run_id.as_str(),
                    event.pop_number.map(i64::from),
                    event.organizer_id,
                    event.event_type,
                    payload,
                    to_sql_ms(event.created_at_ms),
                ],
            )
            .map_err(backend)?;
        Ok(changed > 0)
    }

    fn credits_for_run(&self, run_id: &RunId) -> Result<Vec<CreditEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT run_id, pop_number, user_id, points, settled_at_ms
                 FROM credit_entries WHERE run_id = ?1 ORDER BY id ASC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok(CreditEntry {
                    run_id: RunId::from_raw(row.get::<_, String>(0)?),
                    pop_number: sql_to_u32(row.get::<_, i64>(1)?),
                    user_id: row.get(2)?,
                    points: sql_to_u32(row.get::<_, i64>(3)?),
                    settled_at_ms: from_sql_ms(row.get::<_, i64>(4)?),
                })
            })
            .map_err(backend)?;
        collect_rows(rows)
    }

    fn organizer_events_for_run(
        &self,
        run_id: &RunId,
    ) -> Result<Vec<OrganizerCreditEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT event_id, run_id, pop_number, organizer_id, event_type,
                        payload, created_at_ms
                 FROM organizer_events WHERE run_id = ?1 ORDER BY created_at_ms ASC, event_id ASC",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![run_id.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })
            .map_err(backend)?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, run_id, pop_number, organizer_id, event_type, payload, created_at) =
                row.map_err(backend)?;
            events.push(OrganizerCreditEvent {
                event_id,
                run_id: RunId::from_raw(run_id),
                pop_number: pop_number.map(sql_to_u32),
                organizer_id,
                event_type,
                payload: serde_json::from_str(&payload).map_err(backend)?,
                created_at_ms: from_sql_ms(created_at),
            });
        }
        Ok(events)
    }
}

const RUN_SELECT: &str = "SELECT run_id, guild_id, organizer_id, activity_key, status,
       key_pop_count, key_window_ends_at_ms, chain_amount, party, location,
       description, auto_end_minutes, created_at_ms, started_at_ms, ended_at_ms
 FROM runs";

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status_raw: String = row.get(4)?;
    let status = RunStatus::parse(&status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown run status '{status_raw}'").into(),
        )
    })?;
    Ok(Run {
        run_id: RunId::from_raw(row.get::<_, String>(0)?),
        guild_id: row.get(1)?,
        organizer_id: row.get(2)?,
        activity_key: row.get(3)?,
        status,
        key_pop_count: sql_to_u32(row.get::<_, i64>(5)?),
        key_window_ends_at_ms: row.get::<_, Option<i64>>(6)?.map(from_sql_ms),
        chain_amount: row.get::<_, Option<i64>>(7)?.map(sql_to_u32),
        party: row.get(8)?,
        location: row.get(9)?,
        description: row.get(10)?,
        auto_end_minutes: sql_to_u32(row.get::<_, i64>(11)?),
        created_at_ms: from_sql_ms(row.get::<_, i64>(12)?),
        started_at_ms: row.get::<_, Option<i64>>(13)?.map(from_sql_ms),
        ended_at_ms: row.get::<_, Option<i64>>(14)?.map(from_sql_ms),
    })
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<ParticipantEntry> {
    let state_raw: String = row.get(2)?;
    let state = ParticipantState::parse(&state_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown participant state '{state_raw}'").into(),
        )
    })?;
    Ok(ParticipantEntry {
        run_id: RunId::from_raw(row.get::<_, String>(0)?),
        user_id: row.get(1)?,
        state,
        attribute: row.get(3)?,
        updated_at_ms: from_sql_ms(row.get::<_, i64>(4)?),
    })
}

/// True when the run row exists and is not ended, read inside the caller's
/// transaction so the check and the dependent write are one unit.
fn run_accepts_writes(
    tx: &rusqlite::Transaction<'_>,
    run_id: &RunId,
) -> Result<bool, StoreError> {
    let status: Option<String> = tx
        .query_row(
            "SELECT status FROM runs WHERE run_id = ?1",
            params![run_id.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(backend)?;
    Ok(status.is_some_and(|s| s != RunStatus::Ended.as_str()))
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(backend)?);
    }
    Ok(out)
}

fn backend<E: std::fmt::Display>(err: E) -> StoreError {
    StoreError::Backend {
        message: err.to_string(),
    }
}

fn to_sql_ms(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_ms(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn sql_to_u32(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
