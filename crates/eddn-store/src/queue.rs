use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use eddn_core::ids::EntryId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Queue entry lifecycle. Delivered and permanently rejected entries are
/// deleted rather than kept in a terminal state, so the table only ever
/// holds work that is owed to the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryState {
    Pending,
    Inflight,
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntryState::Pending => "pending",
            EntryState::Inflight => "inflight",
        })
    }
}

impl std::str::FromStr for EntryState {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryState::Pending),
            "inflight" => Ok(EntryState::Inflight),
            _ => Err(()),
        }
    }
}

/// A persisted delivery. Survives process restarts; removed only on
/// confirmed delivery, permanent rejection, retry-budget exhaustion or
/// shedding.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub id: EntryId,
    pub schema_ref: String,
    pub body: Value,
    pub state: EntryState,
    pub enqueued_at: String,
    pub attempts: u32,
    pub next_retry_at: String,
}

pub struct QueueRepo {
    db: Database,
}

impl QueueRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new pending entry, eligible for delivery immediately.
    #[instrument(skip(self, body), fields(schema_ref = %schema_ref))]
    pub fn enqueue(
        &self,
        schema_ref: &str,
        body: &Value,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, StoreError> {
        let id = EntryId::new();
        let ts = now.to_rfc3339();
        let body_str = serde_json::to_string(body)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue (id, schema_ref, body, state, enqueued_at, attempts, next_retry_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, 0, ?4)",
                rusqlite::params![id.as_str(), schema_ref, body_str, ts],
            )?;
            Ok(())
        })?;

        Ok(QueueEntry {
            id,
            schema_ref: schema_ref.to_string(),
            body: body.clone(),
            state: EntryState::Pending,
            enqueued_at: ts.clone(),
            attempts: 0,
            next_retry_at: ts,
        })
    }

    /// Atomically claim the next due pending entry, moving it to inflight.
    /// Returns None when nothing is due yet.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<QueueEntry>, StoreError> {
        let ts = now.to_rfc3339();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, schema_ref, body, state, enqueued_at, attempts, next_retry_at
                 FROM queue WHERE state = 'pending' AND next_retry_at <= ?1
                 ORDER BY next_retry_at ASC, id ASC LIMIT 1",
            )?;
            let mut rows = stmt.query([ts.as_str()])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let mut entry = row_to_entry(row)?;
            drop(rows);
            drop(stmt);

            conn.execute(
                "UPDATE queue SET state = 'inflight' WHERE id = ?1",
                [entry.id.as_str()],
            )?;
            entry.state = EntryState::Inflight;
            Ok(Some(entry))
        })
    }

    /// Remove an entry on confirmed delivery or permanent rejection.
    pub fn delete(&self, id: &EntryId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM queue WHERE id = ?1", [id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("queue entry {id}")));
            }
            Ok(())
        })
    }

    /// Put a transiently failed entry back to pending with its new attempt
    /// count and earliest retry time.
    pub fn reschedule(
        &self,
        id: &EntryId,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE queue SET state = 'pending', attempts = ?2, next_retry_at = ?3
                 WHERE id = ?1",
                rusqlite::params![id.as_str(), attempts, next_retry_at.to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("queue entry {id}")));
            }
            Ok(())
        })
    }

    /// Flip stale inflight rows back to pending. Run once at startup so
    /// deliveries interrupted by a crash are picked up again.
    pub fn recover(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.execute("UPDATE queue SET state = 'pending' WHERE state = 'inflight'", [])?)
        })
    }

    /// Shed the oldest pending entries until the table holds at most
    /// `max_entries` rows. Returns how many were dropped.
    pub fn shed_oldest(&self, max_entries: u64) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let total: u64 =
                conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
            if total <= max_entries {
                return Ok(0);
            }
            let excess = total - max_entries;
            let shed = conn.execute(
                "DELETE FROM queue WHERE id IN (
                     SELECT id FROM queue WHERE state = 'pending'
                     ORDER BY enqueued_at ASC, id ASC LIMIT ?1
                 )",
                [excess],
            )?;
            Ok(shed)
        })
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?))
    }

    pub fn inflight_count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM queue WHERE state = 'inflight'",
                [],
                |row| row.get(0),
            )?)
        })
    }

    /// Entries that still need network work right now: anything inflight
    /// plus anything pending and due. Used by the shutdown flush to decide
    /// when the queue is drained.
    pub fn unsettled_count(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let ts = now.to_rfc3339();
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM queue
                 WHERE state = 'inflight' OR (state = 'pending' AND next_retry_at <= ?1)",
                [ts.as_str()],
                |row| row.get(0),
            )?)
        })
    }

    /// Time until the earliest pending entry becomes due, if any.
    pub fn next_due_in(&self, now: DateTime<Utc>) -> Result<Option<Duration>, StoreError> {
        let earliest: Option<String> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT MIN(next_retry_at) FROM queue WHERE state = 'pending'",
                    [],
                    |row| row.get(0),
                )
                .unwrap_or(None))
        })?;
        let Some(raw) = earliest else {
            return Ok(None);
        };
        let due = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| StoreError::CorruptRow {
                table: "queue",
                column: "next_retry_at",
                detail: e.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Some((due - now).to_std().unwrap_or(Duration::ZERO)))
    }

    /// List every entry, oldest first. Primarily a test and diagnostics
    /// surface.
    pub fn list(&self) -> Result<Vec<QueueEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, schema_ref, body, state, enqueued_at, attempts, next_retry_at
                 FROM queue ORDER BY enqueued_at ASC, id ASC",
            )?;
            let mut rows = stmt.query([])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<QueueEntry, StoreError> {
    let body_str: String = row_helpers::get(row, 2, "queue", "body")?;
    let body = row_helpers::parse_json(&body_str, "queue", "body")?;
    let state_str: String = row_helpers::get(row, 3, "queue", "state")?;
    let state = row_helpers::parse_enum(&state_str, "queue", "state")?;

    Ok(QueueEntry {
        id: EntryId::from_raw(row_helpers::get::<String>(row, 0, "queue", "id")?),
        schema_ref: row_helpers::get(row, 1, "queue", "schema_ref")?,
        body,
        state,
        enqueued_at: row_helpers::get(row, 4, "queue", "enqueued_at")?,
        attempts: row_helpers::get(row, 5, "queue", "attempts")?,
        next_retry_at: row_helpers::get(row, 6, "queue", "next_retry_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn repo() -> QueueRepo {
        QueueRepo::new(Database::in_memory().unwrap())
    }

    fn body(n: u64) -> Value {
        json!({"$schemaRef": "https://relay.example.net/schemas/journal/1", "message": {"n": n}})
    }

    #[test]
    fn enqueue_and_list() {
        let repo = repo();
        let now = Utc::now();
        let entry = repo
            .enqueue("https://relay.example.net/schemas/journal/1", &body(1), now)
            .unwrap();
        assert!(entry.id.as_str().starts_with("qe_"));
        assert_eq!(entry.state, EntryState::Pending);
        assert_eq!(entry.attempts, 0);

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body["message"]["n"], 1);
    }

    #[test]
    fn claim_due_marks_inflight() {
        let repo = repo();
        let now = Utc::now();
        repo.enqueue("ref", &body(1), now).unwrap();

        let claimed = repo.claim_due(now).unwrap().unwrap();
        assert_eq!(claimed.state, EntryState::Inflight);

        // Claimed entries are no longer visible to other workers.
        assert!(repo.claim_due(now).unwrap().is_none());
        assert_eq!(repo.inflight_count().unwrap(), 1);
    }

    #[test]
    fn claim_respects_retry_schedule() {
        let repo = repo();
        let now = Utc::now();
        let entry = repo.enqueue("ref", &body(1), now).unwrap();
        repo.reschedule(&entry.id, 1, now + ChronoDuration::seconds(60))
            .unwrap();

        assert!(repo.claim_due(now).unwrap().is_none());
        assert!(repo
            .claim_due(now + ChronoDuration::seconds(61))
            .unwrap()
            .is_some());
    }

    #[test]
    fn claim_order_is_earliest_due_first() {
        let repo = repo();
        let now = Utc::now();
        let a = repo.enqueue("ref", &body(1), now).unwrap();
        let b = repo.enqueue("ref", &body(2), now).unwrap();
        repo.reschedule(&a.id, 1, now + ChronoDuration::seconds(30))
            .unwrap();

        let first = repo.claim_due(now + ChronoDuration::seconds(60)).unwrap().unwrap();
        assert_eq!(first.id, b.id);
        let second = repo.claim_due(now + ChronoDuration::seconds(60)).unwrap().unwrap();
        assert_eq!(second.id, a.id);
    }

    #[test]
    fn delete_removes_entry() {
        let repo = repo();
        let now = Utc::now();
        let entry = repo.enqueue("ref", &body(1), now).unwrap();
        repo.delete(&entry.id).unwrap();
        assert_eq!(repo.count().unwrap(), 0);

        assert!(matches!(
            repo.delete(&entry.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn reschedule_increments_attempts() {
        let repo = repo();
        let now = Utc::now();
        let entry = repo.enqueue("ref", &body(1), now).unwrap();
        repo.claim_due(now).unwrap().unwrap();
        repo.reschedule(&entry.id, 3, now + ChronoDuration::seconds(120))
            .unwrap();

        let all = repo.list().unwrap();
        assert_eq!(all[0].state, EntryState::Pending);
        assert_eq!(all[0].attempts, 3);
    }

    #[test]
    fn recover_flips_inflight_back_to_pending() {
        let repo = repo();
        let now = Utc::now();
        repo.enqueue("ref", &body(1), now).unwrap();
        repo.enqueue("ref", &body(2), now).unwrap();
        repo.claim_due(now).unwrap().unwrap();

        assert_eq!(repo.recover().unwrap(), 1);
        assert_eq!(repo.inflight_count().unwrap(), 0);

        // Both claimable again.
        assert!(repo.claim_due(now).unwrap().is_some());
        assert!(repo.claim_due(now).unwrap().is_some());
    }

    #[test]
    fn shed_oldest_drops_down_to_bound() {
        let repo = repo();
        let mut now = Utc::now();
        for n in 0..5 {
            repo.enqueue("ref", &body(n), now).unwrap();
            now += ChronoDuration::seconds(1);
        }

        assert_eq!(repo.shed_oldest(3).unwrap(), 2);
        assert_eq!(repo.count().unwrap(), 3);

        // The survivors are the newest three.
        let remaining: Vec<u64> = repo
            .list()
            .unwrap()
            .iter()
            .map(|e| e.body["message"]["n"].as_u64().unwrap())
            .collect();
        assert_eq!(remaining, vec![2, 3, 4]);
    }

    #[test]
    fn shed_is_noop_under_bound() {
        let repo = repo();
        let now = Utc::now();
        repo.enqueue("ref", &body(1), now).unwrap();
        assert_eq!(repo.shed_oldest(10).unwrap(), 0);
    }

    #[test]
    fn unsettled_counts_due_and_inflight_only() {
        let repo = repo();
        let now = Utc::now();
        let a = repo.enqueue("ref", &body(1), now).unwrap();
        repo.enqueue("ref", &body(2), now).unwrap();
        repo.claim_due(now).unwrap().unwrap();

        // One inflight, one pending and due.
        assert_eq!(repo.unsettled_count(now).unwrap(), 2);

        // Push the pending one into the future; only inflight remains owed.
        repo.reschedule(&a.id, 1, now + ChronoDuration::seconds(600))
            .unwrap();
        let inflight_only = repo.unsettled_count(now).unwrap();
        assert_eq!(inflight_only, 1);
    }

    #[test]
    fn next_due_in_reports_earliest() {
        let repo = repo();
        let now = Utc::now();
        assert!(repo.next_due_in(now).unwrap().is_none());

        let entry = repo.enqueue("ref", &body(1), now).unwrap();
        repo.reschedule(&entry.id, 1, now + ChronoDuration::seconds(90))
            .unwrap();

        let wait = repo.next_due_in(now).unwrap().unwrap();
        assert!(wait > Duration::from_secs(85) && wait <= Duration::from_secs(90));

        // Already due reports zero, not negative.
        let wait = repo.next_due_in(now + ChronoDuration::seconds(600)).unwrap().unwrap();
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn queue_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("eddn-queue-test-{}", uuid::Uuid::now_v7()));
        let path = dir.join("queue.db");
        let now = Utc::now();

        {
            let repo = QueueRepo::new(Database::open(&path).unwrap());
            repo.enqueue("ref", &body(1), now).unwrap();
            repo.claim_due(now).unwrap().unwrap();
        }

        // Simulated restart: the interrupted delivery is still there and
        // recover makes it claimable again.
        let repo = QueueRepo::new(Database::open(&path).unwrap());
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.recover().unwrap(), 1);
        assert!(repo.claim_due(now).unwrap().is_some());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn malformed_body_returns_error_not_null() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO queue (id, schema_ref, body, state, enqueued_at, attempts, next_retry_at)
                 VALUES (?1, 'ref', 'not valid json', 'pending', ?2, 0, ?2)",
                rusqlite::params![EntryId::new().as_str(), Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .unwrap();

        let repo = QueueRepo::new(db);
        assert!(matches!(
            repo.list(),
            Err(StoreError::CorruptRow { table: "queue", column: "body", .. })
        ));
    }
}
