//! Append-only persistence for assessments and issued actions
//!
//! Only this module talks to the database. Rows are inserted, never updated
//! or deleted, so history can be replayed exactly.

use crate::assessment::RiskAssessment;
use crate::error::{CoreError, Result};
use crate::orchestrator::ActionInstance;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Persistence collaborator used by the engine
pub trait AssessmentStore: Send + Sync {
    fn append_assessment(&self, assessment: &RiskAssessment) -> Result<()>;

    /// Assessments of a zone computed at or after `since`, oldest first
    fn assessments_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<RiskAssessment>>;

    /// Record actions issued for a zone at `issued_at`
    fn record_actions(
        &self,
        zone_id: &str,
        actions: &[ActionInstance],
        issued_at: DateTime<Utc>,
    ) -> Result<()>;

    fn find_action(&self, zone_id: &str, instance_id: Uuid) -> Result<Option<ActionInstance>>;

    /// Actions issued for a zone at or after `since`, oldest first
    fn actions_issued_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<ActionInstance>>;

    /// Most recent assessment of a zone
    fn latest_assessment(&self, zone_id: &str) -> Result<Option<RiskAssessment>> {
        Ok(self
            .assessments_since(zone_id, DateTime::<Utc>::MIN_UTC)?
            .pop())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| CoreError::Store("store lock poisoned".to_string()))
}

fn timestamp(at: DateTime<Utc>) -> String {
    // fixed width so lexical order matches time order
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug)]
struct IssuedAction {
    zone_id: String,
    issued_at: DateTime<Utc>,
    action: ActionInstance,
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    assessments: Mutex<Vec<RiskAssessment>>,
    actions: Mutex<Vec<IssuedAction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssessmentStore for MemoryStore {
    fn append_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        lock(&self.assessments)?.push(assessment.clone());
        Ok(())
    }

    fn assessments_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<RiskAssessment>> {
        let mut found: Vec<RiskAssessment> = lock(&self.assessments)?
            .iter()
            .filter(|a| a.zone_id == zone_id && a.computed_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.computed_at);
        Ok(found)
    }

    fn record_actions(
        &self,
        zone_id: &str,
        actions: &[ActionInstance],
        issued_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut stored = lock(&self.actions)?;
        for action in actions {
            if stored.iter().any(|s| s.action.instance_id == action.instance_id) {
                return Err(CoreError::Store(format!(
                    "action instance {} already recorded",
                    action.instance_id
                )));
            }
        }
        stored.extend(actions.iter().map(|a| IssuedAction {
            zone_id: zone_id.to_string(),
            issued_at,
            action: a.clone(),
        }));
        Ok(())
    }

    fn find_action(&self, zone_id: &str, instance_id: Uuid) -> Result<Option<ActionInstance>> {
        Ok(lock(&self.actions)?
            .iter()
            .find(|s| s.zone_id == zone_id && s.action.instance_id == instance_id)
            .map(|s| s.action.clone()))
    }

    fn actions_issued_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<ActionInstance>> {
        let stored = lock(&self.actions)?;
        let mut found: Vec<&IssuedAction> = stored
            .iter()
            .filter(|s| s.zone_id == zone_id && s.issued_at >= since)
            .collect();
        found.sort_by_key(|s| s.issued_at);
        Ok(found.into_iter().map(|s| s.action.clone()).collect())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS assessment (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    zone_id     TEXT NOT NULL,
    computed_at TEXT NOT NULL,
    body        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS assessment_zone_time ON assessment (zone_id, computed_at);

CREATE TABLE IF NOT EXISTS action_instance (
    instance_id TEXT PRIMARY KEY,
    zone_id     TEXT NOT NULL,
    issued_at   TEXT NOT NULL,
    body        TEXT NOT NULL
);
";

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    /// In-memory database (used in tests)
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

impl AssessmentStore for SqliteStore {
    fn append_assessment(&self, assessment: &RiskAssessment) -> Result<()> {
        let body = serde_json::to_string(assessment)?;
        lock(&self.conn)?.execute(
            "INSERT INTO assessment (zone_id, computed_at, body) VALUES (?1, ?2, ?3)",
            params![assessment.zone_id, timestamp(assessment.computed_at), body],
        )?;
        Ok(())
    }

    fn assessments_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<RiskAssessment>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT body FROM assessment
             WHERE zone_id = ?1 AND computed_at >= ?2
             ORDER BY computed_at ASC, id ASC",
        )?;
        let bodies = stmt
            .query_map(params![zone_id, timestamp(since)], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(CoreError::from))
            .collect()
    }

    fn record_actions(
        &self,
        zone_id: &str,
        actions: &[ActionInstance],
        issued_at: DateTime<Utc>,
    ) -> Result<()> {
        let issued_at = timestamp(issued_at);
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        for action in actions {
            let body = serde_json::to_string(action)?;
            tx.execute(
                "INSERT INTO action_instance (instance_id, zone_id, issued_at, body)
                 VALUES (?1, ?2, ?3, ?4)",
                params![action.instance_id.to_string(), zone_id, issued_at, body],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn find_action(&self, zone_id: &str, instance_id: Uuid) -> Result<Option<ActionInstance>> {
        let body: Option<String> = lock(&self.conn)?
            .query_row(
                "SELECT body FROM action_instance WHERE instance_id = ?1 AND zone_id = ?2",
                params![instance_id.to_string(), zone_id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(CoreError::from))
            .transpose()
    }

    fn actions_issued_since(&self, zone_id: &str, since: DateTime<Utc>) -> Result<Vec<ActionInstance>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT body FROM action_instance
             WHERE zone_id = ?1 AND issued_at >= ?2
             ORDER BY issued_at ASC, rowid ASC",
        )?;
        let bodies = stmt
            .query_map(params![zone_id, timestamp(since)], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(CoreError::from))
            .collect()
    }

    fn latest_assessment(&self, zone_id: &str) -> Result<Option<RiskAssessment>> {
        let body: Option<String> = lock(&self.conn)?
            .query_row(
                "SELECT body FROM assessment WHERE zone_id = ?1
                 ORDER BY computed_at DESC, id DESC LIMIT 1",
                params![zone_id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(CoreError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::Method;
    use crate::catalog::Parameters;
    use crate::heuristics::HeuristicId;
    use crate::orchestrator::ExpectedEffect;
    use crate::trend::Trend;
    use chrono::{Duration, TimeZone};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 8, 0, 0).unwrap()
    }

    fn assessment(zone: &str, day: u32) -> RiskAssessment {
        RiskAssessment::new(zone, -1.2, Trend::Worsening, -0.01, at(day))
    }

    fn instance() -> ActionInstance {
        ActionInstance {
            instance_id: Uuid::new_v4(),
            action_code: "A09".to_string(),
            heuristic_id: HeuristicId::H4,
            title: "Outdoor irrigation ban".to_string(),
            parameters: Parameters::new(),
            justification: "test".to_string(),
            expected_effect: ExpectedEffect {
                days_gained: 19.0,
                confidence: 0.7,
                formula: "+19 days".to_string(),
            },
            duration_days: 30.0,
            method: Method::Fallback,
            fallback_reason: None,
            priority_score: 0.5,
        }
    }

    fn exercise(store: &dyn AssessmentStore) {
        for (zone, day) in [("north", 5), ("north", 1), ("south", 2), ("north", 3)] {
            store.append_assessment(&assessment(zone, day)).unwrap();
        }

        let history = store.assessments_since("north", at(2)).unwrap();
        let days: Vec<_> = history.iter().map(|a| a.computed_at).collect();
        assert_eq!(days, vec![at(3), at(5)]);
        assert_eq!(store.assessments_since("north", at(1) - Duration::days(1)).unwrap().len(), 3);
        assert!(store.assessments_since("east", at(1)).unwrap().is_empty());
        assert_eq!(store.latest_assessment("north").unwrap().map(|a| a.computed_at), Some(at(5)));
        assert!(store.latest_assessment("east").unwrap().is_none());

        let action = instance();
        store.record_actions("north", std::slice::from_ref(&action), at(6)).unwrap();
        assert_eq!(store.find_action("north", action.instance_id).unwrap(), Some(action.clone()));
        assert_eq!(store.find_action("south", action.instance_id).unwrap(), None);
        assert!(store.record_actions("north", &[action.clone()], at(7)).is_err());

        let later = instance();
        store.record_actions("north", std::slice::from_ref(&later), at(9)).unwrap();
        assert_eq!(
            store.actions_issued_since("north", at(6)).unwrap(),
            vec![action.clone(), later.clone()]
        );
        // issued_at comes from the caller, not the wall clock
        assert_eq!(store.actions_issued_since("north", at(7)).unwrap(), vec![later]);
        assert!(store.actions_issued_since("south", at(1)).unwrap().is_empty());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sqlite_store_in_memory() {
        exercise(&SqliteStore::in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_store_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append_assessment(&assessment("north", 4)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        let history = store.assessments_since("north", at(1)).unwrap();
        assert_eq!(history, vec![assessment("north", 4)]);
    }
}
