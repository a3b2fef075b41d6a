//! SQLite decision store
//!
//! rusqlite behind a deadpool-sqlite connection pool. Each operation runs on
//! a pooled connection via `interact`, so the async callers never block on
//! SQLite I/O.

use super::schema::{CREATE_TABLES, SCHEMA_VERSION};
use super::{DecisionStore, FeatureBlob, StoreCounts, StoredDecision, StoredFeedback};
use crate::error::{AnchoriteError, Result};
use crate::features::{from_bytes, to_bytes};
use crate::mission::{Fingerprint, Mission};
use crate::types::{Decision, DecisionId, DecisionState, FeedbackRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const DECISION_COLUMNS: &str = "id, url, fingerprint, feature_hash, action, confidence, \
     allow_score, block_score, source, explored, model_version, created_at_ms, state, \
     layout_signature, features";

const FEEDBACK_COLUMNS: &str = "id, decision_id, url, feedback, decided_action, target_action, \
     reward, explored, received_at_ms, layout_signature, features, consumed";

/// Pooled SQLite implementation of [`DecisionStore`]
pub struct SqliteDecisionStore {
    pool: Pool,
}

impl SqliteDecisionStore {
    /// Open (creating if needed) the database at `db_path` and apply the schema
    pub async fn open<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!("Opening decision store at {} (pool_size: {})", path_str, pool_size);

        let mut config = Config::new(path_str);
        config.pool = Some(PoolConfig::new(pool_size.max(1)));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            AnchoriteError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            debug!("SQLite journal mode: {}", mode);
            conn.execute_batch(CREATE_TABLES)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('version', ?1)",
                params![SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    /// Run `f` on a pooled connection
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            AnchoriteError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(move |conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(conn)
        })
        .await
        .map_err(|e| AnchoriteError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(column: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|e| AnchoriteError::Database(format!("Bad {} value in store: {}", column, e)))
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AnchoriteError::Database(format!("Bad timestamp in store: {}", ms)))
}

fn blob(signature: Option<String>, bytes: Option<Vec<u8>>) -> Result<Option<FeatureBlob>> {
    match (signature, bytes) {
        (Some(layout_signature), Some(bytes)) => Ok(Some(FeatureBlob {
            layout_signature,
            values: from_bytes(&bytes)?,
        })),
        _ => Ok(None),
    }
}

/// Raw decision row, converted outside the rusqlite row callback
struct DecisionRow {
    id: String,
    url: String,
    fingerprint: String,
    feature_hash: String,
    action: String,
    confidence: f64,
    allow_score: f64,
    block_score: f64,
    source: String,
    explored: bool,
    model_version: i64,
    created_at_ms: i64,
    state: String,
    layout_signature: Option<String>,
    features: Option<Vec<u8>>,
}

impl DecisionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            fingerprint: row.get(2)?,
            feature_hash: row.get(3)?,
            action: row.get(4)?,
            confidence: row.get(5)?,
            allow_score: row.get(6)?,
            block_score: row.get(7)?,
            source: row.get(8)?,
            explored: row.get(9)?,
            model_version: row.get(10)?,
            created_at_ms: row.get(11)?,
            state: row.get(12)?,
            layout_signature: row.get(13)?,
            features: row.get(14)?,
        })
    }

    fn into_stored(self) -> Result<StoredDecision> {
        let id = DecisionId::from_string(&self.id)
            .map_err(|e| AnchoriteError::Database(format!("Bad decision id in store: {}", e)))?;
        Ok(StoredDecision {
            decision: Decision {
                id,
                url: self.url,
                mission_fingerprint: Fingerprint::from_raw(self.fingerprint),
                feature_hash: self.feature_hash,
                action: parse_column("action", &self.action)?,
                confidence: self.confidence as f32,
                allow_score: self.allow_score as f32,
                block_score: self.block_score as f32,
                source: parse_column("source", &self.source)?,
                explored: self.explored,
                model_version: self.model_version.max(0) as u64,
                created_at: timestamp(self.created_at_ms)?,
            },
            state: parse_column("state", &self.state)?,
            features: blob(self.layout_signature, self.features)?,
        })
    }
}

struct FeedbackRow {
    id: String,
    decision_id: String,
    url: String,
    feedback: String,
    decided_action: String,
    target_action: String,
    reward: f64,
    explored: bool,
    received_at_ms: i64,
    layout_signature: Option<String>,
    features: Option<Vec<u8>>,
    consumed: bool,
}

impl FeedbackRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            decision_id: row.get(1)?,
            url: row.get(2)?,
            feedback: row.get(3)?,
            decided_action: row.get(4)?,
            target_action: row.get(5)?,
            reward: row.get(6)?,
            explored: row.get(7)?,
            received_at_ms: row.get(8)?,
            layout_signature: row.get(9)?,
            features: row.get(10)?,
            consumed: row.get(11)?,
        })
    }

    fn into_stored(self) -> Result<StoredFeedback> {
        let bad_id = |e: uuid::Error| AnchoriteError::Database(format!("Bad id in store: {}", e));
        Ok(StoredFeedback {
            record: FeedbackRecord {
                id: Uuid::parse_str(&self.id).map_err(bad_id)?,
                decision_id: DecisionId::from_string(&self.decision_id).map_err(bad_id)?,
                feedback: parse_column("feedback", &self.feedback)?,
                decided_action: parse_column("decided_action", &self.decided_action)?,
                target_action: parse_column("target_action", &self.target_action)?,
                reward: self.reward as f32,
                explored: self.explored,
                received_at: timestamp(self.received_at_ms)?,
            },
            url: self.url,
            features: blob(self.layout_signature, self.features)?,
            consumed: self.consumed,
        })
    }
}

#[async_trait]
impl DecisionStore for SqliteDecisionStore {
    async fn put_decision(
        &self,
        decision: &Decision,
        state: DecisionState,
        features: Option<&FeatureBlob>,
    ) -> Result<()> {
        let d = decision.clone();
        let signature = features.map(|f| f.layout_signature.clone());
        let bytes = features.map(|f| to_bytes(&f.values));

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO decisions ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    DECISION_COLUMNS
                ),
                params![
                    d.id.to_string(),
                    d.url,
                    d.mission_fingerprint.as_str(),
                    d.feature_hash,
                    d.action.to_string(),
                    d.confidence as f64,
                    d.allow_score as f64,
                    d.block_score as f64,
                    d.source.to_string(),
                    d.explored,
                    d.model_version as i64,
                    d.created_at.timestamp_millis(),
                    state.as_str(),
                    signature,
                    bytes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_decision(&self, url: &str, fingerprint: &Fingerprint) -> Result<Option<StoredDecision>> {
        let url = url.to_string();
        let fingerprint = fingerprint.as_str().to_string();

        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM decisions WHERE url = ?1 AND fingerprint = ?2",
                            DECISION_COLUMNS
                        ),
                        params![url, fingerprint],
                        DecisionRow::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(DecisionRow::into_stored).transpose()
    }

    async fn get_decision_by_id(&self, id: DecisionId) -> Result<Option<StoredDecision>> {
        let id = id.to_string();
        let row = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {} FROM decisions WHERE id = ?1", DECISION_COLUMNS),
                        params![id],
                        DecisionRow::from_row,
                    )
                    .optional()?)
            })
            .await?;
        row.map(DecisionRow::into_stored).transpose()
    }

    async fn mark_fed_back(&self, id: DecisionId) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE decisions SET state = 'fed_back' WHERE id = ?1 AND state != 'fed_back'",
                params![id],
            )?;
            if changed == 0 {
                let exists: Option<String> = tx
                    .query_row("SELECT state FROM decisions WHERE id = ?1", params![id], |row| {
                        row.get(0)
                    })
                    .optional()?;
                return Err(match exists {
                    Some(_) => AnchoriteError::AlreadyFedBack(id),
                    None => AnchoriteError::DecisionNotFound(id),
                });
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn purge_other_missions(&self, current: &Fingerprint) -> Result<usize> {
        let fingerprint = current.as_str().to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM decisions WHERE fingerprint != ?1",
                params![fingerprint],
            )?)
        })
        .await
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM decisions WHERE created_at_ms < ?1",
                params![cutoff_ms],
            )?)
        })
        .await
    }

    async fn insert_feedback(
        &self,
        record: &FeedbackRecord,
        url: &str,
        features: Option<&FeatureBlob>,
    ) -> Result<()> {
        let r = record.clone();
        let url = url.to_string();
        let signature = features.map(|f| f.layout_signature.clone());
        let bytes = features.map(|f| to_bytes(&f.values));

        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO feedback ({}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0)",
                    FEEDBACK_COLUMNS
                ),
                params![
                    r.id.to_string(),
                    r.decision_id.to_string(),
                    url,
                    r.feedback.as_str(),
                    r.decided_action.to_string(),
                    r.target_action.to_string(),
                    r.reward as f64,
                    r.explored,
                    r.received_at.timestamp_millis(),
                    signature,
                    bytes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn mark_feedback_consumed(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("UPDATE feedback SET consumed = 1 WHERE id = ?1")?;
                for id in &ids {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn recent_feedback(&self, limit: usize, unconsumed_only: bool) -> Result<Vec<StoredFeedback>> {
        let sql = format!(
            "SELECT {} FROM feedback {} ORDER BY received_at_ms DESC LIMIT ?1",
            FEEDBACK_COLUMNS,
            if unconsumed_only { "WHERE consumed = 0" } else { "" }
        );
        let limit = limit as i64;

        let rows = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params![limit], FeedbackRow::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(FeedbackRow::into_stored).collect()
    }

    async fn save_mission(&self, mission: &Mission) -> Result<()> {
        let text = mission.text().to_string();
        let fingerprint = mission.fingerprint().as_str().to_string();
        let threshold = mission.threshold as f64;
        let created_at_ms = mission.created_at.timestamp_millis();
        let session_minutes = mission.session_minutes.map(i64::from);
        let updated_at_ms = Utc::now().timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO mission_config \
                 (id, text, fingerprint, threshold, created_at_ms, session_minutes, updated_at_ms) \
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![text, fingerprint, threshold, created_at_ms, session_minutes, updated_at_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_mission(&self) -> Result<Option<Mission>> {
        let row = self
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT text, threshold, created_at_ms, session_minutes \
                         FROM mission_config WHERE id = 1",
                        [],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, f64>(1)?,
                                row.get::<_, i64>(2)?,
                                row.get::<_, Option<i64>>(3)?,
                            ))
                        },
                    )
                    .optional()?)
            })
            .await?;

        match row {
            Some((text, threshold, created_at_ms, session_minutes)) => {
                let mission = Mission::with_threshold(text, threshold as f32)?
                    .with_created_at(timestamp(created_at_ms)?)
                    .with_session_minutes(session_minutes.and_then(|m| u32::try_from(m).ok()));
                Ok(Some(mission))
            }
            None => Ok(None),
        }
    }

    async fn counts(&self) -> Result<StoreCounts> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> rusqlite::Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n.max(0) as u64)
            };
            Ok(StoreCounts {
                decisions: count("SELECT COUNT(*) FROM decisions")?,
                feedback: count("SELECT COUNT(*) FROM feedback")?,
                unconsumed_feedback: count("SELECT COUNT(*) FROM feedback WHERE consumed = 0")?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, DecisionSource, Feedback};
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteDecisionStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteDecisionStore::open(temp_dir.path().join("anchorite.db"), 2)
            .await
            .unwrap();
        (store, temp_dir)
    }

    fn decision(url: &str, fingerprint: &Fingerprint) -> Decision {
        Decision {
            id: DecisionId::new(),
            url: url.to_string(),
            mission_fingerprint: fingerprint.clone(),
            feature_hash: "abcd".to_string(),
            action: Action::Block,
            confidence: 0.6,
            allow_score: 0.2,
            block_score: 0.8,
            source: DecisionSource::Model,
            explored: false,
            model_version: 2,
            created_at: DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_decision_round_trip_and_supersede() {
        let (store, _dir) = create_test_store().await;
        let fp = Fingerprint::from_text("learn rust");
        let first = decision("https://a.example/", &fp);
        let blob = FeatureBlob {
            layout_signature: "enc/e1".to_string(),
            values: vec![0.25, 1.0],
        };

        store.put_decision(&first, DecisionState::Cached, Some(&blob)).await.unwrap();
        let stored = store.get_decision(&first.url, &fp).await.unwrap().unwrap();
        assert_eq!(stored.decision, first);
        assert_eq!(stored.state, DecisionState::Cached);
        assert_eq!(stored.features, Some(blob));

        // Same key, new decision: the old id is gone
        let second = decision("https://a.example/", &fp);
        store.put_decision(&second, DecisionState::Cached, None).await.unwrap();
        assert!(store.get_decision_by_id(first.id).await.unwrap().is_none());
        assert_eq!(
            store.get_decision(&first.url, &fp).await.unwrap().unwrap().decision.id,
            second.id
        );
    }

    #[tokio::test]
    async fn test_fed_back_at_most_once() {
        let (store, _dir) = create_test_store().await;
        let fp = Fingerprint::from_text("learn rust");
        let d = decision("https://a.example/", &fp);
        store.put_decision(&d, DecisionState::Cached, None).await.unwrap();

        store.mark_fed_back(d.id).await.unwrap();
        assert!(matches!(
            store.mark_fed_back(d.id).await,
            Err(AnchoriteError::AlreadyFedBack(_))
        ));
        assert!(matches!(
            store.mark_fed_back(DecisionId::new()).await,
            Err(AnchoriteError::DecisionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purges() {
        let (store, _dir) = create_test_store().await;
        let old = Fingerprint::from_text("old mission");
        let new = Fingerprint::from_text("new mission");
        store.put_decision(&decision("https://a/", &old), DecisionState::Cached, None).await.unwrap();
        store.put_decision(&decision("https://b/", &new), DecisionState::Cached, None).await.unwrap();

        assert_eq!(store.purge_other_missions(&new).await.unwrap(), 1);
        assert_eq!(store.counts().await.unwrap().decisions, 1);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert_eq!(store.purge_expired(future).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_feedback_lifecycle() {
        let (store, _dir) = create_test_store().await;
        let fp = Fingerprint::from_text("learn rust");
        let d = decision("https://a.example/", &fp);
        let record = FeedbackRecord::new(&d, Feedback::Incorrect, Utc::now());
        let blob = FeatureBlob {
            layout_signature: "enc/e1".to_string(),
            values: vec![1.0],
        };

        store.insert_feedback(&record, &d.url, Some(&blob)).await.unwrap();
        let pending = store.recent_feedback(10, true).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record.target_action, Action::Allow);
        assert_eq!(pending[0].record.reward, -1.0);
        assert_eq!(pending[0].features, Some(blob));

        store.mark_feedback_consumed(&[record.id]).await.unwrap();
        assert!(store.recent_feedback(10, true).await.unwrap().is_empty());
        let all = store.recent_feedback(10, false).await.unwrap();
        assert!(all[0].consumed);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.feedback, 1);
        assert_eq!(counts.unconsumed_feedback, 0);
    }

    #[tokio::test]
    async fn test_mission_record() {
        let (store, _dir) = create_test_store().await;
        assert!(store.load_mission().await.unwrap().is_none());

        let mission = Mission::with_threshold("Learn Python programming", 0.35)
            .unwrap()
            .with_session_minutes(Some(90));
        store.save_mission(&mission).await.unwrap();

        let loaded = store.load_mission().await.unwrap().unwrap();
        assert_eq!(loaded.text(), mission.text());
        assert_eq!(loaded.fingerprint(), mission.fingerprint());
        assert!((loaded.threshold - 0.35).abs() < 1e-6);
        assert_eq!(loaded.session_minutes, Some(90));
    }
}
