use super::{Committed, Mutation, PlayerStore};
use crate::error::GameError;
use crate::types::{MiningState, PlayerId, PlayerRecord};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};

// `progress` holds the points balance.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS players (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    image_url TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    mining_state TEXT NOT NULL DEFAULT 'Idle',
    session_started_at TEXT,
    accrued_elapsed REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_players_mining_state ON players(mining_state);
";

const SELECT_COLUMNS: &str = "SELECT id, name, image_url, progress, mining_state, \
     session_started_at, accrued_elapsed, updated_at FROM players";

/// SQLite-backed store. Each `modify` is a single `BEGIN IMMEDIATE` transaction.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {:?}", path))?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("Failed to open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to create players table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` on the blocking pool with exclusive use of the connection.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, GameError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, GameError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| GameError::storage(operation, "connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| GameError::storage(operation, e))?
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerRecord> {
    let id: String = row.get(0)?;
    let points: i64 = row.get(3)?;
    let state: String = row.get(4)?;
    let started: Option<String> = row.get(5)?;
    let updated: String = row.get(7)?;

    Ok(PlayerRecord {
        id: PlayerId::parse(&id).ok_or_else(|| conversion_error(0, "blank player id".into()))?,
        display_name: row.get(1)?,
        photo_url: row.get(2)?,
        points: u64::try_from(points).map_err(|e| conversion_error(3, e.to_string()))?,
        mining_state: state.parse::<MiningState>().map_err(|e| conversion_error(4, e))?,
        session_started_at: started.as_deref().map(|s| parse_timestamp(5, s)).transpose()?,
        accrued_elapsed_seconds: row.get(6)?,
        last_updated_at: parse_timestamp(7, &updated)?,
    })
}

fn write_row(conn: &Connection, record: &PlayerRecord) -> rusqlite::Result<()> {
    let points = i64::try_from(record.points).map_err(|e| conversion_error(3, e.to_string()))?;

    conn.execute(
        "INSERT INTO players (id, name, image_url, progress, mining_state, session_started_at, accrued_elapsed, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           image_url = excluded.image_url,
           progress = excluded.progress,
           mining_state = excluded.mining_state,
           session_started_at = excluded.session_started_at,
           accrued_elapsed = excluded.accrued_elapsed,
           updated_at = excluded.updated_at",
        params![
            record.id.as_str(),
            record.display_name,
            record.photo_url,
            points,
            record.mining_state.as_str(),
            record.session_started_at.map(|t| t.to_rfc3339()),
            record.accrued_elapsed_seconds,
            record.last_updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl PlayerStore for SqliteStore {
    async fn get(&self, id: &PlayerId) -> Result<PlayerRecord, GameError> {
        let id = id.clone();
        self.with_conn("get", move |conn| {
            let record = conn
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![id.as_str()],
                    parse_row,
                )
                .optional()
                .map_err(|e| GameError::storage("get", e))?;
            record.ok_or(GameError::NotFound(id))
        })
        .await
    }

    async fn modify(
        &self,
        id: &PlayerId,
        defaults: Option<PlayerRecord>,
        mutation: Mutation,
    ) -> Result<Committed, GameError> {
        let id = id.clone();
        self.with_conn("modify", move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| GameError::storage("modify", e))?;

            let existing = tx
                .query_row(
                    &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                    params![id.as_str()],
                    parse_row,
                )
                .optional()
                .map_err(|e| GameError::storage("modify", e))?;

            let mut working = match (&existing, defaults) {
                (Some(existing), _) => existing.clone(),
                (None, Some(defaults)) => defaults,
                (None, None) => return Err(GameError::NotFound(id)),
            };

            // Dropping `tx` on any early return rolls back.
            mutation(&mut working)?;
            write_row(&tx, &working).map_err(|e| GameError::storage("modify", e))?;
            tx.commit().map_err(|e| GameError::storage("modify", e))?;

            Ok(Committed {
                record: working,
                created: existing.is_none(),
                previous: existing,
            })
        })
        .await
    }

    async fn list_mining_in_progress(&self) -> Result<Vec<PlayerId>, GameError> {
        self.with_conn("list_mining_in_progress", |conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM players WHERE mining_state = ?1 ORDER BY id")
                .map_err(|e| GameError::storage("list_mining_in_progress", e))?;
            let rows = stmt
                .query_map(params![MiningState::Mining.as_str()], |row| row.get::<_, String>(0))
                .map_err(|e| GameError::storage("list_mining_in_progress", e))?;

            let mut ids = Vec::new();
            for row in rows {
                let raw = row.map_err(|e| GameError::storage("list_mining_in_progress", e))?;
                if let Some(id) = PlayerId::parse(&raw) {
                    ids.push(id);
                }
            }
            Ok(ids)
        })
        .await
    }

    async fn count(&self) -> Result<usize, GameError> {
        self.with_conn("count", |conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM players", [], |row| row.get(0))
                .map_err(|e| GameError::storage("count", e))?;
            Ok(count.max(0) as usize)
        })
        .await
    }

    async fn top_by_points(&self, limit: usize) -> Result<Vec<PlayerRecord>, GameError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn("top_by_points", move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{} ORDER BY progress DESC, id ASC LIMIT ?1",
                    SELECT_COLUMNS
                ))
                .map_err(|e| GameError::storage("top_by_points", e))?;
            let rows = stmt
                .query_map(params![limit], parse_row)
                .map_err(|e| GameError::storage("top_by_points", e))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| GameError::storage("top_by_points", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::store::mutation;
    use tempfile::tempdir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, 1, 12, 0, 0).unwrap()
    }

    fn defaults(id: &PlayerId) -> PlayerRecord {
        PlayerRecord::new(id.clone(), "https://img/default.png", now())
    }

    #[tokio::test]
    async fn test_modify_round_trips_all_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = PlayerId::from(42);

        let committed = store
            .modify(
                &id,
                Some(defaults(&id)),
                mutation(|record| {
                    record.display_name = "Aya".to_string();
                    record.points = 1500;
                    record.mining_state = MiningState::Mining;
                    record.session_started_at = Some(now());
                    record.accrued_elapsed_seconds = 61.25;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert!(committed.created);
        assert_eq!(store.get(&id).await.unwrap(), committed.record);
        assert_eq!(store.list_mining_in_progress().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_rejected_mutation_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = PlayerId::from(4);
        store
            .modify(
                &id,
                Some(defaults(&id)),
                mutation(|record| {
                    record.points = 500;
                    Ok(())
                }),
            )
            .await
            .unwrap();

        let err = store
            .modify(
                &id,
                None,
                mutation(|record| {
                    record.points = 0;
                    Err(GameError::InsufficientPoints { available: 500, required: 1000 })
                }),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "insufficient_points");
        assert_eq!(store.get(&id).await.unwrap().points, 500);

        let committed = store.modify(&id, None, mutation(|_| Ok(()))).await.unwrap();
        assert_eq!(committed.previous.map(|r| r.points), Some(500));
    }

    #[tokio::test]
    async fn test_unknown_player_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = PlayerId::from(404);

        assert_eq!(store.get(&id).await.unwrap_err(), GameError::NotFound(id.clone()));
        let err = store.modify(&id, None, mutation(|_| Ok(()))).await.unwrap_err();
        assert_eq!(err, GameError::NotFound(id));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_top_by_points() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, points) in [(1, 50), (2, 900), (3, 50)] {
            let id = PlayerId::from(id);
            store
                .modify(
                    &id,
                    Some(defaults(&id)),
                    mutation(move |record| {
                        record.points = points;
                        Ok(())
                    }),
                )
                .await
                .unwrap();
        }

        let top: Vec<u64> = store
            .top_by_points(2)
            .await
            .unwrap()
            .iter()
            .map(|r| r.points)
            .collect();
        assert_eq!(top, vec![900, 50]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("players.db");
        let id = PlayerId::parse("web-user").unwrap();

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .upsert_patch(&id, Default::default(), defaults(&id), now())
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get(&id).await.unwrap().display_name, "Player_web-user");
    }
}
