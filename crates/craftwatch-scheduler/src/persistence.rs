//! SQLite-backed job store — per-channel job state and audience sets.
//! Survives restarts; one connection behind a mutex, so every accessor
//! (including the read-modify-write `update_*`) runs alone.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use craftwatch_core::{
    ChannelId, CraftError, JobKind, JobStore, Result, SilkStage, SilkState, SteelState, UserId,
};

/// SQLite persistence for job state.
pub struct JobDb {
    conn: Mutex<Connection>,
}

impl JobDb {
    /// Open or create the job database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| db_err("open", e))?;

        // The run loop and CLI commands share this file from separate processes
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| db_err("pragma", e))?;

        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| db_err("open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- Audience per channel and job kind
            CREATE TABLE IF NOT EXISTS targets (
                channel_id INTEGER NOT NULL,
                job TEXT NOT NULL,              -- 'steel', 'silk'
                user_id INTEGER NOT NULL,
                PRIMARY KEY (channel_id, job, user_id)
            );

            -- Steel job per channel
            CREATE TABLE IF NOT EXISTS steel (
                channel_id INTEGER PRIMARY KEY,
                active INTEGER NOT NULL DEFAULT 0,
                start_ts INTEGER,               -- unix seconds
                last_refuel_ts INTEGER          -- unix seconds
            );

            -- Silk cycle per channel
            CREATE TABLE IF NOT EXISTS silk (
                channel_id INTEGER PRIMARY KEY,
                stage TEXT NOT NULL DEFAULT 'none',
                start_ts INTEGER,               -- unix seconds, egg stage start
                ack_stage TEXT
            );
         ",
            )
            .map_err(|e| db_err("migration", e))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CraftError::Store("job db lock poisoned".into()))
    }
}

impl JobStore for JobDb {
    fn active_channels(&self) -> Result<Vec<ChannelId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT channel_id FROM steel WHERE active = 1
                 UNION
                 SELECT channel_id FROM silk WHERE stage != 'none'
                 ORDER BY channel_id",
            )
            .map_err(|e| db_err("active channels", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(|e| db_err("active channels", e))?;
        let mut channels = Vec::new();
        for row in rows {
            channels.push(ChannelId(row.map_err(|e| db_err("active channels", e))? as u64));
        }
        Ok(channels)
    }

    fn get_steel(&self, channel: ChannelId) -> Result<SteelState> {
        let conn = self.lock()?;
        read_steel(&conn, channel)
    }

    fn set_steel(&self, channel: ChannelId, state: &SteelState) -> Result<()> {
        let conn = self.lock()?;
        write_steel(&conn, channel, state)
    }

    fn update_steel(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SteelState),
    ) -> Result<SteelState> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| db_err("begin", e))?;
        let mut state = read_steel(&tx, channel)?;
        let before = state.clone();
        f(&mut state);
        if state != before {
            write_steel(&tx, channel, &state)?;
        }
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(state)
    }

    fn get_silk(&self, channel: ChannelId) -> Result<SilkState> {
        let conn = self.lock()?;
        read_silk(&conn, channel)
    }

    fn set_silk(&self, channel: ChannelId, state: &SilkState) -> Result<()> {
        let conn = self.lock()?;
        write_silk(&conn, channel, state)
    }

    fn update_silk(
        &self,
        channel: ChannelId,
        f: &mut dyn FnMut(&mut SilkState),
    ) -> Result<SilkState> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| db_err("begin", e))?;
        let mut state = read_silk(&tx, channel)?;
        let before = state.clone();
        f(&mut state);
        if state != before {
            write_silk(&tx, channel, &state)?;
        }
        tx.commit().map_err(|e| db_err("commit", e))?;
        Ok(state)
    }

    fn get_targets(&self, channel: ChannelId, kind: JobKind) -> Result<BTreeSet<UserId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM targets WHERE channel_id = ?1 AND job = ?2")
            .map_err(|e| db_err("load targets", e))?;
        let rows = stmt
            .query_map(params![channel.0 as i64, kind.as_str()], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| db_err("load targets", e))?;
        let mut users = BTreeSet::new();
        for row in rows {
            users.insert(UserId(row.map_err(|e| db_err("load targets", e))? as u64));
        }
        Ok(users)
    }

    fn add_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        for user in users {
            tx.execute(
                "INSERT OR IGNORE INTO targets (channel_id, job, user_id) VALUES (?1, ?2, ?3)",
                params![channel.0 as i64, kind.as_str(), user.0 as i64],
            )
            .map_err(|e| db_err("add target", e))?;
        }
        tx.commit().map_err(|e| db_err("commit", e))
    }

    fn remove_targets(&self, channel: ChannelId, kind: JobKind, users: &[UserId]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| db_err("begin", e))?;
        for user in users {
            tx.execute(
                "DELETE FROM targets WHERE channel_id = ?1 AND job = ?2 AND user_id = ?3",
                params![channel.0 as i64, kind.as_str(), user.0 as i64],
            )
            .map_err(|e| db_err("remove target", e))?;
        }
        tx.commit().map_err(|e| db_err("commit", e))
    }
}

// ─── Row codecs ────────────────────────────────────────────

fn read_steel(conn: &Connection, channel: ChannelId) -> Result<SteelState> {
    let row = conn
        .query_row(
            "SELECT active, start_ts, last_refuel_ts FROM steel WHERE channel_id = ?1",
            params![channel.0 as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)? != 0,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err("load steel", e))?;

    Ok(match row {
        Some((active, start_ts, last_refuel_ts)) => SteelState {
            active,
            start_ts: start_ts.and_then(from_unix),
            last_refuel_ts: last_refuel_ts.and_then(from_unix),
        },
        None => SteelState::default(),
    })
}

fn write_steel(conn: &Connection, channel: ChannelId, state: &SteelState) -> Result<()> {
    conn.execute(
        "INSERT INTO steel (channel_id, active, start_ts, last_refuel_ts)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(channel_id) DO UPDATE SET
             active = excluded.active,
             start_ts = excluded.start_ts,
             last_refuel_ts = excluded.last_refuel_ts",
        params![
            channel.0 as i64,
            state.active as i64,
            state.start_ts.map(|t| t.timestamp()),
            state.last_refuel_ts.map(|t| t.timestamp()),
        ],
    )
    .map_err(|e| db_err("save steel", e))?;
    Ok(())
}

fn read_silk(conn: &Connection, channel: ChannelId) -> Result<SilkState> {
    let row = conn
        .query_row(
            "SELECT stage, start_ts, ack_stage FROM silk WHERE channel_id = ?1",
            params![channel.0 as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| db_err("load silk", e))?;

    Ok(match row {
        Some((stage, start_ts, ack_stage)) => SilkState {
            stage: SilkStage::from_stored(&stage),
            start_ts: start_ts.and_then(from_unix),
            ack_stage: ack_stage.as_deref().map(SilkStage::from_stored),
        },
        None => SilkState::default(),
    })
}

fn write_silk(conn: &Connection, channel: ChannelId, state: &SilkState) -> Result<()> {
    conn.execute(
        "INSERT INTO silk (channel_id, stage, start_ts, ack_stage)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(channel_id) DO UPDATE SET
             stage = excluded.stage,
             start_ts = excluded.start_ts,
             ack_stage = excluded.ack_stage",
        params![
            channel.0 as i64,
            state.stage.as_str(),
            state.start_ts.map(|t| t.timestamp()),
            state.ack_stage.map(|s| s.as_str()),
        ],
    )
    .map_err(|e| db_err("save silk", e))?;
    Ok(())
}

fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

fn db_err(what: &str, e: rusqlite::Error) -> CraftError {
    CraftError::Store(format!("{what}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join("craftwatch-db-test");
        std::fs::create_dir_all(&dir).ok();
        let db = JobDb::open(&dir.join("test.db")).unwrap();
        assert!(db.active_channels().unwrap().is_empty());
        drop(db);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_db_is_shared_between_handles() {
        let dir = std::env::temp_dir().join("craftwatch-db-shared-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("shared.db");
        let run_loop = JobDb::open(&path).unwrap();
        let command = JobDb::open(&path).unwrap();

        let mode: String = run_loop
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
        let timeout: i64 = command
            .lock()
            .unwrap()
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 5000);

        let channel = ChannelId(42);
        command.set_steel(channel, &SteelState::started(now())).unwrap();
        let later = now() + chrono::Duration::hours(2);
        run_loop
            .update_steel(channel, &mut |st: &mut SteelState| st.last_refuel_ts = Some(later))
            .unwrap();
        assert_eq!(command.get_steel(channel).unwrap().last_refuel_ts, Some(later));

        drop(run_loop);
        drop(command);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_steel_round_trip() {
        let db = JobDb::open_in_memory().unwrap();
        let channel = ChannelId(1_234_567_890_123_456_789);
        assert_eq!(db.get_steel(channel).unwrap(), SteelState::default());

        db.set_steel(channel, &SteelState::started(now())).unwrap();
        assert_eq!(db.get_steel(channel).unwrap(), SteelState::started(now()));
        assert_eq!(db.active_channels().unwrap(), vec![channel]);

        db.set_steel(channel, &SteelState::default()).unwrap();
        assert_eq!(db.get_steel(channel).unwrap(), SteelState::default());
        assert!(db.active_channels().unwrap().is_empty());
    }

    #[test]
    fn test_silk_update_persists_stage_and_ack() {
        let db = JobDb::open_in_memory().unwrap();
        let channel = ChannelId(7);
        db.set_silk(channel, &SilkState::started(now())).unwrap();

        let after = db
            .update_silk(channel, &mut |st: &mut SilkState| {
                st.stage = SilkStage::Larva;
                st.ack_stage = Some(SilkStage::Larva);
            })
            .unwrap();
        assert_eq!(after.stage, SilkStage::Larva);

        let loaded = db.get_silk(channel).unwrap();
        assert_eq!(loaded.stage, SilkStage::Larva);
        assert_eq!(loaded.ack_stage, Some(SilkStage::Larva));
        assert_eq!(loaded.start_ts, Some(now()));
    }

    #[test]
    fn test_unknown_stage_reads_as_idle() {
        let db = JobDb::open_in_memory().unwrap();
        db.lock()
            .unwrap()
            .execute(
                "INSERT INTO silk (channel_id, stage, start_ts) VALUES (5, 'cocoon', 100)",
                [],
            )
            .unwrap();
        assert_eq!(db.get_silk(ChannelId(5)).unwrap().stage, SilkStage::Idle);
    }

    #[test]
    fn test_targets() {
        let db = JobDb::open_in_memory().unwrap();
        let channel = ChannelId(9);
        db.add_targets(channel, JobKind::Silk, &[UserId(3), UserId(1), UserId(3)])
            .unwrap();
        db.add_targets(channel, JobKind::Steel, &[UserId(8)]).unwrap();
        db.remove_targets(channel, JobKind::Silk, &[UserId(3), UserId(99)])
            .unwrap();

        assert_eq!(
            db.get_targets(channel, JobKind::Silk).unwrap(),
            BTreeSet::from([UserId(1)])
        );
        assert_eq!(
            db.get_targets(channel, JobKind::Steel).unwrap(),
            BTreeSet::from([UserId(8)])
        );
    }
}
