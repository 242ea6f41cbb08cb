//! SQLite-backed persistence for schedules, queue items, workflows, and the
//! append-only timeline. Survives restarts — the store rehydrates from here
//! at boot and writes through on every mutation.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::error::Result;
use crate::queue::QueueItem;
use crate::schedule::{ScheduledContent, TimelineEvent, TimelineEventKind};
use crate::workflow::Workflow;

/// SQLite persistence store for all scheduling data.
pub struct PressroomDb {
    conn: rusqlite::Connection,
}

impl PressroomDb {
    /// Open or create the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = rusqlite::Connection::open(path)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_content (
                id TEXT PRIMARY KEY,
                scheduled_at TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL            -- full entity JSON
            );

            CREATE TABLE IF NOT EXISTS queue_items (
                id TEXT PRIMARY KEY,
                schedule_id TEXT NOT NULL,
                status TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            );

            -- Append-only audit trail per schedule.
            CREATE TABLE IF NOT EXISTS timeline_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id TEXT NOT NULL,
                at TEXT NOT NULL,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_timeline_schedule
                ON timeline_events(schedule_id);
            ",
        )?;
        Ok(())
    }

    // ─── Scheduled content ──────────────────────────────────────

    pub fn save_schedule(&self, schedule: &ScheduledContent) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO scheduled_content (id, scheduled_at, status, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                schedule.id,
                schedule.scheduled_at.to_rfc3339(),
                schedule.status.to_string(),
                serde_json::to_string(schedule)?,
            ],
        )?;
        Ok(())
    }

    pub fn delete_schedule(&self, id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM scheduled_content WHERE id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM queue_items WHERE schedule_id = ?1", [id])?;
        self.conn
            .execute("DELETE FROM timeline_events WHERE schedule_id = ?1", [id])?;
        Ok(())
    }

    pub fn load_schedules(&self) -> Result<Vec<ScheduledContent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM scheduled_content ORDER BY scheduled_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut schedules = Vec::new();
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(s) => schedules.push(s),
                Err(e) => tracing::warn!("Skipping unreadable schedule row: {e}"),
            }
        }
        Ok(schedules)
    }

    // ─── Queue items ──────────────────────────────────────

    pub fn save_queue_item(&self, item: &QueueItem) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO queue_items (id, schedule_id, status, data)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                item.id,
                item.schedule_id,
                serde_json::to_string(&item.status)?,
                serde_json::to_string(item)?,
            ],
        )?;
        Ok(())
    }

    pub fn save_queue_items(&self, items: &[QueueItem]) -> Result<()> {
        self.conn.execute("DELETE FROM queue_items", [])?;
        for item in items {
            self.save_queue_item(item)?;
        }
        Ok(())
    }

    pub fn load_queue_items(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM queue_items ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut items = Vec::new();
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(i) => items.push(i),
                Err(e) => tracing::warn!("Skipping unreadable queue row: {e}"),
            }
        }
        Ok(items)
    }

    // ─── Workflows ──────────────────────────────────────

    pub fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO workflows (id, data) VALUES (?1, ?2)",
            params![workflow.id, serde_json::to_string(workflow)?],
        )?;
        Ok(())
    }

    pub fn load_workflows(&self) -> Result<Vec<Workflow>> {
        let mut stmt = self.conn.prepare("SELECT data FROM workflows")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut workflows = Vec::new();
        for row in rows {
            match serde_json::from_str(&row?) {
                Ok(w) => workflows.push(w),
                Err(e) => tracing::warn!("Skipping unreadable workflow row: {e}"),
            }
        }
        Ok(workflows)
    }

    // ─── Timeline ──────────────────────────────────────

    pub fn append_timeline(&self, event: &TimelineEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO timeline_events (schedule_id, at, data) VALUES (?1, ?2, ?3)",
            params![
                event.schedule_id,
                event.at.to_rfc3339(),
                serde_json::to_string(&event.event)?,
            ],
        )?;
        Ok(())
    }

    pub fn timeline_for(&self, schedule_id: &str) -> Result<Vec<TimelineEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT schedule_id, at, data FROM timeline_events
             WHERE schedule_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([schedule_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (schedule_id, at, data) = row?;
            let Ok(kind) = serde_json::from_str::<TimelineEventKind>(&data) else {
                continue;
            };
            let at = DateTime::parse_from_rfc3339(&at)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            events.push(TimelineEvent {
                schedule_id,
                at,
                event: kind,
            });
        }
        Ok(events)
    }
}
