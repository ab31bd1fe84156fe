//! Persistence Store.
//!
//! A single SQLite database under `config_path`, opened through an r2d2
//! pool so readers can overlap with the single writer under WAL mode.

pub mod migrations;
pub mod models;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::queue::{Item, Status};
use models::{Condition, ConditionSpec, NotificationTarget, NotificationTargetSpec, Preset, PresetSpec, Task, TaskSpec};

pub type DbPool = Pool<SqliteConnectionManager>;

pub struct Store {
    pool: DbPool,
}

/// Which of the two item tables an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Queue,
    History,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Table::Queue => "queue",
            Table::History => "history",
        }
    }
}

impl Store {
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(8).build(manager).map_err(|e| CoreError::internal(format!("failed to build connection pool: {e}")))?;
        {
            let mut conn = pool.get()?;
            migrations::apply_all(&mut conn).map_err(CoreError::from)?;
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> CoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // ---------------------------------------------------------------
    // Queue / history (Item rows)
    // ---------------------------------------------------------------

    pub fn insert_item(&self, table: Table, item: &Item) -> CoreResult<()> {
        let conn = self.conn()?;
        let data = serde_json::to_string(item).map_err(|e| CoreError::internal(format!("serialize item: {e}")))?;
        conn.execute(
            &format!("INSERT INTO {} (id, status, created_at, data) VALUES (?1, ?2, ?3, ?4)", table.name()),
            params![item.id, status_str(item.status), item.created_at.to_rfc3339(), data],
        )?;
        Ok(())
    }

    pub fn update_item(&self, table: Table, item: &Item) -> CoreResult<()> {
        let conn = self.conn()?;
        let data = serde_json::to_string(item).map_err(|e| CoreError::internal(format!("serialize item: {e}")))?;
        conn.execute(
            &format!("UPDATE {} SET status = ?2, data = ?3 WHERE id = ?1", table.name()),
            params![item.id, status_str(item.status), data],
        )?;
        Ok(())
    }

    pub fn get_item(&self, table: Table, id: &str) -> CoreResult<Option<Item>> {
        let conn = self.conn()?;
        let data: Option<String> = conn
            .query_row(&format!("SELECT data FROM {} WHERE id = ?1", table.name()), params![id], |r| r.get(0))
            .optional()?;
        Ok(match data {
            Some(json) => Some(serde_json::from_str(&json).map_err(|e| CoreError::internal(format!("deserialize item: {e}")))?),
            None => None,
        })
    }

    pub fn delete_item(&self, table: Table, id: &str) -> CoreResult<bool> {
        let conn = self.conn()?;
        let affected = conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table.name()), params![id])?;
        Ok(affected > 0)
    }

    /// Moves a terminal item from `queue` to `history` in one transaction.
    pub fn move_to_history(&self, item: &Item) -> CoreResult<()> {
        let mut conn = self.conn()?;
        let data = serde_json::to_string(item).map_err(|e| CoreError::internal(format!("serialize item: {e}")))?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM queue WHERE id = ?1", params![item.id])?;
        tx.execute(
            "INSERT OR REPLACE INTO history (id, status, created_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![item.id, status_str(item.status), item.created_at.to_rfc3339(), data],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_items(&self, table: Table, page: u32, per_page: u32) -> CoreResult<(Vec<Item>, u64)> {
        let conn = self.conn()?;
        let total: u64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name()), [], |r| r.get::<_, i64>(0))? as u64;
        let offset = (page.saturating_sub(1) as u64) * per_page as u64;
        let mut stmt = conn.prepare(&format!(
            "SELECT data FROM {} ORDER BY created_at ASC LIMIT ?1 OFFSET ?2",
            table.name()
        ))?;
        let rows = stmt.query_map(params![per_page, offset], |r| r.get::<_, String>(0))?;
        let mut items = Vec::new();
        for row in rows {
            let json = row?;
            items.push(serde_json::from_str(&json).map_err(|e| CoreError::internal(format!("deserialize item: {e}")))?);
        }
        Ok((items, total))
    }

    pub fn all_queue_items(&self) -> CoreResult<Vec<Item>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT data FROM queue ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut items = Vec::new();
        for row in rows {
            let json = row?;
            items.push(serde_json::from_str(&json).map_err(|e| CoreError::internal(format!("deserialize item: {e}")))?);
        }
        Ok(items)
    }

    pub fn history_count(&self) -> CoreResult<u64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM history", [], |r| r.get::<_, i64>(0))? as u64)
    }

    // ---------------------------------------------------------------
    // Presets
    // ---------------------------------------------------------------

    pub fn list_presets(&self) -> CoreResult<Vec<Preset>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, folder, template, cookies, cli, is_default, priority, download_archive FROM presets ORDER BY priority DESC, id ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_preset)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_preset(&self, name: &str) -> CoreResult<Option<Preset>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, description, folder, template, cookies, cli, is_default, priority, download_archive FROM presets WHERE name = ?1",
            params![name],
            Self::row_to_preset,
        )
        .optional()
        .map_err(CoreError::from)
    }

    pub fn create_preset(&self, spec: PresetSpec) -> CoreResult<Preset> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO presets (name, description, folder, template, cookies, cli, is_default, priority, download_archive) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8)",
            params![spec.name, spec.description, spec.folder, spec.template, spec.cookies, spec.cli, spec.priority, spec.download_archive],
        )
        .map_err(|e| map_unique_violation(e, "preset"))?;
        let id = conn.last_insert_rowid();
        self.get_preset_by_id(id)?.ok_or_else(|| CoreError::internal("preset vanished after insert"))
    }

    pub fn patch_preset(&self, name: &str, spec: PresetSpec) -> CoreResult<Preset> {
        let existing = self.get_preset(name)?.ok_or_else(|| CoreError::not_found(format!("preset {name} not found")))?;
        if existing.default {
            return Err(CoreError::conflict(format!("preset {name} is a system default and cannot be modified")));
        }
        let conn = self.conn()?;
        conn.execute(
            "UPDATE presets SET name = ?2, description = ?3, folder = ?4, template = ?5, cookies = ?6, cli = ?7, priority = ?8, download_archive = ?9 WHERE id = ?1",
            params![existing.id, spec.name, spec.description, spec.folder, spec.template, spec.cookies, spec.cli, spec.priority, spec.download_archive],
        )?;
        self.get_preset_by_id(existing.id)?.ok_or_else(|| CoreError::not_found(format!("preset {name} not found")))
    }

    pub fn delete_preset(&self, name: &str) -> CoreResult<()> {
        let existing = self.get_preset(name)?.ok_or_else(|| CoreError::not_found(format!("preset {name} not found")))?;
        if existing.default {
            return Err(CoreError::conflict(format!("preset {name} is a system default and cannot be deleted")));
        }
        let conn = self.conn()?;
        conn.execute("DELETE FROM presets WHERE id = ?1", params![existing.id])?;
        Ok(())
    }

    fn get_preset_by_id(&self, id: i64) -> CoreResult<Option<Preset>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, description, folder, template, cookies, cli, is_default, priority, download_archive FROM presets WHERE id = ?1",
            params![id],
            Self::row_to_preset,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_to_preset(row: &rusqlite::Row) -> rusqlite::Result<Preset> {
        Ok(Preset {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            folder: row.get(3)?,
            template: row.get(4)?,
            cookies: row.get(5)?,
            cli: row.get(6)?,
            default: row.get::<_, i64>(7)? != 0,
            priority: row.get(8)?,
            download_archive: row.get(9)?,
        })
    }

    // ---------------------------------------------------------------
    // Conditions
    // ---------------------------------------------------------------

    pub fn list_conditions(&self) -> CoreResult<Vec<Condition>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, filter, cli, extras, priority, enabled FROM conditions ORDER BY priority ASC, id ASC")?;
        let rows = stmt.query_map([], Self::row_to_condition)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn create_condition(&self, spec: ConditionSpec) -> CoreResult<Condition> {
        let conn = self.conn()?;
        let extras = serde_json::to_string(&spec.extras).unwrap_or_else(|_| "{}".to_string());
        conn.execute(
            "INSERT INTO conditions (name, filter, cli, extras, priority, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![spec.name, spec.filter, spec.cli, extras, spec.priority, spec.enabled as i64],
        )
        .map_err(|e| map_unique_violation(e, "condition"))?;
        let id = conn.last_insert_rowid();
        self.get_condition_by_id(id)?.ok_or_else(|| CoreError::internal("condition vanished after insert"))
    }

    pub fn patch_condition(&self, id: i64, spec: ConditionSpec) -> CoreResult<Condition> {
        let conn = self.conn()?;
        let extras = serde_json::to_string(&spec.extras).unwrap_or_else(|_| "{}".to_string());
        let affected = conn.execute(
            "UPDATE conditions SET name = ?2, filter = ?3, cli = ?4, extras = ?5, priority = ?6, enabled = ?7 WHERE id = ?1",
            params![id, spec.name, spec.filter, spec.cli, extras, spec.priority, spec.enabled as i64],
        )?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("condition {id} not found")));
        }
        self.get_condition_by_id(id)?.ok_or_else(|| CoreError::not_found(format!("condition {id} not found")))
    }

    pub fn delete_condition(&self, id: i64) -> CoreResult<()> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM conditions WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("condition {id} not found")));
        }
        Ok(())
    }

    fn get_condition_by_id(&self, id: i64) -> CoreResult<Option<Condition>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, filter, cli, extras, priority, enabled FROM conditions WHERE id = ?1",
            params![id],
            Self::row_to_condition,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_to_condition(row: &rusqlite::Row) -> rusqlite::Result<Condition> {
        let extras_json: String = row.get(4)?;
        let extras: HashMap<String, serde_json::Value> = serde_json::from_str(&extras_json).unwrap_or_default();
        Ok(Condition {
            id: row.get(0)?,
            name: row.get(1)?,
            filter: row.get(2)?,
            cli: row.get(3)?,
            extras,
            priority: row.get(5)?,
            enabled: row.get::<_, i64>(6)? != 0,
        })
    }

    // ---------------------------------------------------------------
    // Tasks
    // ---------------------------------------------------------------

    pub fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, url, timer, preset, folder, template, cli, cookies, auto_start, handler_enabled, enabled FROM tasks ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], Self::row_to_task)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn create_task(&self, spec: TaskSpec) -> CoreResult<Task> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (name, url, timer, preset, folder, template, cli, cookies, auto_start, handler_enabled, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![spec.name, spec.url, spec.timer, spec.preset, spec.folder, spec.template, spec.cli, spec.cookies, spec.auto_start as i64, spec.handler_enabled as i64, spec.enabled as i64],
        )?;
        let id = conn.last_insert_rowid();
        self.get_task_by_id(id)?.ok_or_else(|| CoreError::internal("task vanished after insert"))
    }

    pub fn patch_task(&self, id: i64, spec: TaskSpec) -> CoreResult<Task> {
        let conn = self.conn()?;
        let affected = conn.execute(
            "UPDATE tasks SET name = ?2, url = ?3, timer = ?4, preset = ?5, folder = ?6, template = ?7, cli = ?8, cookies = ?9, auto_start = ?10, handler_enabled = ?11, enabled = ?12 WHERE id = ?1",
            params![id, spec.name, spec.url, spec.timer, spec.preset, spec.folder, spec.template, spec.cli, spec.cookies, spec.auto_start as i64, spec.handler_enabled as i64, spec.enabled as i64],
        )?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("task {id} not found")));
        }
        self.get_task_by_id(id)?.ok_or_else(|| CoreError::not_found(format!("task {id} not found")))
    }

    pub fn delete_task(&self, id: i64) -> CoreResult<()> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("task {id} not found")));
        }
        Ok(())
    }

    fn get_task_by_id(&self, id: i64) -> CoreResult<Option<Task>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, url, timer, preset, folder, template, cli, cookies, auto_start, handler_enabled, enabled FROM tasks WHERE id = ?1",
            params![id],
            Self::row_to_task,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
        Ok(Task {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            timer: row.get(3)?,
            preset: row.get(4)?,
            folder: row.get(5)?,
            template: row.get(6)?,
            cli: row.get(7)?,
            cookies: row.get(8)?,
            auto_start: row.get::<_, i64>(9)? != 0,
            handler_enabled: row.get::<_, i64>(10)? != 0,
            enabled: row.get::<_, i64>(11)? != 0,
        })
    }

    // ---------------------------------------------------------------
    // Notification targets
    // ---------------------------------------------------------------

    pub fn list_notifications(&self) -> CoreResult<Vec<NotificationTarget>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, name, on_kinds, presets, enabled, request FROM notifications ORDER BY id ASC")?;
        let rows = stmt.query_map([], Self::row_to_notification)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn create_notification(&self, spec: NotificationTargetSpec) -> CoreResult<NotificationTarget> {
        let conn = self.conn()?;
        let on_kinds = serde_json::to_string(&spec.on).unwrap_or_else(|_| "[]".to_string());
        let presets = serde_json::to_string(&spec.presets).unwrap_or_else(|_| "[]".to_string());
        let request = serde_json::to_string(&spec.request).map_err(|e| CoreError::internal(format!("serialize request: {e}")))?;
        conn.execute(
            "INSERT INTO notifications (name, on_kinds, presets, enabled, request) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![spec.name, on_kinds, presets, spec.enabled as i64, request],
        )?;
        let id = conn.last_insert_rowid();
        self.get_notification_by_id(id)?.ok_or_else(|| CoreError::internal("notification target vanished after insert"))
    }

    pub fn delete_notification(&self, id: i64) -> CoreResult<()> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM notifications WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(CoreError::not_found(format!("notification target {id} not found")));
        }
        Ok(())
    }

    fn get_notification_by_id(&self, id: i64) -> CoreResult<Option<NotificationTarget>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, name, on_kinds, presets, enabled, request FROM notifications WHERE id = ?1",
            params![id],
            Self::row_to_notification,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<NotificationTarget> {
        let on_json: String = row.get(2)?;
        let presets_json: String = row.get(3)?;
        let request_json: String = row.get(5)?;
        Ok(NotificationTarget {
            id: row.get(0)?,
            name: row.get(1)?,
            on: serde_json::from_str(&on_json).unwrap_or_default(),
            presets: serde_json::from_str(&presets_json).unwrap_or_default(),
            enabled: row.get::<_, i64>(4)? != 0,
            request: serde_json::from_str(&request_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
            })?,
        })
    }

    // ---------------------------------------------------------------
    // dl_fields (UI metadata, read-through only from the core's side)
    // ---------------------------------------------------------------

    pub fn get_dl_field(&self, key: &str) -> CoreResult<Option<String>> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT value FROM dl_fields WHERE key = ?1", params![key], |r| r.get(0)).optional()?)
    }

    pub fn set_dl_field(&self, key: &str, value: &str) -> CoreResult<()> {
        let conn = self.conn()?;
        conn.execute("INSERT INTO dl_fields (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value", params![key, value])?;
        Ok(())
    }
}

fn status_str(status: Status) -> &'static str {
    status.as_str()
}

fn map_unique_violation(e: rusqlite::Error, entity: &str) -> CoreError {
    if let rusqlite::Error::SqliteFailure(ref se, _) = e {
        if se.code == rusqlite::ErrorCode::ConstraintViolation {
            return CoreError::conflict(format!("{entity} name already exists"));
        }
    }
    CoreError::from(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ItemSpec;
    use std::collections::HashMap as Map;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn migration_seeds_four_system_default_presets() {
        let (_dir, store) = temp_store();
        let presets = store.list_presets().unwrap();
        assert_eq!(presets.iter().filter(|p| p.default).count(), 4);
    }

    #[test]
    fn default_preset_cannot_be_patched_or_deleted() {
        let (_dir, store) = temp_store();
        let spec = PresetSpec { name: "default".into(), description: String::new(), folder: String::new(), template: String::new(), cookies: None, cli: String::new(), priority: 0, download_archive: String::new() };
        assert!(store.patch_preset("default", spec).is_err());
        assert!(store.delete_preset("default").is_err());
    }

    #[test]
    fn queue_item_round_trips_and_moves_to_history() {
        let (_dir, store) = temp_store();
        let item = Item::new(
            "id-1".to_string(),
            ItemSpec { url: "https://example.com".into(), preset: None, folder: None, template: None, cli: None, cookies: None, auto_start: true, extras: Map::new() },
            Utc::now(),
        );
        store.insert_item(Table::Queue, &item).unwrap();
        assert!(store.get_item(Table::Queue, "id-1").unwrap().is_some());

        let mut finished = item.clone();
        finished.status = Status::Finished;
        store.move_to_history(&finished).unwrap();

        assert!(store.get_item(Table::Queue, "id-1").unwrap().is_none());
        assert!(store.get_item(Table::History, "id-1").unwrap().is_some());
        assert_eq!(store.history_count().unwrap(), 1);
    }

    #[test]
    fn creating_a_preset_with_duplicate_name_is_a_conflict() {
        let (_dir, store) = temp_store();
        let spec = || PresetSpec { name: "mine".into(), description: String::new(), folder: String::new(), template: String::new(), cookies: None, cli: String::new(), priority: 0, download_archive: String::new() };
        store.create_preset(spec()).unwrap();
        let err = store.create_preset(spec()).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }
}
