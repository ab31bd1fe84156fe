//! Schema migrations: applied on open, advancing a monotonic
//! version counter. Each migration runs inside its own transaction and is
//! idempotent — safe to re-run against a database already at or past that
//! version (guarded by the version check in `apply_all`, not by `IF NOT
//! EXISTS` alone, since later migrations may alter columns).

use rusqlite::{Connection, Transaction};

pub const CURRENT_VERSION: i64 = 1;

pub fn apply_all(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let current: i64 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |r| r.get(0))
        .unwrap_or(0);

    if current < 1 {
        let tx = conn.transaction()?;
        migration_1(&tx)?;
        tx.execute("DELETE FROM schema_version", [])?;
        tx.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;
        tx.commit()?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}

fn migration_1(tx: &Transaction) -> rusqlite::Result<()> {
    tx.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS queue (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);
        CREATE INDEX IF NOT EXISTS idx_queue_created_at ON queue(created_at);

        CREATE TABLE IF NOT EXISTS history (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            data TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_history_created_at ON history(created_at);

        CREATE TABLE IF NOT EXISTS presets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            folder TEXT NOT NULL DEFAULT '',
            template TEXT NOT NULL DEFAULT '',
            cookies TEXT,
            cli TEXT NOT NULL DEFAULT '',
            is_default INTEGER NOT NULL DEFAULT 0,
            priority INTEGER NOT NULL DEFAULT 0,
            download_archive TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS conditions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            filter TEXT NOT NULL,
            cli TEXT NOT NULL DEFAULT '',
            extras TEXT NOT NULL DEFAULT '{}',
            priority INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            timer TEXT NOT NULL DEFAULT '',
            preset TEXT NOT NULL DEFAULT '',
            folder TEXT NOT NULL DEFAULT '',
            template TEXT NOT NULL DEFAULT '',
            cli TEXT NOT NULL DEFAULT '',
            cookies TEXT,
            auto_start INTEGER NOT NULL DEFAULT 1,
            handler_enabled INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            on_kinds TEXT NOT NULL DEFAULT '[]',
            presets TEXT NOT NULL DEFAULT '[]',
            enabled INTEGER NOT NULL DEFAULT 1,
            request TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dl_fields (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;

    // The system default presets participate in migration, not ad-hoc
    // application startup logic, so they share the same transactional
    // guarantee as the schema itself.
    for (name, description, priority) in [
        ("default", "Built-in default preset", 0),
        ("best-quality", "Built-in: prefer best available quality", 10),
        ("audio-only", "Built-in: extract audio only", 10),
        ("archive-skip", "Built-in: skip items already in the archive", 5),
    ] {
        tx.execute(
            "INSERT OR IGNORE INTO presets (name, description, is_default, priority) VALUES (?1, ?2, 1, ?3)",
            rusqlite::params![name, description, priority],
        )?;
    }

    Ok(())
}
