//! The one definition of the physical layout.
//!
//! Both store variants call [`ensure_schema`] on startup, so the blocking and
//! pooled paths always see byte-identical structure.

use std::sync::Once;
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use sqlite_vec::sqlite3_vec_init;

use crate::error::{is_contention, CoreError, Result};

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001",
        name: "initial",
        sql: include_str!("migrations/001_initial.sql"),
    },
    Migration {
        version: "002",
        name: "knowledge_and_notes",
        sql: include_str!("migrations/002_knowledge_and_notes.sql"),
    },
    Migration {
        version: "003",
        name: "knowledge_vectors",
        sql: include_str!("migrations/003_knowledge_vectors.sql"),
    },
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts at switching a connection to WAL before giving up.
const WAL_ATTEMPTS: u32 = 5;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards in this
/// process. Must run before the connection that applies the schema is opened.
#[allow(clippy::missing_transmute_annotations)]
pub fn register_vector_extension() {
    SQLITE_VEC_INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init has the entry point signature that
        // sqlite3_auto_extension expects; the transmute only erases it to the
        // `Option<unsafe extern "C" fn()>` the binding takes. The symbol is
        // statically linked and lives for the whole process.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite3_vec_init as *const (),
            )));
        }
        tracing::debug!("sqlite-vec extension registered");
    });
}

/// Bring the database up to the current schema.
///
/// Idempotent, and safe to race against other processes: every object is
/// created with `IF NOT EXISTS`, and the pending-migration check and the
/// migrations themselves run in one `BEGIN IMMEDIATE` transaction, so only
/// one caller applies a given version.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .map_err(unavailable("create schema_migrations table"))?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(unavailable("begin schema transaction"))?;

    let applied = get_applied_migrations(&tx).map_err(unavailable("read applied migrations"))?;

    for migration in MIGRATIONS {
        if applied.iter().any(|v| v == migration.version) {
            continue;
        }
        tracing::info!(
            "Applying migration {}: {}",
            migration.version,
            migration.name
        );
        tx.execute_batch(migration.sql).map_err(|e| {
            CoreError::SchemaUnavailable(format!(
                "failed to apply migration {}: {}: {e}",
                migration.version, migration.name
            ))
        })?;
        mark_migration_applied(&tx, migration.version, migration.name)
            .map_err(unavailable("record migration"))?;
    }

    tx.commit().map_err(unavailable("commit schema transaction"))?;
    Ok(())
}

/// Versions already applied, in order.
pub fn applied_versions(conn: &Connection) -> Result<Vec<String>> {
    Ok(get_applied_migrations(conn)?)
}

/// The DDL of every table and index, sorted by kind and name.
///
/// Two databases with equal `describe` output have identical structure.
pub fn describe(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT sql FROM sqlite_master
         WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
         ORDER BY type, name",
    )?;
    let ddl = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ddl)
}

/// Per-connection settings shared by both store variants.
///
/// The busy timeout goes first so the rest waits on other connections.
/// Switching a fresh file to WAL takes an exclusive lock and can report BUSY
/// without consulting the busy handler, so that step is retried.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;")?;

    let mut attempt = 1;
    loop {
        match conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        }) {
            Ok(_) => return Ok(()),
            Err(e) if is_contention(&e) && attempt < WAL_ATTEMPTS => {
                tracing::debug!("journal_mode switch busy, attempt {}", attempt);
                std::thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn get_applied_migrations(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(versions)
}

fn mark_migration_applied(conn: &Connection, version: &str, name: &str) -> rusqlite::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
        (version, name, &now),
    )?;
    Ok(())
}

fn unavailable(step: &'static str) -> impl FnOnce(rusqlite::Error) -> CoreError {
    move |e| CoreError::SchemaUnavailable(format!("failed to {step}: {e}"))
}
