//! Embedded knowledge index.
//!
//! Each knowledge document is embedded as a hashed term-frequency vector and
//! stored in the `knowledge_vectors` vec0 table, ranked with sqlite-vec's
//! `vec_distance_cosine`. The index keeps its own connection, opened on the
//! project database by default, until [`KnowledgeIndex::close`].
//!
//! Every project remembers the `updated_at` of the aggregate it was last
//! indexed from, and an older aggregate never replaces a newer one.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::schema;
use crate::error::{CoreError, Result};
use crate::models::{Project, ProjectId};

/// Vector width. Terms are hashed into this many buckets. Must match the
/// `float[N]` column of `knowledge_vectors`.
pub const DIMENSIONS: usize = 256;

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: String,
    pub title: String,
    pub score: f32,
}

pub struct KnowledgeIndex {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl KnowledgeIndex {
    /// Open the index database, applying the schema if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        schema::register_vector_extension();
        let mut conn = Connection::open(&path)?;
        schema::configure_connection(&conn)?;
        schema::ensure_schema(&mut conn)?;

        tracing::debug!("Opened knowledge index {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-index every document of `project`, dropping documents it no
    /// longer has. Returns false, changing nothing, when a newer revision of
    /// the project is already indexed.
    pub fn replace_project(&self, project: &Project) -> Result<bool> {
        let key = project.id.as_str();
        let revision = project.updated_at.timestamp_micros();

        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let indexed: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM knowledge_revisions WHERE project_id = ?",
                    [key],
                    |row| row.get(0),
                )
                .optional()?;
            if indexed.is_some_and(|indexed| indexed > revision) {
                tracing::debug!("Index already holds a newer revision of {}", key);
                return Ok(false);
            }

            delete_entries(&tx, key)?;
            {
                let mut entry = tx.prepare_cached(
                    "INSERT INTO knowledge_entries (project_id, document_id, title) VALUES (?, ?, ?)",
                )?;
                let mut vector = tx
                    .prepare_cached("INSERT INTO knowledge_vectors (rowid, embedding) VALUES (?, ?)")?;
                for doc in &project.knowledge_documents {
                    entry.execute((key, &doc.id, &doc.title))?;
                    let text = match doc.body.content() {
                        Some(content) => format!("{} {}", doc.title, content),
                        None => doc.title.clone(),
                    };
                    // Documents without terms are listed but never ranked.
                    if let Some(embedding) = embed(&text) {
                        vector.execute((tx.last_insert_rowid(), embedding_to_bytes(&embedding)))?;
                    }
                }
            }
            tx.execute(
                "INSERT INTO knowledge_revisions (project_id, revision) VALUES (?1, ?2)
                 ON CONFLICT(project_id) DO UPDATE SET revision = excluded.revision",
                (key, revision),
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    /// The `limit` documents of one project most similar to `query`.
    /// Documents sharing no term with the query are never returned.
    pub fn search(&self, id: &ProjectId, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let Some(query) = embed(query) else {
            return self.with_conn(|_| Ok(Vec::new()));
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT e.document_id, e.title, vec_distance_cosine(v.embedding, ?2) AS distance
                 FROM knowledge_entries e
                 JOIN knowledge_vectors v ON v.rowid = e.id
                 WHERE e.project_id = ?1
                 ORDER BY distance, e.document_id
                 LIMIT ?3",
            )?;
            let hits = stmt
                .query_map(params![id.as_str(), embedding_to_bytes(&query), limit], |row| {
                    let distance: f64 = row.get(2)?;
                    Ok(SearchHit {
                        document_id: row.get(0)?,
                        title: row.get(1)?,
                        score: (1.0 - distance) as f32,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits.into_iter().filter(|hit| hit.score > 0.0).collect())
        })
    }

    /// Number of indexed documents across all projects.
    pub fn document_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| row.get(0))?;
            u64::try_from(count).map_err(|_| CoreError::Corrupt(format!("entry count {count}")))
        })
    }

    /// Release the connection. Idempotent.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.lock()?.take() else {
            return Ok(());
        };
        tracing::debug!("Closed knowledge index {}", self.path.display());
        conn.close().map_err(|(_, e)| CoreError::Storage(e))
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|conn| conn.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Corrupt("knowledge index lock poisoned".to_string()))
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(CoreError::Closed)?;
        f(conn)
    }
}

impl Drop for KnowledgeIndex {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close knowledge index {}: {}", self.path.display(), e);
        }
    }
}

fn delete_entries(conn: &Connection, project_id: &str) -> rusqlite::Result<()> {
    let ids = {
        let mut stmt = conn.prepare_cached("SELECT id FROM knowledge_entries WHERE project_id = ?")?;
        let ids = stmt
            .query_map([project_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        ids
    };
    let mut stmt = conn.prepare_cached("DELETE FROM knowledge_vectors WHERE rowid = ?")?;
    for id in ids {
        stmt.execute([id])?;
    }
    conn.execute("DELETE FROM knowledge_entries WHERE project_id = ?", [project_id])?;
    Ok(())
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
}

/// FNV-1a, stable across platforms and releases.
fn fnv1a(term: &str) -> u64 {
    term.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

/// L2-normalized hashed term-frequency vector, or None for text without
/// terms.
fn embed(text: &str) -> Option<Vec<f32>> {
    let mut vector = vec![0.0f32; DIMENSIONS];
    for term in tokenize(text) {
        vector[(fnv1a(&term) % DIMENSIONS as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return None;
    }
    vector.iter_mut().for_each(|v| *v /= norm);
    Some(vector)
}

/// Little-endian f32 blob, the format vec0 stores.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}
