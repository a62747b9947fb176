//! Row-level SQL for the project aggregate.
//!
//! Both store variants run exactly these functions, the blocking one on its
//! own connection and the pooled one inside `interact`, so they cannot drift
//! apart on read or write semantics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};

use crate::error::{is_unique_violation, CoreError, Result};
use crate::models::*;

/// Child relations, cleared and rewritten on every save.
const CHILD_TABLES: &[&str] = &[
    "project_requirements",
    "project_tech_stack",
    "project_constraints",
    "conversation_turns",
    "pending_questions",
    "team_members",
    "maturity_scores",
    "knowledge_documents",
    "project_notes",
];

const SUMMARY_COLUMNS: &str = "p.id, p.name, p.owner, p.phase, p.archived, p.updated_at";

pub(crate) fn project_exists(conn: &Connection, id: &ProjectId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE id = ?",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn insert_project(conn: &mut Connection, project: &Project) -> Result<Project> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if project_exists(&tx, &project.id)? {
        return Err(CoreError::DuplicateId(project.id.to_string()));
    }

    let now = Utc::now();
    let mut stored = project.clone();
    stored.created_at = now;
    stored.updated_at = now;

    tx.execute(
        "INSERT INTO projects (id, name, description, owner, phase, archived, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        (
            stored.id.as_str(),
            &stored.name,
            &stored.description,
            &stored.owner,
            stored.phase.as_str(),
            stored.archived,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CoreError::DuplicateId(stored.id.to_string())
        } else {
            CoreError::Storage(e)
        }
    })?;

    write_children(&tx, &stored)?;
    tx.commit()?;

    Ok(stored)
}

/// Replace the whole aggregate: update the parent row, then delete and
/// re-insert every child relation, all in one transaction.
pub(crate) fn replace_project(conn: &mut Connection, project: &Project) -> Result<Project> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let created_at: Option<String> = tx
        .query_row(
            "SELECT created_at FROM projects WHERE id = ?",
            [project.id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(created_at) = created_at else {
        return Err(CoreError::NotFound(project.id.to_string()));
    };

    let now = Utc::now();
    tx.execute(
        "UPDATE projects SET name = ?, description = ?, phase = ?, archived = ?, updated_at = ?
         WHERE id = ?",
        (
            &project.name,
            &project.description,
            project.phase.as_str(),
            project.archived,
            now.to_rfc3339(),
            project.id.as_str(),
        ),
    )?;

    for table in CHILD_TABLES {
        tx.execute(
            &format!("DELETE FROM {table} WHERE project_id = ?"),
            [project.id.as_str()],
        )?;
    }

    let mut stored = project.clone();
    stored.created_at = parse_datetime(created_at, 0)?;
    stored.updated_at = now;

    write_children(&tx, &stored)?;
    tx.commit()?;

    Ok(stored)
}

/// Reassemble the aggregate. All reads share one transaction, so a save
/// committing meanwhile is seen either entirely or not at all.
pub(crate) fn load_project(conn: &mut Connection, id: &ProjectId) -> Result<Project> {
    let tx = conn.transaction()?;
    let project = read_project(&tx, id)?;
    tx.commit()?;
    Ok(project)
}

fn read_project(conn: &Connection, id: &ProjectId) -> Result<Project> {
    let mut project = conn
        .query_row(
            "SELECT id, name, description, owner, phase, archived, created_at, updated_at
             FROM projects WHERE id = ?",
            [id.as_str()],
            |row| {
                Ok(Project {
                    id: ProjectId::new(row.get::<_, String>(0)?),
                    name: row.get(1)?,
                    description: row.get(2)?,
                    owner: row.get(3)?,
                    phase: parse_enum(row, 4, Phase::from_str)?,
                    archived: row.get(5)?,
                    created_at: parse_datetime(row.get(6)?, 6)?,
                    updated_at: parse_datetime(row.get(7)?, 7)?,
                    requirements: Vec::new(),
                    tech_stack: Vec::new(),
                    constraints: Vec::new(),
                    maturity: Maturity::default(),
                    conversation: Vec::new(),
                    team: Vec::new(),
                    pending_questions: VecDeque::new(),
                    knowledge_documents: Vec::new(),
                    notes: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| CoreError::NotFound(id.to_string()))?;

    project.requirements = load_list(conn, "project_requirements", id)?;
    project.tech_stack = load_list(conn, "project_tech_stack", id)?;
    project.constraints = load_list(conn, "project_constraints", id)?;

    let mut stmt = conn.prepare_cached(
        "SELECT role, content, created_at FROM conversation_turns
         WHERE project_id = ? ORDER BY position",
    )?;
    project.conversation = stmt
        .query_map([id.as_str()], |row| {
            Ok(ConversationTurn {
                role: parse_enum(row, 0, TurnRole::from_str)?,
                content: row.get(1)?,
                timestamp: parse_datetime(row.get(2)?, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT question FROM pending_questions WHERE project_id = ? ORDER BY position",
    )?;
    project.pending_questions = stmt
        .query_map([id.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<VecDeque<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT user_id, role, joined_at FROM team_members
         WHERE project_id = ? ORDER BY position",
    )?;
    project.team = stmt
        .query_map([id.as_str()], |row| {
            Ok(TeamMember {
                user: row.get(0)?,
                role: parse_enum(row, 1, TeamRole::from_str)?,
                joined_at: parse_datetime(row.get(2)?, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT phase, category, score FROM maturity_scores WHERE project_id = ?",
    )?;
    let scores = stmt
        .query_map([id.as_str()], |row| {
            Ok((
                parse_enum(row, 0, Phase::from_str)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (phase, category, score) in scores {
        project
            .maturity
            .set(phase, category, score)
            .map_err(|e| CoreError::Corrupt(e.to_string()))?;
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, title, size_bytes, content, reference FROM knowledge_documents
         WHERE project_id = ? ORDER BY position",
    )?;
    project.knowledge_documents = stmt
        .query_map([id.as_str()], |row| {
            let content: Option<String> = row.get(3)?;
            let reference: Option<String> = row.get(4)?;
            let body = match (content, reference) {
                (Some(content), None) => DocumentBody::Inline(content),
                (None, Some(reference)) => DocumentBody::Reference(reference),
                _ => {
                    return Err(conversion_error(
                        3,
                        "document must have exactly one of content or reference",
                    ))
                }
            };
            Ok(KnowledgeDocument {
                id: row.get(0)?,
                title: row.get(1)?,
                size_bytes: u64::try_from(row.get::<_, i64>(2)?)
                    .map_err(|_| conversion_error(2, "negative document size"))?,
                body,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT author, body, created_at FROM project_notes
         WHERE project_id = ? ORDER BY position",
    )?;
    project.notes = stmt
        .query_map([id.as_str()], |row| {
            Ok(ProjectNote {
                author: row.get(0)?,
                body: row.get(1)?,
                created_at: parse_datetime(row.get(2)?, 2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(project)
}

pub(crate) fn set_archived(conn: &Connection, id: &ProjectId, archived: bool) -> Result<()> {
    let rows = conn.execute(
        "UPDATE projects SET archived = ?, updated_at = ? WHERE id = ?",
        (archived, Utc::now().to_rfc3339(), id.as_str()),
    )?;
    if rows == 0 {
        return Err(CoreError::NotFound(id.to_string()));
    }
    Ok(())
}

pub(crate) fn list_by_owner(conn: &Connection, owner: &str) -> Result<Vec<ProjectSummary>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM projects p
         WHERE p.owner = ? ORDER BY p.updated_at DESC, p.id"
    ))?;
    let summaries = stmt
        .query_map([owner], |row| summary_from_row(row, None))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(summaries)
}

/// Projects `user` collaborates on without owning them.
pub(crate) fn list_by_member(conn: &Connection, user: &str) -> Result<Vec<ProjectSummary>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {SUMMARY_COLUMNS}, t.role FROM projects p
         JOIN team_members t ON t.project_id = p.id
         WHERE t.user_id = ?1 AND p.owner != ?1
         ORDER BY p.updated_at DESC, p.id"
    ))?;
    let summaries = stmt
        .query_map([user], |row| {
            let role = parse_enum(row, 6, TeamRole::from_str)?;
            summary_from_row(row, Some(role))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(summaries)
}

/// Active projects owned by `owner`. Memberships never count.
pub(crate) fn count_owned(conn: &Connection, owner: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE owner = ? AND archived = 0",
        [owner],
        |row| row.get(0),
    )?;
    to_u64(count, "project count")
}

pub(crate) fn storage_summary(conn: &Connection, id: &ProjectId) -> Result<StorageSummary> {
    if !project_exists(conn, id)? {
        return Err(CoreError::NotFound(id.to_string()));
    }
    let (document_count, total_bytes): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM knowledge_documents
         WHERE project_id = ?",
        [id.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(StorageSummary {
        document_count: to_u64(document_count, "document count")?,
        total_bytes: to_u64(total_bytes, "storage total")?,
    })
}

/// Knowledge bytes across the active projects `owner` owns.
pub(crate) fn storage_used_by_owner(conn: &Connection, owner: &str) -> Result<u64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(d.size_bytes), 0) FROM knowledge_documents d
         JOIN projects p ON p.id = d.project_id
         WHERE p.owner = ? AND p.archived = 0",
        [owner],
        |row| row.get(0),
    )?;
    to_u64(total, "storage total")
}

fn write_children(tx: &Transaction<'_>, project: &Project) -> Result<()> {
    let id = project.id.as_str();

    insert_list(tx, "project_requirements", id, &project.requirements)?;
    insert_list(tx, "project_tech_stack", id, &project.tech_stack)?;
    insert_list(tx, "project_constraints", id, &project.constraints)?;

    let mut stmt = tx.prepare_cached(
        "INSERT INTO conversation_turns (project_id, position, role, content, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for (position, turn) in project.conversation.iter().enumerate() {
        stmt.execute((
            id,
            position as i64,
            turn.role.as_str(),
            &turn.content,
            turn.timestamp.to_rfc3339(),
        ))?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO pending_questions (project_id, position, question) VALUES (?, ?, ?)",
    )?;
    for (position, question) in project.pending_questions.iter().enumerate() {
        stmt.execute((id, position as i64, question))?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO team_members (project_id, user_id, role, position, joined_at)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for (position, member) in project.team.iter().enumerate() {
        stmt.execute((
            id,
            &member.user,
            member.role.as_str(),
            position as i64,
            member.joined_at.to_rfc3339(),
        ))?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO maturity_scores (project_id, phase, category, score) VALUES (?, ?, ?, ?)",
    )?;
    for (phase, category, score) in project.maturity.iter() {
        stmt.execute((id, phase.as_str(), category, score))?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO knowledge_documents (project_id, id, position, title, size_bytes, content, reference)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for (position, doc) in project.knowledge_documents.iter().enumerate() {
        let size_bytes = i64::try_from(doc.size_bytes).map_err(|_| {
            CoreError::Corrupt(format!(
                "document {} size {} does not fit in storage",
                doc.id, doc.size_bytes
            ))
        })?;
        stmt.execute((
            id,
            &doc.id,
            position as i64,
            &doc.title,
            size_bytes,
            doc.body.content(),
            doc.body.reference(),
        ))?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT INTO project_notes (project_id, position, author, body, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )?;
    for (position, note) in project.notes.iter().enumerate() {
        stmt.execute((
            id,
            position as i64,
            &note.author,
            &note.body,
            note.created_at.to_rfc3339(),
        ))?;
    }

    Ok(())
}

fn insert_list(tx: &Transaction<'_>, table: &str, id: &str, items: &[String]) -> Result<()> {
    let mut stmt = tx.prepare_cached(&format!(
        "INSERT INTO {table} (project_id, position, body) VALUES (?, ?, ?)"
    ))?;
    for (position, item) in items.iter().enumerate() {
        stmt.execute((id, position as i64, item))?;
    }
    Ok(())
}

fn load_list(conn: &Connection, table: &str, id: &ProjectId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT body FROM {table} WHERE project_id = ? ORDER BY position"
    ))?;
    let items = stmt
        .query_map([id.as_str()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(items)
}

fn summary_from_row(row: &Row<'_>, role: Option<TeamRole>) -> rusqlite::Result<ProjectSummary> {
    Ok(ProjectSummary {
        id: ProjectId::new(row.get::<_, String>(0)?),
        name: row.get(1)?,
        owner: row.get(2)?,
        phase: parse_enum(row, 3, Phase::from_str)?,
        archived: row.get(4)?,
        role,
        updated_at: parse_datetime(row.get(5)?, 5)?,
    })
}

fn parse_enum<T>(row: &Row<'_>, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown value {raw:?}")))
}

fn parse_datetime(raw: String, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {raw:?}: {e}")))
}

fn to_u64(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| CoreError::Corrupt(format!("negative {what}: {value}")))
}

fn conversion_error(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into().into())
}
