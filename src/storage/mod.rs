//! SQLite storage layer -- schema, queries, migrations.

pub mod executions;
pub mod schema;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// A site under test. Scheduled runs look up their base URL here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub base_url: String,
}

/// Insert a project, or update name/base URL when the id already exists.
pub fn upsert_project(pool: &Pool, project: &Project) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO projects (id, name, base_url) VALUES (?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name, base_url = excluded.base_url",
        params![project.id, project.name, project.base_url],
    )
    .context("Failed to upsert project")?;
    Ok(())
}

pub fn get_project(pool: &Pool, id: &str) -> Result<Option<Project>> {
    let conn = pool.get()?;
    let project = conn
        .query_row(
            "SELECT id, name, base_url FROM projects WHERE id = ?1",
            params![id],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    base_url: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(project)
}

pub fn list_projects(pool: &Pool) -> Result<Vec<Project>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT id, name, base_url FROM projects ORDER BY id")?;
    let rows = stmt.query_map([], |row| {
        Ok(Project {
            id: row.get(0)?,
            name: row.get(1)?,
            base_url: row.get(2)?,
        })
    })?;

    let mut projects = Vec::new();
    for r in rows {
        projects.push(r?);
    }
    Ok(projects)
}

/// Parse an RFC 3339 column value, treating garbage as absent.
pub(crate) fn parse_timestamp(raw: Option<String>) -> Option<chrono::DateTime<chrono::Utc>> {
    raw.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

#[cfg(test)]
pub(crate) fn temp_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let pool = open_pool(path.to_str().unwrap()).unwrap();
    (dir, pool)
}
