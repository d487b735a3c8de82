//! Registry operations over the five-table schema. Every mutation runs as a
//! single transaction and checks its references before writing anything, so
//! callers either see the full effect of an operation or none of it.

use crate::error::RegistryError;
use crate::model::{Assignment, Mark, Package, Packager, PkgRelation};

use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool};

const SCHEMA_SQL: &str = include_str!("../schema.sql");

/// Create the tables if this is a fresh database. Safe to run on every start.
pub async fn init_schema(db: &SqlitePool) -> Result<(), RegistryError> {
    sqlx::raw_sql(SCHEMA_SQL).execute(db).await?;
    Ok(())
}

async fn pkg_exists<'e, E>(db: E, id: i64) -> Result<bool, RegistryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM pkg WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

async fn packager_exists<'e, E>(db: E, uid: i64) -> Result<bool, RegistryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let found: Option<i64> = sqlx::query_scalar("SELECT uid FROM packager WHERE uid = ?")
        .bind(uid)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

/// Create a packager or update the alias of an existing one. The uid comes
/// from the chat platform and never changes.
pub async fn upsert_packager(db: &SqlitePool, uid: i64, alias: &str) -> Result<(), RegistryError> {
    sqlx::query(
        "INSERT INTO packager (uid, alias) VALUES (?, ?)
         ON CONFLICT(uid) DO UPDATE SET alias = excluded.alias",
    )
    .bind(uid)
    .bind(alias)
    .execute(db)
    .await?;
    Ok(())
}

/// Create a package or update the name of an existing one.
pub async fn upsert_pkg(db: &SqlitePool, id: i64, name: &str) -> Result<(), RegistryError> {
    sqlx::query(
        "INSERT INTO pkg (id, name) VALUES (?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(id)
    .bind(name)
    .execute(db)
    .await?;
    Ok(())
}

/// Hand the package to a packager. History is kept: the new row supersedes
/// any prior assignment by its `(assigned_at, id)` ordering.
pub async fn assign(
    db: &SqlitePool,
    pkg: i64,
    assignee: i64,
    now: i64,
) -> Result<(), RegistryError> {
    let mut tx = db.begin().await?;
    if !pkg_exists(&mut *tx, pkg).await? {
        return Err(RegistryError::UnknownPackage(pkg));
    }
    if !packager_exists(&mut *tx, assignee).await? {
        return Err(RegistryError::UnknownPackager(assignee));
    }
    sqlx::query("INSERT INTO assignment (pkg, assignee, assigned_at) VALUES (?, ?, ?)")
        .bind(pkg)
        .bind(assignee)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Append the unassigned sentinel for `pkg`. Prior rows stay in history but
/// no packager is responsible for the package afterwards.
pub async fn unassign(db: &SqlitePool, pkg: i64, now: i64) -> Result<(), RegistryError> {
    let mut tx = db.begin().await?;
    if !pkg_exists(&mut *tx, pkg).await? {
        return Err(RegistryError::UnknownPackage(pkg));
    }
    sqlx::query("INSERT INTO assignment (pkg, assignee, assigned_at) VALUES (?, NULL, ?)")
        .bind(pkg)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// The packager responsible for `pkg` right now, derived from the latest
/// assignment row. `None` when the package was never assigned or the latest
/// row is the unassigned sentinel.
pub async fn current_assignee(db: &SqlitePool, pkg: i64) -> Result<Option<i64>, RegistryError> {
    if !pkg_exists(db, pkg).await? {
        return Err(RegistryError::UnknownPackage(pkg));
    }
    let latest: Option<Assignment> = sqlx::query_as(
        "SELECT * FROM assignment WHERE pkg = ? ORDER BY assigned_at DESC, id DESC LIMIT 1",
    )
    .bind(pkg)
    .fetch_optional(db)
    .await?;
    Ok(latest.and_then(|a| a.assignee))
}

/// Append one mark to the audit log and return its id. Marks are never
/// updated or deleted; a correction is another mark.
pub async fn record_mark(
    db: &SqlitePool,
    name: &str,
    for_pkg: Option<i64>,
    marked_by: Option<i64>,
    msg_id: i64,
    comment: Option<&str>,
    now: i64,
) -> Result<i64, RegistryError> {
    let mut tx = db.begin().await?;
    if let Some(pkg) = for_pkg {
        if !pkg_exists(&mut *tx, pkg).await? {
            return Err(RegistryError::UnknownPackage(pkg));
        }
    }
    if let Some(uid) = marked_by {
        if !packager_exists(&mut *tx, uid).await? {
            return Err(RegistryError::UnknownPackager(uid));
        }
    }
    let done = sqlx::query(
        "INSERT INTO mark (name, marked_by, marked_at, msg_id, comment, for_pkg)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(marked_by)
    .bind(now)
    .bind(msg_id)
    .bind(comment)
    .bind(for_pkg)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(done.last_insert_rowid())
}

/// Record that `request` is blocked on `required`. One row per ordered pair;
/// adding it again only refreshes the status.
pub async fn add_relation(
    db: &SqlitePool,
    request: i64,
    required: i64,
    status: &str,
) -> Result<(), RegistryError> {
    if request == required {
        return Err(RegistryError::SelfDependency(request));
    }
    let mut tx = db.begin().await?;
    for id in [request, required] {
        if !pkg_exists(&mut *tx, id).await? {
            return Err(RegistryError::UnknownPackage(id));
        }
    }
    sqlx::query(
        "INSERT INTO pkg_relation (status, required, request) VALUES (?, ?, ?)
         ON CONFLICT(request, required) DO UPDATE SET status = excluded.status",
    )
    .bind(status)
    .bind(required)
    .bind(request)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// The dependency is satisfied, drop the edge. No-op when the pair was never
/// recorded or already resolved.
pub async fn resolve_relation(
    db: &SqlitePool,
    request: i64,
    required: i64,
) -> Result<(), RegistryError> {
    sqlx::query("DELETE FROM pkg_relation WHERE request = ? AND required = ?")
        .bind(request)
        .bind(required)
        .execute(db)
        .await?;
    Ok(())
}

/// Resolve every relation waiting on `required` at once. Used when a package
/// leaves the review queue and everything blocked on it can proceed. Returns
/// how many edges were dropped.
pub async fn resolve_relations_for(db: &SqlitePool, required: i64) -> Result<u64, RegistryError> {
    let done = sqlx::query("DELETE FROM pkg_relation WHERE required = ?")
        .bind(required)
        .execute(db)
        .await?;
    Ok(done.rows_affected())
}

/// Whether `pkg` is ready: no outgoing relation row exists for it. An
/// unresolved relation blocks regardless of how the required package is
/// doing; resolution is the only way to unblock.
///
/// The relation graph is user-populated and may contain cycles, so the walk
/// keeps a visited set and reports a cycle instead of recursing into it.
pub async fn is_ready(db: &SqlitePool, pkg: i64) -> Result<bool, RegistryError> {
    if !pkg_exists(db, pkg).await? {
        return Err(RegistryError::UnknownPackage(pkg));
    }

    let relations: Vec<PkgRelation> =
        sqlx::query_as("SELECT status, required, request FROM pkg_relation")
            .fetch_all(db)
            .await?;

    let mut deps: HashMap<i64, Vec<i64>> = HashMap::new();
    for rel in relations {
        deps.entry(rel.request).or_default().push(rel.required);
    }

    if let Some(cycle) = find_cycle(&deps, pkg) {
        return Err(RegistryError::CyclicDependency(cycle));
    }

    Ok(!deps.contains_key(&pkg))
}

/// Depth-first walk from `start` over the relation edges. Returns the members
/// of the first cycle reachable from `start`, if any.
fn find_cycle(deps: &HashMap<i64, Vec<i64>>, start: i64) -> Option<Vec<i64>> {
    enum Visit {
        InProgress,
        Done,
    }

    let mut state: HashMap<i64, Visit> = HashMap::new();
    let mut path: Vec<i64> = Vec::new();
    // (node, index of the next child to walk)
    let mut stack: Vec<(i64, usize)> = Vec::new();

    state.insert(start, Visit::InProgress);
    path.push(start);
    stack.push((start, 0));

    while let Some((node, next_child)) = stack.pop() {
        let children = deps.get(&node).map(Vec::as_slice).unwrap_or(&[]);
        let Some(&child) = children.get(next_child) else {
            // every edge of `node` walked
            state.insert(node, Visit::Done);
            path.pop();
            continue;
        };
        stack.push((node, next_child + 1));
        match state.get(&child) {
            // Hit a node that is still on the walk path: that path suffix is
            // the cycle.
            Some(Visit::InProgress) => {
                let from = path.iter().position(|&n| n == child).unwrap_or(0);
                return Some(path[from..].to_vec());
            }
            Some(Visit::Done) => {}
            None => {
                state.insert(child, Visit::InProgress);
                path.push(child);
                stack.push((child, 0));
            }
        }
    }

    None
}

/// A single unit of the workList
#[derive(serde::Serialize)]
pub struct WorkListUnit {
    alias: String,
    assign: Vec<String>,
}

/// Get list of packager and their assigned packages
pub async fn get_working_list(db: &SqlitePool) -> Result<Vec<WorkListUnit>, RegistryError> {
    let packager: Vec<Packager> = sqlx::query_as("SELECT * FROM packager")
        .fetch_all(db)
        .await?;

    let mut list = Vec::new();

    for p in packager {
        let assign = sqlx::query(
            "SELECT name FROM pkg WHERE ? = (
                 SELECT assignee FROM assignment
                 WHERE assignment.pkg = pkg.id
                 ORDER BY assignment.assigned_at DESC, assignment.id DESC LIMIT 1)",
        )
        .bind(p.uid)
        .map(|row: SqliteRow| row.get::<String, _>("name"))
        .fetch_all(db)
        .await?;
        list.push(WorkListUnit {
            alias: p.alias,
            assign,
        })
    }

    Ok(list)
}

/// One mark as presented in the markList
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkUnit {
    name: String,
    marked_by: Option<i64>,
    marked_at: i64,
    msg_id: i64,
    comment: Option<String>,
}

/// A single unit of the markList: one package and its marks
#[derive(serde::Serialize)]
pub struct MarkListUnit {
    name: String,
    marks: Vec<MarkUnit>,
}

/// Get list of packages that carry marks, each with its marks in the order
/// they were recorded
pub async fn get_mark_list(db: &SqlitePool) -> Result<Vec<MarkListUnit>, RegistryError> {
    let marked: Vec<Package> = sqlx::query_as(
        "SELECT DISTINCT pkg.id, pkg.name FROM pkg
         JOIN mark ON mark.for_pkg = pkg.id ORDER BY pkg.id",
    )
    .fetch_all(db)
    .await?;

    let mut list = Vec::new();

    for p in marked {
        let marks: Vec<Mark> = sqlx::query_as("SELECT * FROM mark WHERE for_pkg = ? ORDER BY id")
            .bind(p.id)
            .fetch_all(db)
            .await?;
        list.push(MarkListUnit {
            name: p.name,
            marks: marks
                .into_iter()
                .map(|m| MarkUnit {
                    name: m.name,
                    marked_by: m.marked_by,
                    marked_at: m.marked_at,
                    msg_id: m.msg_id,
                    comment: m.comment,
                })
                .collect(),
        })
    }

    Ok(list)
}

/// Lookup key for [`find_packager`]
pub enum FindPackagerProp<'a> {
    ByUid(i64),
    /// The packager currently assigned to the named package
    ByPkgname(&'a str),
}

/// Find a packager row. Returns `None` when nothing matches, e.g. the named
/// package is currently unassigned.
pub async fn find_packager(
    db: &SqlitePool,
    prop: FindPackagerProp<'_>,
) -> Result<Option<Packager>, RegistryError> {
    match prop {
        FindPackagerProp::ByUid(uid) => packager_by_uid(db, uid).await,
        FindPackagerProp::ByPkgname(name) => {
            let Some(pkg) = find_pkg_id(db, name).await? else {
                return Ok(None);
            };
            let Some(uid) = current_assignee(db, pkg).await? else {
                return Ok(None);
            };
            packager_by_uid(db, uid).await
        }
    }
}

async fn packager_by_uid(db: &SqlitePool, uid: i64) -> Result<Option<Packager>, RegistryError> {
    let found = sqlx::query_as("SELECT * FROM packager WHERE uid = ?")
        .bind(uid)
        .fetch_optional(db)
        .await?;
    Ok(found)
}

/// Resolve a package name to its id. Names are not guaranteed unique; the
/// lowest id wins when they collide.
pub async fn find_pkg_id(db: &SqlitePool, name: &str) -> Result<Option<i64>, RegistryError> {
    let id = sqlx::query_scalar("SELECT id FROM pkg WHERE name = ? ORDER BY id LIMIT 1")
        .bind(name)
        .fetch_optional(db)
        .await?;
    Ok(id)
}
