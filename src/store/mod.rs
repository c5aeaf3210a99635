//! Session index storage with SQLite
//!
//! One row per transcript file plus one row per normalized message.
//! A session is always replaced as a whole inside one transaction, so
//! readers see either the previous or the new version, never a mix.

mod schema;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StoreError;
use crate::probe::{MessageKind, ParsedMessage, Role, SourceFormat};

pub use schema::{SCHEMA, SCHEMA_VERSION};

/// Default number of sessions/projects returned by a query
pub const DEFAULT_LIMIT: usize = 200;

/// Upper bound on a query's limit
pub const MAX_LIMIT: usize = 5000;

/// The store shared between the rescan task and the readers
pub type SharedStore = Arc<Mutex<IndexStore>>;

/// Lock the shared store. A writer that panicked mid-call cannot leave a
/// half-applied session behind (the transaction rolls back on drop), so a
/// poisoned lock is still safe to use.
pub fn lock(store: &Mutex<IndexStore>) -> MutexGuard<'_, IndexStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `(mtime_ms, size)` of a transcript file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileSignature {
    pub mtime_ms: i64,
    pub size: i64,
}

/// What the store remembers about an indexed file
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFile {
    pub session_id: String,
    pub file_path: String,
    pub signature: FileSignature,
    pub content_hash: String,
    pub parser_version: i64,
}

/// Summary row written by [`IndexStore::replace_session`]
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub source: SourceFormat,
    pub external_id: String,
    pub cwd: Option<String>,
    pub title: String,
    pub started_at_ms: Option<i64>,
    pub last_activity_ms: Option<i64>,
    pub message_count: i64,
    pub file_path: String,
    pub signature: FileSignature,
    pub content_hash: String,
    pub parser_version: i64,
    pub search_text: String,
}

/// Timestamp a session list is ordered (and date-filtered) by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Started,
    LastActivity,
}

impl SortKey {
    fn column(&self) -> &'static str {
        match self {
            SortKey::Started => "started_at_ms",
            SortKey::LastActivity => "last_activity_ms",
        }
    }

    fn tiebreak_column(&self) -> &'static str {
        match self {
            SortKey::Started => "last_activity_ms",
            SortKey::LastActivity => "started_at_ms",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub source: Option<SourceFormat>,
    /// Lowercased keyword terms, all of which must match
    pub terms: Vec<String>,
    /// Inclusive window on the sort-key timestamp
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
    /// Working directory; sessions in subdirectories match too
    pub project: Option<String>,
    pub sort: SortKey,
    pub limit: usize,
}

impl Default for SessionQuery {
    fn default() -> Self {
        Self {
            source: None,
            terms: vec![],
            start_ms: None,
            end_ms: None,
            project: None,
            sort: SortKey::default(),
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectQuery {
    pub source: Option<SourceFormat>,
    pub terms: Vec<String>,
    pub limit: usize,
}

impl Default for ProjectQuery {
    fn default() -> Self {
        Self {
            source: None,
            terms: vec![],
            limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub exclude_roles: Vec<Role>,
}

/// Split a keyword string into lowercased search terms
pub fn keyword_terms(q: &str) -> Vec<String> {
    q.split_whitespace().map(str::to_lowercase).collect()
}

pub struct IndexStore {
    conn: Connection,
    /// Files that parsed to nothing usable, by source and path. Kept in
    /// memory only, so a restart or a newer parser retries them.
    unindexable: HashMap<(SourceFormat, String), FileSignature>,
}

impl IndexStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        configure_connection(&conn)?;
        let store = Self {
            conn,
            unindexable: HashMap::new(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version != SCHEMA_VERSION {
            if version != 0 {
                tracing::info!(from = version, to = SCHEMA_VERSION, "rebuilding index schema");
            }
            self.conn.execute_batch(schema::DROP_ALL)?;
        }
        self.conn.execute_batch(SCHEMA)?;
        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    // ============================================
    // UNINDEXABLE FILES
    // ============================================

    /// Remember that `file_path` could not be indexed at `signature`
    pub fn mark_unindexable(&mut self, source: SourceFormat, file_path: &str, signature: FileSignature) {
        self.unindexable
            .insert((source, file_path.to_string()), signature);
    }

    /// Whether `file_path` already failed at exactly this signature
    pub fn is_unindexable(&self, source: SourceFormat, file_path: &str, signature: FileSignature) -> bool {
        self.unindexable
            .get(&(source, file_path.to_string()))
            .is_some_and(|s| *s == signature)
    }

    pub fn forget_unindexable(&mut self, source: SourceFormat, file_path: &str) {
        self.unindexable.remove(&(source, file_path.to_string()));
    }

    /// Drop entries of `source` for files the last walk did not see
    pub fn retain_unindexable(&mut self, source: SourceFormat, present: &HashSet<String>) {
        self.unindexable
            .retain(|(s, path), _| *s != source || present.contains(path));
    }

    // ============================================
    // WRITES
    // ============================================

    /// Recorded files of one source, keyed by path
    pub fn file_signatures(
        &self,
        source: SourceFormat,
    ) -> Result<HashMap<String, IndexedFile>, StoreError> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, file_path, file_mtime_ms, file_size, content_hash, parser_version
               FROM sessions WHERE source = ?"#,
        )?;
        let rows = stmt.query_map(params![source], |row| {
            Ok(IndexedFile {
                session_id: row.get(0)?,
                file_path: row.get(1)?,
                signature: FileSignature {
                    mtime_ms: row.get(2)?,
                    size: row.get(3)?,
                },
                content_hash: row.get(4)?,
                parser_version: row.get(5)?,
            })
        })?;

        let mut files = HashMap::new();
        for row in rows {
            let file = row?;
            files.insert(file.file_path.clone(), file);
        }
        Ok(files)
    }

    /// Replace a session and all its messages atomically.
    ///
    /// Rows stored under the same id, or under a different id for the same
    /// file, are deleted first. On error nothing is changed.
    pub fn replace_session(
        &mut self,
        record: &SessionRecord,
        messages: &[ParsedMessage],
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM sessions WHERE id = ?1 OR file_path = ?2",
            params![record.id, record.file_path],
        )?;

        tx.execute(
            r#"INSERT INTO sessions
               (id, source, external_id, cwd, title, started_at_ms, last_activity_ms,
                message_count, file_path, file_mtime_ms, file_size, content_hash,
                parser_version, search_text, indexed_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, datetime('now'))"#,
            params![
                record.id,
                record.source,
                record.external_id,
                record.cwd,
                record.title,
                record.started_at_ms,
                record.last_activity_ms,
                record.message_count,
                record.file_path,
                record.signature.mtime_ms,
                record.signature.size,
                record.content_hash,
                record.parser_version,
                record.search_text,
            ],
        )?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO messages (session_id, seq, role, kind, ts_ms, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (seq, msg) in messages.iter().enumerate() {
                stmt.execute(params![
                    record.id,
                    seq as i64,
                    msg.role,
                    msg.kind,
                    msg.timestamp_ms,
                    msg.text,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Record a new signature for a file whose content is unchanged
    pub fn touch_file(&self, file_path: &str, signature: FileSignature) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE sessions SET file_mtime_ms = ?1, file_size = ?2 WHERE file_path = ?3",
            params![signature.mtime_ms, signature.size, file_path],
        )?;
        Ok(())
    }

    pub fn remove_session(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    pub fn remove_file(&self, file_path: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .execute("DELETE FROM sessions WHERE file_path = ?", params![file_path])?;
        Ok(removed > 0)
    }

    // ============================================
    // QUERIES
    // ============================================

    pub fn search_sessions(&self, query: &SessionQuery) -> Result<Vec<SessionRow>, StoreError> {
        let mut filter = Filter::new(query.source, &query.terms);

        let sort_col = query.sort.column();
        if let Some(start) = query.start_ms {
            filter.push(
                format!("COALESCE({sort_col}, 0) >= ?"),
                [SqlValue::Integer(start)],
            );
        }
        if let Some(end) = query.end_ms {
            filter.push(
                format!("COALESCE({sort_col}, 0) <= ?"),
                [SqlValue::Integer(end)],
            );
        }
        if let Some(project) = query.project.as_deref().filter(|p| !p.is_empty()) {
            let base = project.trim_end_matches('/');
            filter.push(
                r"(cwd = ? OR cwd LIKE ? ESCAPE '\')".to_string(),
                [
                    SqlValue::Text(project.to_string()),
                    SqlValue::Text(format!("{}/%", escape_like(base))),
                ],
            );
        }

        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions{} \
             ORDER BY COALESCE({sort_col}, 0) DESC, COALESCE({}, 0) DESC, id ASC LIMIT ?",
            filter.where_sql(),
            query.sort.tiebreak_column(),
        );
        filter.args.push(SqlValue::Integer(clamp_limit(query.limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.args.iter()), session_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn list_projects(&self, query: &ProjectQuery) -> Result<Vec<ProjectRow>, StoreError> {
        let mut filter = Filter::new(query.source, &query.terms);
        filter.push("cwd IS NOT NULL AND cwd <> ''".to_string(), []);

        let sql = format!(
            "SELECT cwd, COUNT(*), MAX(last_activity_ms) FROM sessions{} \
             GROUP BY cwd ORDER BY COALESCE(MAX(last_activity_ms), 0) DESC, cwd ASC LIMIT ?",
            filter.where_sql(),
        );
        filter.args.push(SqlValue::Integer(clamp_limit(query.limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(filter.args.iter()), |row| {
            Ok(ProjectRow {
                project: row.get(0)?,
                session_count: row.get(1)?,
                last_activity_ms: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// A session with its messages in source order
    pub fn get_session(
        &self,
        id: &str,
        filter: &MessageFilter,
    ) -> Result<Option<SessionDetail>, StoreError> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"),
                params![id],
                session_row,
            )
            .optional()?;

        let Some(session) = session else {
            return Ok(None);
        };

        let mut sql = "SELECT seq, role, kind, ts_ms, text FROM messages WHERE session_id = ?".to_string();
        let mut args = vec![SqlValue::Text(id.to_string())];
        if !filter.exclude_roles.is_empty() {
            let placeholders = vec!["?"; filter.exclude_roles.len()].join(", ");
            sql.push_str(&format!(" AND role NOT IN ({placeholders})"));
            args.extend(
                filter
                    .exclude_roles
                    .iter()
                    .map(|r| SqlValue::Text(r.as_str().to_string())),
            );
        }
        sql.push_str(" ORDER BY seq");

        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(MessageRow {
                    seq: row.get(0)?,
                    role: row.get(1)?,
                    kind: row.get(2)?,
                    ts_ms: row.get(3)?,
                    text: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionDetail { session, messages }))
    }

    pub fn session_count(&self, source: Option<SourceFormat>) -> Result<i64, StoreError> {
        let count = match source {
            Some(source) => self.conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE source = ?",
                params![source],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?,
        };
        Ok(count)
    }
}

/// Configure SQLite connection for concurrent reads during a rescan.
///
/// Settings:
/// - WAL mode: readers are not blocked by the writer
/// - synchronous=NORMAL
/// - busy_timeout=5000ms: retry on lock contention instead of failing
/// - foreign_keys: messages are deleted with their session
fn configure_connection(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    let _: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

const SESSION_COLUMNS: &str = "id, source, external_id, cwd, title, started_at_ms, \
     last_activity_ms, message_count, file_path";

fn session_row(row: &Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        source: row.get(1)?,
        external_id: row.get(2)?,
        cwd: row.get(3)?,
        title: row.get(4)?,
        started_at_ms: row.get(5)?,
        last_activity_ms: row.get(6)?,
        message_count: row.get(7)?,
        file_path: row.get(8)?,
    })
}

fn clamp_limit(limit: usize) -> i64 {
    limit.clamp(1, MAX_LIMIT) as i64
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// WHERE clauses shared by the session and project queries
struct Filter {
    clauses: Vec<String>,
    args: Vec<SqlValue>,
}

impl Filter {
    fn new(source: Option<SourceFormat>, terms: &[String]) -> Self {
        let mut filter = Self {
            clauses: vec![],
            args: vec![],
        };
        if let Some(source) = source {
            filter.push(
                "source = ?".to_string(),
                [SqlValue::Text(source.as_str().to_string())],
            );
        }
        for term in terms.iter().filter(|t| !t.is_empty()) {
            filter.push(
                r"search_text LIKE ? ESCAPE '\'".to_string(),
                [SqlValue::Text(format!("%{}%", escape_like(term)))],
            );
        }
        filter
    }

    fn push(&mut self, clause: String, args: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause);
        self.args.extend(args);
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

// ============================================
// SQL CONVERSIONS
// ============================================

impl ToSql for SourceFormat {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SourceFormat {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for Role {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for MessageKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for MessageKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub source: SourceFormat,
    pub external_id: String,
    pub cwd: Option<String>,
    pub title: String,
    pub started_at_ms: Option<i64>,
    pub last_activity_ms: Option<i64>,
    pub message_count: i64,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRow {
    pub seq: i64,
    pub role: Role,
    pub kind: Option<MessageKind>,
    pub ts_ms: Option<i64>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectRow {
    pub project: String,
    pub session_count: i64,
    pub last_activity_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDetail {
    pub session: SessionRow,
    pub messages: Vec<MessageRow>,
}
