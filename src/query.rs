//! Query service: validate raw request parameters and answer reads.
//!
//! Both the HTTP API and the CLI go through here, so a malformed date,
//! sort key, source or role is reported the same way everywhere and never
//! turns into an empty result.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use serde::Deserialize;

use crate::error::QueryError;
use crate::probe::{Role, SourceFormat};
use crate::store::{
    self, keyword_terms, MessageFilter, ProjectQuery, ProjectRow, SessionDetail, SessionQuery,
    SessionRow, SharedStore, SortKey, DEFAULT_LIMIT,
};

/// Raw parameters of a session search, as received
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionParams {
    pub source: Option<String>,
    pub q: Option<String>,
    /// `YYYY-MM-DD`, local time, inclusive
    pub start: Option<String>,
    pub end: Option<String>,
    pub project: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectParams {
    pub source: Option<String>,
    pub q: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailParams {
    /// Comma-separated roles to leave out
    pub exclude_roles: Option<String>,
}

impl SessionParams {
    pub fn into_query(self) -> Result<SessionQuery, QueryError> {
        let start_ms = present(&self.start)
            .map(|d| parse_date(d, false))
            .transpose()?;
        let end_ms = present(&self.end).map(|d| parse_date(d, true)).transpose()?;
        if let (Some(start), Some(end)) = (start_ms, end_ms) {
            if start > end {
                return Err(QueryError::InvertedRange {
                    start: self.start.unwrap_or_default(),
                    end: self.end.unwrap_or_default(),
                });
            }
        }

        Ok(SessionQuery {
            source: parse_source(&self.source)?,
            terms: present(&self.q).map(keyword_terms).unwrap_or_default(),
            start_ms,
            end_ms,
            project: present(&self.project).map(String::from),
            sort: present(&self.sort).map(parse_sort).transpose()?.unwrap_or_default(),
            limit: parse_limit(&self.limit)?,
        })
    }
}

impl ProjectParams {
    pub fn into_query(self) -> Result<ProjectQuery, QueryError> {
        Ok(ProjectQuery {
            source: parse_source(&self.source)?,
            terms: present(&self.q).map(keyword_terms).unwrap_or_default(),
            limit: parse_limit(&self.limit)?,
        })
    }
}

impl DetailParams {
    pub fn into_filter(self) -> Result<MessageFilter, QueryError> {
        let exclude_roles = present(&self.exclude_roles)
            .map(|roles| {
                roles
                    .split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::parse::<Role>)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();
        Ok(MessageFilter { exclude_roles })
    }
}

/// Read access to the index for the API and the CLI
#[derive(Clone)]
pub struct QueryService {
    store: SharedStore,
}

impl QueryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn sessions(&self, params: SessionParams) -> Result<Vec<SessionRow>, QueryError> {
        let query = params.into_query()?;
        Ok(store::lock(&self.store).search_sessions(&query)?)
    }

    pub fn projects(&self, params: ProjectParams) -> Result<Vec<ProjectRow>, QueryError> {
        let query = params.into_query()?;
        Ok(store::lock(&self.store).list_projects(&query)?)
    }

    /// `Ok(None)` when no session has this id
    pub fn session(&self, id: &str, params: DetailParams) -> Result<Option<SessionDetail>, QueryError> {
        let filter = params.into_filter()?;
        Ok(store::lock(&self.store).get_session(id, &filter)?)
    }

    pub fn session_count(&self) -> Result<i64, QueryError> {
        Ok(store::lock(&self.store).session_count(None)?)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_source(value: &Option<String>) -> Result<Option<SourceFormat>, QueryError> {
    present(value).map(str::parse).transpose()
}

/// Start of day, or its last millisecond for the end of a range
pub fn parse_date(value: &str, end_of_day: bool) -> Result<i64, QueryError> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| QueryError::InvalidDate(value.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| QueryError::InvalidDate(value.to_string()))?;
    let naive = NaiveDateTime::new(date, time);

    // A DST gap can swallow local midnight; fall back to UTC there
    let local = Local.from_local_datetime(&naive);
    let millis = match (local.earliest(), local.latest()) {
        (Some(dt), _) if !end_of_day => dt.timestamp_millis(),
        (_, Some(dt)) => dt.timestamp_millis(),
        (Some(dt), None) => dt.timestamp_millis(),
        (None, None) => naive.and_utc().timestamp_millis(),
    };
    Ok(millis)
}

pub fn parse_sort(value: &str) -> Result<SortKey, QueryError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "start" | "started" => Ok(SortKey::Started),
        "last" | "end" | "updated" | "update" => Ok(SortKey::LastActivity),
        _ => Err(QueryError::InvalidSort(value.to_string())),
    }
}

fn parse_limit(value: &Option<String>) -> Result<usize, QueryError> {
    match present(value) {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => match raw.parse::<usize>() {
            Ok(limit) if limit > 0 => Ok(limit),
            _ => Err(QueryError::InvalidLimit(raw.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{MessageKind, ParsedMessage};
    use crate::store::{FileSignature, IndexStore, SessionRecord};
    use std::sync::{Arc, Mutex};

    fn params(pairs: &[(&str, &str)]) -> SessionParams {
        let mut p = SessionParams::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "source" => p.source = value,
                "q" => p.q = value,
                "start" => p.start = value,
                "end" => p.end = value,
                "project" => p.project = value,
                "sort" => p.sort = value,
                "limit" => p.limit = value,
                other => panic!("unknown param {other}"),
            }
        }
        p
    }

    #[test]
    fn test_dates_are_local_and_inclusive() {
        let query = params(&[("start", "2025-03-01"), ("end", "2025-03-01")])
            .into_query()
            .unwrap();
        let midnight = Local
            .with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
            .earliest()
            .unwrap()
            .timestamp_millis();
        assert_eq!(query.start_ms, Some(midnight));
        assert_eq!(query.end_ms, Some(midnight + 86_400_000 - 1));
    }

    #[test]
    fn test_invalid_parameters_are_errors() {
        assert!(matches!(
            params(&[("start", "03/01/2025")]).into_query(),
            Err(QueryError::InvalidDate(_))
        ));
        assert!(matches!(
            params(&[("start", "2025-03-02"), ("end", "2025-03-01")]).into_query(),
            Err(QueryError::InvertedRange { .. })
        ));
        assert!(matches!(
            params(&[("sort", "title")]).into_query(),
            Err(QueryError::InvalidSort(_))
        ));
        assert!(matches!(
            params(&[("source", "gemini")]).into_query(),
            Err(QueryError::InvalidSource(_))
        ));
        assert!(matches!(
            params(&[("limit", "0")]).into_query(),
            Err(QueryError::InvalidLimit(_))
        ));
        let roles = DetailParams {
            exclude_roles: Some("tool,critic".to_string()),
        };
        assert!(matches!(roles.into_filter(), Err(QueryError::InvalidRole(_))));
    }

    #[test]
    fn test_defaults_and_aliases() {
        let query = params(&[("q", "  "), ("project", ""), ("sort", "Updated")])
            .into_query()
            .unwrap();
        assert!(query.terms.is_empty());
        assert!(query.project.is_none());
        assert_eq!(query.sort, SortKey::LastActivity);
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(parse_sort("started").unwrap(), SortKey::Started);

        let filter = DetailParams {
            exclude_roles: Some(" tool, other ,".to_string()),
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.exclude_roles, vec![Role::Tool, Role::Other]);
    }

    #[test]
    fn test_service_round_trip() {
        let mut store = IndexStore::open_in_memory().unwrap();
        let record = SessionRecord {
            id: "claude:abc".to_string(),
            source: SourceFormat::Claude,
            external_id: "abc".to_string(),
            cwd: Some("/w".to_string()),
            title: "Fix Bug".to_string(),
            started_at_ms: Some(1),
            last_activity_ms: Some(2),
            message_count: 1,
            file_path: "/p/abc.jsonl".to_string(),
            signature: FileSignature { mtime_ms: 1, size: 1 },
            content_hash: String::new(),
            parser_version: 3,
            search_text: "fix bug".to_string(),
        };
        let messages = [ParsedMessage {
            role: Role::User,
            kind: Some(MessageKind::Message),
            timestamp_ms: Some(1),
            text: "Fix Bug".to_string(),
        }];
        store.replace_session(&record, &messages).unwrap();
        let service = QueryService::new(Arc::new(Mutex::new(store)));

        let hits = service.sessions(params(&[("q", "BUG"), ("source", "claude")])).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(service
            .sessions(params(&[("source", "codex")]))
            .unwrap()
            .is_empty());

        let projects = service.projects(ProjectParams::default()).unwrap();
        assert_eq!(projects[0].project, "/w");

        let detail = service
            .session("claude:abc", DetailParams::default())
            .unwrap()
            .unwrap();
        assert_eq!(detail.messages.len(), 1);
        assert!(service
            .session("claude:nope", DetailParams::default())
            .unwrap()
            .is_none());
        assert_eq!(service.session_count().unwrap(), 1);
    }
}
