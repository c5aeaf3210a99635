//! Accumulates normalized records into a [`ParsedTranscript`]

use serde_json::Value;

use super::text;
use super::{MessageKind, ParseStats, ParsedMessage, ParsedTranscript, Role, SessionSummary};
use crate::error::ParseError;

/// What one source record (or one content item of it) normalizes to.
/// Every probe maps each record shape onto exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outcome {
    /// A displayable message. `turn` marks plain conversational messages,
    /// which count towards the session's message count and title.
    Message {
        role: Role,
        kind: Option<MessageKind>,
        text: String,
        turn: bool,
    },
    /// Session-level metadata carried by a non-message record
    Meta {
        id: Option<String>,
        cwd: Option<String>,
        title: Option<String>,
    },
    /// A known record shape with nothing to show
    Ignored,
}

impl Outcome {
    pub(crate) fn message(role: Role, kind: MessageKind, text: impl Into<String>) -> Self {
        Outcome::Message {
            role,
            kind: Some(kind),
            text: text.into(),
            turn: false,
        }
    }

    pub(crate) fn turn(role: Role, text: impl Into<String>) -> Self {
        Outcome::Message {
            role,
            kind: Some(MessageKind::Message),
            text: text.into(),
            turn: true,
        }
    }

    /// Unknown shapes surface as `other` with no kind, if they carry text
    pub(crate) fn unknown(record: &Value) -> Self {
        let text = text::loose_text(record);
        if text.is_empty() {
            Outcome::Ignored
        } else {
            Outcome::Message {
                role: Role::Other,
                kind: None,
                text,
                turn: false,
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TranscriptBuilder {
    external_id: Option<String>,
    cwd: Option<String>,
    title: Option<String>,
    fallback_title: Option<String>,
    messages: Vec<ParsedMessage>,
    message_count: usize,
    earliest_record_ts: Option<i64>,
    latest_record_ts: Option<i64>,
    stats: ParseStats,
}

impl TranscriptBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decode one line into a JSON object, counting malformed lines
    pub(crate) fn decode_line(&mut self, line: &str) -> Option<Value> {
        if line.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => {
                self.stats.records += 1;
                Some(value)
            }
            _ => {
                self.stats.malformed_lines += 1;
                None
            }
        }
    }

    /// Track the record-level timestamp range
    pub(crate) fn observe_timestamp(&mut self, ts: Option<i64>) {
        let Some(ts) = ts else { return };
        self.earliest_record_ts = Some(self.earliest_record_ts.map_or(ts, |cur| cur.min(ts)));
        self.latest_record_ts = Some(self.latest_record_ts.map_or(ts, |cur| cur.max(ts)));
    }

    /// Formats whose id is not carried in the records themselves
    pub(crate) fn set_external_id(&mut self, id: &str) {
        self.external_id = Some(id.to_string());
    }

    pub(crate) fn set_cwd_if_absent(&mut self, cwd: Option<&str>) {
        if self.cwd.is_none() {
            self.cwd = cwd.map(str::trim).filter(|c| !c.is_empty()).map(String::from);
        }
    }

    pub(crate) fn apply(&mut self, ts: Option<i64>, outcome: Outcome) {
        match outcome {
            Outcome::Message {
                role,
                kind,
                text,
                turn,
            } => {
                let text = text.trim();
                if text.is_empty() {
                    self.stats.ignored_records += 1;
                    return;
                }
                if turn {
                    self.message_count += 1;
                    if self.title.is_none() && role == Role::User {
                        let line = text::first_line(text);
                        if !line.eq_ignore_ascii_case("warmup") {
                            self.title = Some(text::truncate_title(line));
                        }
                    }
                }
                self.messages.push(ParsedMessage {
                    role,
                    kind,
                    timestamp_ms: ts,
                    text: text.to_string(),
                });
            }
            Outcome::Meta { id, cwd, title } => {
                if self.external_id.is_none() {
                    self.external_id = id.filter(|id| !id.trim().is_empty());
                }
                self.set_cwd_if_absent(cwd.as_deref());
                if self.fallback_title.is_none() {
                    self.fallback_title = title
                        .filter(|t| !t.trim().is_empty())
                        .map(|t| text::truncate_title(&t));
                }
            }
            Outcome::Ignored => self.stats.ignored_records += 1,
        }
    }

    pub(crate) fn finish(self, file_stem: &str) -> Result<ParsedTranscript, ParseError> {
        if self.stats.records == 0 {
            return Err(if self.stats.malformed_lines > 0 {
                ParseError::NoValidRecords {
                    malformed: self.stats.malformed_lines,
                }
            } else {
                ParseError::Empty
            });
        }

        let external_id = self
            .external_id
            .unwrap_or_else(|| format!("file-{file_stem}"));

        let first_message_ts = self.messages.iter().find_map(|m| m.timestamp_ms);
        let last_message_ts = self.messages.iter().rev().find_map(|m| m.timestamp_ms);

        let title = self
            .title
            .or(self.fallback_title)
            .unwrap_or_else(|| format!("Session {}", external_id.chars().take(8).collect::<String>()));

        Ok(ParsedTranscript {
            summary: SessionSummary {
                external_id,
                cwd: self.cwd,
                title,
                started_at_ms: first_message_ts.or(self.earliest_record_ts),
                last_activity_ms: last_message_ts.or(self.latest_record_ts),
                message_count: self.message_count,
            },
            messages: self.messages,
            stats: self.stats,
        })
    }
}
