//! Transcript probes and registry
//!
//! A probe knows where one source format keeps its transcripts, which
//! files belong to it, and how to normalize its JSONL records into the
//! common message schema.
//!
//! Sources:
//! - Codex: `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`
//! - Claude Code: `~/.claude/projects/<project>/<session>.jsonl`

mod builder;
mod claudecode;
mod codex;
pub mod text;

pub use claudecode::ClaudeCodeProbe;
pub use codex::CodexProbe;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ParseError, QueryError};
use crate::Config;

/// Source format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Codex,
    Claude,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 2] = [SourceFormat::Codex, SourceFormat::Claude];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Codex => "codex",
            SourceFormat::Claude => "claude",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codex" => Ok(SourceFormat::Codex),
            "claude" | "claude-code" | "claudecode" => Ok(SourceFormat::Claude),
            _ => Err(QueryError::InvalidSource(s.to_string())),
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
    Tool,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Developer => "developer",
            Role::Tool => "tool",
            Role::Other => "other",
        }
    }

    /// Total mapping from a source-provided role string
    pub fn from_source(role: Option<&str>) -> Role {
        role.and_then(|r| r.parse().ok()).unwrap_or(Role::Other)
    }
}

impl FromStr for Role {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "developer" => Ok(Role::Developer),
            "tool" => Ok(Role::Tool),
            "other" => Ok(Role::Other),
            _ => Err(QueryError::InvalidRole(s.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-classification of a message, used for labeling and filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Message,
    Reasoning,
    ToolUse,
    ToolResult,
    Context,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::Reasoning => "reasoning",
            MessageKind::ToolUse => "tool_use",
            MessageKind::ToolResult => "tool_result",
            MessageKind::Context => "context",
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(MessageKind::Message),
            "reasoning" => Ok(MessageKind::Reasoning),
            "tool_use" => Ok(MessageKind::ToolUse),
            "tool_result" => Ok(MessageKind::ToolResult),
            "context" => Ok(MessageKind::Context),
            other => Err(format!("unknown message kind '{other}'")),
        }
    }
}

/// One normalized message, in source order
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMessage {
    pub role: Role,
    pub kind: Option<MessageKind>,
    pub timestamp_ms: Option<i64>,
    pub text: String,
}

/// Session-level fields derived while parsing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub external_id: String,
    pub cwd: Option<String>,
    pub title: String,
    pub started_at_ms: Option<i64>,
    pub last_activity_ms: Option<i64>,
    pub message_count: usize,
}

/// Per-file parse counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Lines that decoded to a JSON object
    pub records: usize,
    /// Non-blank lines that did not
    pub malformed_lines: usize,
    /// Records (or content items) that produced no message
    pub ignored_records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTranscript {
    pub summary: SessionSummary,
    pub messages: Vec<ParsedMessage>,
    pub stats: ParseStats,
}

impl ParsedTranscript {
    /// Lowercased title plus message texts, used for keyword search
    pub fn search_text(&self) -> String {
        text::search_text(
            std::iter::once(self.summary.title.as_str())
                .chain(self.messages.iter().map(|m| m.text.as_str())),
        )
    }
}

/// Parse one transcript's raw bytes for the given source format
pub fn parse_transcript(
    format: SourceFormat,
    file_stem: &str,
    content: &[u8],
) -> Result<ParsedTranscript, ParseError> {
    let content = std::str::from_utf8(content).map_err(|e| ParseError::InvalidEncoding {
        valid_up_to: e.valid_up_to(),
    })?;
    match format {
        SourceFormat::Codex => codex::parse(file_stem, content),
        SourceFormat::Claude => claudecode::parse(file_stem, content),
    }
}

/// File selection shared by the probes: `*.jsonl`, minus exclusion globs
/// matched against the file name.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    exclude: Vec<Pattern>,
}

impl FileFilter {
    pub fn new(exclude: Vec<Pattern>) -> Self {
        Self { exclude }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let is_jsonl = path.extension().map(|e| e == "jsonl").unwrap_or(false);
        if !is_jsonl {
            return false;
        }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        !self.exclude.iter().any(|p| p.matches(name))
    }
}

/// Transcript probe trait
pub trait TranscriptProbe: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Bumped whenever normalization changes; stored rows from an older
    /// version are re-parsed.
    fn parser_version(&self) -> i64;

    /// Root directory holding this source's transcripts
    fn base_path(&self) -> &Path;

    /// Check if this probe's data source exists
    fn is_available(&self) -> bool {
        self.base_path().is_dir()
    }

    /// Whether a discovered file is one of this source's transcripts
    fn accepts(&self, path: &Path) -> bool;

    /// Normalize one transcript. Pure: no I/O.
    fn parse(&self, file_stem: &str, content: &[u8]) -> Result<ParsedTranscript, ParseError> {
        parse_transcript(self.format(), file_stem, content)
    }
}

/// Registry of enabled probes
pub struct ProbeRegistry {
    probes: Vec<Box<dyn TranscriptProbe>>,
}

impl ProbeRegistry {
    pub fn new(config: &Config) -> Self {
        let mut registry = Self::empty();

        if config.is_source_enabled(SourceFormat::Codex) {
            registry.register(Box::new(CodexProbe::new(
                config.source_path(SourceFormat::Codex),
                config.source_excludes(SourceFormat::Codex),
            )));
        }

        if config.is_source_enabled(SourceFormat::Claude) {
            registry.register(Box::new(ClaudeCodeProbe::new(
                config.source_path(SourceFormat::Claude),
                config.source_excludes(SourceFormat::Claude),
            )));
        }

        registry
    }

    pub fn empty() -> Self {
        Self { probes: vec![] }
    }

    pub fn register(&mut self, probe: Box<dyn TranscriptProbe>) {
        self.probes.push(probe);
    }

    pub fn all_probes(&self) -> Vec<&dyn TranscriptProbe> {
        self.probes.iter().map(|p| p.as_ref()).collect()
    }

    pub fn get_probe(&self, format: SourceFormat) -> Option<&dyn TranscriptProbe> {
        self.probes
            .iter()
            .find(|p| p.format() == format)
            .map(|p| p.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping_is_total() {
        assert_eq!(Role::from_source(Some("developer")), Role::Developer);
        assert_eq!(Role::from_source(Some("Assistant")), Role::Assistant);
        assert_eq!(Role::from_source(Some("critic")), Role::Other);
        assert_eq!(Role::from_source(None), Role::Other);
        assert!("critic".parse::<Role>().is_err());
    }

    #[test]
    fn test_source_format_parsing() {
        assert_eq!("codex".parse::<SourceFormat>().unwrap(), SourceFormat::Codex);
        assert_eq!(" Claude ".parse::<SourceFormat>().unwrap(), SourceFormat::Claude);
        assert!(matches!(
            "gemini".parse::<SourceFormat>(),
            Err(QueryError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_file_filter() {
        let filter = FileFilter::new(vec![Pattern::new("agent-*.jsonl").unwrap()]);
        assert!(filter.accepts(Path::new("/p/abc.jsonl")));
        assert!(!filter.accepts(Path::new("/p/agent-abc.jsonl")));
        assert!(!filter.accepts(Path::new("/p/abc.json")));
        assert!(!filter.accepts(Path::new("/p/abc")));
    }

    #[test]
    fn test_registry_respects_enabled_sources() {
        let mut config = Config::default();
        config.sources.insert(
            "claude".to_string(),
            crate::config::SourceConfig {
                enabled: false,
                base_path: None,
                exclude: None,
            },
        );
        let registry = ProbeRegistry::new(&config);
        assert!(registry.get_probe(SourceFormat::Codex).is_some());
        assert!(registry.get_probe(SourceFormat::Claude).is_none());
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let err = parse_transcript(SourceFormat::Codex, "x", &[b'{', 0xff, b'}']).unwrap_err();
        assert_eq!(err, ParseError::InvalidEncoding { valid_up_to: 1 });
    }
}
