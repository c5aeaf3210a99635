//! Claude Code probe implementation
//!
//! Extracts conversation history from Claude Code CLI sessions.
//! Data format: JSONL files in ~/.claude/projects/<project_hash>/<session_id>.jsonl

use glob::Pattern;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use super::builder::{Outcome, TranscriptBuilder};
use super::text::{self, fenced};
use super::{FileFilter, MessageKind, ParsedTranscript, Role, SourceFormat, TranscriptProbe};
use crate::error::ParseError;

const PARSER_VERSION: i64 = 4;

/// Sub-agent sidechains live next to the sessions they belong to
const DEFAULT_EXCLUDES: &[&str] = &["agent-*.jsonl"];

pub struct ClaudeCodeProbe {
    base_path: PathBuf,
    filter: FileFilter,
}

impl ClaudeCodeProbe {
    pub fn new(custom_path: Option<PathBuf>, exclude: Option<Vec<Pattern>>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".claude/projects")
        });
        let exclude = exclude.unwrap_or_else(|| {
            DEFAULT_EXCLUDES
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect()
        });
        Self {
            base_path,
            filter: FileFilter::new(exclude),
        }
    }
}

impl TranscriptProbe for ClaudeCodeProbe {
    fn format(&self) -> SourceFormat {
        SourceFormat::Claude
    }

    fn description(&self) -> &str {
        "Claude Code CLI (Anthropic)"
    }

    fn parser_version(&self) -> i64 {
        PARSER_VERSION
    }

    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn accepts(&self, path: &Path) -> bool {
        self.filter.accepts(path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClaudeRecord {
    Summary {
        summary: Option<String>,
    },
    FileHistorySnapshot {},
    QueueOperation {},
    User {
        message: Option<ClaudeMessage>,
        #[serde(rename = "toolUseResult")]
        tool_use_result: Option<Value>,
    },
    Assistant {
        message: Option<ClaudeMessage>,
    },
    System {
        content: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text {
        text: Option<String>,
    },
    Thinking {
        thinking: Option<String>,
    },
    ToolUse {
        id: Option<String>,
        name: Option<String>,
        input: Option<Value>,
    },
    ToolResult {
        tool_use_id: Option<String>,
        is_error: Option<bool>,
        content: Option<Value>,
    },
    #[serde(other)]
    Other,
}

pub(super) fn parse(file_stem: &str, content: &str) -> Result<ParsedTranscript, ParseError> {
    let mut builder = TranscriptBuilder::new();
    builder.set_external_id(file_stem);

    for line in content.lines() {
        let Some(value) = builder.decode_line(line) else {
            continue;
        };

        let ts = text::parse_timestamp(value.get("timestamp"));
        builder.observe_timestamp(ts);
        builder.set_cwd_if_absent(value.get("cwd").and_then(Value::as_str));

        let outcomes = match ClaudeRecord::deserialize(&value) {
            Ok(record) => normalize(record, &value),
            Err(_) => vec![Outcome::unknown(&value)],
        };
        if outcomes.is_empty() {
            builder.apply(ts, Outcome::Ignored);
        }
        for outcome in outcomes {
            builder.apply(ts, outcome);
        }
    }

    builder.finish(file_stem)
}

/// One record may carry several content items, each its own message
fn normalize(record: ClaudeRecord, raw: &Value) -> Vec<Outcome> {
    match record {
        ClaudeRecord::Summary { summary } => vec![Outcome::Meta {
            id: None,
            cwd: None,
            title: summary,
        }],
        ClaudeRecord::FileHistorySnapshot {} | ClaudeRecord::QueueOperation {} => {
            vec![Outcome::Ignored]
        }
        ClaudeRecord::User {
            message,
            tool_use_result,
        } => {
            let content = message.and_then(|m| m.content);
            normalize_user(content, tool_use_result.as_ref())
        }
        ClaudeRecord::Assistant { message } => {
            let content = message.and_then(|m| m.content);
            normalize_assistant(content)
        }
        ClaudeRecord::System { content } => vec![Outcome::message(
            Role::System,
            MessageKind::Context,
            text::content_text(content.as_ref()),
        )],
        ClaudeRecord::Unknown => vec![Outcome::unknown(raw)],
    }
}

fn normalize_user(content: Option<Value>, tool_use_result: Option<&Value>) -> Vec<Outcome> {
    match content {
        Some(Value::String(s)) => vec![Outcome::turn(Role::User, s)],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match decode_item(item) {
                ContentItem::ToolResult {
                    tool_use_id,
                    is_error,
                    content,
                } => Outcome::message(
                    Role::Tool,
                    MessageKind::ToolResult,
                    format_tool_result(
                        tool_use_id.as_deref(),
                        is_error,
                        content.as_ref(),
                        tool_use_result,
                    ),
                ),
                ContentItem::Text { text } => Outcome::turn(Role::User, text.unwrap_or_default()),
                _ => Outcome::turn(Role::User, loose_item_text(item)),
            })
            .collect(),
        _ => vec![],
    }
}

fn normalize_assistant(content: Option<Value>) -> Vec<Outcome> {
    match content {
        Some(Value::String(s)) => vec![Outcome::turn(Role::Assistant, s)],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match decode_item(item) {
                ContentItem::Text { text } => {
                    Outcome::turn(Role::Assistant, text.unwrap_or_default())
                }
                // Shown under `other` so the default role filter can hide it
                ContentItem::Thinking { thinking } => Outcome::message(
                    Role::Other,
                    MessageKind::Reasoning,
                    thinking.unwrap_or_default(),
                ),
                ContentItem::ToolUse { id, name, input } => Outcome::message(
                    Role::Assistant,
                    MessageKind::ToolUse,
                    format_tool_use(name.as_deref(), id.as_deref(), input.as_ref()),
                ),
                _ => Outcome::turn(Role::Assistant, loose_item_text(item)),
            })
            .collect(),
        _ => vec![],
    }
}

fn decode_item(item: &Value) -> ContentItem {
    ContentItem::deserialize(item).unwrap_or(ContentItem::Other)
}

fn loose_item_text(item: &Value) -> String {
    item.get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn format_tool_use(name: Option<&str>, id: Option<&str>, input: Option<&Value>) -> String {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or("tool");
    let mut lines = vec![format!("Tool use: {name}")];
    if let Some(id) = id.filter(|id| !id.is_empty()) {
        lines.push(format!("Tool ID: {id}"));
    }

    match input {
        Some(Value::Object(input)) => {
            if let Some(desc) = non_blank(input.get("description")) {
                lines.push(format!("Description: {desc}"));
            }
            lines.extend(summarize_input(&name.to_ascii_lowercase(), input));
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            lines.push("Input:".to_string());
            lines.push(fenced("```", "json", &text::pretty_json(other)));
        }
    }
    lines.join("\n")
}

fn summarize_input(tool: &str, input: &Map<String, Value>) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(command) = input.get("command").and_then(Value::as_str) {
        lines.push("Command:".to_string());
        lines.push(fenced("```", "bash", command));
    } else if let Some(file) = input.get("file_path").and_then(Value::as_str) {
        lines.push(format!("File: {file}"));
    } else if tool == "grep" {
        if let Some(pattern) = non_blank(input.get("pattern")) {
            lines.push(format!("Pattern: `{pattern}`"));
        }
        if let Some(path) = non_blank(input.get("path")) {
            lines.push(format!("Path: `{path}`"));
        }
        if let Some(mode) = non_blank(input.get("output_mode")) {
            lines.push(format!("Mode: `{mode}`"));
        }
        if let Some(limit) = input.get("head_limit").and_then(Value::as_i64) {
            lines.push(format!("Limit: `{limit}`"));
        }
    } else if tool == "glob" {
        if let Some(pattern) = non_blank(input.get("pattern")) {
            lines.push(format!("Pattern: `{pattern}`"));
        }
        if let Some(path) = non_blank(input.get("path")) {
            lines.push(format!("Path: `{path}`"));
        }
    } else if tool == "askuserquestion" {
        let questions = input.get("questions").and_then(Value::as_array);
        for q in questions.into_iter().flatten().filter_map(Value::as_object) {
            lines.extend(summarize_question(q));
        }
    } else {
        let rest: Vec<String> = input
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "description" | "command"))
            .filter_map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.trim().to_string(),
                    other => other.to_string(),
                };
                (!value.is_empty()).then(|| format!("- {k}: {value}"))
            })
            .collect();
        if !rest.is_empty() {
            lines.push("Input:".to_string());
            lines.extend(rest);
        }
    }
    lines
}

fn summarize_question(q: &Map<String, Value>) -> Vec<String> {
    let mut lines = vec![match non_blank(q.get("header")) {
        Some(header) => format!("Question ({header}):"),
        None => "Question:".to_string(),
    }];
    if let Some(question) = non_blank(q.get("question")) {
        lines.push(question.to_string());
    }
    let options: Vec<String> = q
        .get("options")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|opt| {
            let label = non_blank(opt.get("label"))?;
            Some(match non_blank(opt.get("description")) {
                Some(desc) => format!("- {label}: {desc}"),
                None => format!("- {label}"),
            })
        })
        .collect();
    if !options.is_empty() {
        lines.push("Options:".to_string());
        lines.extend(options);
    }
    if let Some(multi) = q.get("multiSelect").and_then(Value::as_bool) {
        lines.push(format!("Multi-select: `{multi}`"));
    }
    lines
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn format_tool_result(
    tool_use_id: Option<&str>,
    is_error: Option<bool>,
    content: Option<&Value>,
    tool_use_result: Option<&Value>,
) -> String {
    let mut lines = vec!["Tool result:".to_string()];
    if let Some(id) = tool_use_id.filter(|id| !id.is_empty()) {
        lines.push(format!("Tool use ID: {id}"));
    }
    match is_error {
        Some(true) => lines.push("Status: error".to_string()),
        Some(false) => lines.push("Status: ok".to_string()),
        None => {}
    }

    let inline = match content {
        Some(Value::String(_)) | Some(Value::Array(_)) => text::content_text(content),
        _ => String::new(),
    };

    let body = if !inline.trim().is_empty() {
        Some(inline)
    } else if let Some(streams) = tool_use_result.and_then(captured_streams) {
        Some(streams)
    } else {
        match content {
            Some(Value::Null) | None => None,
            Some(other) => Some(text::pretty_json(other)),
        }
    };

    if let Some(body) = body {
        lines.push("Output:".to_string());
        lines.push(fenced("````", "", &body));
    }
    lines.join("\n")
}

/// `stdout` then `stderr` of a Bash tool result
fn captured_streams(result: &Value) -> Option<String> {
    let stdout = result.get("stdout").and_then(Value::as_str);
    let stderr = result.get("stderr").and_then(Value::as_str);
    if stdout.is_none() && stderr.is_none() {
        return None;
    }
    let mut combined = stdout.unwrap_or_default().to_string();
    if let Some(err) = stderr.filter(|e| !e.is_empty()) {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(err);
    }
    Some(combined)
}
