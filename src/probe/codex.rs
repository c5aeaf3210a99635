//! Codex probe implementation
//!
//! Extracts conversation history from Codex CLI rollouts.
//! Data format: JSONL files in ~/.codex/sessions/YYYY/MM/DD/rollout-<ts>-<uuid>.jsonl,
//! one `{"timestamp", "type", "payload"}` envelope per line.

use glob::Pattern;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::builder::{Outcome, TranscriptBuilder};
use super::text::{self, fenced};
use super::{FileFilter, MessageKind, ParsedTranscript, Role, SourceFormat, TranscriptProbe};
use crate::error::ParseError;

const PARSER_VERSION: i64 = 5;

/// Planning calls are UI noise; neither the call nor its output is shown
const HIDDEN_TOOL: &str = "update_plan";

pub struct CodexProbe {
    base_path: PathBuf,
    filter: FileFilter,
}

impl CodexProbe {
    pub fn new(custom_path: Option<PathBuf>, exclude: Option<Vec<Pattern>>) -> Self {
        let base_path = custom_path.unwrap_or_else(|| {
            let home = dirs::home_dir().unwrap_or_default();
            home.join(".codex/sessions")
        });
        Self {
            base_path,
            filter: FileFilter::new(exclude.unwrap_or_default()),
        }
    }
}

impl TranscriptProbe for CodexProbe {
    fn format(&self) -> SourceFormat {
        SourceFormat::Codex
    }

    fn description(&self) -> &str {
        "Codex CLI rollouts"
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

// Codex record envelopes

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CodexRecord {
    SessionMeta {
        #[serde(default)]
        payload: SessionMeta,
    },
    TurnContext {
        #[serde(default)]
        payload: TurnContext,
    },
    ResponseItem {
        payload: ResponseItem,
    },
    EventMsg {
        payload: EventMsg,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct SessionMeta {
    id: Option<String>,
    cwd: Option<String>,
    timestamp: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct TurnContext {
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseItem {
    Message {
        role: Option<String>,
        content: Option<Value>,
    },
    Reasoning {
        summary: Option<Vec<Value>>,
    },
    FunctionCall {
        name: Option<String>,
        call_id: Option<String>,
        arguments: Option<Value>,
    },
    CustomToolCall {
        name: Option<String>,
        call_id: Option<String>,
        input: Option<Value>,
    },
    FunctionCallOutput {
        call_id: Option<String>,
        output: Option<Value>,
    },
    CustomToolCallOutput {
        call_id: Option<String>,
        output: Option<Value>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EventMsg {
    AgentReasoning { text: Option<String> },
    #[serde(other)]
    Other,
}

pub(super) fn parse(file_stem: &str, content: &str) -> Result<ParsedTranscript, ParseError> {
    let mut builder = TranscriptBuilder::new();
    // call_id -> tool name, so outputs can be labeled
    let mut tool_names: HashMap<String, String> = HashMap::new();

    for line in content.lines() {
        let Some(value) = builder.decode_line(line) else {
            continue;
        };

        let ts = text::parse_timestamp(value.get("timestamp"));
        builder.observe_timestamp(ts);

        let outcome = match CodexRecord::deserialize(&value) {
            Ok(record) => {
                if let CodexRecord::SessionMeta { payload } = &record {
                    builder.observe_timestamp(text::parse_timestamp(payload.timestamp.as_ref()));
                }
                normalize(record, &value, &mut tool_names)
            }
            Err(_) => Outcome::unknown(&value),
        };
        builder.apply(ts, outcome);
    }

    builder.finish(file_stem)
}

fn normalize(record: CodexRecord, raw: &Value, tool_names: &mut HashMap<String, String>) -> Outcome {
    match record {
        CodexRecord::SessionMeta { payload } => Outcome::Meta {
            id: payload.id,
            cwd: payload.cwd,
            title: None,
        },
        CodexRecord::TurnContext { payload } => Outcome::Meta {
            id: None,
            cwd: payload.cwd,
            title: None,
        },
        CodexRecord::ResponseItem { payload } => normalize_item(payload, tool_names),
        CodexRecord::EventMsg {
            payload: EventMsg::AgentReasoning { text },
        } => Outcome::message(Role::Assistant, MessageKind::Reasoning, text.unwrap_or_default()),
        CodexRecord::EventMsg {
            payload: EventMsg::Other,
        } => Outcome::Ignored,
        CodexRecord::Unknown => Outcome::unknown(raw),
    }
}

fn normalize_item(item: ResponseItem, tool_names: &mut HashMap<String, String>) -> Outcome {
    match item {
        ResponseItem::Message { role, content } => {
            let role = Role::from_source(role.as_deref());
            let body = text::content_text(content.as_ref());
            match condense_context(&body) {
                Some(note) => Outcome::Message {
                    role: note.role.unwrap_or(role),
                    kind: Some(MessageKind::Context),
                    text: note.text,
                    turn: false,
                },
                None => Outcome::turn(role, body),
            }
        }
        ResponseItem::Reasoning { summary } => {
            let body = summary
                .unwrap_or_default()
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            Outcome::message(Role::Assistant, MessageKind::Reasoning, body)
        }
        ResponseItem::FunctionCall {
            name,
            call_id,
            arguments: input,
        }
        | ResponseItem::CustomToolCall {
            name,
            call_id,
            input,
        } => {
            let name = name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "tool".to_string());
            if let Some(id) = &call_id {
                tool_names.insert(id.clone(), name.clone());
            }
            if name == HIDDEN_TOOL {
                return Outcome::Ignored;
            }
            let raw_input = raw_string(input);
            // The model issues the call; only its output is authored by the tool
            Outcome::message(
                Role::Assistant,
                MessageKind::ToolUse,
                format_tool_use(&name, call_id.as_deref(), raw_input.as_deref()),
            )
        }
        ResponseItem::FunctionCallOutput { call_id, output }
        | ResponseItem::CustomToolCallOutput { call_id, output } => {
            let name = call_id.as_ref().and_then(|id| tool_names.get(id));
            if name.map(String::as_str) == Some(HIDDEN_TOOL) {
                return Outcome::Ignored;
            }
            Outcome::message(
                Role::Tool,
                MessageKind::ToolResult,
                format_tool_result(name.map(String::as_str), call_id.as_deref(), output),
            )
        }
        ResponseItem::Other => Outcome::Ignored,
    }
}

fn raw_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Harness-injected context, condensed for display
struct ContextNote {
    role: Option<Role>,
    text: String,
}

fn condense_context(body: &str) -> Option<ContextNote> {
    let s = body.trim();

    if let Some(inner) = text::between_tags(s, "permissions instructions") {
        return Some(ContextNote {
            role: None,
            text: inner.to_string(),
        });
    }

    if let Some(inner) = text::between_tags(s, "environment_context") {
        let mut lines = vec!["Environment context:".to_string()];
        lines.extend(
            text::tag_pairs(inner)
                .into_iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| format!("- {k}: {v}")),
        );
        if lines.len() == 1 {
            lines.push("(empty)".to_string());
        }
        return Some(ContextNote {
            role: Some(Role::System),
            text: lines.join("\n"),
        });
    }

    if s.starts_with("# AGENTS.md instructions for ") || s.contains("<INSTRUCTIONS>") {
        let mut lines = vec![text::first_line(s).to_string()];
        let skills: BTreeSet<&str> = s.lines().filter_map(skill_name).collect();
        if !skills.is_empty() {
            lines.push(format!(
                "Skills: {}",
                skills.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        lines.push("(omitted)".to_string());
        return Some(ContextNote {
            role: Some(Role::System),
            text: lines.join("\n"),
        });
    }

    None
}

/// `- name: description` list entries
fn skill_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('-')?.trim_start();
    let (name, _) = rest.split_once(':')?;
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then_some(name)
}

fn format_tool_use(name: &str, call_id: Option<&str>, raw_input: Option<&str>) -> String {
    let mut lines = vec![format!("Tool use: {name}")];
    if let Some(id) = call_id.filter(|id| !id.is_empty()) {
        lines.push(format!("Call ID: {id}"));
    }

    let Some(input) = raw_input.filter(|s| !s.trim().is_empty()) else {
        return lines.join("\n");
    };
    let key = name.to_ascii_lowercase();

    if key == "apply_patch" {
        lines.push("Patch:".to_string());
        lines.push(fenced("```", "patch", input));
        return lines.join("\n");
    }

    let parsed = text::try_parse_json(input);

    if matches!(key.as_str(), "shell" | "shell_command" | "exec_command") {
        if let Some(obj) = parsed.as_ref().and_then(Value::as_object) {
            lines.extend(format_shell_call(obj));
            return lines.join("\n");
        }
    }

    lines.push("Input:".to_string());
    match &parsed {
        Some(value) => lines.push(fenced("```", "json", &text::pretty_json(value))),
        None => lines.push(fenced("```", "", input)),
    }
    lines.join("\n")
}

fn format_shell_call(args: &Map<String, Value>) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(workdir) = args
        .get("workdir")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|w| !w.is_empty())
    {
        lines.push(format!("Workdir: `{workdir}`"));
    }

    let command = match args.get("command").or_else(|| args.get("cmd")) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(parts)) => {
            let parts: Vec<&str> = parts.iter().filter_map(Value::as_str).collect();
            match parts.as_slice() {
                [shell, flag, script] if shell.ends_with("sh") && flag.starts_with('-') => {
                    Some(script.to_string())
                }
                _ => Some(parts.join(" ")),
            }
        }
        _ => None,
    };

    match command.filter(|c| !c.trim().is_empty()) {
        Some(command) => {
            lines.push("Command:".to_string());
            lines.push(fenced("```", "bash", &command));
        }
        None => {
            lines.push("Input:".to_string());
            lines.push(fenced(
                "```",
                "json",
                &text::pretty_json(&Value::Object(args.clone())),
            ));
        }
    }
    lines
}

fn format_tool_result(name: Option<&str>, call_id: Option<&str>, output: Option<Value>) -> String {
    let mut lines = vec![match name {
        Some(name) => format!("Tool result: {name}"),
        None => "Tool result:".to_string(),
    }];
    if let Some(id) = call_id.filter(|id| !id.is_empty()) {
        lines.push(format!("Call ID: {id}"));
    }

    let mut result = ToolOutput::default();
    match output {
        Some(Value::String(raw)) => match text::try_parse_json(&raw) {
            Some(Value::Object(obj)) if obj.contains_key("output") || obj.contains_key("metadata") => {
                result = ToolOutput::structured(&obj);
            }
            _ => result = ToolOutput::plain(&raw),
        },
        Some(Value::Object(obj)) => result = ToolOutput::structured(&obj),
        Some(Value::Null) | None => {}
        Some(other) => result.body = Some(text::pretty_json(&other)),
    }

    if let Some(code) = result.exit_code {
        lines.push(if code == 0 { "Status: ok" } else { "Status: error" }.to_string());
        lines.push(format!("Exit code: {code}"));
    }
    if let Some(wall) = result.wall_time {
        lines.push(format!("Wall time: {wall}"));
    }
    if let Some(body) = result.body.filter(|b| !b.trim().is_empty()) {
        lines.push("Output:".to_string());
        lines.push(fenced("````", "", &body));
    }
    lines.join("\n")
}

#[derive(Debug, Default)]
struct ToolOutput {
    exit_code: Option<i64>,
    wall_time: Option<String>,
    body: Option<String>,
}

impl ToolOutput {
    /// `{"output": ..., "metadata": {"exit_code", "duration_seconds"}}`
    fn structured(obj: &Map<String, Value>) -> Self {
        let meta = obj.get("metadata").and_then(Value::as_object);
        let exit_code = meta
            .and_then(|m| m.get("exit_code"))
            .and_then(|c| c.as_i64().or_else(|| c.as_f64().map(|f| f as i64)));
        let wall_time = meta
            .and_then(|m| m.get("duration_seconds"))
            .and_then(Value::as_f64)
            .map(|secs| format!("{secs:.3}s"));
        let body = match obj.get("output") {
            Some(Value::String(s)) => Some(s.trim_matches('\n').to_string()),
            Some(Value::Null) | None => None,
            Some(other) => Some(text::pretty_json(other)),
        };
        Self {
            exit_code,
            wall_time,
            body,
        }
    }

    /// Free-form text with optional `Exit code:` / `Wall time:` / `Output:` sections
    fn plain(raw: &str) -> Self {
        let exit_code = raw
            .lines()
            .find_map(|l| l.trim().strip_prefix("Exit code:"))
            .and_then(|c| c.trim().parse().ok());
        let wall_time = raw
            .lines()
            .find_map(|l| l.trim().strip_prefix("Wall time:"))
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());
        let body = match raw.split_once("\nOutput:\n") {
            Some((_, rest)) => rest,
            None => raw,
        };
        Self {
            exit_code,
            wall_time,
            body: Some(body.trim_matches('\n').to_string()),
        }
    }
}
