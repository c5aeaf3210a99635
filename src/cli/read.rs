//! Read command implementation

use anyhow::Result;

use super::format_ts;
use crate::query::{DetailParams, QueryService};

pub fn run(query: &QueryService, session_id: &str, exclude_roles: Option<String>) -> Result<()> {
    let detail = query.session(session_id, DetailParams { exclude_roles })?;

    let Some(detail) = detail else {
        println!("Session '{}' not found.", session_id);
        return Ok(());
    };
    let session = &detail.session;

    println!("\n{}", "=".repeat(80));
    println!("Session: {} ({})", session.id, session.title);
    println!(
        "Source: {} | Started: {} | Last: {}",
        session.source,
        format_ts(session.started_at_ms),
        format_ts(session.last_activity_ms)
    );
    if let Some(cwd) = &session.cwd {
        println!("Project: {}", cwd);
    }
    println!("File: {}", session.file_path);
    println!("{}", "=".repeat(80));

    if detail.messages.is_empty() {
        println!("\nNo messages to show.");
        return Ok(());
    }

    for msg in &detail.messages {
        let kind = msg
            .kind
            .map(|k| format!(" | {}", k.as_str()))
            .unwrap_or_default();
        println!("\n[{}] {}{} @ {}", msg.seq, msg.role, kind, format_ts(msg.ts_ms));
        println!("{}", "-".repeat(40));
        println!("{}", msg.text);
    }

    Ok(())
}
