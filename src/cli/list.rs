//! List command implementation

use anyhow::Result;

use super::{format_ts, project_name, truncate};
use crate::query::{QueryService, SessionParams};

pub fn run(query: &QueryService, params: SessionParams) -> Result<()> {
    let sessions = query.sessions(params)?;

    if sessions.is_empty() {
        println!("No sessions found. Run 'histview index' first.");
        return Ok(());
    }

    println!(
        "{:<12} {:<12} {:>5} {:<7} {:<16} {:<40} {}",
        "Started", "Last", "Msgs", "Source", "Project", "Title", "ID"
    );
    println!("{}", "-".repeat(120));

    for session in sessions {
        println!(
            "{:<12} {:<12} {:>5} {:<7} {:<16} {:<40} {}",
            format_ts(session.started_at_ms),
            format_ts(session.last_activity_ms),
            session.message_count,
            session.source,
            truncate(project_name(session.cwd.as_deref()), 16),
            truncate(&session.title, 40),
            session.id,
        );
    }

    Ok(())
}
