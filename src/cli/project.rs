use anyhow::Result;

use super::format_ts;
use crate::query::{ProjectParams, QueryService};

pub fn list(query: &QueryService, params: ProjectParams) -> Result<()> {
    let projects = query.projects(params)?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    println!("{:<12} {:>8}  {}", "Last", "Sessions", "Path");
    println!("{}", "-".repeat(85));
    for p in projects {
        println!(
            "{:<12} {:>8}  {}",
            format_ts(p.last_activity_ms),
            p.session_count,
            p.project
        );
    }
    Ok(())
}
