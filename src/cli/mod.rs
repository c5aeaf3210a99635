//! Command-line front end over the indexer and the query service

pub mod index;
pub mod list;
pub mod project;
pub mod read;

use chrono::{Local, TimeZone};

/// `MM-DD HH:MM` in local time, or `-`
fn format_ts(ms: Option<i64>) -> String {
    ms.and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// First line of `s`, cut to `max` characters with a trailing `...`
fn truncate(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or("");
    if line.chars().count() > max {
        let cut: String = line.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Last path component of a working directory
fn project_name(cwd: Option<&str>) -> &str {
    match cwd {
        Some(cwd) => cwd
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or(cwd),
        None => "-",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("first line\nsecond", 20), "first line");
        assert_eq!(truncate("héllo wörld, again", 8), "héllo...");
    }

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(Some("/home/dev/app/")), "app");
        assert_eq!(project_name(Some("/")), "/");
        assert_eq!(project_name(None), "-");
    }

    #[test]
    fn test_missing_timestamp() {
        assert_eq!(format_ts(None), "-");
    }
}
