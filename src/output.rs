//! CLI output formatting.
//!
//! Output is **section-centric**: each section leads with its positional
//! index and name, with counts shown as indented context lines. Per-path
//! detail lives in the log, not here.
//!
//! # Output Format
//!
//! ## Publish
//!
//! ```text
//! Sections
//! 001 pages (5 paths)
//!     succeeded: 4
//!     failed: 1
//!     written: 4
//! 002 archive (2 paths)
//!     succeeded: 2
//!     unchanged: 2
//!
//! Published 6 of 7 paths with disk (1 failed)
//! ```
//!
//! ## Paths
//!
//! ```text
//! 001 pages (2 paths)
//!     /
//!     /about/
//! 002 archive (no paths)
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::session::{SectionReport, SessionReport};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `001 pages (5 paths)`, `002 archive (1 path)`, `003 empty (no paths)`
fn section_header(index: usize, name: &str, count: usize) -> String {
    let count = match count {
        0 => "no paths".to_string(),
        1 => "1 path".to_string(),
        n => format!("{n} paths"),
    };
    format!("{} {} ({})", format_index(index), name, count)
}

/// Non-zero counts of one section, in a fixed order.
fn section_counts(report: &SectionReport) -> Vec<(&'static str, usize)> {
    [
        ("succeeded", report.succeeded),
        ("failed", report.failed),
        ("written", report.written),
        ("created", report.created),
        ("updated", report.updated),
        ("unchanged", report.unchanged),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .collect()
}

// ============================================================================
// Publish
// ============================================================================

/// Format the run report of the `publish` command.
pub fn format_publish_report(report: &SessionReport) -> Vec<String> {
    let mut lines = Vec::new();

    if !report.sections.is_empty() {
        lines.push("Sections".to_string());
        for (i, section) in report.sections.iter().enumerate() {
            lines.push(section_header(i + 1, &section.name, section.attempted));
            for (label, n) in section_counts(section) {
                lines.push(format!("{}{}: {}", indent(1), label, n));
            }
        }
        lines.push(String::new());
    }

    let attempted = report.attempted();
    let failed = report.failed();
    let mut summary = format!(
        "Published {} of {} paths with {}",
        attempted - failed,
        attempted,
        report.backend
    );
    if failed > 0 {
        summary.push_str(&format!(" ({} failed)", failed));
    }
    lines.push(summary);
    lines
}

/// Print the run report to stdout.
pub fn print_publish_report(report: &SessionReport) {
    for line in format_publish_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Paths
// ============================================================================

/// Format resolved section paths for the `paths` command.
pub fn format_paths(sections: &[(String, Vec<String>)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, (name, paths)) in sections.iter().enumerate() {
        lines.push(section_header(i + 1, name, paths.len()));
        for path in paths {
            lines.push(format!("{}{}", indent(1), path));
        }
    }
    lines
}

/// Print resolved section paths to stdout.
pub fn print_paths(sections: &[(String, Vec<String>)]) {
    for line in format_paths(sections) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn section(name: &str, attempted: usize, failed: usize) -> SectionReport {
        SectionReport {
            name: name.to_string(),
            attempted,
            succeeded: attempted - failed,
            failed,
            written: attempted - failed,
            ..SectionReport::default()
        }
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(100), "100");
    }

    #[test]
    fn section_header_pluralizes() {
        assert_eq!(section_header(1, "pages", 5), "001 pages (5 paths)");
        assert_eq!(section_header(2, "feed", 1), "002 feed (1 path)");
        assert_eq!(section_header(3, "empty", 0), "003 empty (no paths)");
    }

    #[test]
    fn section_counts_skips_zeroes() {
        let report = SectionReport {
            name: "s".into(),
            attempted: 3,
            succeeded: 3,
            created: 1,
            unchanged: 2,
            ..SectionReport::default()
        };
        assert_eq!(
            section_counts(&report),
            vec![("succeeded", 3), ("created", 1), ("unchanged", 2)]
        );
    }

    #[test]
    fn publish_report_lists_sections_and_summary() {
        let report = SessionReport {
            backend: "disk".into(),
            sections: vec![section("pages", 5, 1), section("archive", 2, 0)],
        };
        assert_eq!(
            format_publish_report(&report),
            vec![
                "Sections",
                "001 pages (5 paths)",
                "    succeeded: 4",
                "    failed: 1",
                "    written: 4",
                "002 archive (2 paths)",
                "    succeeded: 2",
                "    written: 2",
                "",
                "Published 6 of 7 paths with disk (1 failed)",
            ]
        );
    }

    #[test]
    fn publish_report_without_sections() {
        let report = SessionReport {
            backend: "platform".into(),
            sections: vec![],
        };
        assert_eq!(
            format_publish_report(&report),
            vec!["Published 0 of 0 paths with platform"]
        );
    }

    #[test]
    fn paths_listing() {
        let sections = vec![
            ("pages".to_string(), vec!["/".to_string(), "/about/".to_string()]),
            ("archive".to_string(), vec![]),
        ];
        assert_eq!(
            format_paths(&sections),
            vec!["001 pages (2 paths)", "    /", "    /about/", "002 archive (no paths)"]
        );
    }
}
