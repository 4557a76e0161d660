//! Markdown and JSON report rendering.
//!
//! Sources are numbered in bibliography order and claims cite them with
//! `[n]` markers, so every statement in the rendered report points at the
//! pages it came from.

use crate::config::ReportConfig;
use crate::models::{CitedClaim, Disagreement, Report, ReportMetadata, ReportSection, SourceId};
use anyhow::Result;
use std::collections::HashMap;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, options: &ReportConfig) -> String {
    let numbers = citation_numbers(report);
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", report.title));
    output.push_str(&format!("> {}\n\n", report.metadata.query));

    output.push_str(&generate_metadata_section(report));

    if !report.sections.is_empty() {
        output.push_str(&generate_table_of_contents(report));
    }

    if report.is_inconclusive() {
        output.push_str("## Result\n\n");
        output.push_str("The research was inconclusive: no claim could be grounded in a retrieved source.\n\n");
    }

    for section in &report.sections {
        output.push_str(&generate_section(section, &numbers, options));
    }

    output.push_str(&generate_disagreements_section(
        &report.disagreements,
        &numbers,
        options,
    ));
    output.push_str(&generate_notes_section(&report.notes));

    if options.include_sources {
        output.push_str(&generate_sources_section(report));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &Report) -> String {
    let metadata: &ReportMetadata = &report.metadata;
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Status:** {}\n", report.status));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Iterations:** {}\n", metadata.iterations));
    section.push_str(&format!(
        "- **Sub-questions:** {}\n",
        metadata.sub_questions_total
    ));
    if metadata.sub_questions_failed > 0 {
        section.push_str(&format!(
            "- **Sub-questions Failed:** {}\n",
            metadata.sub_questions_failed
        ));
    }
    section.push_str(&format!(
        "- **Findings:** {} in {} claim(s)\n",
        metadata.findings, metadata.clusters
    ));
    if metadata.conflicts > 0 {
        section.push_str(&format!(
            "- **Conflicting Claims:** {}\n",
            metadata.conflicts
        ));
    }
    section.push_str(&format!(
        "- **Research Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_table_of_contents(report: &Report) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    for section in &report.sections {
        toc.push_str(&format!("- [{}](#{})\n", section.heading, anchor(&section.heading)));
    }
    if !report.disagreements.is_empty() {
        toc.push_str("- [Disagreements](#disagreements)\n");
    }
    toc.push('\n');

    toc
}

/// Generate one findings section.
fn generate_section(
    section: &ReportSection,
    numbers: &HashMap<&SourceId, usize>,
    options: &ReportConfig,
) -> String {
    let mut block = String::new();

    block.push_str(&format!("## {}\n\n", section.heading));
    if !section.summary.is_empty() {
        block.push_str(&format!("{}\n\n", section.summary));
    }

    for claim in &section.claims {
        block.push_str(&format!("- {}\n", render_claim(claim, numbers, options)));
    }
    block.push('\n');

    block
}

fn generate_disagreements_section(
    disagreements: &[Disagreement],
    numbers: &HashMap<&SourceId, usize>,
    options: &ReportConfig,
) -> String {
    if disagreements.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Disagreements\n\n");
    section.push_str("Sources disagree on the following points. Both positions are reported as found.\n\n");

    for disagreement in disagreements {
        section.push_str(&format!("### {}\n\n", disagreement.topic));
        for position in &disagreement.positions {
            section.push_str(&format!(
                "- {}\n",
                render_claim(position, numbers, options)
            ));
        }
        section.push('\n');
    }

    section
}

fn generate_notes_section(notes: &[String]) -> String {
    if notes.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Notes\n\n");
    for note in notes {
        section.push_str(&format!("- {}\n", note));
    }
    section.push('\n');

    section
}

/// Generate the numbered bibliography.
fn generate_sources_section(report: &Report) -> String {
    if report.sources.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Sources\n\n");

    for (i, source) in report.sources.iter().enumerate() {
        let title = if source.title.is_empty() {
            source.id.as_str()
        } else {
            source.title.as_str()
        };
        section.push_str(&format!(
            "{}. [{}]({}) (retrieved {})\n",
            i + 1,
            title,
            source.id,
            source.retrieved_at.format("%Y-%m-%d")
        ));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by deepresearch v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn render_claim(
    claim: &CitedClaim,
    numbers: &HashMap<&SourceId, usize>,
    options: &ReportConfig,
) -> String {
    let mut markers: Vec<usize> = claim
        .source_ids
        .iter()
        .filter_map(|id| numbers.get(id).copied())
        .collect();
    markers.sort_unstable();

    let mut line = claim.text.clone();
    for n in markers {
        line.push_str(&format!(" [{}]", n));
    }
    if options.show_finding_ids {
        let ids: Vec<&str> = claim.finding_ids.iter().map(|id| id.as_str()).collect();
        line.push_str(&format!(" `{}`", ids.join(", ")));
    }

    line
}

/// Bibliography number of each source, starting at 1.
fn citation_numbers(report: &Report) -> HashMap<&SourceId, usize> {
    report
        .sources
        .iter()
        .enumerate()
        .map(|(i, source)| (&source.id, i + 1))
        .collect()
}

fn anchor(heading: &str) -> String {
    heading
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
