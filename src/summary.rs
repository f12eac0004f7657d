use std::fmt;
use std::io::{self, Write};

use serde::Serialize;

use crate::stats::{AggregateResults, DailyStats, DkimFailures, DomainCounts};
use crate::utils::{plural, sorted_by_count};

/// One listed sender (or override reason) with optional indented detail lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub label: String,
    pub count: u64,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStyle {
    /// `Envelope from: x: 3 attempts`
    Attempts,
    /// `Envelope from: x (3)` followed by details
    Subtotal,
    /// `reason (3)`
    Plain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub heading: String,
    pub total: u64,
    pub style: RowStyle,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub issues: Option<u64>,
    pub groups: Vec<Group>,
}

/// Render-ready view of an [`AggregateResults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub total: u64,
    pub spf_issues: u64,
    pub dkim_issues: u64,
    pub sections: Vec<Section>,
}

fn sender_group(heading: &str, counts: &DomainCounts) -> Group {
    let rows: Vec<Row> = sorted_by_count(counts.iter().map(|(domain, count)| (domain.clone(), *count)))
        .into_iter()
        .map(|(label, count)| Row {
            label,
            count,
            details: Vec::new(),
        })
        .collect();
    Group {
        heading: heading.to_string(),
        total: rows.iter().map(|row| row.count).sum(),
        style: RowStyle::Attempts,
        rows,
    }
}

fn dkim_groups(failures: &DkimFailures) -> Vec<Group> {
    match failures {
        DkimFailures::Detailed(detailed) => {
            let signed = sorted_by_count(
                detailed
                    .signed
                    .iter()
                    .map(|(domain, signed)| (domain.clone(), signed.count)),
            );
            let rows: Vec<Row> = signed
                .into_iter()
                .map(|(label, count)| {
                    let details = detailed.signed[&label]
                        .selectors
                        .iter()
                        .map(|(selector, reasons)| {
                            let reasons = reasons
                                .iter()
                                .map(|(reason, count)| format!("{reason}: {count}"))
                                .collect::<Vec<_>>()
                                .join(", ");
                            format!("Selector: {selector} - {{{reasons}}}")
                        })
                        .collect();
                    Row {
                        label,
                        count,
                        details,
                    }
                })
                .collect();

            vec![
                sender_group("Missing signature", &detailed.missing),
                Group {
                    heading: "Invalid signature".to_string(),
                    total: rows.iter().map(|row| row.count).sum(),
                    style: RowStyle::Subtotal,
                    rows,
                },
            ]
        }
        DkimFailures::Binary(binary) => {
            let flattened = binary.invalid_signature.iter().flat_map(|(domain, selectors)| {
                selectors
                    .iter()
                    .map(move |(selectors, count)| (format!("{domain} ({selectors})"), *count))
            });
            let rows: Vec<Row> = sorted_by_count(flattened)
                .into_iter()
                .map(|(label, count)| Row {
                    label,
                    count,
                    details: Vec::new(),
                })
                .collect();

            vec![
                Group {
                    heading: "Invalid signature".to_string(),
                    total: rows.iter().map(|row| row.count).sum(),
                    style: RowStyle::Attempts,
                    rows,
                },
                sender_group("Invalid domain", &binary.invalid_domain),
            ]
        }
    }
}

impl Summary {
    pub fn build(results: &AggregateResults) -> Self {
        let spf = Section {
            heading: "SPF".to_string(),
            issues: Some(results.spf_issues()),
            groups: vec![
                sender_group("Check failed", &results.spf_check_failed),
                sender_group("Misaligned", &results.spf_misaligned),
                sender_group("Neutral", &results.spf_neutral),
            ],
        };

        let dkim = Section {
            heading: "DKIM".to_string(),
            issues: Some(results.dkim_issues()),
            groups: dkim_groups(&results.dkim_failures),
        };

        let policies: Vec<Row> = sorted_by_count(
            results
                .overridden_policies
                .iter()
                .map(|(reasons, count)| (reasons.clone(), *count)),
        )
        .into_iter()
        .map(|(label, count)| Row {
            label,
            count,
            details: Vec::new(),
        })
        .collect();
        let overridden = Section {
            heading: "Overridden policies".to_string(),
            issues: None,
            groups: vec![Group {
                heading: String::new(),
                total: policies.iter().map(|row| row.count).sum(),
                style: RowStyle::Plain,
                rows: policies,
            }],
        };

        Summary {
            total: results.total,
            spf_issues: results.spf_issues(),
            dkim_issues: results.dkim_issues(),
            sections: vec![spf, dkim, overridden],
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(out, "Total email{}: {}", plural(self.total), self.total)?;
        writeln!(out, "SPF issue{}: {}", plural(self.spf_issues), self.spf_issues)?;
        writeln!(out, "DKIM issue{}: {}", plural(self.dkim_issues), self.dkim_issues)?;

        for section in &self.sections {
            writeln!(out)?;
            match section.issues {
                Some(issues) => writeln!(out, "# {} ({}):", section.heading, issues)?,
                None => writeln!(out, "# {}:", section.heading)?,
            }

            for group in &section.groups {
                if !group.heading.is_empty() {
                    writeln!(out, "## {} ({}):", group.heading, group.total)?;
                }
                for row in &group.rows {
                    match group.style {
                        RowStyle::Attempts => writeln!(
                            out,
                            "Envelope from: {}: {} attempt{}",
                            row.label,
                            row.count,
                            plural(row.count)
                        )?,
                        RowStyle::Subtotal => {
                            writeln!(out, "Envelope from: {} ({})", row.label, row.count)?
                        }
                        RowStyle::Plain => writeln!(out, "{} ({})", row.label, row.count)?,
                    }
                    for detail in &row.details {
                        writeln!(out, "  {detail}")?;
                    }
                }
                if !group.heading.is_empty() {
                    writeln!(out)?;
                }
            }
        }
        Ok(())
    }
}

/// Write the daily time series as CSV, one row per day in ascending order.
pub fn write_daily_csv<W: Write>(daily: &DailyStats, mut writer: W) -> io::Result<()> {
    writeln!(writer, "date,total,SPF success,DKIM success")?;
    for (day, counters) in daily.iter() {
        writeln!(
            writer,
            "{},{},{},{}",
            day.format("%Y-%m-%d"),
            counters.total,
            counters.spf_ok,
            counters.dkim_ok
        )?;
    }
    writer.flush()
}

#[derive(Serialize)]
struct JsonExport<'a> {
    results: &'a AggregateResults,
    #[serde(skip_serializing_if = "Option::is_none")]
    daily: Option<&'a DailyStats>,
}

/// Machine-readable dump of the final counters.
pub fn write_json<W: Write>(
    results: &AggregateResults,
    daily: Option<&DailyStats>,
    writer: W,
) -> serde_json::Result<()> {
    serde_json::to_writer_pretty(writer, &JsonExport { results, daily })
}
