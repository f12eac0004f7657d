use std::path::Path;
use std::time::Instant;

use chrono::NaiveDate;
use tracing::info;

use crate::classify::{classify, Classification, DkimMode, SpfOutcome};
use crate::error::{ReportError, Result, Violation};
use crate::report::{self, AggregateReport, DeliveryRecord, ReportMetadata};
use crate::stats::{bump, AggregateResults, DailyStats};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Skip reports ending on or before this day.
    pub since: Option<NaiveDate>,
    pub dkim_mode: DkimMode,
    /// Collect per-day counters alongside the totals.
    pub daily_stats: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analysis {
    pub results: AggregateResults,
    pub daily: Option<DailyStats>,
}

/// Single-pass accumulator over classified records.
#[derive(Debug)]
pub struct Aggregator {
    results: AggregateResults,
    daily: Option<DailyStats>,
}

impl Aggregator {
    pub fn new(mode: DkimMode) -> Self {
        Aggregator {
            results: AggregateResults::new(mode),
            daily: None,
        }
    }

    pub fn with_daily_stats(mode: DkimMode) -> Self {
        Aggregator {
            results: AggregateResults::new(mode),
            daily: Some(DailyStats::new()),
        }
    }

    pub fn add_report(&mut self, index: usize, report: &AggregateReport) -> Result<()> {
        for (position, record) in report.records.iter().enumerate() {
            self.add_record(&report.metadata, record).map_err(|violation| {
                ReportError::InvariantViolation {
                    report: index,
                    record: position,
                    envelope_from: record.envelope_from.clone(),
                    violation,
                }
            })?;
        }
        Ok(())
    }

    pub fn add_record(
        &mut self,
        metadata: &ReportMetadata,
        record: &DeliveryRecord,
    ) -> std::result::Result<(), Violation> {
        let spf = match classify(record)? {
            Classification::Overridden(reasons) => {
                *self
                    .results
                    .overridden_policies
                    .entry(reasons.to_string())
                    .or_insert(0) += 1;
                return Ok(());
            }
            Classification::Counted(spf) => spf,
        };

        let count = record.count;
        let sender = record.envelope_from.as_str();
        let results = &mut self.results;
        results.total += count;

        match spf {
            SpfOutcome::Pass => results.spf_success += count,
            SpfOutcome::CheckFailed => bump(&mut results.spf_check_failed, sender, count),
            SpfOutcome::Neutral => bump(&mut results.spf_neutral, sender, count),
            SpfOutcome::Misaligned => bump(&mut results.spf_misaligned, sender, count),
        }

        let dkim_passed = results.dkim_failures.add(record);
        if dkim_passed {
            results.dkim_success += count;
        }

        if let Some(daily) = self.daily.as_mut() {
            for day in metadata.days() {
                let counters = daily.day_mut(day);
                counters.total += count;
                if spf == SpfOutcome::Pass {
                    counters.spf_ok += count;
                }
                if dkim_passed {
                    counters.dkim_ok += count;
                }
            }
        }

        Ok(())
    }

    pub fn finish(self) -> Analysis {
        Analysis {
            results: self.results,
            daily: self.daily,
        }
    }
}

pub fn analyze_reports(reports: &[AggregateReport], options: &AnalysisOptions) -> Result<Analysis> {
    let mut aggregator = if options.daily_stats {
        Aggregator::with_daily_stats(options.dkim_mode)
    } else {
        Aggregator::new(options.dkim_mode)
    };

    for (index, report) in reports.iter().enumerate() {
        aggregator.add_report(index, report)?;
    }
    Ok(aggregator.finish())
}

pub fn analyze_aggregate_file(path: &Path, options: &AnalysisOptions) -> Result<Analysis> {
    let start_time = Instant::now();
    info!(action = "start", component = "analysis", file_path = ?path, dkim_mode = ?options.dkim_mode, "Starting aggregate analysis");

    let reports = report::load_reports(path, options.since)?;
    let analysis = analyze_reports(&reports, options)?;

    info!(
        action = "complete",
        component = "analysis",
        total = analysis.results.total,
        spf_issues = analysis.results.spf_issues(),
        dkim_issues = analysis.results.dkim_issues(),
        overridden = analysis.results.overridden_policies.values().sum::<u64>(),
        duration_ms = start_time.elapsed().as_millis(),
        "Analysis completed successfully"
    );
    Ok(analysis)
}
