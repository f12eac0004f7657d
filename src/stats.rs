use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::classify::{classify_dkim_binary, classify_dkim_detailed, BinaryDkim, DetailedDkim, DkimMode};
use crate::report::{DeliveryRecord, DkimAuthDetail};

/// Sender domain → email count.
pub type DomainCounts = HashMap<String, u64>;

pub(crate) fn bump(counts: &mut DomainCounts, domain: &str, count: u64) {
    *counts.entry(domain.to_string()).or_insert(0) += count;
}

/// DKIM failures of one sender that carried at least one signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SignedFailures {
    /// Emails, counted once per record regardless of how many signatures it had.
    pub count: u64,
    /// selector → auth result → emails, counted once per signature.
    pub selectors: BTreeMap<String, BTreeMap<String, u64>>,
}

impl SignedFailures {
    pub fn add(&mut self, details: &[DkimAuthDetail], count: u64) {
        self.count += count;
        for detail in details {
            let reasons = self.selectors.entry(detail.selector.clone()).or_default();
            *reasons.entry(detail.result.as_str().to_string()).or_insert(0) += count;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetailedDkimFailures {
    pub missing: DomainCounts,
    pub signed: HashMap<String, SignedFailures>,
}

impl DetailedDkimFailures {
    /// Returns whether DKIM passed; failures are recorded under `sender`.
    pub fn add(&mut self, outcome: DetailedDkim<'_>, sender: &str, count: u64) -> bool {
        match outcome {
            DetailedDkim::Pass => return true,
            DetailedDkim::Missing => bump(&mut self.missing, sender, count),
            DetailedDkim::Signed(details) => self
                .signed
                .entry(sender.to_string())
                .or_default()
                .add(details, count),
        }
        false
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BinaryDkimFailures {
    /// sender → failing key locations → emails.
    pub invalid_signature: HashMap<String, BTreeMap<String, u64>>,
    pub invalid_domain: DomainCounts,
}

impl BinaryDkimFailures {
    /// Returns whether DKIM passed; failures are recorded under `sender`.
    pub fn add(&mut self, outcome: BinaryDkim, sender: &str, count: u64) -> bool {
        match outcome {
            BinaryDkim::Pass => return true,
            BinaryDkim::InvalidSignature(selectors) => {
                *self
                    .invalid_signature
                    .entry(sender.to_string())
                    .or_default()
                    .entry(selectors)
                    .or_insert(0) += count
            }
            BinaryDkim::InvalidDomain => bump(&mut self.invalid_domain, sender, count),
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DkimFailures {
    Detailed(DetailedDkimFailures),
    Binary(BinaryDkimFailures),
}

impl DkimFailures {
    pub fn new(mode: DkimMode) -> Self {
        match mode {
            DkimMode::Detailed => DkimFailures::Detailed(DetailedDkimFailures::default()),
            DkimMode::Binary => DkimFailures::Binary(BinaryDkimFailures::default()),
        }
    }

    pub fn mode(&self) -> DkimMode {
        match self {
            DkimFailures::Detailed(_) => DkimMode::Detailed,
            DkimFailures::Binary(_) => DkimMode::Binary,
        }
    }

    /// Classify the record's DKIM result with this schema and record any failure.
    /// Returns whether DKIM passed.
    pub fn add(&mut self, record: &DeliveryRecord) -> bool {
        let sender = record.envelope_from.as_str();
        match self {
            DkimFailures::Detailed(detailed) => {
                detailed.add(classify_dkim_detailed(record), sender, record.count)
            }
            DkimFailures::Binary(binary) => {
                binary.add(classify_dkim_binary(record), sender, record.count)
            }
        }
    }

    /// Emails that failed DKIM, each counted once.
    pub fn total(&self) -> u64 {
        match self {
            DkimFailures::Detailed(detailed) => {
                detailed.missing.values().sum::<u64>()
                    + detailed.signed.values().map(|s| s.count).sum::<u64>()
            }
            DkimFailures::Binary(binary) => {
                binary
                    .invalid_signature
                    .values()
                    .flat_map(|selectors| selectors.values())
                    .sum::<u64>()
                    + binary.invalid_domain.values().sum::<u64>()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResults {
    pub total: u64,
    pub spf_success: u64,
    pub dkim_success: u64,
    pub spf_check_failed: DomainCounts,
    pub spf_misaligned: DomainCounts,
    pub spf_neutral: DomainCounts,
    pub dkim_failures: DkimFailures,
    /// Canonical override-reason string → number of records carrying it.
    pub overridden_policies: HashMap<String, u64>,
}

impl AggregateResults {
    pub fn new(mode: DkimMode) -> Self {
        AggregateResults {
            total: 0,
            spf_success: 0,
            dkim_success: 0,
            spf_check_failed: DomainCounts::new(),
            spf_misaligned: DomainCounts::new(),
            spf_neutral: DomainCounts::new(),
            dkim_failures: DkimFailures::new(mode),
            overridden_policies: HashMap::new(),
        }
    }

    pub fn spf_issues(&self) -> u64 {
        self.total - self.spf_success
    }

    pub fn dkim_issues(&self) -> u64 {
        self.total - self.dkim_success
    }

    pub fn spf_failure_total(&self) -> u64 {
        [&self.spf_check_failed, &self.spf_misaligned, &self.spf_neutral]
            .iter()
            .flat_map(|counts| counts.values())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DayCounters {
    pub total: u64,
    pub spf_ok: u64,
    pub dkim_ok: u64,
}

/// Per-day counters, iterated in ascending date order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DailyStats {
    days: BTreeMap<NaiveDate, DayCounters>,
}

impl DailyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day_mut(&mut self, day: NaiveDate) -> &mut DayCounters {
        self.days.entry(day).or_default()
    }

    pub fn get(&self, day: NaiveDate) -> Option<&DayCounters> {
        self.days.get(&day)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NaiveDate, &DayCounters)> {
        self.days.iter()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}
