use clap::ValueEnum;
use serde::Serialize;

use crate::error::Violation;
use crate::report::{AuthResult, DeliveryRecord, DkimAuthDetail};

/// Which of the two DKIM failure breakdowns a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DkimMode {
    /// Per sender, per selector, per auth result; unsigned mail counted separately.
    #[default]
    Detailed,
    /// Invalid signature (keyed by failing selectors) vs. valid signature on the wrong domain.
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfOutcome {
    Pass,
    /// The SPF check itself returned `fail`.
    CheckFailed,
    Neutral,
    /// No fail/neutral verdict; only identifier alignment is missing.
    Misaligned,
}

/// DKIM verdict in the detailed breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailedDkim<'a> {
    Pass,
    /// No signature at all.
    Missing,
    /// Every signature the receiver saw.
    Signed(&'a [DkimAuthDetail]),
}

/// DKIM verdict in the invalid-signature / invalid-domain split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryDkim {
    Pass,
    /// Comma-separated key locations of the failing signatures.
    InvalidSignature(String),
    /// Signatures verified but none for an aligned domain.
    InvalidDomain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification<'a> {
    /// Exempted by receiver policy; carries the canonical reason string.
    Overridden(&'a str),
    /// Counted toward totals. DKIM is decided by the schema collecting the failures.
    Counted(SpfOutcome),
}

fn count_results(record: &DeliveryRecord, result: &AuthResult) -> usize {
    record
        .spf_auth_details
        .iter()
        .filter(|detail| &detail.result == result)
        .count()
}

pub fn classify_spf(record: &DeliveryRecord) -> Result<SpfOutcome, Violation> {
    if record.spf_result.is_pass() {
        return Ok(SpfOutcome::Pass);
    }

    match count_results(record, &AuthResult::Fail) {
        0 => {}
        1 => return Ok(SpfOutcome::CheckFailed),
        found => return Err(Violation::DuplicateSpfFail(found)),
    }

    match count_results(record, &AuthResult::Neutral) {
        0 => {}
        1 => return Ok(SpfOutcome::Neutral),
        found => return Err(Violation::DuplicateSpfNeutral(found)),
    }

    if record.spf_aligned {
        return Err(Violation::AlignedWithoutVerdict);
    }
    Ok(SpfOutcome::Misaligned)
}

pub fn classify_dkim_detailed(record: &DeliveryRecord) -> DetailedDkim<'_> {
    if record.dkim_result.is_pass() {
        DetailedDkim::Pass
    } else if record.dkim_auth_details.is_empty() {
        DetailedDkim::Missing
    } else {
        DetailedDkim::Signed(&record.dkim_auth_details)
    }
}

pub fn classify_dkim_binary(record: &DeliveryRecord) -> BinaryDkim {
    if record.dkim_result.is_pass() {
        return BinaryDkim::Pass;
    }

    let failing: Vec<String> = record
        .dkim_auth_details
        .iter()
        .filter(|detail| detail.result == AuthResult::Fail)
        .map(DkimAuthDetail::key_location)
        .collect();
    if failing.is_empty() {
        BinaryDkim::InvalidDomain
    } else {
        BinaryDkim::InvalidSignature(failing.join(", "))
    }
}

/// Overridden records short-circuit before any check runs; the rest get their SPF category.
pub fn classify(record: &DeliveryRecord) -> Result<Classification<'_>, Violation> {
    if let Some(reasons) = record.policy_override.as_deref() {
        return Ok(Classification::Overridden(reasons));
    }
    classify_spf(record).map(Classification::Counted)
}
