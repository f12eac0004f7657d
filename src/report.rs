use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ReportError, Result};

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Disposition-level verdict from `policy_evaluated`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
    Other(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Other(raw) => raw,
        }
    }
}

impl From<String> for Verdict {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pass" => Verdict::Pass,
            "fail" => Verdict::Fail,
            _ => Verdict::Other(raw),
        }
    }
}

impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Verdict::from)
    }
}

/// Mechanism-level result from `auth_results`, shared by the SPF and DKIM entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AuthResult {
    Pass,
    Fail,
    Neutral,
    SoftFail,
    None,
    Policy,
    TempError,
    PermError,
    Other(String),
}

impl AuthResult {
    pub fn as_str(&self) -> &str {
        match self {
            AuthResult::Pass => "pass",
            AuthResult::Fail => "fail",
            AuthResult::Neutral => "neutral",
            AuthResult::SoftFail => "softfail",
            AuthResult::None => "none",
            AuthResult::Policy => "policy",
            AuthResult::TempError => "temperror",
            AuthResult::PermError => "permerror",
            AuthResult::Other(raw) => raw,
        }
    }
}

impl From<String> for AuthResult {
    fn from(raw: String) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pass" => AuthResult::Pass,
            "fail" => AuthResult::Fail,
            "neutral" => AuthResult::Neutral,
            "softfail" => AuthResult::SoftFail,
            "none" => AuthResult::None,
            "policy" => AuthResult::Policy,
            "temperror" => AuthResult::TempError,
            "permerror" => AuthResult::PermError,
            _ => AuthResult::Other(raw),
        }
    }
}

impl<'de> Deserialize<'de> for AuthResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(AuthResult::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpfAuthDetail {
    pub result: AuthResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DkimAuthDetail {
    pub selector: String,
    pub domain: String,
    pub result: AuthResult,
}

impl DkimAuthDetail {
    /// DNS name the public key is published under.
    pub fn key_location(&self) -> String {
        format!("{}._domainkey.{}", self.selector, self.domain)
    }
}

/// One row of an aggregate report, flattened from its nested JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct DeliveryRecord {
    pub count: u64,
    pub envelope_from: String,
    pub spf_result: Verdict,
    pub dkim_result: Verdict,
    pub spf_auth_details: Vec<SpfAuthDetail>,
    pub dkim_auth_details: Vec<DkimAuthDetail>,
    pub spf_aligned: bool,
    pub dkim_aligned: bool,
    /// Compact JSON of the receiver's override reasons, present only when there are any.
    pub policy_override: Option<String>,
}

#[derive(Deserialize)]
struct RawRecord {
    count: u64,
    policy_evaluated: RawPolicyEvaluated,
    identifiers: RawIdentifiers,
    auth_results: RawAuthResults,
    alignment: RawAlignment,
}

#[derive(Deserialize)]
struct RawPolicyEvaluated {
    spf: Verdict,
    dkim: Verdict,
    policy_override_reasons: Vec<Value>,
}

#[derive(Deserialize)]
struct RawIdentifiers {
    envelope_from: String,
}

#[derive(Deserialize)]
struct RawAuthResults {
    spf: Vec<SpfAuthDetail>,
    dkim: Vec<DkimAuthDetail>,
}

#[derive(Deserialize)]
struct RawAlignment {
    spf: bool,
    dkim: bool,
}

impl TryFrom<RawRecord> for DeliveryRecord {
    type Error = String;

    fn try_from(raw: RawRecord) -> std::result::Result<Self, Self::Error> {
        if raw.count == 0 {
            return Err("`count` must be a positive integer".to_string());
        }

        let reasons = raw.policy_evaluated.policy_override_reasons;
        let policy_override = if reasons.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&reasons).map_err(|e| e.to_string())?)
        };

        Ok(DeliveryRecord {
            count: raw.count,
            envelope_from: raw.identifiers.envelope_from,
            spf_result: raw.policy_evaluated.spf,
            dkim_result: raw.policy_evaluated.dkim,
            spf_auth_details: raw.auth_results.spf,
            dkim_auth_details: raw.auth_results.dkim,
            spf_aligned: raw.alignment.spf,
            dkim_aligned: raw.alignment.dkim,
            policy_override,
        })
    }
}

/// Half-open `[begin_date, end_date)` window a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ReportMetadata {
    #[serde(deserialize_with = "deserialize_report_date")]
    pub begin_date: NaiveDate,
    #[serde(deserialize_with = "deserialize_report_date")]
    pub end_date: NaiveDate,
}

impl ReportMetadata {
    /// Every calendar day in the window, in order. Empty when `end_date <= begin_date`.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end_date;
        self.begin_date.iter_days().take_while(move |day| *day < end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateReport {
    pub metadata: ReportMetadata,
    pub records: Vec<DeliveryRecord>,
}

#[derive(Deserialize)]
struct RawReport {
    report_metadata: ReportMetadata,
    records: Vec<Value>,
}

/// Calendar date of a report timestamp, as written.
///
/// An explicit offset is ignored rather than converted, so `2024-09-08T23:30:00-02:00` stays
/// on the 8th. Naive timestamps are UTC.
pub fn parse_report_date(timestamp: &str) -> Option<NaiveDate> {
    let timestamp = timestamp.trim();

    if let Ok(datetime) = DateTime::parse_from_rfc3339(timestamp) {
        return Some(datetime.naive_local().date());
    }
    for format in OFFSET_FORMATS {
        if let Ok(datetime) = DateTime::parse_from_str(timestamp, format) {
            return Some(datetime.naive_local().date());
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(timestamp, format) {
            return Some(datetime.date());
        }
    }

    // Bare date, or a date followed by an hour alone (`2024-09-08T00`)
    let (date, rest) = NaiveDate::parse_and_remainder(timestamp, "%Y-%m-%d").ok()?;
    if rest.is_empty() {
        return Some(date);
    }
    let hour = rest.strip_prefix(&['T', ' '][..])?;
    match hour.parse::<u32>() {
        Ok(h) if hour.len() == 2 && h < 24 => Some(date),
        _ => None,
    }
}

fn deserialize_report_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_report_date(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp `{raw}`")))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn parse_report(index: usize, value: Value) -> Result<AggregateReport> {
    let raw: RawReport = serde_json::from_value(value)
        .map_err(|e| ReportError::malformed(format!("report {index}"), e))?;

    let records = raw
        .records
        .into_iter()
        .enumerate()
        .map(|(position, record)| {
            serde_json::from_value::<DeliveryRecord>(record).map_err(|e| {
                ReportError::malformed(format!("report {index}, record {position}"), e)
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(AggregateReport {
        metadata: raw.report_metadata,
        records,
    })
}

/// Parse an in-memory aggregate document, dropping every report that ends on or before
/// `since`.
pub fn parse_reports(bytes: &[u8], since: Option<NaiveDate>) -> Result<Vec<AggregateReport>> {
    let document: Value =
        serde_json::from_slice(bytes).map_err(|e| ReportError::malformed("document", e))?;

    let raw_reports = match document {
        Value::Array(raw_reports) => raw_reports,
        other => {
            return Err(ReportError::malformed(
                "document",
                format!("expected an array of reports, found {}", json_kind(&other)),
            ))
        }
    };

    let mut reports = Vec::with_capacity(raw_reports.len());
    for (index, raw) in raw_reports.into_iter().enumerate() {
        let report = parse_report(index, raw)?;
        if let Some(since) = since {
            if report.metadata.end_date <= since {
                debug!(
                    action = "skip",
                    component = "report_loader",
                    report = index,
                    end_date = %report.metadata.end_date,
                    since = %since,
                    "Report ends before cutoff"
                );
                continue;
            }
        }
        reports.push(report);
    }

    Ok(reports)
}

pub fn load_reports(path: &Path, since: Option<NaiveDate>) -> Result<Vec<AggregateReport>> {
    let start_time = Instant::now();
    info!(action = "start", component = "report_loader", file_path = ?path, "Loading aggregate reports");

    let content = fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            ReportError::FileNotFound(path.to_path_buf())
        } else {
            ReportError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let reports = parse_reports(&content, since)?;

    info!(
        action = "complete",
        component = "report_loader",
        report_count = reports.len(),
        record_count = reports.iter().map(|r| r.records.len()).sum::<usize>(),
        duration_ms = start_time.elapsed().as_millis(),
        "Loaded aggregate reports"
    );
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record_json() -> Value {
        json!({
            "count": 3,
            "policy_evaluated": {"spf": "fail", "dkim": "PASS", "policy_override_reasons": []},
            "identifiers": {"envelope_from": "example.org", "header_from": "example.org"},
            "auth_results": {
                "spf": [{"domain": "example.org", "scope": "mfrom", "result": "softfail"}],
                "dkim": [{"selector": "s1", "domain": "example.org", "result": "pass"}]
            },
            "alignment": {"spf": false, "dkim": true, "dmarc": true}
        })
    }

    fn document(records: Vec<Value>, begin: &str, end: &str) -> Vec<u8> {
        serde_json::to_vec(&json!([{
            "report_metadata": {"begin_date": begin, "end_date": end, "org_name": "google.com"},
            "records": records
        }]))
        .unwrap()
    }

    #[test]
    fn test_parse_report_date_formats() {
        assert_eq!(parse_report_date("2024-09-08 00:00:00"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08T23:59:59"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08T12:00:00Z"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08T00:00"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08 00:00"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08T00"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08T18:45+05:30"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("2024-09-08 18:45-0700"), Some(date(2024, 9, 8)));
        assert_eq!(parse_report_date("yesterday"), None);
        assert_eq!(parse_report_date("2024-09-08T7"), None);
        assert_eq!(parse_report_date("2024-09-08 lunch"), None);
    }

    #[test]
    fn test_offset_keeps_written_date() {
        assert_eq!(
            parse_report_date("2024-09-08T23:30:00-02:00"),
            Some(date(2024, 9, 8))
        );
        assert_eq!(
            parse_report_date("2024-09-08T01:00:00+02:00"),
            Some(date(2024, 9, 8))
        );
        assert_eq!(
            parse_report_date("2024-09-08 01:00:00+02:00"),
            Some(date(2024, 9, 8))
        );
    }

    #[test]
    fn test_minute_precision_report_loads() {
        let bytes = document(vec![record_json()], "2024-09-08T00:00", "2024-09-09 00:00");
        let reports = parse_reports(&bytes, None).unwrap();
        assert_eq!(reports[0].metadata.begin_date, date(2024, 9, 8));
        assert_eq!(reports[0].metadata.end_date, date(2024, 9, 9));
    }

    #[test]
    fn test_record_is_flattened() {
        let record: DeliveryRecord = serde_json::from_value(record_json()).unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.envelope_from, "example.org");
        assert_eq!(record.spf_result, Verdict::Fail);
        assert!(record.dkim_result.is_pass());
        assert_eq!(record.spf_auth_details[0].result, AuthResult::SoftFail);
        assert_eq!(record.dkim_auth_details[0].key_location(), "s1._domainkey.example.org");
        assert!(!record.spf_aligned);
        assert!(record.dkim_aligned);
        assert_eq!(record.policy_override, None);
    }

    #[test]
    fn test_unknown_results_are_preserved() {
        assert_eq!(
            Verdict::from("quarantined".to_string()),
            Verdict::Other("quarantined".to_string())
        );
        assert_eq!(AuthResult::from("TempError".to_string()), AuthResult::TempError);
        assert_eq!(AuthResult::from("weird".to_string()).as_str(), "weird");
    }

    #[test]
    fn test_override_reasons_are_serialized() {
        let mut value = record_json();
        value["policy_evaluated"]["policy_override_reasons"] =
            json!([{"type": "local_policy", "comment": "arc=pass"}]);
        let record: DeliveryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(
            record.policy_override.as_deref(),
            Some(r#"[{"comment":"arc=pass","type":"local_policy"}]"#)
        );
    }

    #[test]
    fn test_zero_count_is_rejected() {
        let mut value = record_json();
        value["count"] = json!(0);
        let err = parse_reports(&document(vec![value], "2024-09-08", "2024-09-09"), None)
            .unwrap_err();
        match err {
            ReportError::MalformedInput { location, message } => {
                assert_eq!(location, "report 0, record 0");
                assert!(message.contains("positive"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_field_names_record() {
        let mut value = record_json();
        value.as_object_mut().unwrap().remove("alignment");
        let records = vec![record_json(), value];
        let err =
            parse_reports(&document(records, "2024-09-08", "2024-09-09"), None).unwrap_err();
        match err {
            ReportError::MalformedInput { location, message } => {
                assert_eq!(location, "report 0, record 1");
                assert!(message.contains("alignment"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_top_level_must_be_array() {
        let err = parse_reports(br#"{"report_metadata": {}}"#, None).unwrap_err();
        match err {
            ReportError::MalformedInput { location, message } => {
                assert_eq!(location, "document");
                assert!(message.contains("an object"));
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            parse_reports(b"[{", None),
            Err(ReportError::MalformedInput { .. })
        ));
    }

    #[test]
    fn test_invalid_timestamp_names_report() {
        let err = parse_reports(&document(vec![], "soon", "2024-09-09"), None).unwrap_err();
        match err {
            ReportError::MalformedInput { location, message } => {
                assert_eq!(location, "report 0");
                assert!(message.contains("soon"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_since_cutoff_is_inclusive_of_end_date() {
        let bytes = document(vec![record_json()], "2024-09-08 00:00:00", "2024-09-09 00:00:00");

        assert!(parse_reports(&bytes, Some(date(2024, 9, 9))).unwrap().is_empty());
        assert!(parse_reports(&bytes, Some(date(2024, 9, 10))).unwrap().is_empty());
        assert_eq!(parse_reports(&bytes, Some(date(2024, 9, 8))).unwrap().len(), 1);
        assert_eq!(parse_reports(&bytes, None).unwrap().len(), 1);
    }

    #[test]
    fn test_days_cover_half_open_window() {
        let metadata = ReportMetadata {
            begin_date: date(2024, 9, 8),
            end_date: date(2024, 9, 11),
        };
        let days: Vec<_> = metadata.days().collect();
        assert_eq!(days, vec![date(2024, 9, 8), date(2024, 9, 9), date(2024, 9, 10)]);

        let empty = ReportMetadata {
            begin_date: date(2024, 9, 8),
            end_date: date(2024, 9, 8),
        };
        assert_eq!(empty.days().count(), 0);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = load_reports(Path::new("/nonexistent/aggregate.json"), None).unwrap_err();
        assert!(matches!(err, ReportError::FileNotFound(_)));
    }
}
