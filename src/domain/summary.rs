//! Daily summaries: one text per company and calendar day (UTC).

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::call::{CallRecord, CompanyId};

pub type SummaryId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub id: SummaryId,
    pub company_id: CompanyId,
    pub day: NaiveDate,
    pub summary: String,
}

/// First and last second of `day`, both inclusive
pub fn day_bounds(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::seconds(86_399))
}

/// Render a day's calls as summarizer input.
///
/// One `---First Last transcript` block per call with text, oldest first,
/// blocks separated by a blank line. Empty when no call has text.
pub fn format_transcriptions_for_summary(records: &[CallRecord]) -> String {
    let mut with_text: Vec<&CallRecord> = records
        .iter()
        .filter(|r| r.transcription.as_deref().is_some_and(|t| !t.trim().is_empty()))
        .collect();
    with_text.sort_by_key(|r| (r.timestamp, r.id));

    with_text
        .into_iter()
        .map(|record| {
            let name = record
                .employee_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("Unknown");
            let text = record.transcription.as_deref().unwrap_or_default().trim();
            format!("---{} {}", name, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
