//! Fixed-layout record matching over statement transcripts

use super::record::CallRecord;
use regex::Regex;
use std::ops::Range;
use std::sync::LazyLock;

/// One call line: No., Date, Time, Number, four usage counters, Amount
static CALL_RECORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(\d{1,3})\s+",
        r"(\d{2}-[A-Z]{3}-\d{2})\s+",
        r"(\d{2}:\d{2}:\d{2})\s+",
        r"(\d{11,15})\s+",
        r"(\d+)\s+",
        r"(\d+)\s+",
        r"(\d+)\s+",
        r"(\d+)\s+",
        r"(\d+\.\d{2})",
    ))
    .expect("call record pattern must compile")
});

/// A line that opens like a call row (sequence number then a date-shaped token)
static CANDIDATE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\d{1,3}[ \t]+\d{2}-[A-Za-z]{3}-\d{2}\b")
        .expect("candidate row pattern must compile")
});

/// What to do about rows that look like call lines but fail the pattern
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Drop them without counting
    #[default]
    Silent,
    /// Count them and log the total
    Report,
}

/// Records matched in one transcript
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedText {
    pub records: Vec<CallRecord>,
    /// Candidate rows that produced no record; only counted under [`SkipPolicy::Report`]
    pub skipped: Option<usize>,
    /// Records whose Used Usage could not be read as a number; only counted under [`SkipPolicy::Report`]
    pub null_usage: Option<usize>,
}

/// Applies the fixed call-line pattern to extracted statement text
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordParser {
    policy: SkipPolicy,
}

impl RecordParser {
    pub fn new(policy: SkipPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SkipPolicy {
        self.policy
    }

    /// Parse a transcript into records, in order of first appearance
    pub fn parse(&self, text: &str) -> ParsedText {
        let mut records = Vec::new();
        let mut spans = Vec::new();

        for caps in CALL_RECORD_RE.captures_iter(text) {
            let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
            records.push(CallRecord::from_fields([
                field(1),
                field(2),
                field(3),
                field(4),
                field(5),
                field(6),
                field(7),
                field(8),
                field(9),
            ]));
            if let Some(whole) = caps.get(0) {
                spans.push(whole.range());
            }
        }

        let (skipped, null_usage) = match self.policy {
            SkipPolicy::Silent => (None, None),
            SkipPolicy::Report => {
                let count = count_unmatched_rows(text, &spans);
                if count > 0 {
                    tracing::warn!(
                        skipped = count,
                        matched = records.len(),
                        "call rows did not match the statement layout"
                    );
                }
                let nulls = records.iter().filter(|r| r.used_usage.is_none()).count();
                if nulls > 0 {
                    tracing::warn!(
                        null_usage = nulls,
                        matched = records.len(),
                        "Used Usage values could not be read as numbers"
                    );
                }
                (Some(count), Some(nulls))
            }
        };

        tracing::debug!(records = records.len(), "parsed statement transcript");

        ParsedText {
            records,
            skipped,
            null_usage,
        }
    }
}

/// Extract records with the default (silent) policy
pub fn extract_records(text: &str) -> Vec<CallRecord> {
    RecordParser::default().parse(text).records
}

/// Count candidate rows whose line is not touched by any matched record.
/// `spans` must be sorted and non-overlapping, as `captures_iter` yields them.
fn count_unmatched_rows(text: &str, spans: &[Range<usize>]) -> usize {
    CANDIDATE_ROW_RE
        .find_iter(text)
        .filter(|candidate| {
            let line_start = candidate.start();
            let line_end = text[line_start..]
                .find('\n')
                .map(|offset| line_start + offset)
                .unwrap_or(text.len());

            let idx = spans.partition_point(|span| span.end <= line_start);
            !spans
                .get(idx)
                .is_some_and(|span| span.start < line_end)
        })
        .count()
}
