//! Aggregations over a loaded call table
//!
//! Every view is computed on demand from the table and leaves it untouched.
//! Missing Used Usage values are skipped by sums and means. Rows whose
//! Date/Time cannot be read as a timestamp are left out of per-day views.

use crate::records::{coerce_numeric, CallRecord, CallTable};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Call count for one number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactCount {
    pub number: String,
    pub call_count: usize,
}

/// Summed Used Usage (seconds) for one number
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberUsage {
    pub number: String,
    pub used_usage: u64,
}

/// Billed / Free / Chargeable totals over the whole table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageDistribution {
    pub billed: u64,
    pub free: u64,
    pub chargeable: u64,
}

impl UsageDistribution {
    /// Category label and total, in column order
    pub fn categories(&self) -> [(&'static str, u64); 3] {
        [
            ("Billed Usage", self.billed),
            ("Free Usage", self.free),
            ("Chargeable Usage", self.chargeable),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub call_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyDuration {
    pub date: NaiveDate,
    pub total_minutes: f64,
}

/// One day of a single number's activity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBreakdown {
    pub date: NaiveDate,
    pub calls: usize,
    pub duration_min: f64,
}

/// Headline figures for a single number
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CallSummary {
    #[serde(rename = "Total Calls")]
    pub total_calls: usize,
    #[serde(rename = "Total Duration (min)")]
    pub total_duration_min: f64,
    #[serde(rename = "Average Duration (min)")]
    pub average_duration_min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberSummary {
    pub number: String,
    pub summary: CallSummary,
    /// Empty when the number has no calls
    pub daily: Vec<DailyBreakdown>,
}

impl NumberSummary {
    pub fn has_calls(&self) -> bool {
        self.summary.total_calls > 0
    }
}

/// The `top_n` most frequent numbers by row count, descending.
/// Equal counts keep the order in which the numbers first appear.
pub fn top_contacts(table: &CallTable, top_n: usize) -> Vec<ContactCount> {
    let mut counts: Vec<ContactCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for record in table {
        match index.get(record.number.as_str()) {
            Some(&i) => counts[i].call_count += 1,
            None => {
                index.insert(record.number.as_str(), counts.len());
                counts.push(ContactCount {
                    number: record.number.clone(),
                    call_count: 1,
                });
            }
        }
    }

    // stable: ties stay in first-appearance order
    counts.sort_by(|a, b| b.call_count.cmp(&a.call_count));
    counts.truncate(top_n);
    counts
}

/// The `top_n` numbers with the largest summed Used Usage, descending.
/// Equal sums are ordered by number.
pub fn top_usage(table: &CallTable, top_n: usize) -> Vec<NumberUsage> {
    let mut sums: BTreeMap<&str, u64> = BTreeMap::new();
    for record in table {
        let total = sums.entry(record.number.as_str()).or_insert(0);
        if let Some(used) = record.used_usage {
            *total = total.saturating_add(used);
        }
    }

    let mut usage: Vec<NumberUsage> = sums
        .into_iter()
        .map(|(number, used_usage)| NumberUsage {
            number: number.to_string(),
            used_usage,
        })
        .collect();
    usage.sort_by(|a, b| b.used_usage.cmp(&a.used_usage));
    usage.truncate(top_n);
    usage
}

/// Column sums of Billed, Free and Chargeable Usage. Non-numeric cells are skipped.
pub fn usage_distribution(table: &CallTable) -> UsageDistribution {
    let sum = |column: fn(&CallRecord) -> &str| -> u64 {
        table
            .iter()
            .filter_map(|r| coerce_numeric(column(r)))
            .fold(0u64, u64::saturating_add)
    };

    UsageDistribution {
        billed: sum(|r| r.billed_usage.as_str()),
        free: sum(|r| r.free_usage.as_str()),
        chargeable: sum(|r| r.chargeable_usage.as_str()),
    }
}

/// Number of calls per calendar date, one point per date present, ascending
pub fn calls_over_time(table: &CallTable) -> Vec<DailyCount> {
    let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for day in dated(table).map(|(day, _)| day) {
        *per_day.entry(day).or_insert(0) += 1;
    }

    per_day
        .into_iter()
        .map(|(date, call_count)| DailyCount { date, call_count })
        .collect()
}

/// Total Used Usage in minutes per calendar date, ascending
pub fn call_time_over_time(table: &CallTable) -> Vec<DailyDuration> {
    let mut per_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (day, record) in dated(table) {
        let total = per_day.entry(day).or_insert(0.0);
        if let Some(minutes) = record.duration_minutes() {
            *total += minutes;
        }
    }

    per_day
        .into_iter()
        .map(|(date, total_minutes)| DailyDuration {
            date,
            total_minutes,
        })
        .collect()
}

/// Summary and per-day breakdown for rows whose Number equals `number` exactly
pub fn number_summary(table: &CallTable, number: &str) -> NumberSummary {
    let matching: Vec<&CallRecord> = table.iter().filter(|r| r.number == number).collect();

    if matching.is_empty() {
        return NumberSummary {
            number: number.to_string(),
            summary: CallSummary::default(),
            daily: Vec::new(),
        };
    }

    let durations: Vec<f64> = matching
        .iter()
        .filter_map(|r| r.duration_minutes())
        .collect();
    let total_duration_min: f64 = durations.iter().sum();
    let average_duration_min = if durations.is_empty() {
        0.0
    } else {
        total_duration_min / durations.len() as f64
    };

    let mut per_day: BTreeMap<NaiveDate, (usize, f64)> = BTreeMap::new();
    for record in &matching {
        if let Some(day) = record.day() {
            let entry = per_day.entry(day).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += record.duration_minutes().unwrap_or(0.0);
        }
    }

    NumberSummary {
        number: number.to_string(),
        summary: CallSummary {
            total_calls: matching.len(),
            total_duration_min,
            average_duration_min,
        },
        daily: per_day
            .into_iter()
            .map(|(date, (calls, duration_min))| DailyBreakdown {
                date,
                calls,
                duration_min,
            })
            .collect(),
    }
}

/// Rows paired with their calendar date; undated rows are logged and skipped
fn dated(table: &CallTable) -> impl Iterator<Item = (NaiveDate, &CallRecord)> {
    table.iter().filter_map(|record| match record.day() {
        Some(day) => Some((day, record)),
        None => {
            tracing::debug!(
                date = %record.date,
                time = %record.time,
                "skipping record without a valid timestamp"
            );
            None
        }
    })
}
