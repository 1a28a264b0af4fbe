//! Call-detail record type

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Format of the combined `Date Time` value, e.g. `01-JAN-24 10:00:00`
pub const TIMESTAMP_FORMAT: &str = "%d-%b-%y %H:%M:%S";

/// Column headers, in statement order
pub const HEADERS: [&str; 9] = [
    "No.",
    "Date",
    "Time",
    "Number",
    "Used Usage",
    "Billed Usage",
    "Free Usage",
    "Chargeable Usage",
    "Amount",
];

/// One parsed call-detail line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    #[serde(rename = "No.")]
    pub sequence: String,
    #[serde(rename = "Date")]
    pub date: String,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Number")]
    pub number: String,
    /// Seconds used; `None` when the raw value is not a number
    #[serde(rename = "Used Usage", deserialize_with = "coerce_usage")]
    pub used_usage: Option<u64>,
    #[serde(rename = "Billed Usage")]
    pub billed_usage: String,
    #[serde(rename = "Free Usage")]
    pub free_usage: String,
    #[serde(rename = "Chargeable Usage")]
    pub chargeable_usage: String,
    #[serde(rename = "Amount")]
    pub amount: String,
}

impl CallRecord {
    /// Build a record from the nine raw fields matched in a statement.
    /// Used Usage is coerced here, everything else stays as text.
    pub fn from_fields(fields: [&str; 9]) -> Self {
        let [sequence, date, time, number, used, billed, free, chargeable, amount] = fields;
        Self {
            sequence: sequence.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            number: number.to_string(),
            used_usage: coerce_numeric(used),
            billed_usage: billed.to_string(),
            free_usage: free.to_string(),
            chargeable_usage: chargeable.to_string(),
            amount: amount.to_string(),
        }
    }

    /// Combined Date + Time timestamp, `None` if either part is not a real date/time.
    /// Two-digit years 69-99 fall in the 1900s, 00-68 in the 2000s.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        let combined = format!("{} {}", self.date, self.time);
        let ts = NaiveDateTime::parse_from_str(&combined, TIMESTAMP_FORMAT).ok()?;
        // chrono pivots `%y` at 70, so `69` comes back as 2069
        if ts.year() == 2069 {
            ts.with_year(1969)
        } else {
            Some(ts)
        }
    }

    /// Calendar date of the combined timestamp
    pub fn day(&self) -> Option<NaiveDate> {
        self.timestamp().map(|ts| ts.date())
    }

    /// Used Usage converted from seconds to minutes
    pub fn duration_minutes(&self) -> Option<f64> {
        self.used_usage.map(|secs| secs as f64 / 60.0)
    }
}

/// Coerce a raw counter to a number, mapping anything unparseable to `None`
pub fn coerce_numeric(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

fn coerce_usage<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(coerce_numeric))
}
