//! Chart-ready datasets for the analytics views
//!
//! Nothing here draws. Each builder turns an aggregation into a serializable
//! description (kind, title, axis labels, points) that a front end can plot
//! directly.

use crate::analytics::{
    ContactCount, DailyCount, DailyDuration, NumberSummary, NumberUsage, UsageDistribution,
};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarPoint {
    pub label: String,
    pub value: f64,
    /// Text drawn above the bar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slice {
    pub category: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// One series of a dual-axis chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisSeries {
    pub name: String,
    pub axis_title: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chart {
    Bar {
        title: String,
        x_label: String,
        y_label: String,
        bars: Vec<BarPoint>,
    },
    Donut {
        title: String,
        hole: f64,
        slices: Vec<Slice>,
    },
    Line {
        title: String,
        x_label: String,
        y_label: String,
        markers: bool,
        points: Vec<SeriesPoint>,
    },
    /// Bars on the left axis, a line on the right axis, sharing dates
    DualAxis {
        title: String,
        x_label: String,
        dates: Vec<NaiveDate>,
        bars: AxisSeries,
        line: AxisSeries,
    },
}

impl Chart {
    pub fn title(&self) -> &str {
        match self {
            Chart::Bar { title, .. }
            | Chart::Donut { title, .. }
            | Chart::Line { title, .. }
            | Chart::DualAxis { title, .. } => title,
        }
    }
}

pub fn top_contacts_chart(top: &[ContactCount], top_n: usize) -> Chart {
    Chart::Bar {
        title: format!("Top {} Most Contacted Numbers", top_n),
        x_label: "Number".to_string(),
        y_label: "Call Count".to_string(),
        bars: top
            .iter()
            .map(|c| BarPoint {
                label: c.number.clone(),
                value: c.call_count as f64,
                text: Some(c.call_count.to_string()),
            })
            .collect(),
    }
}

pub fn top_usage_chart(top: &[NumberUsage], top_n: usize) -> Chart {
    Chart::Bar {
        title: format!("Top {} Numbers by Total Used Usage (Seconds)", top_n),
        x_label: "Number".to_string(),
        y_label: "Used Usage".to_string(),
        bars: top
            .iter()
            .map(|u| BarPoint {
                label: u.number.clone(),
                value: u.used_usage as f64,
                text: Some(u.used_usage.to_string()),
            })
            .collect(),
    }
}

pub fn usage_distribution_chart(distribution: &UsageDistribution) -> Chart {
    Chart::Donut {
        title: "Usage Distribution (Billed / Free / Chargeable)".to_string(),
        hole: 0.3,
        slices: distribution
            .categories()
            .into_iter()
            .map(|(category, value)| Slice {
                category: category.to_string(),
                value: value as f64,
            })
            .collect(),
    }
}

pub fn calls_over_time_chart(points: &[DailyCount]) -> Chart {
    Chart::Line {
        title: "Number of Calls Over Time".to_string(),
        x_label: "Date".to_string(),
        y_label: "Call Count".to_string(),
        markers: true,
        points: points
            .iter()
            .map(|p| SeriesPoint {
                date: p.date,
                value: p.call_count as f64,
            })
            .collect(),
    }
}

pub fn call_time_over_time_chart(points: &[DailyDuration]) -> Chart {
    Chart::Bar {
        title: "Total Call Duration per Day (minutes)".to_string(),
        x_label: "Date".to_string(),
        y_label: "Call Duration (min)".to_string(),
        bars: points
            .iter()
            .map(|p| BarPoint {
                label: p.date.to_string(),
                value: p.total_minutes,
                text: Some(format!("{:.1}", p.total_minutes)),
            })
            .collect(),
    }
}

/// `None` when the number had no calls
pub fn number_summary_chart(summary: &NumberSummary) -> Option<Chart> {
    if !summary.has_calls() {
        return None;
    }

    Some(Chart::DualAxis {
        title: format!("Call Duration and Count for {}", summary.number),
        x_label: "Date".to_string(),
        dates: summary.daily.iter().map(|d| d.date).collect(),
        bars: AxisSeries {
            name: "Total Call Duration (min)".to_string(),
            axis_title: "Duration (min)".to_string(),
            values: summary.daily.iter().map(|d| d.duration_min).collect(),
        },
        line: AxisSeries {
            name: "Number of Calls".to_string(),
            axis_title: "Number of Calls".to_string(),
            values: summary.daily.iter().map(|d| d.calls as f64).collect(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{self, CallSummary};
    use crate::records::{extract_records, CallTable};

    fn table() -> CallTable {
        CallTable::from_records(extract_records(
            "1 01-JAN-24 10:00:00 919800000001 90 120 0 120 1.20\n\
             2 02-JAN-24 11:00:00 919800000001 60 60 0 60 0.60\n",
        ))
    }

    #[test]
    fn test_top_contacts_chart_labels() {
        let top = analytics::top_contacts(&table(), 5);
        let chart = top_contacts_chart(&top, 5);
        assert_eq!(chart.title(), "Top 5 Most Contacted Numbers");
        match chart {
            Chart::Bar { bars, .. } => {
                assert_eq!(bars.len(), 1);
                assert_eq!(bars[0].label, "919800000001");
                assert_eq!(bars[0].text.as_deref(), Some("2"));
            }
            other => panic!("unexpected chart: {:?}", other),
        }
    }

    #[test]
    fn test_call_time_chart_text_has_one_decimal() {
        let points = analytics::call_time_over_time(&table());
        match call_time_over_time_chart(&points) {
            Chart::Bar { bars, .. } => assert_eq!(bars[0].text.as_deref(), Some("1.5")),
            other => panic!("unexpected chart: {:?}", other),
        }
    }

    #[test]
    fn test_number_summary_chart_absent_without_calls() {
        let summary = NumberSummary {
            number: "1".to_string(),
            summary: CallSummary::default(),
            daily: vec![],
        };
        assert!(number_summary_chart(&summary).is_none());
    }

    #[test]
    fn test_number_summary_chart_series_align() {
        let summary = analytics::number_summary(&table(), "919800000001");
        let chart = number_summary_chart(&summary).unwrap();
        match chart {
            Chart::DualAxis {
                dates, bars, line, ..
            } => {
                assert_eq!(dates.len(), 2);
                assert_eq!(bars.values, vec![1.5, 1.0]);
                assert_eq!(line.values, vec![1.0, 1.0]);
            }
            other => panic!("unexpected chart: {:?}", other),
        }
    }

    #[test]
    fn test_chart_serializes_with_kind_tag() {
        let chart = usage_distribution_chart(&UsageDistribution {
            billed: 3,
            free: 1,
            chargeable: 2,
        });
        let json = serde_json::to_value(&chart).unwrap();
        assert_eq!(json["kind"], "donut");
        assert_eq!(json["slices"][0]["category"], "Billed Usage");
    }
}
