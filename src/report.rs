//! Report emission for per-window verdicts.
//!
//! The classification summary is the program's primary output and goes
//! to stdout, one line per processed window. JSON output exists for
//! integration with other tooling; text remains the default.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scorer::WindowVerdict;

/// Output format for window reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// JSON-serializable per-window classification report
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub timestamp: String,
    pub total_rows: usize,
    pub flagged_rows: usize,
    pub accuracy: f64,
    pub mean_distance: f64,
    pub max_distance: f64,
    pub threshold: f64,
}

impl WindowReport {
    pub fn new(timestamp: DateTime<Utc>, verdict: &WindowVerdict, threshold: f64) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            total_rows: verdict.total,
            flagged_rows: verdict.flagged,
            accuracy: verdict.accuracy,
            mean_distance: verdict.mean_distance,
            max_distance: verdict.max_distance,
            threshold,
        }
    }

    /// Writes the report to stdout in the selected format.
    pub fn emit(&self, format: OutputFormat) {
        match format {
            OutputFormat::Text => println!("{}", self),
            OutputFormat::Json => match serde_json::to_string(self) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::error!("Failed to serialize report: {}", e),
            },
        }
    }
}

impl std::fmt::Display for WindowReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} of {} rows above threshold | accuracy {:.4} | mean dist {:.4} | max dist {:.4}",
            self.timestamp,
            self.flagged_rows,
            self.total_rows,
            self.accuracy,
            self.mean_distance,
            self.max_distance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> WindowVerdict {
        WindowVerdict {
            total: 42,
            flagged: 3,
            accuracy: 0.9524,
            mean_distance: 1.25,
            max_distance: 6.5,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_text_report_line() {
        let report = WindowReport::new(Utc::now(), &verdict(), 3.0);
        let line = report.to_string();
        assert!(line.contains("3 of 42 rows above threshold"));
        assert!(line.contains("accuracy 0.9524"));
    }

    #[test]
    fn test_json_report_fields() {
        let report = WindowReport::new(Utc::now(), &verdict(), 3.0);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"total_rows\":42"));
        assert!(json.contains("\"flagged_rows\":3"));
        assert!(json.contains("\"threshold\":3.0"));
    }
}
