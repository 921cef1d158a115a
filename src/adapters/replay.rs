//! Recorded-dataset replay.
//!
//! Parses overnight CSV recordings into [`Sample`]s and serves them through
//! [`SampleSource`].  Two layouts are accepted:
//!
//! ```text
//! timestamp,glucose                 2024-03-01 23:05:00,142
//! id,glucose,time[,...]             17,142,11:05:00 PM
//! ```
//!
//! Timestamps are either full date-times or times of day.  A time of day is
//! placed on `base_date` and rolls to the next day whenever it goes
//! backwards, so a recording that crosses midnight stays ordered.  Meter
//! exports write half past noon as `00:30:00 PM`; that is read as `12:30 PM`.
//!
//! Fields follow CSV quoting rules, so a quoted field may contain commas.
//! A first record that does not parse is treated as a header.  Any later
//! record that does not parse is skipped and counted.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, info};

use crate::app::ports::SampleSource;
use crate::sensors::{Sample, Timestamp};

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %I:%M:%S %p",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const TIME_FORMATS: &[&str] = &["%I:%M:%S %p", "%I:%M %p", "%H:%M:%S", "%H:%M"];

/// Result of parsing one dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub samples: Vec<Sample>,
    /// Data lines that could not be parsed.
    pub skipped: usize,
}

enum Stamp {
    Full(NaiveDateTime),
    TimeOfDay(NaiveTime),
}

fn parse_stamp(field: &str) -> Option<Stamp> {
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(field, fmt) {
            return Some(Stamp::Full(dt));
        }
    }
    let repaired;
    let field = if field.starts_with("00:") && has_meridiem(field) {
        repaired = format!("12:{}", &field[3..]);
        repaired.as_str()
    } else {
        field
    };
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(field, fmt).ok())
        .map(Stamp::TimeOfDay)
}

fn has_meridiem(field: &str) -> bool {
    let upper = field.to_ascii_uppercase();
    upper.ends_with("AM") || upper.ends_with("PM")
}

fn parse_glucose(field: &str) -> Option<f64> {
    field.parse::<f64>().ok().filter(|g| g.is_finite())
}

/// Pick `(timestamp field, glucose field)` out of a record.
fn columns(record: &StringRecord) -> Option<(&str, &str)> {
    match record.len() {
        2 => Some((record.get(0)?, record.get(1)?)),
        n if n >= 3 => Some((record.get(2)?, record.get(1)?)),
        _ => None,
    }
}

fn parse_record(record: &StringRecord) -> Option<(Stamp, f64)> {
    let (stamp, glucose) = columns(record)?;
    Some((parse_stamp(stamp)?, parse_glucose(glucose)?))
}

/// Parse CSV `text`, placing times of day on `base_date`.
pub fn parse_dataset(text: &str, base_date: NaiveDate) -> Dataset {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut out = Dataset::default();
    let mut day_offset: u64 = 0;
    let mut last_time: Option<NaiveTime> = None;
    let mut seen_data = false;

    for result in reader.records() {
        let parsed = match &result {
            Ok(record) if record.iter().all(str::is_empty) => continue,
            Ok(record) => parse_record(record),
            Err(e) => {
                debug!("replay: unreadable record: {e}");
                None
            }
        };
        let Some((stamp, glucose)) = parsed else {
            let line = result
                .as_ref()
                .ok()
                .and_then(|r| r.position())
                .map_or(0, csv::Position::line);
            if seen_data {
                debug!("replay: line {line} skipped");
                out.skipped += 1;
            } else {
                debug!("replay: header at line {line}");
            }
            seen_data = true;
            continue;
        };
        seen_data = true;

        let timestamp: Option<Timestamp> = match stamp {
            Stamp::Full(dt) => Some(dt),
            Stamp::TimeOfDay(t) => {
                if last_time.is_some_and(|prev| t < prev) {
                    day_offset += 1;
                }
                last_time = Some(t);
                base_date
                    .checked_add_days(Days::new(day_offset))
                    .map(|d| d.and_time(t))
            }
        };
        match timestamp {
            Some(timestamp) => out.samples.push(Sample::new(timestamp, glucose)),
            None => out.skipped += 1,
        }
    }
    out
}

/// Replays a parsed dataset in file order.
pub struct ReplaySource {
    samples: std::vec::IntoIter<Sample>,
}

impl ReplaySource {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: samples.into_iter(),
        }
    }

    /// Load and parse a CSV file.
    pub fn from_path(path: &Path, base_date: NaiveDate) -> io::Result<(Self, Dataset)> {
        let text = fs::read_to_string(path)?;
        let dataset = parse_dataset(&text, base_date);
        info!(
            "replay: {} samples from {} ({} lines skipped)",
            dataset.samples.len(),
            path.display(),
            dataset.skipped
        );
        Ok((Self::new(dataset.samples.clone()), dataset))
    }

    pub fn remaining(&self) -> usize {
        self.samples.len()
    }
}

impl SampleSource for ReplaySource {
    fn next_sample(&mut self) -> Option<Sample> {
        self.samples.next()
    }
}
