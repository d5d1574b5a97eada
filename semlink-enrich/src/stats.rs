//! Windowed page-view aggregation
//!
//! Daily views are fetched per calendar month and summed over four
//! windows ending the day before the reference date: 1, 7, 28 and 365
//! days. Three share ratios are derived from the sums.

use crate::types::FeatureMap;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

pub const WIKISTATS_WK: &str = "WIKISTATSWK";
pub const WIKISTATS_4WK: &str = "WIKISTATS4WK";
pub const WIKISTATS_YEAR: &str = "WIKISTATSYEAR";
pub const WIKISTATS_DAY_OF_WK: &str = "WIKISTATSDAYOFWK";
pub const WIKISTATS_WK_OF_4WK: &str = "WIKISTATSWKOF4WK";
pub const WIKISTATS_4WK_OF_YEAR: &str = "WIKISTATS4WKOFYEAR";

/// Feature names attached to every candidate
pub const FEATURE_NAMES: [&str; 6] = [
    WIKISTATS_WK,
    WIKISTATS_4WK,
    WIKISTATS_YEAR,
    WIKISTATS_DAY_OF_WK,
    WIKISTATS_WK_OF_4WK,
    WIKISTATS_4WK_OF_YEAR,
];

const WINDOW_DAYS: [i64; 4] = [1, 7, 28, 365];
const MONTH_SAMPLES: i64 = 14;
const SAMPLE_SPACING_DAYS: i64 = 28;
/// Furthest day before the reference that prefetch or aggregation touches
const LOOKBACK_DAYS: i64 = WINDOW_DAYS[3];

/// One monthly page-view lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
    pub title: String,
}

impl MonthKey {
    pub fn new(date: NaiveDate, title: impl Into<String>) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
            title: title.into(),
        }
    }

    /// `YYYYMM` path segment
    pub fn yyyymm(&self) -> String {
        format!("{}{:02}", self.year, self.month)
    }
}

/// Month lookups to prefetch for `title`.
///
/// 14 samples 28 days apart walking backward from the day before
/// `reference`. No calendar month is shorter than 28 days, so the samples
/// hit every month the 365-day window touches.
pub fn prefetch_months(reference: NaiveDate, title: &str) -> Vec<MonthKey> {
    let mut keys: Vec<MonthKey> = Vec::with_capacity(MONTH_SAMPLES as usize);
    for sample in 0..MONTH_SAMPLES {
        let back = Duration::days(1 + sample * SAMPLE_SPACING_DAYS);
        let Some(day) = reference.checked_sub_signed(back) else {
            break;
        };
        let key = MonthKey::new(day, title);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

/// Resolve the reference time from the `wikistats` setting.
///
/// Empty means now. A value that is not a Unix timestamp, or one so early
/// that the year window would fall outside the calendar, is logged and
/// treated as now.
pub fn reference_time(setting: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let setting = setting.trim();
    if setting.is_empty() {
        return now;
    }

    let parsed = setting
        .parse::<i64>()
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .filter(|ts| {
            ts.date_naive()
                .checked_sub_signed(Duration::days(LOOKBACK_DAYS))
                .is_some()
        });
    match parsed {
        Some(ts) => ts,
        None => {
            tracing::warn!(wikistats = setting, "Invalid wikistats timestamp, using current time");
            now
        }
    }
}

/// View-count sums over the four windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowedViews {
    pub day: u64,
    pub week: u64,
    pub four_weeks: u64,
    pub year: u64,
}

impl WindowedViews {
    /// Sum daily views for the windows ending the day before `reference`
    pub fn compute<F>(reference: NaiveDate, mut views_on: F) -> Self
    where
        F: FnMut(NaiveDate) -> u64,
    {
        let mut sums = [0u64; 4];
        let mut running = 0u64;
        let mut window = 0;

        for back in 1..=LOOKBACK_DAYS {
            let views = reference
                .checked_sub_signed(Duration::days(back))
                .map_or(0, &mut views_on);
            running = running.saturating_add(views);
            while window < WINDOW_DAYS.len() && back == WINDOW_DAYS[window] {
                sums[window] = running;
                window += 1;
            }
        }

        Self {
            day: sums[0],
            week: sums[1],
            four_weeks: sums[2],
            year: sums[3],
        }
    }

    /// Exposed features; the single-day count is only used for the ratio
    pub fn into_features(self) -> FeatureMap {
        let mut features = FeatureMap::new();
        features.insert(WIKISTATS_WK.to_string(), self.week as f64);
        features.insert(WIKISTATS_4WK.to_string(), self.four_weeks as f64);
        features.insert(WIKISTATS_YEAR.to_string(), self.year as f64);
        features.insert(WIKISTATS_DAY_OF_WK.to_string(), ratio(self.day, self.week));
        features.insert(WIKISTATS_WK_OF_4WK.to_string(), ratio(self.week, self.four_weeks));
        features.insert(WIKISTATS_4WK_OF_YEAR.to_string(), ratio(self.four_weeks, self.year));
        features
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}
