//! # Time Bin Construction
//!
//! Partitions a horizon of `n_years` after an anchor event into contiguous,
//! labeled, fixed-width intervals. Offsets are integers in the bin unit
//! (weeks or calendar months); the calendar conversion happens later, per
//! subject, in the aggregator.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const WEEKS_PER_YEAR: u32 = 52;
const MONTHS_PER_YEAR: u32 = 12;

/// Longest horizon, in years, that a bin set may cover.
pub const MAX_YEARS: u32 = 200;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinError {
    #[error(
        "Unrecognized bin window '{0}'. Expected one of 'week', 'month', '3month' or '6month'."
    )]
    UnknownWindow(String),
    #[error("The bin horizon must cover at least one year, but nYears was 0.")]
    ZeroYears,
    #[error("A horizon of {0} years is too large. At most {MAX_YEARS} years are supported.")]
    HorizonTooLarge(u32),
    #[error("'{0}' is not a valid bin label. Expected '{{start}}to{{end}}{{unit}}', e.g. '0to3month'.")]
    MalformedLabel(String),
}

/// The unit that bin offsets are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinUnit {
    Week,
    Month,
}

impl BinUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            BinUnit::Week => "week",
            BinUnit::Month => "month",
        }
    }

    /// Shifts `anchor` forward by `amount` units. Weeks are whole calendar
    /// weeks; months are calendar months, clamped to the last day of a shorter
    /// target month (Jan 31 + 1 month = Feb 28/29). Returns `None` on overflow.
    pub fn offset(self, anchor: NaiveDate, amount: u32) -> Option<NaiveDate> {
        match self {
            BinUnit::Week => anchor.checked_add_days(Days::new(u64::from(amount) * 7)),
            BinUnit::Month => anchor.checked_add_months(Months::new(amount)),
        }
    }
}

impl fmt::Display for BinUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The bin width keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Window {
    Week,
    Month,
    ThreeMonth,
    SixMonth,
}

impl Window {
    pub fn unit(self) -> BinUnit {
        match self {
            Window::Week => BinUnit::Week,
            Window::Month | Window::ThreeMonth | Window::SixMonth => BinUnit::Month,
        }
    }

    /// Bin width in units of [`Window::unit`].
    pub fn step(self) -> u32 {
        match self {
            Window::Week | Window::Month => 1,
            Window::ThreeMonth => 3,
            Window::SixMonth => 6,
        }
    }

    /// The horizon of `n_years` expressed in this window's unit.
    pub fn horizon(self, n_years: u32) -> Result<u32, BinError> {
        if n_years > MAX_YEARS {
            return Err(BinError::HorizonTooLarge(n_years));
        }
        let per_year = match self.unit() {
            BinUnit::Week => WEEKS_PER_YEAR,
            BinUnit::Month => MONTHS_PER_YEAR,
        };
        n_years
            .checked_mul(per_year)
            .ok_or(BinError::HorizonTooLarge(n_years))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Window::Week => "week",
            Window::Month => "month",
            Window::ThreeMonth => "3month",
            Window::SixMonth => "6month",
        }
    }
}

impl FromStr for Window {
    type Err = BinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "week" => Ok(Window::Week),
            "month" => Ok(Window::Month),
            "3month" => Ok(Window::ThreeMonth),
            "6month" => Ok(Window::SixMonth),
            other => Err(BinError::UnknownWindow(other.to_string())),
        }
    }
}

impl TryFrom<String> for Window {
    type Error = BinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Window> for String {
    fn from(window: Window) -> Self {
        window.as_str().to_string()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single interval `[start, end]` of offsets from a subject's anchor date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeBin {
    pub start: u32,
    pub end: u32,
    pub unit: BinUnit,
    pub label: String,
}

impl TimeBin {
    pub fn new(start: u32, end: u32, unit: BinUnit) -> Self {
        Self {
            start,
            end,
            unit,
            label: format!("{start}to{end}{unit}"),
        }
    }

    /// Recovers `(start, end, unit)` from a label such as `"3to6month"`.
    pub fn parse_label(label: &str) -> Result<(u32, u32, BinUnit), BinError> {
        let malformed = || BinError::MalformedLabel(label.to_string());
        let (offsets, unit) = if let Some(rest) = label.strip_suffix("week") {
            (rest, BinUnit::Week)
        } else if let Some(rest) = label.strip_suffix("month") {
            (rest, BinUnit::Month)
        } else {
            return Err(malformed());
        };
        let (start, end) = offsets.split_once("to").ok_or_else(malformed)?;
        let start: u32 = start.parse().map_err(|_| malformed())?;
        let end: u32 = end.parse().map_err(|_| malformed())?;
        if start >= end {
            return Err(malformed());
        }
        Ok((start, end, unit))
    }

    /// Absolute, inclusive date bounds of this bin for a subject anchored at `anchor`.
    pub fn date_bounds(&self, anchor: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.unit.offset(anchor, self.start)?;
        let last = self.unit.offset(anchor, self.end)?;
        Some((first, last))
    }
}

/// An ordered, contiguous partition of `[0, horizon)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinSet {
    bins: Vec<TimeBin>,
}

impl BinSet {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bins(&self) -> &[TimeBin] {
        &self.bins
    }

    pub fn get(&self, index: usize) -> Option<&TimeBin> {
        self.bins.get(index)
    }

    pub fn starts(&self) -> Vec<u32> {
        self.bins.iter().map(|b| b.start).collect()
    }

    pub fn ends(&self) -> Vec<u32> {
        self.bins.iter().map(|b| b.end).collect()
    }

    pub fn labels(&self) -> Vec<String> {
        self.bins.iter().map(|b| b.label.clone()).collect()
    }
}

/// Builds the bins for `window` over `n_years`.
///
/// Bins start at offset 0 and advance by the window's step; each bin ends
/// exactly where the next one starts, and the last bin ends at the horizon.
pub fn make_bins(window: Window, n_years: u32) -> Result<BinSet, BinError> {
    if n_years == 0 {
        return Err(BinError::ZeroYears);
    }

    let step = window.step();
    let horizon = window.horizon(n_years)?;
    let unit = window.unit();

    let bins: Vec<TimeBin> = (0..horizon)
        .step_by(step as usize)
        .filter_map(|start| {
            start
                .checked_add(step)
                .filter(|&end| end <= horizon)
                .map(|end| TimeBin::new(start, end, unit))
        })
        .collect();

    log::debug!(
        "constructed {} time blocks in {} {} intervals up to {} year(s)",
        bins.len(),
        step,
        unit,
        n_years
    );

    Ok(BinSet { bins })
}
