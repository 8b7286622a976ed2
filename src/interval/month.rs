use std::fmt;
use std::str::FromStr;

use jiff::{
    civil::{date, Date},
    ToSpan,
};
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref MONTH_KEY: Regex = Regex::new(r"^(\d{4})-(\d{2})$").unwrap();
}

#[derive(Error, Debug, PartialEq)]
#[error("{0}")]
pub struct MonthParseError(pub String);

/// A calendar month, stored as its first day.
#[derive(PartialEq, Debug, Clone, Copy, Hash, Eq, PartialOrd, Ord)]
pub struct Month {
    start: Date,
}

/// Panics if `month` is not in 1..=12.  Use [Month::new] for untrusted input.
pub fn month(year: i16, month: i8) -> Month {
    Month::new(year, month).unwrap()
}

impl Month {
    pub fn new(year: i16, month: i8) -> Result<Month, MonthParseError> {
        let start = Date::new(year, month, 1)
            .map_err(|e| MonthParseError(format!("Invalid month {}-{}: {}", year, month, e)))?;
        Ok(Month { start })
    }

    /// Return the month that contains this date.
    pub fn containing(day: Date) -> Month {
        Month {
            start: day.first_of_month(),
        }
    }

    pub fn year(&self) -> i16 {
        self.start.year()
    }

    pub fn month(&self) -> i8 {
        self.start.month()
    }

    pub fn start_date(&self) -> Date {
        self.start
    }

    /// Last calendar day of the month, e.g. 2024-02-29.
    pub fn end_date(&self) -> Date {
        self.start.last_of_month()
    }

    pub fn days_in_month(&self) -> i8 {
        self.start.days_in_month()
    }

    pub fn next(&self) -> Month {
        Month {
            start: self.start.saturating_add(1.month()),
        }
    }

    pub fn previous(&self) -> Month {
        Month {
            start: self.start.saturating_sub(1.month()),
        }
    }

    /// All the months from this one up to, but not including, `end`.
    /// Empty if `end` is not after this month.
    pub fn up_to(self, end: Month) -> impl Iterator<Item = Month> {
        std::iter::successors(Some(self), |m| {
            let next = m.next();
            (next > *m).then_some(next)
        })
        .take_while(move |m| *m < end)
    }
}

/// Months that still need to be downloaded when today is `today`.
/// The current month is never complete, so it is left out.
pub fn months_between(start: Month, today: Date) -> impl Iterator<Item = Month> {
    start.up_to(Month::containing(today))
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = MonthParseError;

    /// Parse a month in the `YYYY-MM` format, e.g. `2021-03`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = MONTH_KEY
            .captures(s)
            .ok_or_else(|| MonthParseError(format!("Failed parsing {:?} as a month", s)))?;
        let year: i16 = caps[1]
            .parse()
            .map_err(|_| MonthParseError(format!("Invalid year in {:?}", s)))?;
        let m: i8 = caps[2]
            .parse()
            .map_err(|_| MonthParseError(format!("Invalid month in {:?}", s)))?;
        if !(1..=12).contains(&m) {
            return Err(MonthParseError(format!("Month of year {} > 12 in {:?}", m, s)));
        }
        Ok(Month {
            start: date(year, m, 1),
        })
    }
}
