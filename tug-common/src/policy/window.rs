//! Maintenance window expressions.
//!
//! A window is a recurring `(days, start-end)` range such as
//! `mon-fri 22:00-06:00`, `daily 03:00-05:00`, or `sat,sun 01:00-04:00`.
//! Ranges may wrap midnight: `22:00-06:00` on `mon` covers Monday 22:00
//! through Tuesday 06:00.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing a window expression.
///
/// Parse failures are non-transient: an invalid expression blocks only the
/// container that carries it and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("empty maintenance window expression")]
    Empty,
    #[error("invalid day token `{0}` in maintenance window")]
    InvalidDay(String),
    #[error("invalid time range `{0}`, expected HH:MM-HH:MM")]
    InvalidRange(String),
    #[error("invalid time `{0}`, expected HH:MM")]
    InvalidTime(String),
    #[error("maintenance window start and end are identical: `{0}`")]
    ZeroLength(String),
}

/// A parsed, recurring maintenance window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    /// Days on which the window opens, Monday = bit 0 .. Sunday = bit 6.
    days_mask: u8,
    start: NaiveTime,
    end: NaiveTime,
    /// Original expression, kept for display and traces.
    raw: String,
}

const ALL_DAYS: u8 = 0b0111_1111;

const DAY_TOKENS: [(&str, u8); 7] = [
    ("mon", 0),
    ("tue", 1),
    ("wed", 2),
    ("thu", 3),
    ("fri", 4),
    ("sat", 5),
    ("sun", 6),
];

fn day_bit(token: &str) -> Option<u8> {
    DAY_TOKENS
        .iter()
        .find(|(name, _)| *name == token)
        .map(|(_, bit)| 1u8 << bit)
}

fn weekday_bit(day: Weekday) -> u8 {
    1u8 << day.num_days_from_monday()
}

impl MaintenanceWindow {
    /// Parse an expression of the form `[days ]HH:MM-HH:MM`.
    ///
    /// `days` is `daily`, a single day (`mon`), a range (`mon-fri`, wrapping
    /// allowed: `fri-mon`), or a comma list mixing both (`mon,wed-fri`).
    /// Omitting the day part means every day.
    pub fn parse(expr: &str) -> Result<Self, WindowError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(WindowError::Empty);
        }
        let (days_part, range_part) = match expr.rsplit_once(' ') {
            Some((days, range)) => (Some(days.trim()), range.trim()),
            None => (None, expr),
        };

        let days_mask = match days_part {
            None => ALL_DAYS,
            Some("daily") => ALL_DAYS,
            Some(days) => parse_days(days)?,
        };

        let (start_s, end_s) = range_part
            .split_once('-')
            .ok_or_else(|| WindowError::InvalidRange(range_part.to_string()))?;
        let start = parse_time(start_s.trim())?;
        let end = parse_time(end_s.trim())?;
        if start == end {
            return Err(WindowError::ZeroLength(range_part.to_string()));
        }

        Ok(Self {
            days_mask,
            start,
            end,
            raw: expr.to_string(),
        })
    }

    /// Whether `now` falls inside the window.
    ///
    /// For ranges wrapping midnight, the day mask refers to the day the
    /// window opens, so `mon 22:00-06:00` includes Tuesday 02:00.
    pub fn contains(&self, now: NaiveDateTime) -> bool {
        let time = now.time();
        let today = weekday_bit(now.weekday());
        if self.start < self.end {
            self.days_mask & today != 0 && time >= self.start && time < self.end
        } else {
            let yesterday = weekday_bit(now.weekday().pred());
            (self.days_mask & today != 0 && time >= self.start)
                || (self.days_mask & yesterday != 0 && time < self.end)
        }
    }

    /// The original expression.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for MaintenanceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

fn parse_days(days: &str) -> Result<u8, WindowError> {
    let mut mask = 0u8;
    for part in days.split(',') {
        let part = part.trim().to_ascii_lowercase();
        if part.is_empty() {
            return Err(WindowError::InvalidDay(days.to_string()));
        }
        if let Some((from, to)) = part.split_once('-') {
            let from_bit = day_bit(from).ok_or_else(|| WindowError::InvalidDay(from.to_string()))?;
            let to_bit = day_bit(to).ok_or_else(|| WindowError::InvalidDay(to.to_string()))?;
            let mut bit = from_bit;
            loop {
                mask |= bit;
                if bit == to_bit {
                    break;
                }
                bit = if bit == 1 << 6 { 1 } else { bit << 1 };
            }
        } else {
            mask |= day_bit(&part).ok_or_else(|| WindowError::InvalidDay(part.clone()))?;
        }
    }
    Ok(mask)
}

fn parse_time(s: &str) -> Result<NaiveTime, WindowError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| WindowError::InvalidTime(s.to_string()))
}
