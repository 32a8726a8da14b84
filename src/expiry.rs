//! Days-until-expiry arithmetic for access tokens.
//!
//! GitLab reports `expires_at` as a bare `YYYY-MM-DD` date. The token stops
//! working at UTC midnight of that date, so the remaining window is measured
//! from `now` to that instant in whole hours and divided by 24. Integer
//! division truncates toward zero: a token expiring later today reports 0,
//! one that expired earlier reports a negative number.

use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::ParseError;

/// Source of "now" for expiry math. Injected so scans are reproducible in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Days between `now` and `expires_at`. Negative when already expired.
pub fn days_until_expire_at(expires_at: &str, now: DateTime<Utc>) -> Result<i64, ParseError> {
    let date = parse_date(expires_at)?;
    let expires = date.and_time(chrono::NaiveTime::MIN).and_utc();
    Ok((expires - now).num_hours() / 24)
}

fn parse_date(input: &str) -> Result<NaiveDate, ParseError> {
    let err = || ParseError { input: input.to_string() };

    // chrono accepts unpadded fields; GitLab always pads, and anything else
    // means the payload is not what we think it is.
    let bytes = input.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shape_ok {
        return Err(err());
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| err())
}
