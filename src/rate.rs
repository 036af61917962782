// tc rate literals ("1mbit", "10gbit", "512kbps", ...)

use crate::error::ShapeError;
use std::fmt;
use std::str::FromStr;

const RATE_UNITS: &[&str] = &[
    "bit", "kbit", "mbit", "gbit", "tbit", "bps", "kbps", "mbps", "gbps", "tbps", "kibit", "mibit",
    "gibit", "tibit", "kibps", "mibps", "gibps", "tibps",
];

/// A rate in the syntax tc accepts for `rate` and `ceil`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rate(String);

impl Rate {
    /// Whole megabits per second, the unit the rule store uses
    pub fn from_mbit(mbit: u64) -> Self {
        Rate(format!("{}mbit", mbit))
    }

    pub fn from_gbit(gbit: u64) -> Self {
        Rate(format!("{}gbit", gbit))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Rate {
    type Err = ShapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ShapeError::InvalidRate(s.to_string());

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, unit) = s.split_at(split);

        let value: f64 = number.parse().map_err(|_| invalid())?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid());
        }

        // A bare number is bits per second
        let unit = unit.to_ascii_lowercase();
        if !unit.is_empty() && !RATE_UNITS.contains(&unit.as_str()) {
            return Err(invalid());
        }

        Ok(Rate(format!("{}{}", number, unit)))
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
