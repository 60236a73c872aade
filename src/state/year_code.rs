//! Year-variant code parsing
//!
//! The remote API identifies a model-year as `"<year>-<fuelCode>"`, e.g.
//! `"2014-1"` (2014, gasoline) or `"32000-3"` (zero-km, diesel).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when a year-variant code cannot be split
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum YearCodeError {
    #[error("missing '-' separator in year code '{0}'")]
    MissingSeparator(String),

    #[error("invalid model year in year code '{0}'")]
    InvalidYear(String),

    #[error("invalid fuel code in year code '{0}'")]
    InvalidFuel(String),
}

/// A parsed year-variant code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearCode {
    pub year: i64,
    pub fuel: i64,
}

impl FromStr for YearCode {
    type Err = YearCodeError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let (year, fuel) = code
            .split_once('-')
            .ok_or_else(|| YearCodeError::MissingSeparator(code.to_string()))?;

        let year = year
            .trim()
            .parse::<i64>()
            .map_err(|_| YearCodeError::InvalidYear(code.to_string()))?;
        let fuel = fuel
            .trim()
            .parse::<i64>()
            .map_err(|_| YearCodeError::InvalidFuel(code.to_string()))?;

        Ok(Self { year, fuel })
    }
}

impl fmt::Display for YearCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.fuel)
    }
}
