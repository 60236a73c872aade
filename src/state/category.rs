use serde::Deserialize;
use std::fmt;

/// Vehicle category of the reference table
///
/// The numeric code is what the remote API and the exported artifacts use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleCategory {
    Cars,
    Motorcycles,
    Trucks,
}

impl VehicleCategory {
    /// Returns the remote API code for this category
    pub fn code(&self) -> i64 {
        match self {
            Self::Cars => 1,
            Self::Motorcycles => 2,
            Self::Trucks => 3,
        }
    }

    /// Looks up a category by its remote API code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Cars),
            2 => Some(Self::Motorcycles),
            3 => Some(Self::Trucks),
            _ => None,
        }
    }

    /// Returns every category in harvest order
    pub fn all() -> Vec<Self> {
        vec![Self::Cars, Self::Motorcycles, Self::Trucks]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cars => "cars",
            Self::Motorcycles => "motorcycles",
            Self::Trucks => "trucks",
        }
    }
}

impl fmt::Display for VehicleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
