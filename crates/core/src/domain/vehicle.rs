use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Fleet vehicle categories, smallest to largest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleClass {
    Sedan4,
    Suv7,
    Minibus10,
    Minibus14,
    Sprinter18,
    LuxuryCoach22,
    Midibus28,
    Coach60,
    Coach70,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 9] = [
        Self::Sedan4,
        Self::Suv7,
        Self::Minibus10,
        Self::Minibus14,
        Self::Sprinter18,
        Self::LuxuryCoach22,
        Self::Midibus28,
        Self::Coach60,
        Self::Coach70,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sedan4 => "4 Seater Sedan",
            Self::Suv7 => "7 Seater SUV",
            Self::Minibus10 => "10 Seater Minibus",
            Self::Minibus14 => "14 Seater Minibus",
            Self::Sprinter18 => "18 Seater Sprinter",
            Self::LuxuryCoach22 => "22 Seater Luxury Coach",
            Self::Midibus28 => "28 Seater Midibus",
            Self::Coach60 => "60 Seater Coach",
            Self::Coach70 => "70 Seater Coach",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sedan4 => "sedan4",
            Self::Suv7 => "suv7",
            Self::Minibus10 => "minibus10",
            Self::Minibus14 => "minibus14",
            Self::Sprinter18 => "sprinter18",
            Self::LuxuryCoach22 => "luxury_coach22",
            Self::Midibus28 => "midibus28",
            Self::Coach60 => "coach60",
            Self::Coach70 => "coach70",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim();
        Self::ALL.into_iter().find(|class| {
            class.label().eq_ignore_ascii_case(normalized)
                || class.as_str().eq_ignore_ascii_case(normalized)
        })
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VehicleClass {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
            .ok_or_else(|| DomainError::Validation(format!("unknown vehicle type `{value}`")))
    }
}
