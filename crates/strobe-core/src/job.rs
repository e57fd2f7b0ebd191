//! Render job request model.
//!
//! Requests are validated by whatever front end submits them; the core trusts
//! the numeric parameters it receives.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Render quality level selected by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// Numeric level as exposed to front ends (1 = low, 3 = high).
    pub const fn level(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl TryFrom<u8> for QualityLevel {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(Error::Config(format!(
                "quality level must be between 1 and 3, got {other}"
            ))),
        }
    }
}

impl FromStr for QualityLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "low" => Ok(Self::Low),
            "2" | "medium" => Ok(Self::Medium),
            "3" | "high" => Ok(Self::High),
            other => Err(Error::Config(format!("unknown quality level: {other}"))),
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single parameterised render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Unique job identifier; also embedded in every artifact file name.
    pub job_id: String,
    /// Disk rotation speed in revolutions per minute.
    pub rotation_speed_rpm: f64,
    /// Strobe flash frequency in hertz.
    pub flash_frequency_hz: f64,
    pub quality: QualityLevel,
}

impl JobRequest {
    pub fn new(
        job_id: impl Into<String>,
        rotation_speed_rpm: f64,
        flash_frequency_hz: f64,
        quality: QualityLevel,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            rotation_speed_rpm,
            flash_frequency_hz,
            quality,
        }
    }
}
