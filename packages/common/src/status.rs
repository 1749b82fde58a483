use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A student's position in the course progression chain.
///
/// The variants are declared in progression order, so the derived `Ord`
/// is the authority on which status is "further along". A cached status
/// must never move backwards; callers compare with `>=` before persisting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CourseStatus {
    /// Registered but has not provisioned a d0 repository yet.
    D0Pre,
    /// Working on d0.
    D0,
    /// Passed d0; may form (or become) a d1 team.
    D1Unlocked,
    /// Belongs to a d1 team but has no d1 repository yet.
    D1TeamSet,
    /// Working on d1.
    D1,
    /// Passed d1; working on d2.
    D2,
    /// Passed d2; d3 pull request not yet opened.
    D3Pre,
    /// Working on d3. Terminal.
    D3,
}

impl CourseStatus {
    /// Returns true once the student has a graded deliverable behind them.
    pub fn is_past_d0(&self) -> bool {
        *self >= Self::D1Unlocked
    }

    /// Returns true if the student is on a team deliverable (d1 onwards).
    pub fn is_on_team_track(&self) -> bool {
        *self >= Self::D1TeamSet
    }

    /// All status values, in progression order.
    pub const ALL: &'static [CourseStatus] = &[
        Self::D0Pre,
        Self::D0,
        Self::D1Unlocked,
        Self::D1TeamSet,
        Self::D1,
        Self::D2,
        Self::D3Pre,
        Self::D3,
    ];

    /// Returns the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::D0Pre => "D0PRE",
            Self::D0 => "D0",
            Self::D1Unlocked => "D1UNLOCKED",
            Self::D1TeamSet => "D1TEAMSET",
            Self::D1 => "D1",
            Self::D2 => "D2",
            Self::D3Pre => "D3PRE",
            Self::D3 => "D3",
        }
    }
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for CourseStatus {
    fn default() -> Self {
        Self::D0Pre
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid status '{}'. Valid values: {}",
            self.invalid,
            CourseStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for CourseStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "D0PRE" => Ok(Self::D0Pre),
            "D0" => Ok(Self::D0),
            "D1UNLOCKED" => Ok(Self::D1Unlocked),
            "D1TEAMSET" => Ok(Self::D1TeamSet),
            "D1" => Ok(Self::D1),
            "D2" => Ok(Self::D2),
            "D3PRE" => Ok(Self::D3Pre),
            "D3" => Ok(Self::D3),
            _ => Err(ParseStatusError {
                invalid: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progression_order() {
        for pair in CourseStatus::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should precede {}", pair[0], pair[1]);
        }
        assert!(CourseStatus::D0Pre < CourseStatus::D3);
        assert!(CourseStatus::D1TeamSet < CourseStatus::D1);
    }

    #[test]
    fn test_string_roundtrip() {
        for status in CourseStatus::ALL {
            assert_eq!(status.as_str().parse::<CourseStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown() {
        assert!("D4".parse::<CourseStatus>().is_err());
        assert!("d0pre".parse::<CourseStatus>().is_err());
    }

    #[test]
    fn test_track_helpers() {
        assert!(!CourseStatus::D0.is_past_d0());
        assert!(CourseStatus::D1Unlocked.is_past_d0());
        assert!(!CourseStatus::D1Unlocked.is_on_team_track());
        assert!(CourseStatus::D3.is_on_team_track());
    }
}
