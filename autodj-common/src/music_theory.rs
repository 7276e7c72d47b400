//! Music theory helpers for harmonic mixing
//!
//! Maps a pitch class and mode to its position on the Camelot wheel and
//! judges whether two positions mix harmonically. Also hosts the small
//! numeric helpers shared by the planner and executor.
//!
//! # Camelot wheel
//!
//! Twelve numbered slots, each with a minor (`A`) and a major (`B`) key.
//! Two keys mix cleanly when they are:
//! - the same code,
//! - adjacent numbers with the same letter (12 wraps to 1),
//! - the same number with a different letter (relative major/minor).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Major-mode wheel numbers indexed by pitch class (C = 0)
const MAJOR_WHEEL: [u8; 12] = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];

/// Minor-mode wheel numbers indexed by pitch class (C = 0)
const MINOR_WHEEL: [u8; 12] = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];

/// Musical mode as reported by the metadata service (major = 1, minor = 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Minor,
    Major,
}

impl Mode {
    /// Parse the service's integer mode; anything other than 0/1 is unknown
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Mode::Minor),
            1 => Some(Mode::Major),
            _ => None,
        }
    }

    /// Camelot letter for this mode
    pub fn letter(&self) -> char {
        match self {
            Mode::Minor => 'A',
            Mode::Major => 'B',
        }
    }
}

/// A position on the Camelot wheel, e.g. `8A` or `11B`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotCode {
    number: u8,
    mode: Mode,
}

impl CamelotCode {
    /// Build a code from a wheel number (1-12) and mode
    pub fn new(number: u8, mode: Mode) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self { number, mode })
    }

    /// Code for a pitch class (taken mod 12) and mode
    pub fn from_key_mode(key: u8, mode: Mode) -> Self {
        let index = (key % 12) as usize;
        let number = match mode {
            Mode::Major => MAJOR_WHEEL[index],
            Mode::Minor => MINOR_WHEEL[index],
        };
        Self { number, mode }
    }

    /// Wheel number (1-12)
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Mode (letter A = minor, B = major)
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Distance around the wheel between two numbers, ignoring mode (0-6)
    pub fn wheel_distance(&self, other: &CamelotCode) -> u8 {
        let diff = self.number.abs_diff(other.number);
        diff.min(12 - diff)
    }

    /// All 24 codes in wheel order (1A, 1B, 2A, ...)
    pub fn all() -> Vec<CamelotCode> {
        (1..=12)
            .flat_map(|n| {
                [Mode::Minor, Mode::Major]
                    .into_iter()
                    .map(move |mode| CamelotCode { number: n, mode })
            })
            .collect()
    }
}

impl fmt::Display for CamelotCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

impl FromStr for CamelotCode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || crate::Error::InvalidInput(format!("Invalid Camelot code: {:?}", s));

        let letter = s.chars().last().ok_or_else(invalid)?;
        let mode = match letter.to_ascii_uppercase() {
            'A' => Mode::Minor,
            'B' => Mode::Major,
            _ => return Err(invalid()),
        };
        let number: u8 = s[..s.len() - 1].parse().map_err(|_| invalid())?;
        CamelotCode::new(number, mode).ok_or_else(invalid)
    }
}

impl Serialize for CamelotCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CamelotCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Camelot code for a raw key/mode pair as reported by the metadata service
///
/// Returns `None` when either value is missing, when the key is negative
/// (the service's "no key detected" marker), or when the mode is not 0/1.
/// Keys of 12 and above wrap mod 12.
pub fn camelot_key(key: Option<i32>, mode: Option<i32>) -> Option<CamelotCode> {
    let key = key.filter(|k| *k >= 0)?;
    let mode = Mode::from_code(mode?)?;
    Some(CamelotCode::from_key_mode((key % 12) as u8, mode))
}

/// Whether two codes mix harmonically; false when either is unknown
pub fn is_harmonic(a: Option<CamelotCode>, b: Option<CamelotCode>) -> bool {
    let (Some(a), Some(b)) = (a, b) else {
        return false;
    };

    if a == b {
        return true;
    }

    let neighbors = a.mode == b.mode && a.wheel_distance(&b) == 1;
    let relative = a.mode != b.mode && a.number == b.number;
    neighbors || relative
}

/// Clamp to the unit interval
pub fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Linear interpolation between `a` and `b`
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
