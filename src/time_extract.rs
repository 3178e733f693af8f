//! Timestamp extraction from recognized overlay text
//!
//! Turns whatever the recognizer read off the screen into a validated
//! hours/minutes/seconds triple. Patterns are tried in a fixed order and the
//! first one that matches decides the result, even when its values turn out
//! to be out of range.

use regex::{Captures, Regex};
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

/// `H:MM` / `H.MM` / `H MM` (optionally `SS` with the same separator) followed by am/pm.
/// Groups: 1 hours, 2/4/6 minutes, 3/5/7 seconds, 8 meridiem.
const MERIDIEM_PATTERN: &str = concat!(
    r"(?:^|[^0-9])([0-9]{1,2})",
    r"(?::([0-9]{2})(?::([0-9]{2}))?|\.([0-9]{2})(?:\.([0-9]{2}))?|\s([0-9]{2})(?:\s([0-9]{2}))?)",
    r"\s*(am|pm)\b",
);

/// `H:MM` / `H.MM` / `H MM`, optionally `SS` with the same separator. The
/// reading must not run straight into another separator and digit, so
/// `3 12:30` is read as `12:30` rather than `3 12`.
const CLOCK_PATTERN: &str = concat!(
    r"(?:^|[^0-9])([0-9]{1,2})",
    r"(?::([0-9]{2})(?::([0-9]{2}))?|\.([0-9]{2})(?:\.([0-9]{2}))?|\s([0-9]{2})(?:\s([0-9]{2}))?)",
    r"(?:$|[^0-9:.\s]|[:.\s](?:[^0-9]|$))",
);

const MINUTE_GROUPS: [usize; 3] = [2, 4, 6];
const SECOND_GROUPS: [usize; 3] = [3, 5, 7];
const MERIDIEM_GROUP: usize = 8;

/// Exactly four contiguous digits, read as `HHMM`
const COMPACT_PATTERN: &str = r"(?:^|[^0-9])([0-9]{4})(?:[^0-9]|$)";

/// Why a piece of text could not be turned into a time
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("no text recognized")]
    Empty,

    #[error("no recognizable time pattern")]
    NoMatch,

    #[error("values out of range ({hours}:{minutes:02}:{seconds:02})")]
    OutOfRange {
        hours: u32,
        minutes: u32,
        seconds: u32,
    },
}

impl ExtractError {
    /// Short reason suitable for showing to the user
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "no text recognized",
            Self::NoMatch => "no recognizable time pattern",
            Self::OutOfRange { .. } => "values out of range",
        }
    }
}

/// A validated elapsed time. Minutes and seconds are always below 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CanonicalTime {
    hours: u32,
    minutes: u32,
    seconds: u32,
}

impl CanonicalTime {
    pub const ZERO: CanonicalTime = CanonicalTime {
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    /// Build a time, rejecting (never clamping) minutes or seconds >= 60.
    pub fn new(hours: u32, minutes: u32, seconds: u32) -> Result<Self, ExtractError> {
        if minutes >= 60 || seconds >= 60 {
            return Err(ExtractError::OutOfRange {
                hours,
                minutes,
                seconds,
            });
        }
        Ok(Self {
            hours,
            minutes,
            seconds,
        })
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    pub fn minutes(&self) -> u32 {
        self.minutes
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    pub fn total_seconds(&self) -> u64 {
        u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds)
    }
}

impl fmt::Display for CanonicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternKind {
    Meridiem,
    Clock,
    Compact,
}

fn patterns() -> &'static [(PatternKind, Regex)] {
    static PATTERNS: OnceLock<Vec<(PatternKind, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (PatternKind::Meridiem, MERIDIEM_PATTERN),
            (PatternKind::Clock, CLOCK_PATTERN),
            (PatternKind::Compact, COMPACT_PATTERN),
        ]
        .into_iter()
        .map(|(kind, pattern)| {
            let regex = Regex::new(pattern).expect("built-in time pattern must compile");
            (kind, regex)
        })
        .collect()
    })
}

fn number(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index).and_then(|m| m.as_str().parse().ok())
}

/// Value of whichever separator alternative matched
fn first_number(caps: &Captures<'_>, groups: &[usize]) -> Option<u32> {
    groups.iter().find_map(|&index| number(caps, index))
}

/// Extract a canonical time from recognized text.
///
/// The text is lowercased and trimmed, then matched against the meridiem,
/// clock and compact `HHMM` patterns in that order. Nothing here ever
/// substitutes a default time; callers that want a fallback decide that
/// themselves.
pub fn extract(text: &str) -> Result<CanonicalTime, ExtractError> {
    let normalized = text.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ExtractError::Empty);
    }

    for (kind, regex) in patterns() {
        let Some(caps) = regex.captures(&normalized) else {
            continue;
        };
        debug!("🔎 {:?} pattern matched {:?}", kind, caps.get(0).map(|m| m.as_str()));
        return from_captures(*kind, &caps);
    }

    debug!("🔎 No time pattern in {:?}", normalized);
    Err(ExtractError::NoMatch)
}

fn from_captures(kind: PatternKind, caps: &Captures<'_>) -> Result<CanonicalTime, ExtractError> {
    match kind {
        PatternKind::Compact => {
            let digits = caps.get(1).map(|m| m.as_str()).ok_or(ExtractError::NoMatch)?;
            let hours = digits[..2].parse().map_err(|_| ExtractError::NoMatch)?;
            let minutes = digits[2..].parse().map_err(|_| ExtractError::NoMatch)?;
            CanonicalTime::new(hours, minutes, 0)
        }
        PatternKind::Clock | PatternKind::Meridiem => {
            let mut hours = number(caps, 1).ok_or(ExtractError::NoMatch)?;
            let minutes = first_number(caps, &MINUTE_GROUPS).ok_or(ExtractError::NoMatch)?;
            let seconds = first_number(caps, &SECOND_GROUPS).unwrap_or(0);

            if kind == PatternKind::Meridiem {
                match caps.get(MERIDIEM_GROUP).map(|m| m.as_str()) {
                    Some("pm") if hours < 12 => hours += 12,
                    Some("am") if hours == 12 => hours = 0,
                    _ => {}
                }
            }

            CanonicalTime::new(hours, minutes, seconds)
        }
    }
}
