//! Triggering and shutdown modes.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// How updates to a key are turned into sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriggerMode {
    /// First update arms a window; the latest value is sent when it closes.
    #[default]
    TrailingOnly = 0,
    /// Send immediately, then once more at the end of the cooldown if
    /// anything arrived in between.
    LeadingAndTrailing = 1,
    /// Send immediately; updates arriving during the cooldown are dropped.
    LeadingOnly = 2,
}

impl TriggerMode {
    /// Whether the first update after quiescence is sent immediately.
    #[inline]
    pub fn is_leading(&self) -> bool {
        matches!(self, Self::LeadingAndTrailing | Self::LeadingOnly)
    }

    /// Whether a cooldown expiry flushes the pending value.
    #[inline]
    pub fn sends_trailing(&self) -> bool {
        matches!(self, Self::TrailingOnly | Self::LeadingAndTrailing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrailingOnly => "trailing",
            Self::LeadingAndTrailing => "leading_trailing",
            Self::LeadingOnly => "leading",
        }
    }
}

impl From<u8> for TriggerMode {
    fn from(value: u8) -> Self {
        match value {
            1 => TriggerMode::LeadingAndTrailing,
            2 => TriggerMode::LeadingOnly,
            _ => TriggerMode::TrailingOnly, // Unknown values fall back to trailing
        }
    }
}

impl FromStr for TriggerMode {
    type Err = Infallible;

    /// Parses the names produced by [`TriggerMode::as_str`], case-insensitively.
    /// Anything unrecognised falls back to [`TriggerMode::TrailingOnly`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "leading_trailing" | "leading-trailing" | "leadingandtrailing" => {
                TriggerMode::LeadingAndTrailing
            }
            "leading" | "leading_only" | "leading-only" | "leadingonly" => TriggerMode::LeadingOnly,
            _ => TriggerMode::TrailingOnly,
        };
        Ok(mode)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with pending payloads when the coalescer shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShutdownMode {
    /// Discard pending payloads.
    #[default]
    Noop,
    /// Send the latest pending payload of every key once.
    SendLatest,
}

impl ShutdownMode {
    #[inline]
    pub fn flushes(&self) -> bool {
        matches!(self, Self::SendLatest)
    }
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => f.write_str("noop"),
            Self::SendLatest => f.write_str("send_latest"),
        }
    }
}
