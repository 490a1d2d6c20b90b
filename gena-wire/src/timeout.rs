//! The GENA TIMEOUT header grammar: `Second-<n>` or `Second-infinite`.

use std::fmt;
use std::time::Duration;

/// A subscription lease duration as carried in the TIMEOUT header.
///
/// UPnP allows a publisher to grant an unbounded lease, so "infinite" is a
/// first-class value rather than a sentinel number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// A lease of the given number of seconds
    Seconds(u32),
    /// An unbounded lease (`Second-infinite`)
    Infinite,
}

impl Timeout {
    /// Parse a TIMEOUT header value.
    ///
    /// The `Second-` prefix is matched case-insensitively, as peers in the
    /// field vary in capitalization. Returns `None` for anything that does
    /// not match the grammar; callers apply their own default in that case.
    pub fn parse_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let rest = value
            .get(.."Second-".len())
            .filter(|p| p.eq_ignore_ascii_case("Second-"))
            .map(|_| &value["Second-".len()..])?;
        if rest.eq_ignore_ascii_case("infinite") {
            Some(Timeout::Infinite)
        } else {
            rest.parse::<u32>().ok().map(Timeout::Seconds)
        }
    }

    /// Clamp a finite lease into `[min, max]`; `Infinite` passes through.
    pub fn clamp(self, min: u32, max: Option<u32>) -> Self {
        match self {
            Timeout::Infinite => Timeout::Infinite,
            Timeout::Seconds(s) => {
                let s = s.max(min);
                let s = match max {
                    Some(max) => s.min(max),
                    None => s,
                };
                Timeout::Seconds(s)
            }
        }
    }

    /// The lease as a `Duration`, `None` for an infinite lease.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Seconds(s) => Some(Duration::from_secs(u64::from(s))),
            Timeout::Infinite => None,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Seconds(s) => write!(f, "Second-{s}"),
            Timeout::Infinite => write!(f, "Second-infinite"),
        }
    }
}
