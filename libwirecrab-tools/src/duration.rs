use chrono::{DateTime, SecondsFormat, Utc};

/// Capture timestamp, as found in pcap records: seconds since the epoch and microseconds
///
/// Reimplementation of std::time::Duration, but panic-free and partial:
///   - use micros instead of nanos, avoid casts
///   - expose fields
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct Duration {
    pub secs: u32,
    pub micros: u32,
}

pub const MICROS_PER_SEC: u32 = 1_000_000;

impl Duration {
    /// Build Duration from secs and micros
    pub fn new(secs: u32, micros: u32) -> Duration {
        Duration { secs, micros }
    }

    /// Current wall-clock time
    pub fn now() -> Duration {
        let now = Utc::now();
        Duration {
            secs: now.timestamp().clamp(0, u32::MAX as i64) as u32,
            micros: now.timestamp_subsec_micros().min(MICROS_PER_SEC - 1),
        }
    }

    /// Test if Duration object is null
    #[inline]
    pub fn is_null(self) -> bool {
        self.secs == 0 && self.micros == 0
    }

    /// Parse an epoch timestamp with an optional fractional part (`"1700000000.123456789"`).
    ///
    /// Digits beyond the microsecond are ignored.
    pub fn parse_epoch(s: &str) -> Option<Duration> {
        let s = s.trim();
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        let secs = int_part.parse::<u32>().ok()?;
        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let mut micros = 0u32;
        for i in 0..6 {
            let digit = frac_part
                .as_bytes()
                .get(i)
                .map_or(0, |b| u32::from(b - b'0'));
            micros = micros * 10 + digit;
        }
        Some(Duration { secs, micros })
    }

    /// Format as an RFC 3339 (ISO-8601) UTC timestamp, with microseconds
    pub fn to_rfc3339(self) -> String {
        match DateTime::<Utc>::from_timestamp(i64::from(self.secs), self.micros * 1000) {
            Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Micros, true),
            None => String::new(),
        }
    }
}
