// smap-relay - sMAP to pub/sub translation bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Unit-of-time model
//!
//! sMAP producers send bare integer timestamps and only sometimes say which
//! unit they are in. This module holds the unit enum, the magnitude-based
//! guess used when the unit is missing, and overflow-checked conversion
//! between units.

use crate::error::{ParseError, RelayError, TimeConvertError};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Smallest value guessed as seconds
pub const S_LOW: u64 = 2 << 30;
/// Smallest value guessed as milliseconds
pub const MS_LOW: u64 = 2 << 39;
/// Smallest value guessed as microseconds
pub const US_LOW: u64 = 2 << 50;
/// Smallest value guessed as nanoseconds
pub const NS_LOW: u64 = 2 << 58;

/// Unit a timestamp is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfTime {
    /// 1e9 ticks per second
    Nanoseconds,
    /// 1e6 ticks per second
    Microseconds,
    /// 1e3 ticks per second
    Milliseconds,
    /// 1 tick per second
    Seconds,
}

impl UnitOfTime {
    /// All units, finest first
    pub const ALL: [UnitOfTime; 4] = [
        UnitOfTime::Nanoseconds,
        UnitOfTime::Microseconds,
        UnitOfTime::Milliseconds,
        UnitOfTime::Seconds,
    ];

    /// Number of ticks of this unit in one second
    pub fn per_second(self) -> u64 {
        match self {
            UnitOfTime::Nanoseconds => 1_000_000_000,
            UnitOfTime::Microseconds => 1_000_000,
            UnitOfTime::Milliseconds => 1_000,
            UnitOfTime::Seconds => 1,
        }
    }

    /// Short name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            UnitOfTime::Nanoseconds => "ns",
            UnitOfTime::Microseconds => "us",
            UnitOfTime::Milliseconds => "ms",
            UnitOfTime::Seconds => "s",
        }
    }

    /// Guess the unit of a raw timestamp from its magnitude.
    ///
    /// Boundaries are placed so that present-day timestamps land in the
    /// right bucket for each unit.
    pub fn guess(time: u64) -> Self {
        if time < MS_LOW {
            UnitOfTime::Seconds
        } else if time < US_LOW {
            UnitOfTime::Milliseconds
        } else if time < NS_LOW {
            UnitOfTime::Microseconds
        } else {
            UnitOfTime::Nanoseconds
        }
    }
}

impl fmt::Display for UnitOfTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitOfTime {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "s" | "sec" | "second" | "seconds" => Ok(UnitOfTime::Seconds),
            "ms" | "msec" | "millisecond" | "milliseconds" => Ok(UnitOfTime::Milliseconds),
            "us" | "usec" | "microsecond" | "microseconds" => Ok(UnitOfTime::Microseconds),
            "ns" | "nsec" | "nanosecond" | "nanoseconds" => Ok(UnitOfTime::Nanoseconds),
            other => Err(ParseError::UnitOfTime(other.to_string())),
        }
    }
}

/// Convert `time` from unit `from` to unit `to`.
///
/// Scaling up to a finer unit fails instead of wrapping; scaling down to a
/// coarser unit truncates. On failure the error carries the input unchanged.
pub fn convert(
    time: u64,
    from: UnitOfTime,
    to: UnitOfTime,
) -> std::result::Result<u64, TimeConvertError> {
    if from == to {
        return Ok(time);
    }
    let (from_ticks, to_ticks) = (from.per_second(), to.per_second());
    if to_ticks > from_ticks {
        time.checked_mul(to_ticks / from_ticks)
            .ok_or(TimeConvertError { time, from, to })
    } else {
        Ok(time / (from_ticks / to_ticks))
    }
}

/// Current wall-clock time in the given unit
pub fn now(unit: UnitOfTime) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    // ns -> coarser never overflows
    convert(nanos, UnitOfTime::Nanoseconds, unit).unwrap_or(nanos)
}

/// Parse an absolute timestamp such as `("1500000000123", "ms")`.
///
/// Whole seconds and the sub-second remainder are converted separately so
/// nanosecond inputs keep full precision.
pub fn parse_abs_time(num: &str, units: &str) -> Result<SystemTime, RelayError> {
    let value: u64 = num
        .parse()
        .map_err(|_| ParseError::Number(num.to_string()))?;
    let unit: UnitOfTime = units.parse()?;
    let seconds = convert(value, unit, UnitOfTime::Seconds)?;
    let whole = convert(seconds, UnitOfTime::Seconds, unit)?;
    let leftover_ns = convert(value - whole, unit, UnitOfTime::Nanoseconds)?;
    UNIX_EPOCH
        .checked_add(Duration::from_secs(seconds))
        .and_then(|t| t.checked_add(Duration::from_nanos(leftover_ns)))
        .ok_or_else(|| ParseError::Number(num.to_string()).into())
}

/// Parse a relative duration such as `("15", "min")`
pub fn parse_rel_time(num: &str, units: &str) -> Result<Duration, ParseError> {
    let value: u64 = num
        .parse()
        .map_err(|_| ParseError::Number(num.to_string()))?;
    let per = |secs: u64| {
        value
            .checked_mul(secs)
            .map(Duration::from_secs)
            .ok_or_else(|| ParseError::Number(num.to_string()))
    };
    match units {
        "h" | "hr" | "hour" | "hours" => per(3600),
        "m" | "min" | "minute" | "minutes" => per(60),
        "d" | "day" | "days" => per(86_400),
        "s" | "sec" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "millisecond" | "milliseconds" => Ok(Duration::from_millis(value)),
        "us" | "usec" | "microsecond" | "microseconds" => Ok(Duration::from_micros(value)),
        "ns" | "nsec" | "nanosecond" | "nanoseconds" => Ok(Duration::from_nanos(value)),
        other => Err(ParseError::Duration(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_convert_identity() {
        for unit in UnitOfTime::ALL {
            assert_eq!(convert(12345, unit, unit), Ok(12345));
        }
    }

    #[test]
    fn test_convert_between_units() {
        assert_eq!(
            convert(1, UnitOfTime::Seconds, UnitOfTime::Nanoseconds),
            Ok(1_000_000_000)
        );
        assert_eq!(
            convert(1_500, UnitOfTime::Milliseconds, UnitOfTime::Seconds),
            Ok(1)
        );
        assert_eq!(
            convert(7, UnitOfTime::Milliseconds, UnitOfTime::Microseconds),
            Ok(7_000)
        );
    }

    #[test]
    fn test_convert_overflow_returns_input() {
        let err = convert(u64::MAX / 10, UnitOfTime::Seconds, UnitOfTime::Milliseconds)
            .unwrap_err();
        assert_eq!(err.time, u64::MAX / 10);
        assert_eq!(err.from, UnitOfTime::Seconds);
        assert_eq!(err.to, UnitOfTime::Milliseconds);
    }

    #[test]
    fn test_convert_roundtrip_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let t: u64 = rng.gen();
            for from in UnitOfTime::ALL {
                for to in UnitOfTime::ALL {
                    if let Ok(there) = convert(t, from, to) {
                        if to.per_second() >= from.per_second() {
                            assert_eq!(convert(there, to, from), Ok(t));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_convert_roundtrip_exact_multiples() {
        let t = 1_500_000_000u64 * 1_000_000_000;
        let s = convert(t, UnitOfTime::Nanoseconds, UnitOfTime::Seconds).unwrap();
        assert_eq!(s, 1_500_000_000);
        assert_eq!(convert(s, UnitOfTime::Seconds, UnitOfTime::Nanoseconds), Ok(t));
    }

    #[test]
    fn test_guess_present_day() {
        assert_eq!(UnitOfTime::guess(1_500_000_000), UnitOfTime::Seconds);
        assert_eq!(UnitOfTime::guess(1_500_000_000_000), UnitOfTime::Milliseconds);
        assert_eq!(
            UnitOfTime::guess(1_500_000_000_000_000),
            UnitOfTime::Microseconds
        );
        assert_eq!(
            UnitOfTime::guess(1_500_000_000_000_000_000),
            UnitOfTime::Nanoseconds
        );
    }

    #[test]
    fn test_guess_monotone_across_boundaries() {
        let samples = [
            0,
            S_LOW - 1,
            S_LOW,
            MS_LOW - 1,
            MS_LOW,
            US_LOW - 1,
            US_LOW,
            NS_LOW - 1,
            NS_LOW,
            u64::MAX,
        ];
        // coarseness rank: s=0, ms=1, us=2, ns=3 as values grow
        let rank = |u: UnitOfTime| match u {
            UnitOfTime::Seconds => 0,
            UnitOfTime::Milliseconds => 1,
            UnitOfTime::Microseconds => 2,
            UnitOfTime::Nanoseconds => 3,
        };
        let ranks: Vec<_> = samples.iter().map(|&v| rank(UnitOfTime::guess(v))).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(UnitOfTime::guess(MS_LOW), UnitOfTime::Milliseconds);
        assert_eq!(UnitOfTime::guess(US_LOW), UnitOfTime::Microseconds);
        assert_eq!(UnitOfTime::guess(NS_LOW), UnitOfTime::Nanoseconds);
    }

    #[test]
    fn test_parse_unit_aliases() {
        assert_eq!("sec".parse::<UnitOfTime>(), Ok(UnitOfTime::Seconds));
        assert_eq!("msec".parse::<UnitOfTime>(), Ok(UnitOfTime::Milliseconds));
        assert_eq!(
            "microseconds".parse::<UnitOfTime>(),
            Ok(UnitOfTime::Microseconds)
        );
        assert_eq!("ns".parse::<UnitOfTime>(), Ok(UnitOfTime::Nanoseconds));
        assert!(matches!(
            "fortnight".parse::<UnitOfTime>(),
            Err(ParseError::UnitOfTime(_))
        ));
    }

    #[test]
    fn test_parse_abs_time_keeps_subsecond() {
        let t = parse_abs_time("1500000000123", "ms").unwrap();
        let d = t.duration_since(UNIX_EPOCH).unwrap();
        assert_eq!(d.as_secs(), 1_500_000_000);
        assert_eq!(d.subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_parse_abs_time_rejects_garbage() {
        assert!(parse_abs_time("abc", "s").is_err());
        assert!(parse_abs_time("10", "weeks").is_err());
    }

    #[test]
    fn test_parse_abs_time_out_of_range() {
        let err = parse_abs_time("18446744073709551615", "s").unwrap_err();
        assert_eq!(
            err,
            RelayError::Parse(ParseError::Number("18446744073709551615".to_string()))
        );
        // the same magnitude in nanoseconds is about 584 years
        assert!(parse_abs_time("18446744073709551615", "ns").is_ok());
    }

    #[test]
    fn test_parse_rel_time() {
        assert_eq!(parse_rel_time("2", "h"), Ok(Duration::from_secs(7200)));
        assert_eq!(parse_rel_time("15", "min"), Ok(Duration::from_secs(900)));
        assert_eq!(parse_rel_time("1", "day"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse_rel_time("5", "ms"), Ok(Duration::from_millis(5)));
        assert!(matches!(
            parse_rel_time("5", "weeks"),
            Err(ParseError::Duration(_))
        ));
    }

    #[test]
    fn test_now_is_in_expected_bucket() {
        assert_eq!(UnitOfTime::guess(now(UnitOfTime::Seconds)), UnitOfTime::Seconds);
        assert_eq!(
            UnitOfTime::guess(now(UnitOfTime::Milliseconds)),
            UnitOfTime::Milliseconds
        );
    }
}
