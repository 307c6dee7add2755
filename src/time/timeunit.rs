use crate::time::error::Error;
use core::str::FromStr;
use lazy_static::*;
use regex::Regex;
use std::fmt;
use std::time::Duration;

lazy_static! {
    static ref DURATION_REGEX: Regex =
        Regex::new(r"^(?:\d+(?:\.\d+)?(?:ns|us|µs|ms|s|m|h|d))+$").expect("Regex compilation error");
    static ref COMPONENT_REGEX: Regex =
        Regex::new(r"(?P<value>\d+(?:\.\d+)?)(?P<unit>ns|us|µs|ms|s|m|h|d)")
            .expect("Regex compilation error");
}

/// A duration written as one or more `<number><unit>` components, e.g. `500ms`,
/// `1.5s` or `1m30s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationUnit(Duration);

#[derive(Debug, PartialEq)]
pub enum TimeUnit {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    fn nanos(&self) -> u128 {
        match self {
            TimeUnit::Nanosecond => 1,
            TimeUnit::Microsecond => 1_000,
            TimeUnit::Millisecond => 1_000_000,
            TimeUnit::Second => 1_000_000_000,
            TimeUnit::Minute => 60 * 1_000_000_000,
            TimeUnit::Hour => 60 * 60 * 1_000_000_000,
            TimeUnit::Day => 24 * 60 * 60 * 1_000_000_000,
        }
    }
}

impl FromStr for DurationUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !DURATION_REGEX.is_match(s) {
            return Err(Error::Syntax(format!(
                "'{}' is not a duration, expected e.g. 500ms, 5s or 1m30s",
                s
            )));
        }
        let overflow = || Error::Overflow(s.to_owned());
        let mut total: u128 = 0;
        for caps in COMPONENT_REGEX.captures_iter(s) {
            let unit = caps["unit"].parse::<TimeUnit>()?;
            let value = &caps["value"];
            let nanos = match value.split_once('.') {
                Some((whole, fraction)) => {
                    let whole: u128 = whole.parse().map_err(|_| overflow())?;
                    let digits = fraction.len().min(9) as u32;
                    let fraction: u128 = fraction[..digits as usize].parse().map_err(|_| overflow())?;
                    // fraction < 10^9 and unit <= 8.64e13 ns, so this product fits
                    let fraction = fraction * unit.nanos() / 10u128.pow(digits);
                    whole
                        .checked_mul(unit.nanos())
                        .and_then(|nanos| nanos.checked_add(fraction))
                        .ok_or_else(overflow)?
                }
                None => {
                    let whole: u128 = value.parse().map_err(|_| overflow())?;
                    whole.checked_mul(unit.nanos()).ok_or_else(overflow)?
                }
            };
            total = total.checked_add(nanos).ok_or_else(overflow)?;
        }
        let secs = u64::try_from(total / 1_000_000_000).map_err(|_| overflow())?;
        Ok(Self(Duration::new(secs, (total % 1_000_000_000) as u32)))
    }
}

impl From<DurationUnit> for Duration {
    fn from(unit: DurationUnit) -> Self {
        unit.0
    }
}

impl From<Duration> for DurationUnit {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

/// Prints the shortest single-unit form that represents the value exactly.
impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let nanos = self.0.as_nanos();
        let units = [
            (TimeUnit::Day, "d"),
            (TimeUnit::Hour, "h"),
            (TimeUnit::Minute, "m"),
            (TimeUnit::Second, "s"),
            (TimeUnit::Millisecond, "ms"),
            (TimeUnit::Microsecond, "us"),
        ];
        if nanos == 0 {
            return write!(f, "0s");
        }
        for (unit, suffix) in units.iter() {
            if nanos % unit.nanos() == 0 {
                return write!(f, "{}{}", nanos / unit.nanos(), suffix);
            }
        }
        write!(f, "{}ns", nanos)
    }
}

impl FromStr for TimeUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ns" | "nanosecond" | "nanos" | "nanoseconds" => Ok(TimeUnit::Nanosecond),
            "us" | "µs" | "microsecond" | "micros" | "microseconds" => Ok(TimeUnit::Microsecond),
            "ms" | "millisecond" | "millis" | "milliseconds" => Ok(TimeUnit::Millisecond),
            "s" | "second" | "secs" | "seconds" => Ok(TimeUnit::Second),
            "m" | "minute" | "mins" | "minutes" => Ok(TimeUnit::Minute),
            "h" | "hour" | "hours" => Ok(TimeUnit::Hour),
            "d" | "day" | "days" => Ok(TimeUnit::Day),
            _ => Err(Error::UnitNotSupported(format!("Unit '{}' not supported", s))),
        }
    }
}
