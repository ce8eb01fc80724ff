//! Shared value types: time wrappers, registry entries and the acting principal
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp(DateTime<Utc>);

/// A calendar date. Deposits are compared by day, never by time of day.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub struct Day(NaiveDate);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn day(&self) -> Day {
        Day(self.0.date_naive())
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl Day {
    /// Parse an ISO `YYYY-MM-DD` date.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(Self(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?))
    }
    pub fn date(&self) -> NaiveDate {
        self.0
    }
    /// Whole days from `self` to `later`; negative when `later` is earlier.
    pub fn days_until(&self, later: Day) -> i64 {
        (later.0 - self.0).num_days()
    }
}

impl From<NaiveDate> for Day {
    fn from(value: NaiveDate) -> Self {
        Day(value)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// Acting identity as supplied by the auth layer. Authorisation has already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub staff_id: String,
    pub staff_name: String,
}

impl Principal {
    pub fn new(staff_id: &str, staff_name: &str) -> Self {
        Self {
            staff_id: staff_id.to_string(),
            staff_name: staff_name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Product {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Staff {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
}

impl Product {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl Staff {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for Day {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i32(self.0.num_days_from_ce())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Day {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let days = d.i32()?;

        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Day)
            .ok_or(minicbor::decode::Error::message(
                "failed to convert day count to a calendar date",
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_survives_storage_encoding() {
        let original = Day::parse("2025-01-15").unwrap();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: Day = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
        assert_eq!(decode.to_string(), "2025-01-15");
    }

    #[test]
    fn day_distance() {
        let a = Day::parse("2025-01-15").unwrap();
        let b = Day::parse("2025-02-14").unwrap();

        assert_eq!(a.days_until(b), 30);
        assert_eq!(b.days_until(a), -30);
    }

    #[test]
    fn malformed_day_is_rejected() {
        assert!(Day::parse("15/01/2025").is_err());
    }
}
