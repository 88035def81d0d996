//! Snowflake row identifiers.
//!
//! Layout, most significant bit first: 42 bits of milliseconds since the
//! epoch, 5 bits worker id, 5 bits process id, 12 bits per-process increment.

use derive_where::derive_where;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    marker::PhantomData,
};
use thiserror::Error;
use time::{Duration, UtcDateTime};

const TIMESTAMP_BITS: u32 = 42;
const WORKER_ID_BITS: u32 = 5;
const PROCESS_ID_BITS: u32 = 5;
const INCREMENT_BITS: u32 = 12;

const INCREMENT_SHIFT: u32 = 0;
const PROCESS_ID_SHIFT: u32 = INCREMENT_SHIFT + INCREMENT_BITS;
const WORKER_ID_SHIFT: u32 = PROCESS_ID_SHIFT + PROCESS_ID_BITS;
const TIMESTAMP_SHIFT: u32 = WORKER_ID_SHIFT + WORKER_ID_BITS;

const fn mask(bits: u32) -> u64 {
    (1 << bits) - 1
}

pub trait Epoch {
    const EPOCH_TIME: UtcDateTime;
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum SnowflakeTimeError {
    #[error("Time lies before the snowflake epoch")]
    BeforeEpoch,
    #[error("Time lies too far after the snowflake epoch")]
    AfterRange,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("{name} {value} does not fit into {bits} bits")]
pub struct SnowflakePartOutOfRangeError {
    name: &'static str,
    value: u64,
    bits: u32,
}

/// Identifies the machine (worker) and the process on it that minted an id.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize)]
pub struct Origin {
    worker_id: u8,
    process_id: u8,
}

impl Origin {
    pub fn new(worker_id: u8, process_id: u8) -> Result<Self, SnowflakePartOutOfRangeError> {
        check_part("worker id", worker_id.into(), WORKER_ID_BITS)?;
        check_part("process id", process_id.into(), PROCESS_ID_BITS)?;

        Ok(Self {
            worker_id,
            process_id,
        })
    }

    #[must_use]
    pub fn worker_id(self) -> u8 {
        self.worker_id
    }

    #[must_use]
    pub fn process_id(self) -> u8 {
        self.process_id
    }
}

fn check_part(
    name: &'static str,
    value: u64,
    bits: u32,
) -> Result<(), SnowflakePartOutOfRangeError> {
    if value <= mask(bits) {
        Ok(())
    } else {
        Err(SnowflakePartOutOfRangeError { name, value, bits })
    }
}

#[derive_where(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Debug,
    Default,
    Hash,
    Serialize,
    Deserialize
)]
#[serde(transparent)]
pub struct Snowflake<E>(u64, #[serde(skip)] PhantomData<E>);

impl<E> Snowflake<E> {
    #[must_use]
    pub fn new(inner: u64) -> Self {
        Self(inner, PhantomData)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Milliseconds since the epoch.
    #[must_use]
    pub fn timestamp_millis(self) -> u64 {
        (self.0 >> TIMESTAMP_SHIFT) & mask(TIMESTAMP_BITS)
    }

    #[must_use]
    pub fn origin(self) -> Origin {
        #[allow(clippy::cast_possible_truncation)]
        let worker_id = ((self.0 >> WORKER_ID_SHIFT) & mask(WORKER_ID_BITS)) as u8;
        #[allow(clippy::cast_possible_truncation)]
        let process_id = ((self.0 >> PROCESS_ID_SHIFT) & mask(PROCESS_ID_BITS)) as u8;

        Origin {
            worker_id,
            process_id,
        }
    }

    #[must_use]
    pub fn increment(self) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        let increment = ((self.0 >> INCREMENT_SHIFT) & mask(INCREMENT_BITS)) as u16;
        increment
    }

    #[must_use]
    pub fn created_at(self) -> UtcDateTime
    where
        E: Epoch,
    {
        // 42 bits always fit into i64
        #[allow(clippy::cast_possible_wrap)]
        let millis = self.timestamp_millis() as i64;
        E::EPOCH_TIME + Duration::milliseconds(millis)
    }

    fn compose(millis: u64, origin: Origin, increment: u16) -> Self {
        Self::new(
            (millis & mask(TIMESTAMP_BITS)) << TIMESTAMP_SHIFT
                | u64::from(origin.worker_id) << WORKER_ID_SHIFT
                | u64::from(origin.process_id) << PROCESS_ID_SHIFT
                | (u64::from(increment) & mask(INCREMENT_BITS)) << INCREMENT_SHIFT,
        )
    }
}

fn millis_since_epoch<E: Epoch>(time: UtcDateTime) -> Result<u64, SnowflakeTimeError> {
    let millis = (time - E::EPOCH_TIME).whole_milliseconds();
    let millis = u64::try_from(millis).map_err(|_| SnowflakeTimeError::BeforeEpoch)?;

    if millis > mask(TIMESTAMP_BITS) {
        return Err(SnowflakeTimeError::AfterRange);
    }
    Ok(millis)
}

impl<E> Display for Snowflake<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl<E> From<u64> for Snowflake<E> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

/// Mints unique ids for one process. Wrap in a mutex to share.
#[derive_where(Clone, Eq, PartialEq, Debug)]
pub struct SnowflakeGenerator<E> {
    origin: Origin,
    next_increment: u16,
    phantom_data: PhantomData<E>,
}

impl<E: Epoch> SnowflakeGenerator<E> {
    #[must_use]
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            next_increment: 0,
            phantom_data: PhantomData,
        }
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn generate_at(&mut self, time: UtcDateTime) -> Result<Snowflake<E>, SnowflakeTimeError> {
        let millis = millis_since_epoch::<E>(time)?;
        let increment = self.next_increment;
        self.next_increment = (increment + 1) & 0x0FFF;

        Ok(Snowflake::compose(millis, self.origin, increment))
    }

    pub fn generate(&mut self) -> Result<Snowflake<E>, SnowflakeTimeError> {
        self.generate_at(UtcDateTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::{Epoch, Origin, Snowflake, SnowflakeGenerator, SnowflakeTimeError};
    use time::{Duration, UtcDateTime, macros::utc_datetime};

    struct MillennialEpoch;
    impl Epoch for MillennialEpoch {
        const EPOCH_TIME: UtcDateTime = utc_datetime!(2000-01-01 00:00);
    }

    #[test]
    fn origin_range() {
        assert!(Origin::new(0x1F, 0x1F).is_ok());
        assert!(Origin::new(0x20, 0).is_err());
        assert!(Origin::new(0, 0x20).is_err());
    }

    #[test]
    fn compose_and_decompose() {
        let origin = Origin::new(0b10101, 0b10001).unwrap();
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(origin);
        for _ in 0..100 {
            generator.generate_at(MillennialEpoch::EPOCH_TIME).unwrap();
        }

        let time = utc_datetime!(2025-10-24 10:30);
        let snowflake = generator.generate_at(time).unwrap();

        assert_eq!(snowflake.get(), 3_416_751_341_570_822_244);
        assert_eq!(snowflake.origin(), origin);
        assert_eq!(snowflake.increment(), 100);
        assert_eq!(snowflake.created_at(), time);
    }

    #[test]
    fn increment_wraps() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(Origin::default());
        let time = utc_datetime!(2025-10-24 10:55);

        let first = generator.generate_at(time).unwrap();
        for _ in 0..0x0FFF {
            generator.generate_at(time).unwrap();
        }
        let wrapped = generator.generate_at(time).unwrap();

        assert_eq!(first.increment(), 0);
        assert_eq!(wrapped.increment(), 0);
        assert_eq!(first, wrapped);
    }

    #[test]
    fn time_range() {
        let mut generator = SnowflakeGenerator::<MillennialEpoch>::new(Origin::default());

        assert_eq!(
            generator.generate_at(MillennialEpoch::EPOCH_TIME - Duration::milliseconds(1)),
            Err(SnowflakeTimeError::BeforeEpoch)
        );
        assert_eq!(
            generator.generate_at(
                MillennialEpoch::EPOCH_TIME + Duration::milliseconds(0x0400_0000_0000),
            ),
            Err(SnowflakeTimeError::AfterRange)
        );
        assert!(
            generator
                .generate_at(MillennialEpoch::EPOCH_TIME + Duration::milliseconds(0x03FF_FFFF_FFFF))
                .is_ok()
        );
    }

    #[test]
    fn display_is_decimal() {
        assert_eq!(Snowflake::<MillennialEpoch>::new(42).to_string(), "42");
    }
}
