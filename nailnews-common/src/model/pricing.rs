//! Listing tiers, durations and checkout math.

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use std::{
    fmt::{Display, Formatter},
    iter::Sum,
    ops::{Add, Mul, Neg},
    str::FromStr,
};
use thiserror::Error;
use time::{Month, OffsetDateTime, error::ComponentRange};

/// Money in the smallest currency unit.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Cents(pub i64);

impl Cents {
    pub const ZERO: Cents = Cents(0);

    #[must_use]
    pub fn dollars(dollars: i64) -> Self {
        Self(dollars * 100)
    }

    #[must_use]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Cents {
    type Output = Cents;

    fn add(self, rhs: Self) -> Self::Output {
        Cents(self.0 + rhs.0)
    }
}

impl Neg for Cents {
    type Output = Cents;

    fn neg(self) -> Self::Output {
        Cents(-self.0)
    }
}

impl Mul<i64> for Cents {
    type Output = Cents;

    fn mul(self, rhs: i64) -> Self::Output {
        Cents(self.0 * rhs)
    }
}

impl Sum for Cents {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Cents::ZERO, Add::add)
    }
}

impl Display for Cents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Urgent,
    Vip,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaidTier {
    Urgent,
    Vip,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown tier: {0}")]
pub struct UnknownTierError(String);

impl Tier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Urgent => "urgent",
            Tier::Vip => "vip",
        }
    }

    #[must_use]
    pub fn paid(self) -> Option<PaidTier> {
        match self {
            Tier::Free => None,
            Tier::Urgent => Some(PaidTier::Urgent),
            Tier::Vip => Some(PaidTier::Vip),
        }
    }
}

impl FromStr for Tier {
    type Err = UnknownTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Tier::Free),
            "urgent" => Ok(Tier::Urgent),
            "vip" => Ok(Tier::Vip),
            other => Err(UnknownTierError(other.to_owned())),
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PaidTier> for Tier {
    fn from(value: PaidTier) -> Self {
        match value {
            PaidTier::Urgent => Tier::Urgent,
            PaidTier::Vip => Tier::Vip,
        }
    }
}

/// Paid listing duration. Only 3, 6, 9 and 12 months are sold.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct ListingDuration(u8);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Listings run for 3, 6, 9 or 12 months, not {0}")]
pub struct InvalidDurationError(i64);

impl ListingDuration {
    pub const ALL: [ListingDuration; 4] = [
        ListingDuration(3),
        ListingDuration(6),
        ListingDuration(9),
        ListingDuration(12),
    ];

    pub fn from_months(months: i64) -> Result<Self, InvalidDurationError> {
        match months {
            3 | 6 | 9 | 12 => Ok(Self(
                u8::try_from(months).map_err(|_| InvalidDurationError(months))?,
            )),
            _ => Err(InvalidDurationError(months)),
        }
    }

    #[must_use]
    pub fn months(self) -> u8 {
        self.0
    }
}

impl<'de> Deserialize<'de> for ListingDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let months = i64::deserialize(deserializer)?;
        ListingDuration::from_months(months).map_err(D::Error::custom)
    }
}

/// What the author picked at checkout. A free listing has no duration.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum TierSelection {
    #[default]
    Free,
    Urgent { duration_months: ListingDuration },
    Vip { duration_months: ListingDuration },
}

impl TierSelection {
    #[must_use]
    pub fn paid(tier: PaidTier, duration: ListingDuration) -> Self {
        match tier {
            PaidTier::Urgent => TierSelection::Urgent {
                duration_months: duration,
            },
            PaidTier::Vip => TierSelection::Vip {
                duration_months: duration,
            },
        }
    }

    /// Builds a selection from the loose pair a form or a row carries.
    pub fn from_parts(
        tier: Tier,
        duration_months: Option<i64>,
    ) -> Result<Self, InvalidDurationError> {
        match (tier.paid(), duration_months) {
            (None, _) => Ok(TierSelection::Free),
            (Some(paid), Some(months)) => {
                Ok(Self::paid(paid, ListingDuration::from_months(months)?))
            }
            (Some(_), None) => Err(InvalidDurationError(0)),
        }
    }

    #[must_use]
    pub fn tier(self) -> Tier {
        match self {
            TierSelection::Free => Tier::Free,
            TierSelection::Urgent { .. } => Tier::Urgent,
            TierSelection::Vip { .. } => Tier::Vip,
        }
    }

    #[must_use]
    pub fn duration(self) -> Option<ListingDuration> {
        match self {
            TierSelection::Free => None,
            TierSelection::Urgent { duration_months } | TierSelection::Vip { duration_months } => {
                Some(duration_months)
            }
        }
    }

    /// Expiry of a listing bought at `now`; `None` for free listings.
    pub fn expires_at(self, now: OffsetDateTime) -> Result<Option<OffsetDateTime>, ComponentRange> {
        self.duration()
            .map(|duration| add_months(now, duration.months()))
            .transpose()
    }

    #[must_use]
    pub fn describe(self) -> String {
        match self.duration() {
            None => "Free listing".to_owned(),
            Some(duration) => format!(
                "{} listing, {} months",
                match self.tier() {
                    Tier::Vip => "VIP",
                    _ => "Urgent",
                },
                duration.months()
            ),
        }
    }
}

/// Flat per-month prices used at checkout.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub urgent_per_month: Cents,
    pub vip_per_month: Cents,
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self {
            urgent_per_month: Cents::dollars(10),
            vip_per_month: Cents::dollars(25),
        }
    }
}

impl PriceSchedule {
    #[must_use]
    pub fn per_month(&self, tier: PaidTier) -> Cents {
        match tier {
            PaidTier::Urgent => self.urgent_per_month,
            PaidTier::Vip => self.vip_per_month,
        }
    }

    /// Checkout cost: price per month times months. Discounts are not applied.
    #[must_use]
    pub fn compute_cost(&self, selection: TierSelection) -> Cents {
        match (selection.tier().paid(), selection.duration()) {
            (Some(tier), Some(duration)) => self.per_month(tier) * i64::from(duration.months()),
            _ => Cents::ZERO,
        }
    }
}

/// Percent off per tier and duration, as configured by admins.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct DiscountEntry {
    pub tier: PaidTier,
    pub duration_months: ListingDuration,
    pub percent_off: u8,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct DiscountSchedule {
    pub entries: Vec<DiscountEntry>,
}

impl DiscountSchedule {
    #[must_use]
    pub fn percent_off(&self, tier: PaidTier, duration: ListingDuration) -> u8 {
        self.entries
            .iter()
            .find(|entry| entry.tier == tier && entry.duration_months == duration)
            .map_or(0, |entry| entry.percent_off)
    }
}

/// Adds calendar months, clamping the day to the end of the target month.
pub fn add_months(at: OffsetDateTime, months: u8) -> Result<OffsetDateTime, ComponentRange> {
    let date = at.date();
    let zero_based = i32::from(u8::from(date.month())) - 1 + i32::from(months);
    let year = date.year() + zero_based / 12;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let month = Month::try_from((zero_based % 12 + 1) as u8)?;
    let day = date.day().min(month.length(year));

    Ok(at.replace_date(time::Date::from_calendar_date(year, month, day)?))
}

#[cfg(test)]
mod tests {
    use super::{
        Cents, DiscountEntry, DiscountSchedule, ListingDuration, PaidTier, PriceSchedule, Tier,
        TierSelection, add_months,
    };
    use time::macros::datetime;

    fn months(n: i64) -> ListingDuration {
        ListingDuration::from_months(n).unwrap()
    }

    #[test]
    fn checkout_cost() {
        let prices = PriceSchedule::default();

        assert_eq!(prices.compute_cost(TierSelection::Free), Cents::ZERO);
        assert_eq!(
            prices.compute_cost(TierSelection::paid(PaidTier::Urgent, months(6))),
            Cents::dollars(60)
        );
        assert_eq!(
            prices.compute_cost(TierSelection::paid(PaidTier::Vip, months(3))),
            Cents::dollars(75)
        );
    }

    #[test]
    fn discounts_do_not_change_checkout_cost() {
        let schedule = DiscountSchedule {
            entries: vec![DiscountEntry {
                tier: PaidTier::Vip,
                duration_months: months(12),
                percent_off: 20,
            }],
        };
        assert_eq!(schedule.percent_off(PaidTier::Vip, months(12)), 20);
        assert_eq!(schedule.percent_off(PaidTier::Urgent, months(12)), 0);

        assert_eq!(
            PriceSchedule::default().compute_cost(TierSelection::paid(PaidTier::Vip, months(12))),
            Cents::dollars(300)
        );
    }

    #[test]
    fn only_sold_durations_parse() {
        for n in [3, 6, 9, 12] {
            assert_eq!(i64::from(months(n).months()), n);
        }
        for n in [0, 1, 4, 24, -3] {
            assert!(ListingDuration::from_months(n).is_err());
        }
        assert!(serde_json::from_str::<ListingDuration>("5").is_err());
    }

    #[test]
    fn selection_from_row_parts() {
        assert_eq!(TierSelection::from_parts(Tier::Free, Some(6)), Ok(TierSelection::Free));
        assert_eq!(
            TierSelection::from_parts(Tier::Vip, Some(9)),
            Ok(TierSelection::paid(PaidTier::Vip, months(9)))
        );
        assert!(TierSelection::from_parts(Tier::Urgent, None).is_err());
    }

    #[test]
    fn selection_json_shape() {
        let selection: TierSelection =
            serde_json::from_str(r#"{"tier":"urgent","duration_months":6}"#).unwrap();
        assert_eq!(selection, TierSelection::paid(PaidTier::Urgent, months(6)));

        let free: TierSelection = serde_json::from_str(r#"{"tier":"free"}"#).unwrap();
        assert_eq!(free.duration(), None);
    }

    #[test]
    fn expiry_is_calendar_months_from_now() {
        let now = datetime!(2026-01-31 09:15 UTC);

        assert_eq!(TierSelection::Free.expires_at(now), Ok(None));
        assert_eq!(
            TierSelection::paid(PaidTier::Urgent, months(3)).expires_at(now),
            Ok(Some(datetime!(2026-04-30 09:15 UTC)))
        );
        assert_eq!(add_months(now, 12), Ok(datetime!(2027-01-31 09:15 UTC)));
        assert_eq!(
            add_months(datetime!(2027-11-30 00:00 UTC), 3),
            Ok(datetime!(2028-02-29 00:00 UTC))
        );
        assert_eq!(
            add_months(datetime!(2026-11-30 00:00 UTC), 3),
            Ok(datetime!(2027-02-28 00:00 UTC))
        );
    }

    #[test]
    fn money_display() {
        assert_eq!(Cents(7500).to_string(), "$75.00");
        assert_eq!((-Cents(1050)).to_string(), "-$10.50");
        assert_eq!([Cents(100), Cents(-40)].into_iter().sum::<Cents>(), Cents(60));
    }
}
