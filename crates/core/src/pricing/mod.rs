//! Deterministic lookup-with-fallback pricing.
//!
//! Rates are negotiated per metro and zone, so the estimate is a table lookup
//! rather than a distance computation. When no metro table covers a trip the
//! flat per-vehicle rate is used, scaled by the destination surcharge.

pub mod tables;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::vehicle::VehicleClass;

pub const ROUND_TRIP_FACTOR: Decimal = Decimal::from_parts(18, 0, 0, false, 1);

/// Keywords that place a free-text location into a zone.
#[derive(Clone, Copy, Debug)]
pub struct ZoneRule {
    pub zone: u8,
    pub keywords: &'static [&'static str],
}

/// A metro with its own zone 1..6 rate table.
#[derive(Clone, Copy, Debug)]
pub struct Metro {
    pub name: &'static str,
    pub rates: &'static [(VehicleClass, [u32; tables::ZONE_COUNT])],
}

impl Metro {
    pub fn rate_for(&self, class: VehicleClass, zone: u8) -> Option<u32> {
        let index = usize::from(zone.checked_sub(1)?);
        self.rates
            .iter()
            .find(|(candidate, _)| *candidate == class)
            .and_then(|(_, row)| row.get(index).copied())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surcharge {
    None,
    MediumHaul,
    LongHaul,
}

impl Surcharge {
    pub fn multiplier(&self) -> Decimal {
        match self {
            Self::None => Decimal::ONE,
            Self::MediumHaul => Decimal::TWO,
            Self::LongHaul => Decimal::new(25, 1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    MetroTable,
    FlatRate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateRequest {
    pub vehicle_class: VehicleClass,
    pub pickup: String,
    pub dropoff: String,
    pub destination: String,
    pub is_one_way: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub zone: u8,
    pub metro: Option<String>,
    pub source: RateSource,
    pub base_price: Decimal,
    pub surcharge: Surcharge,
    pub round_trip: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEstimate {
    pub price: Decimal,
    pub breakdown: PriceBreakdown,
}

pub trait PricingEngine: Send + Sync {
    fn estimate(&self, request: &EstimateRequest) -> PriceEstimate;
}

/// Rate card driven by declarative keyword and rate tables.
#[derive(Clone, Copy, Debug)]
pub struct RateCard {
    zones: &'static [ZoneRule],
    metros: &'static [Metro],
    long_haul: &'static [&'static str],
    medium_haul: &'static [&'static str],
}

impl RateCard {
    pub fn new(
        zones: &'static [ZoneRule],
        metros: &'static [Metro],
        long_haul: &'static [&'static str],
        medium_haul: &'static [&'static str],
    ) -> Self {
        Self { zones, metros, long_haul, medium_haul }
    }

    pub fn standard() -> Self {
        Self::new(
            tables::ZONE_RULES,
            tables::METROS,
            tables::LONG_HAUL_DESTINATIONS,
            tables::MEDIUM_HAUL_DESTINATIONS,
        )
    }

    /// Highest zone whose keywords appear in `location`; zone 1 when none match.
    pub fn classify_zone(&self, location: &str) -> u8 {
        let haystack = location.to_lowercase();
        self.zones
            .iter()
            .filter(|rule| rule.keywords.iter().any(|keyword| haystack.contains(keyword)))
            .map(|rule| rule.zone)
            .max()
            .unwrap_or(1)
    }

    /// First metro, in table order, named by the pickup and then the dropoff.
    /// The name must stand as whole words, so suburbs like "Durbanville" do not match.
    pub fn match_metro(&self, pickup: &str, dropoff: &str) -> Option<&'static Metro> {
        let metros = self.metros;
        [pickup, dropoff].into_iter().map(str::to_lowercase).find_map(|location| {
            metros.iter().find(|metro| names_whole_words(&location, metro.name))
        })
    }

    pub fn surcharge_for(&self, destination: &str) -> Surcharge {
        let destination = destination.trim();
        let listed = |names: &[&str]| names.iter().any(|name| *name == destination);
        if listed(self.long_haul) {
            Surcharge::LongHaul
        } else if listed(self.medium_haul) {
            Surcharge::MediumHaul
        } else {
            Surcharge::None
        }
    }
}

impl Default for RateCard {
    fn default() -> Self {
        Self::standard()
    }
}

impl PricingEngine for RateCard {
    fn estimate(&self, request: &EstimateRequest) -> PriceEstimate {
        let zone = self
            .classify_zone(&request.pickup)
            .max(self.classify_zone(&request.dropoff));
        let metro = self.match_metro(&request.pickup, &request.dropoff);
        let metro_rate = metro.and_then(|metro| metro.rate_for(request.vehicle_class, zone));

        let (base_price, source, surcharge) = match metro_rate {
            Some(rate) => (Decimal::from(rate), RateSource::MetroTable, Surcharge::None),
            None => {
                let surcharge = self.surcharge_for(&request.destination);
                let flat = Decimal::from(tables::flat_rate(request.vehicle_class));
                ((flat * surcharge.multiplier()).normalize(), RateSource::FlatRate, surcharge)
            }
        };

        let price = if request.is_one_way {
            base_price
        } else {
            (base_price * ROUND_TRIP_FACTOR)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .normalize()
        };

        PriceEstimate {
            price,
            breakdown: PriceBreakdown {
                zone,
                metro: metro.map(|metro| metro.name.to_owned()),
                source,
                base_price,
                surcharge,
                round_trip: !request.is_one_way,
            },
        }
    }
}

fn names_whole_words(haystack: &str, name: &str) -> bool {
    haystack.match_indices(name).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + name.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
