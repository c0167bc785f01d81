//! Negotiated rate data. Edit these tables, not the calculator, when rates change.

use crate::domain::vehicle::VehicleClass;

use super::{Metro, ZoneRule};

pub const ZONE_COUNT: usize = 6;

pub static ZONE_RULES: &[ZoneRule] = &[
    ZoneRule {
        zone: 1,
        keywords: &["city centre", "cbd", "gardens", "sea point", "green point", "umhlanga", "berea"],
    },
    ZoneRule {
        zone: 2,
        keywords: &["observatory", "woodstock", "claremont", "rondebosch", "morningside", "musgrave"],
    },
    ZoneRule {
        zone: 3,
        keywords: &["bellville", "milnerton", "table view", "pinetown", "westville", "durban north"],
    },
    ZoneRule {
        zone: 4,
        keywords: &["durbanville", "somerset west", "hout bay", "ballito", "amanzimtoti", "hillcrest"],
    },
    ZoneRule {
        zone: 5,
        keywords: &["stellenbosch", "strand", "paarl", "kloof", "tongaat", "scottburgh"],
    },
    ZoneRule {
        zone: 6,
        keywords: &[
            "franschhoek",
            "wellington",
            "hermanus",
            "salt rock",
            "pietermaritzburg",
            "port shepstone",
        ],
    },
];

pub static METROS: &[Metro] = &[
    Metro {
        name: "cape town",
        rates: &[
            (VehicleClass::Sedan4, [650, 800, 950, 1100, 1350, 1600]),
            (VehicleClass::Suv7, [850, 1000, 1200, 1400, 1700, 2000]),
            (VehicleClass::Minibus10, [1050, 1250, 1450, 1700, 2050, 2400]),
            (VehicleClass::Minibus14, [1250, 1450, 1700, 2000, 2400, 2800]),
            (VehicleClass::Sprinter18, [1500, 1750, 2050, 2400, 2850, 3300]),
            (VehicleClass::LuxuryCoach22, [1900, 2200, 2550, 2950, 3450, 4000]),
            (VehicleClass::Midibus28, [2300, 2650, 3050, 3500, 4100, 4700]),
            (VehicleClass::Coach60, [3200, 3600, 4100, 4700, 5400, 6200]),
            (VehicleClass::Coach70, [3700, 4150, 4700, 5350, 6150, 7000]),
        ],
    },
    // No 60/70 seat coaches are contracted in Durban.
    Metro {
        name: "durban",
        rates: &[
            (VehicleClass::Sedan4, [600, 750, 900, 1050, 1250, 1485]),
            (VehicleClass::Suv7, [800, 950, 1150, 1350, 1600, 1900]),
            (VehicleClass::Minibus10, [1000, 1200, 1400, 1650, 1950, 2300]),
            (VehicleClass::Minibus14, [1200, 1400, 1650, 1900, 2250, 2650]),
            (VehicleClass::Sprinter18, [1450, 1700, 1950, 2300, 2700, 3150]),
            (VehicleClass::LuxuryCoach22, [1800, 2100, 2450, 2850, 3300, 3800]),
            (VehicleClass::Midibus28, [2200, 2550, 2950, 3400, 3950, 4500]),
        ],
    },
];

pub static LONG_HAUL_DESTINATIONS: &[&str] = &["Kruger National Park", "Garden Route", "Drakensberg"];

pub static MEDIUM_HAUL_DESTINATIONS: &[&str] = &["Sun City", "Pilanesberg", "Clarens", "Cederberg"];

/// Flat rate used when no metro table covers the trip.
pub fn flat_rate(class: VehicleClass) -> u32 {
    match class {
        VehicleClass::Sedan4 => 1000,
        VehicleClass::Suv7 => 1300,
        VehicleClass::Minibus10 => 1600,
        VehicleClass::Minibus14 => 1900,
        VehicleClass::Sprinter18 => 2300,
        VehicleClass::LuxuryCoach22 => 2800,
        VehicleClass::Midibus28 => 3400,
        VehicleClass::Coach60 => 4500,
        VehicleClass::Coach70 => 5200,
    }
}
