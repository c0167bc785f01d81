use fleetquote_core::domain::vehicle::VehicleClass;
use fleetquote_core::pricing::{EstimateRequest, PricingEngine, RateCard};
use serde_json::json;

use crate::commands::{CommandResult, FailureClass};

#[derive(Debug, Clone)]
pub struct EstimateArgs {
    pub vehicle: String,
    pub pickup: String,
    pub dropoff: String,
    pub destination: Option<String>,
    pub round_trip: bool,
}

pub fn run(args: EstimateArgs) -> CommandResult {
    let Some(vehicle_class) = VehicleClass::parse(&args.vehicle) else {
        let known: Vec<&str> = VehicleClass::ALL.iter().map(VehicleClass::label).collect();
        return CommandResult::failure(
            "estimate",
            FailureClass::Validation,
            format!("unknown vehicle `{}`; expected one of: {}", args.vehicle, known.join(", ")),
        );
    };
    if args.pickup.trim().is_empty() || args.dropoff.trim().is_empty() {
        return CommandResult::failure(
            "estimate",
            FailureClass::Validation,
            "pickup and dropoff must not be empty",
        );
    }

    let destination = args
        .destination
        .filter(|destination| !destination.trim().is_empty())
        .unwrap_or_else(|| args.dropoff.clone());
    let request = EstimateRequest {
        vehicle_class,
        pickup: args.pickup,
        dropoff: args.dropoff,
        destination,
        is_one_way: !args.round_trip,
    };
    let estimate = RateCard::standard().estimate(&request);

    let message = format!(
        "{} {} → {}: R {}",
        vehicle_class.label(),
        request.pickup,
        request.dropoff,
        estimate.price
    );
    let data = json!({
        "vehicle": vehicle_class.label(),
        "price": estimate.price.to_string(),
        "breakdown": estimate.breakdown,
    });
    CommandResult::success_with_data("estimate", message, Some(data))
}
