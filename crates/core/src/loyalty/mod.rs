//! Loyalty ledger: points earned per completed trip, redeemable discounts,
//! and the tier ladder.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::account::{Account, AccountId, LoyaltyTier};
use crate::domain::vehicle::VehicleClass;
use crate::errors::DomainError;

pub const POINTS_PER_DISCOUNT_STEP: i64 = 100;
pub const DISCOUNT_STEP: i64 = 10;
pub const MAX_POINTS_DISCOUNT: i64 = 500;
/// Points beyond this buy nothing once the discount is capped.
pub const MAX_POINTS_PER_REDEMPTION: i64 =
    MAX_POINTS_DISCOUNT / DISCOUNT_STEP * POINTS_PER_DISCOUNT_STEP;

/// Bonus points on top of the spend-based award; larger vehicles carry more margin.
pub fn loyalty_bonus(class: VehicleClass) -> i64 {
    match class {
        VehicleClass::Sedan4 => 50,
        VehicleClass::Suv7 => 75,
        VehicleClass::Minibus10 => 100,
        VehicleClass::Minibus14 => 150,
        VehicleClass::Sprinter18 => 200,
        VehicleClass::LuxuryCoach22 => 300,
        VehicleClass::Midibus28 => 400,
        VehicleClass::Coach60 => 500,
        VehicleClass::Coach70 => 600,
    }
}

pub fn points_earned(final_price: Decimal, class: VehicleClass) -> Result<i64, DomainError> {
    if final_price.is_sign_negative() {
        return Err(DomainError::Validation(format!(
            "final price {final_price} may not be negative"
        )));
    }
    let spend_points = (final_price / Decimal::TEN).floor().to_i64().ok_or_else(|| {
        DomainError::Validation(format!("final price {final_price} is out of range"))
    })?;
    Ok(spend_points + loyalty_bonus(class))
}

pub fn discount_for(points: i64) -> Decimal {
    let steps = points.max(0) / POINTS_PER_DISCOUNT_STEP;
    Decimal::from((steps * DISCOUNT_STEP).min(MAX_POINTS_DISCOUNT))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierBenefits {
    pub tier: LoyaltyTier,
    pub name: String,
    pub discount_rate_percent: u32,
}

pub fn tier_benefits(tier: LoyaltyTier) -> TierBenefits {
    let (name, discount_rate_percent) = match tier {
        LoyaltyTier::Bronze => ("Bronze", 0),
        LoyaltyTier::Silver => ("Silver", 5),
        LoyaltyTier::Gold => ("Gold", 10),
        LoyaltyTier::Platinum => ("Platinum", 15),
    };
    TierBenefits { tier, name: name.to_owned(), discount_rate_percent }
}

/// Tier earned by lifetime spend or trip count, whichever reaches further.
pub fn tier_for(total_spent: Decimal, total_trips: i64) -> LoyaltyTier {
    let ladder = [
        (LoyaltyTier::Platinum, 50_000, 40),
        (LoyaltyTier::Gold, 20_000, 15),
        (LoyaltyTier::Silver, 5_000, 5),
    ];
    ladder
        .into_iter()
        .find(|(_, spend, trips)| total_spent >= Decimal::from(*spend) || total_trips >= *trips)
        .map(|(tier, _, _)| tier)
        .unwrap_or(LoyaltyTier::Bronze)
}

/// Credits a completed trip to the account and re-derives its tier.
pub fn record_completed_trip(
    account: &mut Account,
    points: i64,
    amount: Decimal,
    now: DateTime<Utc>,
) {
    account.loyalty_points += points;
    account.total_trips += 1;
    account.total_spent += amount;
    account.tier = tier_for(account.total_spent, account.total_trips);
    account.updated_at = now;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountPlan {
    pub points_used: i64,
    pub points_discount: Decimal,
    pub tier_discount: Decimal,
    pub discount_amount: Decimal,
    pub remaining_points: i64,
}

/// Works out what redeeming `points_requested` against `final_price` is worth.
/// Only whole hundreds are consumed, and never more than the capped discount can use.
pub fn plan_discount(
    final_price: Decimal,
    balance: i64,
    tier: LoyaltyTier,
    points_requested: i64,
) -> Result<DiscountPlan, DomainError> {
    if points_requested < POINTS_PER_DISCOUNT_STEP {
        return Err(DomainError::Validation(format!(
            "at least {POINTS_PER_DISCOUNT_STEP} points must be redeemed"
        )));
    }
    if points_requested > balance {
        return Err(DomainError::InsufficientPoints {
            requested: points_requested,
            available: balance,
        });
    }

    let points_used = (points_requested / POINTS_PER_DISCOUNT_STEP * POINTS_PER_DISCOUNT_STEP)
        .min(MAX_POINTS_PER_REDEMPTION);
    let points_discount = discount_for(points_used);
    let rate = Decimal::from(tier_benefits(tier).discount_rate_percent);
    let tier_discount = (final_price * rate / Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    let discount_amount = (points_discount + tier_discount).min(final_price);

    Ok(DiscountPlan {
        points_used,
        points_discount,
        tier_discount,
        discount_amount,
        remaining_points: balance - points_used,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltySummary {
    pub account_id: AccountId,
    pub loyalty_points: i64,
    pub total_trips: i64,
    pub total_spent: Decimal,
    pub tier: LoyaltyTier,
    pub benefits: TierBenefits,
    pub redeemable_discount: Decimal,
}

impl LoyaltySummary {
    pub fn for_account(account: &Account) -> Self {
        Self {
            account_id: account.id.clone(),
            loyalty_points: account.loyalty_points,
            total_trips: account.total_trips,
            total_spent: account.total_spent,
            tier: account.tier,
            benefits: tier_benefits(account.tier),
            redeemable_discount: discount_for(account.loyalty_points),
        }
    }
}
