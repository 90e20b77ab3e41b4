//! Rate engine.
//!
//! Evaluates a [`RateSchedule`] against a usage quantity and billing date.
//! Components run strictly in schedule order over three running accumulators
//! (usage charge, fixed fees, surcharges). Every component's amount is rounded
//! to cents, half-up, at the moment it is computed so totals reproduce exactly.

use crate::error::{BillingError, Result};
use crate::models::{ComponentRule, LineType, RateComponent, RateSchedule, Tier};
use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Category of an engine line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeCategory {
    Usage,
    Fee,
    Surcharge,
}

impl ChargeCategory {
    pub fn line_type(&self) -> LineType {
        match self {
            ChargeCategory::Usage => LineType::UsageCharge,
            ChargeCategory::Fee => LineType::Fee,
            ChargeCategory::Surcharge => LineType::Surcharge,
        }
    }
}

/// One itemized engine result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLineItem {
    pub description: String,
    pub amount: Decimal,
    pub category: ChargeCategory,
    pub component_id: Option<Uuid>,
}

/// Itemized output of one rating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeBreakdown {
    pub usage_quantity: Decimal,
    pub rate_plan_id: Uuid,
    pub rate_plan_name: String,
    pub usage_charge: Decimal,
    pub base_fee: Decimal,
    pub total_surcharges: Decimal,
    /// `usage_charge + base_fee`.
    pub subtotal: Decimal,
    /// `subtotal + total_surcharges`.
    pub total_amount: Decimal,
    pub line_items: Vec<ChargeLineItem>,
}

/// Round a monetary amount to cents, half-up.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Default)]
struct Accumulators {
    usage_charge: Decimal,
    base_fee: Decimal,
    surcharges: Decimal,
    line_items: Vec<ChargeLineItem>,
}

impl Accumulators {
    fn push(
        &mut self,
        component: &RateComponent,
        description: String,
        amount: Decimal,
        category: ChargeCategory,
    ) {
        self.line_items.push(ChargeLineItem {
            description,
            amount,
            category,
            component_id: Some(component.component_id),
        });
    }

    fn subtotal(&self) -> Option<Decimal> {
        self.usage_charge.checked_add(self.base_fee)
    }
}

/// Amounts past the range of `Decimal` come from rates or fees no real plan carries.
fn overflow(component: &RateComponent) -> BillingError {
    BillingError::configuration(component.name.as_str(), "amount overflow")
}

/// Compute the charge breakdown for `usage_quantity` units billed on `billing_date`.
///
/// Pure: the same schedule, usage and date always produce the same breakdown.
pub fn calculate_charges(
    usage_quantity: Decimal,
    schedule: &RateSchedule,
    billing_date: NaiveDate,
) -> Result<ChargeBreakdown> {
    if usage_quantity < Decimal::ZERO {
        return Err(BillingError::Validation(format!(
            "usage quantity must not be negative, got {}",
            usage_quantity
        )));
    }

    info!(
        usage = %usage_quantity,
        rate_plan = %schedule.plan.name,
        billing_date = %billing_date,
        "Calculating charges"
    );

    let mut acc = Accumulators::default();

    for component in &schedule.components {
        match &component.rule {
            ComponentRule::TieredUsage { tiers } => {
                let (charge, unbilled) =
                    tiered_charge(usage_quantity, tiers).ok_or_else(|| overflow(component))?;
                if unbilled > Decimal::ZERO {
                    warn!(
                        component = %component.name,
                        unbilled = %unbilled,
                        "Usage exceeds the last tier bound and was not charged"
                    );
                }
                acc.usage_charge = acc
                    .usage_charge
                    .checked_add(charge)
                    .ok_or_else(|| overflow(component))?;
                acc.push(component, component.name.clone(), charge, ChargeCategory::Usage);
                debug!(component = %component.name, charge = %charge, "Tiered usage charge");
            }
            ComponentRule::FixedFee { amount } => {
                let fee = round_money(*amount);
                acc.base_fee = acc
                    .base_fee
                    .checked_add(fee)
                    .ok_or_else(|| overflow(component))?;
                acc.push(component, component.name.clone(), fee, ChargeCategory::Fee);
                debug!(component = %component.name, fee = %fee, "Fixed fee");
            }
            ComponentRule::SeasonalMultiplier {
                applies_months,
                multiplier,
            } => {
                if applies_months.contains(&billing_date.month()) && *multiplier > Decimal::ONE {
                    let adjustment = acc
                        .usage_charge
                        .checked_mul(*multiplier - Decimal::ONE)
                        .map(round_money)
                        .ok_or_else(|| overflow(component))?;
                    acc.usage_charge = acc
                        .usage_charge
                        .checked_add(adjustment)
                        .ok_or_else(|| overflow(component))?;
                    acc.push(
                        component,
                        format!("{} ({}x)", component.name, multiplier.normalize()),
                        adjustment,
                        ChargeCategory::Usage,
                    );
                    debug!(
                        component = %component.name,
                        multiplier = %multiplier,
                        adjustment = %adjustment,
                        "Seasonal adjustment"
                    );
                }
            }
            ComponentRule::SurchargePercent { percent } => {
                let surcharge = acc
                    .subtotal()
                    .and_then(|subtotal| subtotal.checked_mul(*percent))
                    .map(round_money)
                    .ok_or_else(|| overflow(component))?;
                acc.surcharges = acc
                    .surcharges
                    .checked_add(surcharge)
                    .ok_or_else(|| overflow(component))?;
                acc.push(component, component.name.clone(), surcharge, ChargeCategory::Surcharge);
                debug!(component = %component.name, surcharge = %surcharge, "Percent surcharge");
            }
            ComponentRule::SurchargeFlat { amount } => {
                let surcharge = round_money(*amount);
                acc.surcharges = acc
                    .surcharges
                    .checked_add(surcharge)
                    .ok_or_else(|| overflow(component))?;
                acc.push(component, component.name.clone(), surcharge, ChargeCategory::Surcharge);
                debug!(component = %component.name, surcharge = %surcharge, "Flat surcharge");
            }
            ComponentRule::Unknown { component_type } => {
                warn!(
                    component = %component.name,
                    component_type = %component_type,
                    "Skipping rate component of unknown type"
                );
            }
        }
    }

    let overflowed = || {
        BillingError::Validation(format!(
            "charges for rate plan '{}' exceed the representable amount",
            schedule.plan.name
        ))
    };
    let subtotal = acc.subtotal().ok_or_else(overflowed)?;
    let total_amount = subtotal.checked_add(acc.surcharges).ok_or_else(overflowed)?;
    let breakdown = ChargeBreakdown {
        usage_quantity,
        rate_plan_id: schedule.plan.plan_id,
        rate_plan_name: schedule.plan.name.clone(),
        usage_charge: acc.usage_charge,
        base_fee: acc.base_fee,
        total_surcharges: acc.surcharges,
        subtotal,
        total_amount,
        line_items: acc.line_items,
    };

    info!(total = %breakdown.total_amount, "Charge calculation complete");

    Ok(breakdown)
}

/// Walk the tiers, returning the rounded charge and any usage left over
/// after a bounded final tier. `None` on arithmetic overflow.
fn tiered_charge(usage: Decimal, tiers: &[Tier]) -> Option<(Decimal, Decimal)> {
    let mut remaining = usage;
    let mut lower_bound = Decimal::ZERO;
    let mut total = Decimal::ZERO;

    for tier in tiers {
        if remaining <= Decimal::ZERO {
            break;
        }
        let allotted = match tier.up_to {
            Some(up_to) => remaining.min(up_to.checked_sub(lower_bound)?),
            None => remaining,
        };
        total = total.checked_add(allotted.checked_mul(tier.rate_per_unit)?)?;
        remaining = remaining.checked_sub(allotted)?;
        if let Some(up_to) = tier.up_to {
            lower_bound = up_to;
        }
    }

    Some((round_money(total), remaining))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(up_to: Option<i64>, rate: Decimal) -> Tier {
        Tier {
            up_to: up_to.map(Decimal::from),
            rate_per_unit: rate,
        }
    }

    #[test]
    fn tier_walk_stops_when_usage_exhausted() {
        let tiers = vec![
            tier(Some(10), Decimal::from(2)),
            tier(Some(20), Decimal::from(3)),
            tier(None, Decimal::from(5)),
        ];
        assert_eq!(
            tiered_charge(Decimal::from(4), &tiers),
            Some((Decimal::from(8), Decimal::ZERO))
        );
        assert_eq!(
            tiered_charge(Decimal::from(25), &tiers),
            Some((Decimal::from(75), Decimal::ZERO))
        );
    }

    #[test]
    fn usage_past_bounded_last_tier_is_reported() {
        let tiers = vec![tier(Some(10), Decimal::ONE)];
        assert_eq!(
            tiered_charge(Decimal::from(12), &tiers),
            Some((Decimal::from(10), Decimal::from(2)))
        );
    }

    #[test]
    fn tier_walk_reports_overflow() {
        let tiers = vec![tier(None, Decimal::MAX)];
        assert_eq!(tiered_charge(Decimal::from(2), &tiers), None);
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2));
        assert_eq!(round_money(Decimal::new(1004, 3)), Decimal::new(100, 2));
    }
}
