//! Rate plan and rate component models.
//!
//! Components are stored as a type tag plus a JSON configuration blob
//! ([`RateComponentRecord`]). They are parsed into the strongly typed
//! [`ComponentRule`] once, when a plan's [`RateSchedule`] is loaded, so the
//! rate engine never sees untyped configuration.

use crate::error::{BillingError, Result};
use crate::models::CustomerClass;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Customer-class scope of a rate plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanScope {
    Residential,
    Commercial,
    Any,
}

impl PlanScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanScope::Residential => "RESIDENTIAL",
            PlanScope::Commercial => "COMMERCIAL",
            PlanScope::Any => "ANY",
        }
    }

    /// True when a customer of `class` may be billed under this scope.
    pub fn covers(&self, class: CustomerClass) -> bool {
        self.is_exact(class) || *self == PlanScope::Any
    }

    /// True when the scope names `class` itself rather than `ANY`.
    pub fn is_exact(&self, class: CustomerClass) -> bool {
        matches!(
            (self, class),
            (PlanScope::Residential, CustomerClass::Residential)
                | (PlanScope::Commercial, CustomerClass::Commercial)
        )
    }
}

/// Rate plan lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RatePlanStatus {
    Draft,
    Active,
    Retired,
}

impl RatePlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatePlanStatus::Draft => "DRAFT",
            RatePlanStatus::Active => "ACTIVE",
            RatePlanStatus::Retired => "RETIRED",
        }
    }
}

/// Versioned pricing policy header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RatePlan {
    pub plan_id: Uuid,
    pub name: String,
    pub customer_scope: PlanScope,
    pub effective_start: NaiveDate,
    /// Inclusive; `None` means open-ended.
    pub effective_end: Option<NaiveDate>,
    pub status: RatePlanStatus,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl RatePlan {
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.effective_start <= date && self.effective_end.map_or(true, |end| end >= date)
    }

    /// True when both effective ranges share at least one day.
    pub fn overlaps(&self, other: &RatePlan) -> bool {
        let self_ends_after_other_starts = self
            .effective_end
            .map_or(true, |end| end >= other.effective_start);
        let other_ends_after_self_starts = other
            .effective_end
            .map_or(true, |end| end >= self.effective_start);
        self_ends_after_other_starts && other_ends_after_self_starts
    }
}

/// Rate component as persisted: type tag plus raw JSON configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RateComponentRecord {
    pub component_id: Uuid,
    pub rate_plan_id: Uuid,
    pub component_type: String,
    pub name: String,
    pub config_json: serde_json::Value,
    pub sort_order: i32,
    pub is_active: bool,
}

/// One band of a tiered usage rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    /// Cumulative upper bound of the band; `None` only on the last tier.
    pub up_to: Option<Decimal>,
    pub rate_per_unit: Decimal,
}

/// Typed pricing rule, one variant per component type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentRule {
    TieredUsage {
        tiers: Vec<Tier>,
    },
    FixedFee {
        amount: Decimal,
    },
    SeasonalMultiplier {
        applies_months: BTreeSet<u32>,
        multiplier: Decimal,
    },
    SurchargePercent {
        /// Fraction of the subtotal, e.g. `0.05`.
        percent: Decimal,
    },
    SurchargeFlat {
        amount: Decimal,
    },
    /// A type tag this build does not know; skipped during rating.
    Unknown {
        component_type: String,
    },
}

#[derive(Deserialize)]
struct TieredConfig {
    tiers: Option<Vec<TierConfig>>,
}

#[derive(Deserialize)]
struct TierConfig {
    up_to: Option<Decimal>,
    #[serde(alias = "rate_per_ccf")]
    rate_per_unit: Option<Decimal>,
}

#[derive(Deserialize)]
struct AmountConfig {
    amount: Option<Decimal>,
}

#[derive(Deserialize)]
struct SeasonalConfig {
    applies_months: Option<Vec<u32>>,
    multiplier: Option<Decimal>,
}

#[derive(Deserialize)]
struct PercentConfig {
    percent: Option<Decimal>,
}

impl ComponentRule {
    /// Parse and validate the configuration of `record`.
    pub fn parse(record: &RateComponentRecord) -> Result<Self> {
        let name = record.name.as_str();
        let config = &record.config_json;

        match record.component_type.as_str() {
            "TIERED_USAGE" => {
                let raw: TieredConfig = decode(name, config)?;
                let raw_tiers = raw
                    .tiers
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| BillingError::configuration(name, "missing or empty 'tiers'"))?;
                Ok(ComponentRule::TieredUsage {
                    tiers: validate_tiers(name, raw_tiers)?,
                })
            }
            "FIXED_FEE" => {
                let raw: AmountConfig = decode(name, config)?;
                Ok(ComponentRule::FixedFee {
                    amount: require(name, raw.amount, "amount")?,
                })
            }
            "SEASONAL_MULTIPLIER" => {
                let raw: SeasonalConfig = decode(name, config)?;
                let months = require(name, raw.applies_months, "applies_months")?;
                if let Some(bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
                    return Err(BillingError::configuration(
                        name,
                        format!("month {} is outside 1..=12", bad),
                    ));
                }
                Ok(ComponentRule::SeasonalMultiplier {
                    applies_months: months.into_iter().collect(),
                    multiplier: require(name, raw.multiplier, "multiplier")?,
                })
            }
            "SURCHARGE_PERCENT" => {
                let raw: PercentConfig = decode(name, config)?;
                Ok(ComponentRule::SurchargePercent {
                    percent: require(name, raw.percent, "percent")?,
                })
            }
            "SURCHARGE_FLAT" => {
                let raw: AmountConfig = decode(name, config)?;
                Ok(ComponentRule::SurchargeFlat {
                    amount: require(name, raw.amount, "amount")?,
                })
            }
            other => Ok(ComponentRule::Unknown {
                component_type: other.to_string(),
            }),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, config: &serde_json::Value) -> Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| BillingError::configuration(name, format!("malformed configuration: {}", e)))
}

fn require<T>(name: &str, value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| BillingError::configuration(name, format!("missing '{}'", field)))
}

fn validate_tiers(name: &str, raw: Vec<TierConfig>) -> Result<Vec<Tier>> {
    let last = raw.len() - 1;
    let mut lower_bound = Decimal::ZERO;
    let mut tiers = Vec::with_capacity(raw.len());

    for (index, tier) in raw.into_iter().enumerate() {
        let position = index + 1;
        let rate_per_unit = tier.rate_per_unit.ok_or_else(|| {
            BillingError::configuration(
                name,
                format!("tier {} is missing 'rate_per_unit'", position),
            )
        })?;
        if rate_per_unit.is_sign_negative() {
            return Err(BillingError::configuration(
                name,
                format!("tier {} has a negative rate", position),
            ));
        }

        match tier.up_to {
            Some(up_to) if up_to <= lower_bound => {
                return Err(BillingError::configuration(
                    name,
                    format!("tier {} bound {} must exceed {}", position, up_to, lower_bound),
                ));
            }
            Some(up_to) => lower_bound = up_to,
            None if index != last => {
                return Err(BillingError::configuration(
                    name,
                    format!("tier {} lacks 'up_to' but is not the last tier", position),
                ));
            }
            None => {}
        }

        tiers.push(Tier {
            up_to: tier.up_to,
            rate_per_unit,
        });
    }

    Ok(tiers)
}

/// A parsed, active rate component.
#[derive(Debug, Clone, Serialize)]
pub struct RateComponent {
    pub component_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub rule: ComponentRule,
}

impl RateComponent {
    pub fn from_record(record: &RateComponentRecord) -> Result<Self> {
        Ok(Self {
            component_id: record.component_id,
            name: record.name.clone(),
            sort_order: record.sort_order,
            rule: ComponentRule::parse(record)?,
        })
    }
}

/// A rate plan with its active components, validated and in evaluation order.
#[derive(Debug, Clone, Serialize)]
pub struct RateSchedule {
    pub plan: RatePlan,
    pub components: Vec<RateComponent>,
}

impl RateSchedule {
    /// Keep active records, order them by ascending sort order (ties keep
    /// their input order) and parse each configuration. The first malformed
    /// component fails the whole schedule.
    pub fn new(plan: RatePlan, records: Vec<RateComponentRecord>) -> Result<Self> {
        let mut active: Vec<RateComponentRecord> =
            records.into_iter().filter(|r| r.is_active).collect();
        active.sort_by_key(|r| r.sort_order);

        let components = active
            .iter()
            .map(RateComponent::from_record)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { plan, components })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(component_type: &str, config: serde_json::Value) -> RateComponentRecord {
        RateComponentRecord {
            component_id: Uuid::new_v4(),
            rate_plan_id: Uuid::new_v4(),
            component_type: component_type.to_string(),
            name: "Component".to_string(),
            config_json: config,
            sort_order: 0,
            is_active: true,
        }
    }

    #[test]
    fn tiers_accept_legacy_rate_key_and_open_last_tier() {
        let rule = ComponentRule::parse(&record(
            "TIERED_USAGE",
            json!({"tiers": [
                {"up_to": 10, "rate_per_ccf": 2},
                {"up_to": null, "rate_per_unit": "3.5"}
            ]}),
        ))
        .unwrap();

        match rule {
            ComponentRule::TieredUsage { tiers } => {
                assert_eq!(tiers.len(), 2);
                assert_eq!(tiers[0].up_to, Some(Decimal::from(10)));
                assert_eq!(tiers[1].up_to, None);
                assert_eq!(tiers[1].rate_per_unit, Decimal::new(35, 1));
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn open_tier_must_be_last() {
        let err = ComponentRule::parse(&record(
            "TIERED_USAGE",
            json!({"tiers": [{"rate_per_unit": 2}, {"up_to": 20, "rate_per_unit": 3}]}),
        ))
        .unwrap_err();
        assert!(matches!(err, BillingError::Configuration { .. }));
    }

    #[test]
    fn tier_bounds_must_increase() {
        let err = ComponentRule::parse(&record(
            "TIERED_USAGE",
            json!({"tiers": [{"up_to": 10, "rate_per_unit": 2}, {"up_to": 5, "rate_per_unit": 3}]}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("must exceed"));
    }

    #[test]
    fn empty_tiers_rejected() {
        assert!(ComponentRule::parse(&record("TIERED_USAGE", json!({"tiers": []}))).is_err());
        assert!(ComponentRule::parse(&record("TIERED_USAGE", json!({}))).is_err());
    }

    #[test]
    fn seasonal_months_validated() {
        let err = ComponentRule::parse(&record(
            "SEASONAL_MULTIPLIER",
            json!({"applies_months": [6, 13], "multiplier": 1.2}),
        ))
        .unwrap_err();
        assert!(err.to_string().contains("13"));
    }

    #[test]
    fn missing_amount_names_component() {
        let err = ComponentRule::parse(&record("FIXED_FEE", json!({"amt": 5}))).unwrap_err();
        match err {
            BillingError::Configuration { component, message } => {
                assert_eq!(component, "Component");
                assert!(message.contains("amount"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let rule = ComponentRule::parse(&record("LOYALTY_DISCOUNT", json!({}))).unwrap();
        assert_eq!(
            rule,
            ComponentRule::Unknown {
                component_type: "LOYALTY_DISCOUNT".to_string()
            }
        );
    }

    #[test]
    fn schedule_skips_inactive_and_orders_by_sort() {
        let plan = RatePlan {
            plan_id: Uuid::new_v4(),
            name: "Plan".to_string(),
            customer_scope: PlanScope::Any,
            effective_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            effective_end: None,
            status: RatePlanStatus::Active,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        };
        let mut late = record("SURCHARGE_FLAT", json!({"amount": 1}));
        late.sort_order = 20;
        let mut early = record("FIXED_FEE", json!({"amount": 5}));
        early.sort_order = 10;
        let mut broken_but_inactive = record("FIXED_FEE", json!({}));
        broken_but_inactive.is_active = false;

        let schedule = RateSchedule::new(plan, vec![late, broken_but_inactive, early]).unwrap();
        let orders: Vec<i32> = schedule.components.iter().map(|c| c.sort_order).collect();
        assert_eq!(orders, vec![10, 20]);
    }
}
