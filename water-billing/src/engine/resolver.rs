//! Rate plan resolution.

use crate::error::{BillingError, Result};
use crate::models::{CustomerClass, RatePlan, RatePlanStatus};
use chrono::NaiveDate;
use std::cmp::Reverse;
use tracing::warn;

/// Pick the ACTIVE plan covering `class` on `date`.
///
/// More than one candidate is a data-integrity problem; the choice is still
/// deterministic: a plan scoped to the class itself wins over `ANY`, then the
/// latest effective start, then the smallest plan id.
pub fn resolve_active_plan(
    plans: &[RatePlan],
    class: CustomerClass,
    date: NaiveDate,
) -> Result<RatePlan> {
    let mut candidates: Vec<&RatePlan> = plans
        .iter()
        .filter(|p| {
            p.status == RatePlanStatus::Active
                && p.customer_scope.covers(class)
                && p.is_effective_on(date)
        })
        .collect();

    candidates.sort_by_key(|p| {
        (
            !p.customer_scope.is_exact(class),
            Reverse(p.effective_start),
            p.plan_id,
        )
    });

    if candidates.len() > 1 {
        warn!(
            customer_class = class.as_str(),
            date = %date,
            candidates = candidates.len(),
            chosen = %candidates[0].plan_id,
            "Multiple active rate plans match; check rate plan configuration"
        );
    }

    candidates.first().map(|p| (*p).clone()).ok_or_else(|| {
        BillingError::NotFound(format!(
            "No active rate plan for {} customers on {}",
            class.as_str(),
            date
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlanScope;
    use chrono::Utc;
    use uuid::Uuid;

    fn plan(
        name: &str,
        scope: PlanScope,
        start: (i32, u32, u32),
        end: Option<(i32, u32, u32)>,
        status: RatePlanStatus,
    ) -> RatePlan {
        let date = |(y, m, d): (i32, u32, u32)| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        RatePlan {
            plan_id: Uuid::new_v4(),
            name: name.to_string(),
            customer_scope: scope,
            effective_start: date(start),
            effective_end: end.map(date),
            status,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn on(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn exact_scope_beats_any() {
        let plans = vec![
            plan("Any", PlanScope::Any, (2024, 1, 1), None, RatePlanStatus::Active),
            plan("Res", PlanScope::Residential, (2023, 1, 1), None, RatePlanStatus::Active),
        ];
        let chosen =
            resolve_active_plan(&plans, CustomerClass::Residential, on(2024, 6, 1)).unwrap();
        assert_eq!(chosen.name, "Res");

        let chosen =
            resolve_active_plan(&plans, CustomerClass::Commercial, on(2024, 6, 1)).unwrap();
        assert_eq!(chosen.name, "Any");
    }

    #[test]
    fn end_date_is_inclusive() {
        let plans = vec![plan(
            "Old",
            PlanScope::Any,
            (2023, 1, 1),
            Some((2023, 12, 31)),
            RatePlanStatus::Active,
        )];
        assert!(resolve_active_plan(&plans, CustomerClass::Residential, on(2023, 12, 31)).is_ok());
        assert!(matches!(
            resolve_active_plan(&plans, CustomerClass::Residential, on(2024, 1, 1)),
            Err(BillingError::NotFound(_))
        ));
    }

    #[test]
    fn draft_and_retired_plans_ignored() {
        let plans = vec![
            plan("Draft", PlanScope::Any, (2024, 1, 1), None, RatePlanStatus::Draft),
            plan("Retired", PlanScope::Any, (2020, 1, 1), None, RatePlanStatus::Retired),
        ];
        assert!(resolve_active_plan(&plans, CustomerClass::Commercial, on(2024, 3, 1)).is_err());
    }

    #[test]
    fn latest_start_wins_among_equal_scopes() {
        let plans = vec![
            plan("2023", PlanScope::Commercial, (2023, 1, 1), None, RatePlanStatus::Active),
            plan("2024", PlanScope::Commercial, (2024, 1, 1), None, RatePlanStatus::Active),
        ];
        let chosen =
            resolve_active_plan(&plans, CustomerClass::Commercial, on(2024, 6, 1)).unwrap();
        assert_eq!(chosen.name, "2024");
    }
}
