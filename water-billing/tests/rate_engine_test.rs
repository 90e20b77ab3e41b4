//! Rate engine integration tests.

mod common;

use common::{component_record, date, plan_record, two_tier_config};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use water_billing::engine::{calculate_charges, ChargeBreakdown, ChargeCategory};
use water_billing::models::{PlanScope, RatePlan, RatePlanStatus, RateSchedule};
use water_billing::BillingError;

fn plan() -> RatePlan {
    plan_record("Test Plan", PlanScope::Any, date(2024, 1, 1), RatePlanStatus::Active)
}

fn schedule(components: Vec<(&str, &str, serde_json::Value)>) -> RateSchedule {
    let plan = plan();
    let records = components
        .into_iter()
        .zip(1..)
        .map(|((kind, name, config), order)| {
            component_record(plan.plan_id, kind, name, config, order)
        })
        .collect();
    RateSchedule::new(plan, records).expect("schedule should parse")
}

fn flat_usage(rate: &str) -> serde_json::Value {
    json!({ "tiers": [{ "up_to": null, "rate_per_unit": rate }] })
}

fn assert_totals_consistent(breakdown: &ChargeBreakdown) {
    assert_eq!(breakdown.subtotal, breakdown.usage_charge + breakdown.base_fee);
    assert_eq!(breakdown.total_amount, breakdown.subtotal + breakdown.total_surcharges);
    let items: Decimal = breakdown.line_items.iter().map(|i| i.amount).sum();
    assert_eq!(items, breakdown.total_amount);
}

#[test]
fn tiered_usage_walks_bands_in_order() {
    let schedule = schedule(vec![("TIERED_USAGE", "Water Usage", two_tier_config())]);

    let breakdown = calculate_charges(dec!(15), &schedule, date(2024, 3, 31)).unwrap();

    assert_eq!(breakdown.usage_charge, dec!(35.00));
    assert_eq!(breakdown.total_amount, dec!(35.00));
    assert_eq!(breakdown.line_items.len(), 1);
    assert_eq!(breakdown.line_items[0].description, "Water Usage");
    assert_eq!(breakdown.line_items[0].category, ChargeCategory::Usage);
    assert_eq!(breakdown.rate_plan_name, "Test Plan");
}

#[test]
fn usage_inside_first_tier_uses_first_rate_only() {
    let schedule = schedule(vec![("TIERED_USAGE", "Water Usage", two_tier_config())]);
    let breakdown = calculate_charges(dec!(7.5), &schedule, date(2024, 3, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(15.00));
}

#[test]
fn legacy_rate_per_ccf_key_is_accepted() {
    let schedule = schedule(vec![(
        "TIERED_USAGE",
        "Water Usage",
        json!({ "tiers": [
            { "up_to": 10, "rate_per_ccf": 2 },
            { "up_to": null, "rate_per_ccf": 3 }
        ]}),
    )]);
    let breakdown = calculate_charges(dec!(15), &schedule, date(2024, 3, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(35.00));
}

#[test]
fn seasonal_multiplier_adds_the_excess_in_applicable_months() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", flat_usage("2")),
        (
            "SEASONAL_MULTIPLIER",
            "Summer Peak",
            json!({ "applies_months": [6, 7, 8], "multiplier": "1.2" }),
        ),
    ]);

    let summer = calculate_charges(dec!(50), &schedule, date(2024, 7, 31)).unwrap();
    assert_eq!(summer.usage_charge, dec!(120.00));
    assert_eq!(summer.line_items.len(), 2);
    assert_eq!(summer.line_items[1].amount, dec!(20.00));
    assert_eq!(summer.line_items[1].description, "Summer Peak (1.2x)");

    let winter = calculate_charges(dec!(50), &schedule, date(2024, 1, 31)).unwrap();
    assert_eq!(winter.usage_charge, dec!(100.00));
    assert_eq!(winter.line_items.len(), 1);
}

#[test]
fn multiplier_at_or_below_one_is_a_no_op() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", flat_usage("2")),
        (
            "SEASONAL_MULTIPLIER",
            "Winter Discount",
            json!({ "applies_months": [1], "multiplier": "0.8" }),
        ),
    ]);

    let breakdown = calculate_charges(dec!(50), &schedule, date(2024, 1, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(100.00));
    assert_eq!(breakdown.line_items.len(), 1);
}

#[test]
fn seasonal_multiplier_only_sees_usage_charged_before_it() {
    let schedule = schedule(vec![
        (
            "SEASONAL_MULTIPLIER",
            "Summer Peak",
            json!({ "applies_months": [7], "multiplier": "1.2" }),
        ),
        ("TIERED_USAGE", "Water Usage", flat_usage("2")),
    ]);

    let breakdown = calculate_charges(dec!(50), &schedule, date(2024, 7, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(100.00));
    assert_eq!(breakdown.line_items[0].amount, dec!(0.00));
}

#[test]
fn percent_surcharge_applies_to_running_subtotal() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", flat_usage("2")),
        (
            "SEASONAL_MULTIPLIER",
            "Summer Peak",
            json!({ "applies_months": [7], "multiplier": "1.2" }),
        ),
        ("SURCHARGE_PERCENT", "Infrastructure", json!({ "percent": "0.05" })),
    ]);

    let breakdown = calculate_charges(dec!(50), &schedule, date(2024, 7, 31)).unwrap();

    assert_eq!(breakdown.subtotal, dec!(120.00));
    assert_eq!(breakdown.total_surcharges, dec!(6.00));
    assert_eq!(breakdown.total_amount, dec!(126.00));
    assert_eq!(breakdown.line_items[2].category, ChargeCategory::Surcharge);
}

#[test]
fn surcharge_placed_before_fee_does_not_see_it() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", flat_usage("1")),
        ("SURCHARGE_PERCENT", "Infrastructure", json!({ "percent": "0.10" })),
        ("FIXED_FEE", "Service Fee", json!({ "amount": "50" })),
    ]);

    let breakdown = calculate_charges(dec!(100), &schedule, date(2024, 7, 31)).unwrap();
    assert_eq!(breakdown.total_surcharges, dec!(10.00));
    assert_eq!(breakdown.base_fee, dec!(50.00));
    assert_eq!(breakdown.total_amount, dec!(160.00));
}

#[test]
fn each_component_rounds_half_up_to_cents() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", flat_usage("1.01")),
        ("SURCHARGE_PERCENT", "Infrastructure", json!({ "percent": "0.05" })),
    ]);

    // 10 * 1.01 = 10.10; 10.10 * 0.05 = 0.505 -> 0.51
    let breakdown = calculate_charges(dec!(10), &schedule, date(2024, 7, 31)).unwrap();
    assert_eq!(breakdown.total_surcharges, dec!(0.51));
    assert_eq!(breakdown.total_amount, dec!(10.61));
}

#[test]
fn totals_stay_consistent_across_a_full_plan() {
    let schedule = schedule(vec![
        (
            "TIERED_USAGE",
            "Water Usage",
            json!({ "tiers": [
                { "up_to": 5, "rate_per_unit": "3.125" },
                { "up_to": 20, "rate_per_unit": "4.333" },
                { "up_to": null, "rate_per_unit": "6.017" }
            ]}),
        ),
        ("FIXED_FEE", "Meter Charge", json!({ "amount": "12.345" })),
        (
            "SEASONAL_MULTIPLIER",
            "Summer Peak",
            json!({ "applies_months": [6, 7, 8, 9], "multiplier": "1.15" }),
        ),
        ("SURCHARGE_PERCENT", "Drought", json!({ "percent": "0.0725" })),
        ("SURCHARGE_FLAT", "Stormwater", json!({ "amount": "3.5" })),
    ]);

    let usages = [
        dec!(0),
        dec!(1),
        dec!(4.99),
        dec!(5),
        dec!(19.5),
        dec!(20),
        dec!(37.25),
        dec!(1000),
    ];
    for usage in usages {
        for billing_date in [date(2024, 2, 29), date(2024, 8, 31)] {
            let breakdown = calculate_charges(usage, &schedule, billing_date).unwrap();
            assert_totals_consistent(&breakdown);
            assert_eq!(breakdown.total_amount, breakdown.total_amount.round_dp(2));
        }
    }
}

#[test]
fn zero_usage_still_charges_fixed_fees() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", two_tier_config()),
        ("FIXED_FEE", "Service Fee", json!({ "amount": "8.50" })),
    ]);

    let breakdown = calculate_charges(Decimal::ZERO, &schedule, date(2024, 3, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(0.00));
    assert_eq!(breakdown.total_amount, dec!(8.50));
    assert_eq!(breakdown.line_items.len(), 2);
}

#[test]
fn usage_past_a_bounded_last_tier_is_not_charged() {
    let schedule = schedule(vec![(
        "TIERED_USAGE",
        "Water Usage",
        json!({ "tiers": [{ "up_to": 10, "rate_per_unit": 2 }] }),
    )]);

    let breakdown = calculate_charges(dec!(25), &schedule, date(2024, 3, 31)).unwrap();
    assert_eq!(breakdown.usage_charge, dec!(20.00));
}

#[test]
fn negative_usage_is_rejected() {
    let schedule = schedule(vec![("TIERED_USAGE", "Water Usage", two_tier_config())]);
    assert!(matches!(
        calculate_charges(dec!(-1), &schedule, date(2024, 3, 31)),
        Err(BillingError::Validation(_))
    ));
}

#[test]
fn unknown_component_types_are_skipped() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", two_tier_config()),
        ("LOYALTY_CREDIT", "Loyalty", json!({ "amount": "-5" })),
    ]);

    let breakdown = calculate_charges(dec!(15), &schedule, date(2024, 3, 31)).unwrap();
    assert_eq!(breakdown.total_amount, dec!(35.00));
    assert_eq!(breakdown.line_items.len(), 1);
}

#[test]
fn inactive_components_are_excluded_and_order_follows_sort_order() {
    let plan = plan();
    let id = plan.plan_id;
    let mut fee = component_record(id, "FIXED_FEE", "Service Fee", json!({ "amount": 5 }), 20);
    let usage = component_record(id, "TIERED_USAGE", "Water Usage", two_tier_config(), 10);
    let mut retired =
        component_record(id, "SURCHARGE_FLAT", "Old Levy", json!({ "amount": 9 }), 15);
    retired.is_active = false;
    fee.sort_order = 30;

    let schedule = RateSchedule::new(plan, vec![fee, retired, usage]).unwrap();
    let breakdown = calculate_charges(dec!(15), &schedule, date(2024, 3, 31)).unwrap();

    let names: Vec<&str> = breakdown.line_items.iter().map(|i| i.description.as_str()).collect();
    assert_eq!(names, vec!["Water Usage", "Service Fee"]);
    assert_eq!(breakdown.total_amount, dec!(40.00));
}

#[test]
fn malformed_configuration_names_the_component() {
    let plan = plan();
    let records = vec![
        component_record(plan.plan_id, "FIXED_FEE", "Service Fee", json!({ "amount": 5 }), 1),
        component_record(plan.plan_id, "TIERED_USAGE", "Broken Tiers", json!({ "tiers": [] }), 2),
    ];

    match RateSchedule::new(plan, records) {
        Err(BillingError::Configuration { component, .. }) => assert_eq!(component, "Broken Tiers"),
        other => panic!(
            "expected configuration error, got {:?}",
            other.map(|s| s.components.len())
        ),
    }
}

#[test]
fn non_terminal_tier_without_bound_is_rejected() {
    let plan = plan();
    let records = vec![component_record(
        plan.plan_id,
        "TIERED_USAGE",
        "Water Usage",
        json!({ "tiers": [
            { "up_to": null, "rate_per_unit": 2 },
            { "up_to": 20, "rate_per_unit": 3 }
        ]}),
        1,
    )];
    assert!(matches!(
        RateSchedule::new(plan, records),
        Err(BillingError::Configuration { .. })
    ));
}

#[test]
fn missing_fields_are_configuration_errors() {
    for (kind, config) in [
        ("FIXED_FEE", json!({})),
        ("SURCHARGE_FLAT", json!({ "amt": 3 })),
        ("SURCHARGE_PERCENT", json!({})),
        ("SEASONAL_MULTIPLIER", json!({ "multiplier": "1.1" })),
        ("SEASONAL_MULTIPLIER", json!({ "applies_months": [13], "multiplier": "1.1" })),
    ] {
        let plan = plan();
        let records = vec![component_record(plan.plan_id, kind, "Bad", config, 1)];
        assert!(
            matches!(RateSchedule::new(plan, records), Err(BillingError::Configuration { .. })),
            "{} should fail",
            kind
        );
    }
}

#[test]
fn identical_inputs_give_identical_breakdowns() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Water Usage", two_tier_config()),
        ("SURCHARGE_PERCENT", "Infrastructure", json!({ "percent": "0.05" })),
    ]);
    let first = calculate_charges(dec!(42.7), &schedule, date(2024, 5, 31)).unwrap();
    let second = calculate_charges(dec!(42.7), &schedule, date(2024, 5, 31)).unwrap();
    assert_eq!(first.line_items, second.line_items);
    assert_eq!(first.total_amount, second.total_amount);
}

#[test]
fn overflowing_charge_is_a_configuration_error() {
    let schedule = schedule(vec![
        ("TIERED_USAGE", "Huge Rate", flat_usage("50000000000000000000000000000")),
        ("FIXED_FEE", "Service Fee", json!({ "amount": 5 })),
    ]);

    let err = calculate_charges(dec!(10), &schedule, date(2024, 6, 30)).unwrap_err();

    assert!(matches!(
        err,
        BillingError::Configuration { component, .. } if component == "Huge Rate"
    ));
}

#[test]
fn overflowing_surcharge_is_a_configuration_error() {
    let schedule = schedule(vec![
        ("FIXED_FEE", "Big Fee", json!({ "amount": "70000000000000000000000000000" })),
        ("SURCHARGE_PERCENT", "Levy", json!({ "percent": 2 })),
    ]);

    let err = calculate_charges(dec!(0), &schedule, date(2024, 6, 30)).unwrap_err();

    assert!(matches!(
        err,
        BillingError::Configuration { component, .. } if component == "Levy"
    ));
}
