//! Pure rating code: plan resolution and charge calculation.

pub mod rate_engine;
pub mod resolver;

pub use rate_engine::{
    calculate_charges, round_money, ChargeBreakdown, ChargeCategory, ChargeLineItem,
};
pub use resolver::resolve_active_plan;
