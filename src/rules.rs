use crate::models::{Comparator, ExitCondition, ExitMetric};

pub const PRICE_EPSILON: f64 = 1e-6;

/// The two position metrics available to exit conditions on a given day.
#[derive(Debug, Clone, Copy)]
pub struct DayMetrics {
    pub price_change_percent: f64,
    pub days_held: f64,
}

/// Evaluates one condition against one day's metrics. Pure and total over
/// finite inputs; equality is epsilon-tolerant, ordered comparators are
/// exact.
pub fn condition_met(condition: &ExitCondition, metrics: DayMetrics) -> bool {
    let value = match condition.metric {
        ExitMetric::PriceChangePercent => metrics.price_change_percent,
        ExitMetric::DaysHeld => metrics.days_held,
    };
    let threshold = condition.threshold;

    match condition.comparator {
        Comparator::Gt => value > threshold,
        Comparator::Lt => value < threshold,
        Comparator::Ge => value >= threshold,
        Comparator::Le => value <= threshold,
        Comparator::Eq => (value - threshold).abs() <= PRICE_EPSILON,
    }
}
