use crate::models::{Candidate, DailyClose, ExitMetric, Scenario, TradeRecord};
use crate::rules::{condition_met, DayMetrics};
use crate::scenarios::ScenarioDraft;
use std::sync::Arc;

/// Safety cap on holding duration when no exit condition ever fires. An
/// explicit days-held threshold can raise it, never lower it.
pub const DEFAULT_HOLDING_CAP_DAYS: f64 = 14.0;

/// One viable candidate paired with its cached close series.
#[derive(Debug, Clone)]
pub struct PriceMatrixEntry {
    pub candidate: Candidate,
    pub series: Arc<Vec<DailyClose>>,
}

/// Replays one scenario against every candidate's series and attaches the
/// aggregates. Deterministic for identical inputs.
pub fn score_scenario(number: i32, draft: &ScenarioDraft, matrix: &[PriceMatrixEntry]) -> Scenario {
    let trades: Vec<TradeRecord> = matrix
        .iter()
        .filter_map(|entry| simulate_candidate(draft, &entry.candidate, &entry.series))
        .collect();

    let trade_count = trades.len() as i32;
    let total_pnl: f64 = trades.iter().map(|trade| trade.pnl).sum();
    let entry_price_sum: f64 = trades.iter().map(|trade| trade.entry_price).sum();
    let winners = trades.iter().filter(|trade| trade.pnl > 0.0).count();

    let win_rate = if trades.is_empty() {
        0.0
    } else {
        winners as f64 / trades.len() as f64 * 100.0
    };
    let total_pnl_percent = if entry_price_sum > 0.0 {
        total_pnl / entry_price_sum * 100.0
    } else {
        0.0
    };

    Scenario {
        number,
        name: draft.name.clone(),
        description: draft.description.clone(),
        conditions: draft.conditions.clone(),
        action: draft.action,
        total_pnl,
        total_pnl_percent,
        win_rate,
        trade_count,
        trades,
    }
}

/// Walks one candidate's series day by day from the entry anchor.
/// Conditions are evaluated in declaration order; the first true condition
/// wins. Returns `None` when the series has no trading day at or before
/// the anchor.
pub fn simulate_candidate(
    draft: &ScenarioDraft,
    candidate: &Candidate,
    series: &[DailyClose],
) -> Option<TradeRecord> {
    let anchor = candidate.first_viable_date.unwrap_or(candidate.signal_date);

    // Exact anchor when present, otherwise the nearest prior trading day.
    let entry_index = series.iter().rposition(|point| point.date <= anchor)?;
    let entry = series[entry_index];
    let holding_cap = holding_cap_days(draft);

    let mut exit: Option<(DailyClose, String)> = None;
    for point in &series[entry_index..] {
        let metrics = DayMetrics {
            price_change_percent: (point.close - entry.close) / entry.close * 100.0,
            days_held: (point.date - entry.date).num_days() as f64,
        };

        if let Some(condition) = draft
            .conditions
            .iter()
            .find(|condition| condition_met(condition, metrics))
        {
            exit = Some((*point, format!("condition '{}' met", condition.describe())));
            break;
        }

        if metrics.days_held >= holding_cap {
            exit = Some((
                *point,
                format!("maximum holding period of {} days reached", holding_cap),
            ));
            break;
        }
    }

    let (exit_point, exit_reason) = exit.unwrap_or_else(|| {
        let last = series[series.len() - 1];
        (
            last,
            "price history ended before an exit rule fired".to_string(),
        )
    });

    let pnl = exit_point.close - entry.close;
    Some(TradeRecord {
        ticker: candidate.ticker.clone(),
        entry_date: entry.date,
        entry_price: entry.close,
        exit_date: exit_point.date,
        exit_price: exit_point.close,
        pnl,
        pnl_percent: pnl / entry.close * 100.0,
        exit_reason,
    })
}

fn holding_cap_days(draft: &ScenarioDraft) -> f64 {
    draft
        .conditions
        .iter()
        .filter(|condition| condition.metric == ExitMetric::DaysHeld)
        .map(|condition| condition.threshold)
        .filter(|threshold| threshold.is_finite())
        .fold(DEFAULT_HOLDING_CAP_DAYS, f64::max)
}
