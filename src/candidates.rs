use crate::market_data::MarketDataProvider;
use crate::models::{Candidate, DailyClose, SignalMessage};
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::HashMap;

pub const MARKET_CAP_FLOOR: f64 = 500_000_000.0;
pub const INSIDER_PRICE_RATIO_FLOOR: f64 = 0.15;

/// Filing feeds tag sales as "S - Sale"; chat messages spell it out.
const SALE_MARKERS: [&str; 3] = ["sale", "sell", "s -"];
const BUY_MARKERS: [&str; 3] = ["buy", "purchase", "p -"];

/// A sale marker anywhere excludes the message, even when buy indicators
/// are also present.
pub fn is_buy_recommendation(raw: &str) -> bool {
    let normalized = raw.trim().to_lowercase();
    if SALE_MARKERS.iter().any(|marker| normalized.contains(marker)) {
        return false;
    }
    BUY_MARKERS.iter().any(|marker| normalized.contains(marker))
}

#[derive(Clone, Copy)]
struct StockSnapshot {
    market_price: f64,
    market_cap: f64,
}

/// Turns raw signal messages into de-duplicated purchase candidates.
/// Quote/profile lookups happen once per ticker per batch; lookup failures
/// skip the message, never the batch.
pub struct CandidateFilter<'a> {
    market: &'a dyn MarketDataProvider,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(market: &'a dyn MarketDataProvider) -> Self {
        Self { market }
    }

    pub async fn filter_messages(&self, messages: &[SignalMessage]) -> Vec<Candidate> {
        let mut snapshots: HashMap<String, StockSnapshot> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for message in messages {
            let ticker = message.ticker.trim().to_uppercase();
            if ticker.is_empty() {
                continue;
            }
            if candidates.iter().any(|candidate| candidate.ticker == ticker) {
                debug!("Skipping duplicate signal for {}", ticker);
                continue;
            }

            if !is_buy_recommendation(&message.recommendation) {
                debug!(
                    "Skipping {}: recommendation '{}' is not a buy",
                    ticker, message.recommendation
                );
                continue;
            }

            let snapshot = match snapshots.get(&ticker) {
                Some(snapshot) => *snapshot,
                None => match self.lookup_snapshot(&ticker).await {
                    Some(snapshot) => {
                        snapshots.insert(ticker.clone(), snapshot);
                        snapshot
                    }
                    None => continue,
                },
            };

            if snapshot.market_cap <= MARKET_CAP_FLOOR {
                debug!(
                    "Skipping {}: market cap {:.0} below floor",
                    ticker, snapshot.market_cap
                );
                continue;
            }

            // Insider prices far below market are usually options grants
            // misread as open-market purchases.
            if message.insider_price < INSIDER_PRICE_RATIO_FLOOR * snapshot.market_price {
                debug!(
                    "Skipping {}: insider price {:.2} under {:.0}% of market price {:.2}",
                    ticker,
                    message.insider_price,
                    INSIDER_PRICE_RATIO_FLOOR * 100.0,
                    snapshot.market_price
                );
                continue;
            }

            candidates.push(Candidate {
                ticker,
                insider_price: message.insider_price,
                insider_trade_date: message.insider_trade_date,
                signal_date: message.signal_surface_date,
                market_price: snapshot.market_price,
                market_cap: snapshot.market_cap,
                first_viable_date: None,
            });
        }

        info!(
            "Filtered {} signal messages down to {} candidates",
            messages.len(),
            candidates.len()
        );
        candidates
    }

    async fn lookup_snapshot(&self, ticker: &str) -> Option<StockSnapshot> {
        let quote = match self.market.get_quote(ticker).await {
            Ok(quote) => quote,
            Err(err) => {
                warn!("Quote lookup for {} failed: {}", ticker, err);
                return None;
            }
        };
        let profile = match self.market.get_company_profile(ticker).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!("Profile lookup for {} failed: {}", ticker, err);
                return None;
            }
        };
        let Some(market_cap) = profile.market_cap else {
            warn!("No market cap available for {}", ticker);
            return None;
        };
        Some(StockSnapshot {
            market_price: quote.current_price,
            market_cap,
        })
    }
}

/// First date the candidate would have passed the live purchase filters,
/// or `None` when it never does. Market cap does not change across the
/// series, so a sub-floor cap short-circuits without scanning.
pub fn first_viable_date(
    series: &[DailyClose],
    insider_price: f64,
    market_cap: f64,
) -> Option<NaiveDate> {
    if market_cap < MARKET_CAP_FLOOR {
        return None;
    }
    series
        .iter()
        .find(|point| {
            point.close > 0.0 && insider_price / point.close >= INSIDER_PRICE_RATIO_FLOOR
        })
        .map(|point| point.date)
}
