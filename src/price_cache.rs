use crate::error::Result;
use crate::market_data::MarketDataProvider;
use crate::models::DailyClose;
use crate::retry::retry_store_operation;
use crate::store::PriceSeriesStore;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use uuid::Uuid;

/// Read-through cache over the shared price-series store. Historical
/// closes never change, so entries are write-once per (ticker, start) key
/// with no eviction. The in-process layer only saves store round trips
/// within one process lifetime.
pub struct PriceHistoryCache<'a> {
    store: &'a dyn PriceSeriesStore,
    market: &'a dyn MarketDataProvider,
    local: DashMap<String, Arc<Vec<DailyClose>>>,
}

impl<'a> PriceHistoryCache<'a> {
    pub fn new(store: &'a dyn PriceSeriesStore, market: &'a dyn MarketDataProvider) -> Self {
        Self {
            store,
            market,
            local: DashMap::new(),
        }
    }

    fn cache_key(ticker: &str, start: NaiveDate) -> String {
        format!("{}:{}", ticker, start.format("%Y-%m-%d"))
    }

    /// Returns the cached series for (ticker, start), fetching and storing
    /// it on a miss. `job_id` is recorded as fetch provenance only; the
    /// entry is shared across jobs.
    pub async fn get_or_fetch(
        &self,
        job_id: Uuid,
        ticker: &str,
        start: NaiveDate,
    ) -> Result<Arc<Vec<DailyClose>>> {
        let key = Self::cache_key(ticker, start);
        if let Some(series) = self.local.get(&key) {
            return Ok(Arc::clone(&series));
        }

        if let Some(series) = self.store.get(ticker, start).await? {
            debug!("Price series cache hit for {}", key);
            let series = Arc::new(series);
            self.local.insert(key, Arc::clone(&series));
            return Ok(series);
        }

        let today = Utc::now().date_naive();
        let series = self
            .market
            .get_historical_daily_closes(ticker, start, today)
            .await?;
        retry_store_operation!(
            format!("store price series {}", key),
            self.store.put(job_id, ticker, start, &series)
        )?;

        let series = Arc::new(series);
        self.local.insert(key, Arc::clone(&series));
        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReplayError;
    use crate::models::{CompanyProfile, Quote};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySeriesStore {
        rows: Mutex<HashMap<(String, NaiveDate), Vec<DailyClose>>>,
        puts: AtomicUsize,
    }

    #[async_trait]
    impl PriceSeriesStore for MemorySeriesStore {
        async fn get(&self, ticker: &str, start: NaiveDate) -> Result<Option<Vec<DailyClose>>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(&(ticker.to_string(), start))
                .cloned())
        }

        async fn put(
            &self,
            _job_id: Uuid,
            ticker: &str,
            start: NaiveDate,
            series: &[DailyClose],
        ) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.rows
                .lock()
                .unwrap()
                .entry((ticker.to_string(), start))
                .or_insert_with(|| series.to_vec());
            Ok(())
        }
    }

    struct CountingMarket {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for CountingMarket {
        async fn get_quote(&self, _ticker: &str) -> Result<Quote> {
            unreachable!("cache never asks for quotes")
        }

        async fn get_historical_daily_closes(
            &self,
            _ticker: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<DailyClose>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![DailyClose {
                date: start,
                close: 100.0,
            }])
        }

        async fn get_company_profile(&self, _ticker: &str) -> Result<CompanyProfile> {
            unreachable!("cache never asks for profiles")
        }
    }

    fn start_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 3, 1).expect("valid date")
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores_once() {
        let store = MemorySeriesStore::default();
        let market = CountingMarket {
            fetches: AtomicUsize::new(0),
        };
        let cache = PriceHistoryCache::new(&store, &market);
        let job_id = Uuid::new_v4();

        let first = cache.get_or_fetch(job_id, "AAA", start_date()).await.unwrap();
        let second = cache.get_or_fetch(job_id, "AAA", start_date()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(market.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_hit_skips_fetch() {
        let store = MemorySeriesStore::default();
        store
            .put(
                Uuid::new_v4(),
                "AAA",
                start_date(),
                &[DailyClose {
                    date: start_date(),
                    close: 42.0,
                }],
            )
            .await
            .unwrap();
        let market = CountingMarket {
            fetches: AtomicUsize::new(0),
        };
        let cache = PriceHistoryCache::new(&store, &market);

        let series = cache
            .get_or_fetch(Uuid::new_v4(), "AAA", start_date())
            .await
            .unwrap();
        assert_eq!(series[0].close, 42.0);
        assert_eq!(market.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_data_propagates() {
        struct EmptyMarket;

        #[async_trait]
        impl MarketDataProvider for EmptyMarket {
            async fn get_quote(&self, _ticker: &str) -> Result<Quote> {
                unreachable!()
            }

            async fn get_historical_daily_closes(
                &self,
                ticker: &str,
                start: NaiveDate,
                _end: NaiveDate,
            ) -> Result<Vec<DailyClose>> {
                Err(ReplayError::NoData {
                    ticker: ticker.to_string(),
                    start,
                })
            }

            async fn get_company_profile(&self, _ticker: &str) -> Result<CompanyProfile> {
                unreachable!()
            }
        }

        let store = MemorySeriesStore::default();
        let cache = PriceHistoryCache::new(&store, &EmptyMarket);
        let err = cache
            .get_or_fetch(Uuid::new_v4(), "GONE", start_date())
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::NoData { .. }));
        assert_eq!(store.puts.load(Ordering::SeqCst), 0);
    }
}
