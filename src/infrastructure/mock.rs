//! In-memory `Broker`/`PriceProvider`/rate-source implementations.
//!
//! Used by integration tests and as the default collaborator set when no
//! real broker credentials are configured (the core's contract with the
//! broker wire format is explicitly out of scope per spec §1).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::domain::currency::{HistoricalRateSource, RateSource};
use crate::domain::model::{CashBalance, Currency, PriceBar, Side};
use crate::domain::ports::{
    Broker, BrokerCashFlow, BrokerTrade, DailyPnlTracker, Fundamentals, MarketState,
    MarketStatusEntry, OrderResult, PnlStatus, PriceProvider, Quote, SecurityInfo, SymbolMatch,
    TradeFrequencyService,
};

/// A scripted broker: cash balances, quotes, and market status are set up
/// by the test/bootstrap caller; `place_order` records every call it sees
/// so assertions can inspect what the execution loop actually did.
#[derive(Default)]
pub struct MockBroker {
    pub connected: std::sync::atomic::AtomicBool,
    pub cash_balances: Mutex<Vec<CashBalance>>,
    pub quotes: Mutex<HashMap<String, Quote>>,
    pub historical_prices: Mutex<HashMap<String, Vec<PriceBar>>>,
    pub security_info: Mutex<HashMap<String, SecurityInfo>>,
    pub market_status: Mutex<Vec<MarketStatusEntry>>,
    pub trades_history: Mutex<Vec<BrokerTrade>>,
    pub cash_flows: Mutex<Vec<BrokerCashFlow>>,
    pub placed_orders: Mutex<Vec<(String, Side, i64)>>,
    order_seq: AtomicU64,
    pub fail_orders: std::sync::atomic::AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            connected: std::sync::atomic::AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub async fn set_quote(&self, symbol: &str, price: Decimal, currency: Currency) {
        self.quotes.lock().await.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                price,
                currency,
                as_of: Utc::now(),
            },
        );
    }

    pub async fn set_cash(&self, currency: Currency, amount: Decimal) {
        let mut balances = self.cash_balances.lock().await;
        balances.retain(|b| b.currency != currency);
        balances.push(CashBalance { currency, amount });
    }

    pub async fn set_market_open(&self, exchange_id: &str, open: bool) {
        let mut statuses = self.market_status.lock().await;
        statuses.retain(|s| s.exchange_id != exchange_id);
        statuses.push(MarketStatusEntry {
            exchange_id: exchange_id.to_string(),
            exchange_name: exchange_id.to_string(),
            state: if open { MarketState::Open } else { MarketState::Closed },
        });
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<bool> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn get_cash_balances(&self) -> Result<Vec<CashBalance>> {
        Ok(self.cash_balances.lock().await.clone())
    }

    async fn get_total_cash_eur(&self) -> Result<Decimal> {
        Ok(self
            .cash_balances
            .lock()
            .await
            .iter()
            .filter(|b| b.currency == Currency::Eur)
            .map(|b| b.amount)
            .sum())
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>> {
        let quotes = self.quotes.lock().await;
        Ok(symbols
            .iter()
            .filter_map(|s| quotes.get(s).map(|q| (s.clone(), q.clone())))
            .collect())
    }

    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        Ok(self.quotes.lock().await.get(symbol).cloned())
    }

    async fn get_historical_prices(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>> {
        let bars = self.historical_prices.lock().await;
        Ok(bars
            .get(symbol)
            .map(|series| {
                series
                    .iter()
                    .filter(|bar| {
                        let at = bar.date.and_hms_opt(0, 0, 0).unwrap().and_utc();
                        at >= start && at <= end
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_historical_prices_bulk(
        &self,
        symbols: &[String],
        _years: u32,
    ) -> Result<HashMap<String, Vec<PriceBar>>> {
        let bars = self.historical_prices.lock().await;
        Ok(symbols
            .iter()
            .filter_map(|s| bars.get(s).map(|v| (s.clone(), v.clone())))
            .collect())
    }

    async fn get_security_info(&self, symbol: &str) -> Result<Option<SecurityInfo>> {
        Ok(self.security_info.lock().await.get(symbol).cloned())
    }

    async fn find_symbol(&self, query: &str) -> Result<Vec<SymbolMatch>> {
        let info = self.security_info.lock().await;
        Ok(info
            .keys()
            .filter(|s| s.contains(query))
            .map(|s| SymbolMatch {
                symbol: s.clone(),
                name: s.clone(),
                exchange: None,
            })
            .collect())
    }

    async fn get_market_status(&self) -> Result<Vec<MarketStatusEntry>> {
        Ok(self.market_status.lock().await.clone())
    }

    async fn get_trades_history(&self, start_date: DateTime<Utc>) -> Result<Vec<BrokerTrade>> {
        Ok(self
            .trades_history
            .lock()
            .await
            .iter()
            .filter(|t| t.executed_at >= start_date)
            .cloned()
            .collect())
    }

    async fn get_cash_flows(&self, start_date: DateTime<Utc>) -> Result<Vec<BrokerCashFlow>> {
        Ok(self
            .cash_flows
            .lock()
            .await
            .iter()
            .filter(|c| c.date >= start_date)
            .cloned()
            .collect())
    }

    async fn get_all_cash_flows(&self, limit: usize) -> Result<Vec<BrokerCashFlow>> {
        let flows = self.cash_flows.lock().await;
        Ok(flows.iter().rev().take(limit).cloned().collect())
    }

    async fn place_order(&self, symbol: &str, side: Side, quantity: i64) -> Result<Option<OrderResult>> {
        if self.fail_orders.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.placed_orders
            .lock()
            .await
            .push((symbol.to_string(), side, quantity));
        let id = self.order_seq.fetch_add(1, Ordering::SeqCst);
        Ok(Some(OrderResult {
            order_id: format!("mock-order-{id}"),
        }))
    }
}

/// A pricing-data provider backed by a fixed in-memory table, used in tests
/// that need a close-price series without a live market-data dependency.
#[derive(Default)]
pub struct MockPriceProvider {
    pub series: Mutex<HashMap<String, Vec<PriceBar>>>,
    pub fundamentals: Mutex<HashMap<String, Fundamentals>>,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_series(&self, symbol: &str, bars: Vec<PriceBar>) {
        self.series.lock().await.insert(symbol.to_string(), bars);
    }
}

#[async_trait]
impl PriceProvider for MockPriceProvider {
    async fn get_historical_prices(
        &self,
        symbol: &str,
        _yahoo_symbol: Option<&str>,
        period_days: u32,
    ) -> Result<Vec<PriceBar>> {
        let series = self.series.lock().await;
        Ok(series
            .get(symbol)
            .map(|bars| {
                let take = (period_days as usize).min(bars.len());
                bars[bars.len() - take..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals> {
        Ok(self.fundamentals.lock().await.get(symbol).cloned().unwrap_or_default())
    }

    async fn get_stock_country_and_exchange(
        &self,
        _symbol: &str,
    ) -> Result<(Option<String>, Option<String>)> {
        Ok((None, None))
    }

    async fn get_stock_industry(&self, _symbol: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A fixed-rate table standing in for a live FX quote feed.
#[derive(Default)]
pub struct MockRateSource {
    pub quotes: Mutex<HashMap<String, Decimal>>,
}

impl MockRateSource {
    pub async fn set(&self, symbol: &str, price: Decimal) {
        self.quotes.lock().await.insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl RateSource for MockRateSource {
    async fn quote(&self, symbol: &str) -> Option<Decimal> {
        self.quotes.lock().await.get(symbol).copied()
    }
}

/// A fixed EUR-pivot table standing in for the historical-rate fallback
/// service.
#[derive(Default)]
pub struct MockHistoricalRateSource {
    pub rates_to_eur: Mutex<HashMap<Currency, Decimal>>,
}

#[async_trait]
impl HistoricalRateSource for MockHistoricalRateSource {
    async fn rate_to_eur(&self, currency: Currency) -> Option<Decimal> {
        self.rates_to_eur.lock().await.get(&currency).copied()
    }
}

/// Tracks realized+unrealized P&L against two configurable thresholds: a
/// `warning_pct` (still trades, surfaces a reason) and a `halt_pct` (blocks
/// both sides until reset). No thresholds were retrieved from the original
/// source for this guardrail, so the defaults here are conservative
/// round numbers rather than values extracted from source — the intent
/// (soft warning then hard halt) is what's load-bearing.
pub struct ThresholdPnlTracker {
    pub daily_pnl_pct: Mutex<f64>,
    pub warning_pct: f64,
    pub halt_pct: f64,
}

impl ThresholdPnlTracker {
    pub fn new(warning_pct: f64, halt_pct: f64) -> Self {
        Self { daily_pnl_pct: Mutex::new(0.0), warning_pct, halt_pct }
    }

    pub async fn set_daily_pnl_pct(&self, value: f64) {
        *self.daily_pnl_pct.lock().await = value;
    }
}

#[async_trait]
impl DailyPnlTracker for ThresholdPnlTracker {
    async fn status(&self) -> Result<PnlStatus> {
        let pnl = *self.daily_pnl_pct.lock().await;
        if pnl <= self.halt_pct {
            return Ok(PnlStatus {
                state: crate::domain::ports::PnlState::Halted,
                can_buy: false,
                can_sell: false,
                reason: Some(format!("daily P&L {:.2}% breached halt threshold", pnl * 100.0)),
            });
        }
        if pnl <= self.warning_pct {
            return Ok(PnlStatus {
                state: crate::domain::ports::PnlState::Warning,
                can_buy: true,
                can_sell: true,
                reason: Some(format!("daily P&L {:.2}% below warning threshold", pnl * 100.0)),
            });
        }
        Ok(PnlStatus::ok())
    }
}

/// Blocks re-submitting an order for the same symbol within a cooldown
/// window, independent of `has_recent_sell_order` (which only guards
/// SELLs against broker-propagation races); this guards both sides against
/// the execution loop hammering a symbol every cycle.
#[derive(Default)]
pub struct CooldownTradeFrequencyService {
    last_trade_at: Mutex<HashMap<String, DateTime<Utc>>>,
    cooldown: chrono::Duration,
}

impl CooldownTradeFrequencyService {
    pub fn new(cooldown_minutes: i64) -> Self {
        Self {
            last_trade_at: Mutex::new(HashMap::new()),
            cooldown: chrono::Duration::minutes(cooldown_minutes),
        }
    }
}

#[async_trait]
impl TradeFrequencyService for CooldownTradeFrequencyService {
    async fn can_execute_trade(&self, symbol: &str, _side: Side) -> Result<bool> {
        let last = self.last_trade_at.lock().await;
        Ok(match last.get(symbol) {
            Some(at) => Utc::now() - *at >= self.cooldown,
            None => true,
        })
    }

    async fn record_trade(&self, symbol: &str, _side: Side) {
        self.last_trade_at.lock().await.insert(symbol.to_string(), Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn place_order_is_recorded() {
        let broker = MockBroker::new();
        let result = broker.place_order("AAPL.US", Side::Buy, 8).await.unwrap();
        assert!(result.is_some());
        assert_eq!(broker.placed_orders.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn failing_broker_returns_no_order() {
        let broker = MockBroker::new();
        broker.fail_orders.store(true, Ordering::SeqCst);
        let result = broker.place_order("AAPL.US", Side::Buy, 8).await.unwrap();
        assert!(result.is_none());
        assert!(broker.placed_orders.lock().await.is_empty());
    }

    #[tokio::test]
    async fn total_cash_eur_sums_only_eur_balances() {
        let broker = MockBroker::new();
        broker.set_cash(Currency::Eur, dec!(1000)).await;
        broker.set_cash(Currency::Usd, dec!(500)).await;
        assert_eq!(broker.get_total_cash_eur().await.unwrap(), dec!(1000));
    }

    #[tokio::test]
    async fn pnl_tracker_halts_below_threshold() {
        let tracker = ThresholdPnlTracker::new(-0.03, -0.05);
        tracker.set_daily_pnl_pct(-0.06).await;
        let status = tracker.status().await.unwrap();
        assert!(!status.can_buy);
        assert!(!status.can_sell);
    }

    #[tokio::test]
    async fn pnl_tracker_warns_without_halting() {
        let tracker = ThresholdPnlTracker::new(-0.03, -0.05);
        tracker.set_daily_pnl_pct(-0.04).await;
        let status = tracker.status().await.unwrap();
        assert!(status.can_buy);
        assert_eq!(status.state, crate::domain::ports::PnlState::Warning);
    }

    #[tokio::test]
    async fn cooldown_blocks_immediate_repeat_trade() {
        let service = CooldownTradeFrequencyService::new(5);
        assert!(service.can_execute_trade("AAPL.US", Side::Buy).await.unwrap());
        service.record_trade("AAPL.US", Side::Buy).await;
        assert!(!service.can_execute_trade("AAPL.US", Side::Buy).await.unwrap());
    }
}
