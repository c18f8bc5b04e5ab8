//! External capability interfaces: the broker and the pricing-data provider.
//!
//! Both are narrow, purpose-built traits rather than a generic wrapper over
//! one vendor's wire format — concrete implementations (a real broker's REST
//! client, a mock for tests) live in `infrastructure`, never here.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::model::{CashBalance, Currency, PriceBar, Side};

#[derive(Debug, Clone)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub currency: Currency,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SecurityInfo {
    pub symbol: String,
    pub isin: Option<String>,
    pub min_lot: u32,
    pub currency: Currency,
    pub market_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SymbolMatch {
    pub symbol: String,
    pub name: String,
    pub exchange: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Open,
    Closed,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct MarketStatusEntry {
    pub exchange_id: String,
    pub exchange_name: String,
    pub state: MarketState,
}

#[derive(Debug, Clone)]
pub struct BrokerTrade {
    pub broker_trade_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub price: Decimal,
    pub executed_at: DateTime<Utc>,
    pub commission: Option<Decimal>,
    pub commission_currency: Option<Currency>,
}

#[derive(Debug, Clone)]
pub struct BrokerCashFlow {
    pub id: String,
    pub type_id: String,
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub currency: Currency,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order_id: String,
}

/// Narrow capability interface the core consumes; the concrete wire format
/// of any real broker is explicitly out of scope.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn is_connected(&self) -> bool;
    async fn connect(&self) -> Result<bool>;
    async fn get_cash_balances(&self) -> Result<Vec<CashBalance>>;
    async fn get_total_cash_eur(&self) -> Result<Decimal>;
    async fn get_quotes(&self, symbols: &[String]) -> Result<HashMap<String, Quote>>;
    async fn get_quote(&self, symbol: &str) -> Result<Option<Quote>>;
    async fn get_historical_prices(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>>;
    async fn get_historical_prices_bulk(
        &self,
        symbols: &[String],
        years: u32,
    ) -> Result<HashMap<String, Vec<PriceBar>>>;
    async fn get_security_info(&self, symbol: &str) -> Result<Option<SecurityInfo>>;
    async fn find_symbol(&self, query: &str) -> Result<Vec<SymbolMatch>>;
    async fn get_market_status(&self) -> Result<Vec<MarketStatusEntry>>;
    async fn get_trades_history(&self, start_date: DateTime<Utc>) -> Result<Vec<BrokerTrade>>;
    async fn get_cash_flows(&self, start_date: DateTime<Utc>) -> Result<Vec<BrokerCashFlow>>;
    async fn get_all_cash_flows(&self, limit: usize) -> Result<Vec<BrokerCashFlow>>;
    async fn place_order(&self, symbol: &str, side: Side, quantity: i64) -> Result<Option<OrderResult>>;
}

#[derive(Debug, Clone, Default)]
pub struct Fundamentals {
    pub payout_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub financial_strength: Option<f64>,
}

/// Pluggable pricing-data source. The core needs at least one implementation
/// to drive the scoring/target-building pipeline, but its wire format is
/// out of scope — this trait is the whole contract.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    async fn get_historical_prices(
        &self,
        symbol: &str,
        yahoo_symbol: Option<&str>,
        period_days: u32,
    ) -> Result<Vec<PriceBar>>;
    async fn get_fundamentals(&self, symbol: &str) -> Result<Fundamentals>;
    async fn get_stock_country_and_exchange(&self, symbol: &str) -> Result<(Option<String>, Option<String>)>;
    async fn get_stock_industry(&self, symbol: &str) -> Result<Option<String>>;
}

/// Trading-halt state derived from the day's realized + unrealized P&L.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnlState {
    Ok,
    Warning,
    Halted,
}

#[derive(Debug, Clone)]
pub struct PnlStatus {
    pub state: PnlState,
    pub can_buy: bool,
    pub can_sell: bool,
    pub reason: Option<String>,
}

impl PnlStatus {
    pub fn ok() -> Self {
        Self { state: PnlState::Ok, can_buy: true, can_sell: true, reason: None }
    }
}

/// Daily P&L guardrail consulted before every trade attempt (§4.10 step 3).
/// A `Warning` still allows trading; `Halted` blocks both sides until the
/// next trading day.
#[async_trait]
pub trait DailyPnlTracker: Send + Sync {
    async fn status(&self) -> Result<PnlStatus>;
}

/// Per-symbol cooldown gate (§4.10 step 4's
/// `TradeFrequencyService.can_execute_trade`), preventing the execution
/// loop from re-submitting an order for a symbol it just traded.
#[async_trait]
pub trait TradeFrequencyService: Send + Sync {
    async fn can_execute_trade(&self, symbol: &str, side: Side) -> Result<bool>;
    async fn record_trade(&self, symbol: &str, side: Side);
}
