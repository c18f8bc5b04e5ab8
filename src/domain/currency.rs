//! Currency conversion routing.
//!
//! Supports direct conversions between EUR, USD, HKD, and GBP. Pairs without
//! a direct instrument (GBP<->HKD) route via EUR in two steps.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use thiserror::Error;

use super::model::{Currency, Side};
use super::ports::{Broker, OrderResult};

#[derive(Debug, Error)]
pub enum CurrencyError {
    #[error("no conversion path from {from} to {to}")]
    NoPath { from: Currency, to: Currency },
    #[error("same currency exchange requested: {0}")]
    SameCurrency(Currency),
    #[error("invalid exchange amount: {0}")]
    InvalidAmount(Decimal),
    #[error("rate unavailable for {from}/{to}")]
    RateUnavailable { from: Currency, to: Currency },
    #[error("source balance for {currency} is negative ({amount})")]
    NegativeSourceBalance { currency: Currency, amount: Decimal },
    #[error("insufficient {currency} to convert: need {needed}, have {available}")]
    InsufficientSource {
        currency: Currency,
        needed: Decimal,
        available: Decimal,
    },
    #[error("broker rejected exchange order: {0}")]
    BrokerRejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct ConversionStep {
    pub from: Currency,
    pub to: Currency,
    pub symbol: &'static str,
    pub action: Action,
}

/// A live or historical rate quote, independent of how it was sourced.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn quote(&self, symbol: &str) -> Option<Decimal>;
}

/// Fallback used when the live quote source is unreachable or returns a
/// non-positive price. Looks rates up against EUR only, mirroring the
/// original's base-currency-pivot fallback.
#[async_trait]
pub trait HistoricalRateSource: Send + Sync {
    async fn rate_to_eur(&self, currency: Currency) -> Option<Decimal>;
}

fn direct_pair(from: Currency, to: Currency) -> Option<(&'static str, Action)> {
    use Currency::*;
    match (from, to) {
        (Eur, Usd) => Some(("EURUSD_T0.ITS", Action::Sell)),
        (Usd, Eur) => Some(("EURUSD_T0.ITS", Action::Buy)),
        (Eur, Gbp) => Some(("EURGBP_T0.ITS", Action::Sell)),
        (Gbp, Eur) => Some(("EURGBP_T0.ITS", Action::Buy)),
        (Gbp, Usd) => Some(("GBPUSD_T0.ITS", Action::Sell)),
        (Usd, Gbp) => Some(("GBPUSD_T0.ITS", Action::Buy)),
        (Eur, Hkd) => Some(("HKD/EUR", Action::Buy)),
        (Hkd, Eur) => Some(("HKD/EUR", Action::Sell)),
        (Usd, Hkd) => Some(("HKD/USD", Action::Buy)),
        (Hkd, Usd) => Some(("HKD/USD", Action::Sell)),
        _ => None,
    }
}

/// Rate-lookup symbol and whether the direct-pair quote must be inverted.
fn rate_symbol(from: Currency, to: Currency) -> Option<(&'static str, bool)> {
    use Currency::*;
    match (from, to) {
        (Eur, Usd) => Some(("EURUSD_T0.ITS", false)),
        (Usd, Eur) => Some(("EURUSD_T0.ITS", true)),
        (Eur, Gbp) => Some(("EURGBP_T0.ITS", false)),
        (Gbp, Eur) => Some(("EURGBP_T0.ITS", true)),
        (Gbp, Usd) => Some(("GBPUSD_T0.ITS", false)),
        (Usd, Gbp) => Some(("GBPUSD_T0.ITS", true)),
        (Hkd, Eur) => Some(("HKD/EUR", false)),
        (Eur, Hkd) => Some(("HKD/EUR", true)),
        (Hkd, Usd) => Some(("HKD/USD", false)),
        (Usd, Hkd) => Some(("HKD/USD", true)),
        _ => None,
    }
}

/// 2% safety margin applied when sizing a top-up conversion.
const BALANCE_BUFFER: Decimal = dec!(1.02);

pub struct CurrencyRouter {
    live: Box<dyn RateSource>,
    historical: Box<dyn HistoricalRateSource>,
}

impl CurrencyRouter {
    pub fn new(live: Box<dyn RateSource>, historical: Box<dyn HistoricalRateSource>) -> Self {
        Self { live, historical }
    }

    /// The ordered list of conversion steps between two currencies. Empty
    /// when `from == to`.
    pub fn get_conversion_path(
        &self,
        from: Currency,
        to: Currency,
    ) -> Result<Vec<ConversionStep>, CurrencyError> {
        if from == to {
            return Ok(vec![]);
        }
        if let Some((symbol, action)) = direct_pair(from, to) {
            return Ok(vec![ConversionStep {
                from,
                to,
                symbol,
                action,
            }]);
        }
        // GBP <-> HKD routes via EUR.
        let via_eur = matches!(
            (from, to),
            (Currency::Gbp, Currency::Hkd) | (Currency::Hkd, Currency::Gbp)
        );
        if via_eur {
            let (symbol1, action1) =
                direct_pair(from, Currency::Eur).expect("EUR leg always direct");
            let (symbol2, action2) =
                direct_pair(Currency::Eur, to).expect("EUR leg always direct");
            return Ok(vec![
                ConversionStep {
                    from,
                    to: Currency::Eur,
                    symbol: symbol1,
                    action: action1,
                },
                ConversionStep {
                    from: Currency::Eur,
                    to,
                    symbol: symbol2,
                    action: action2,
                },
            ]);
        }
        Err(CurrencyError::NoPath { from, to })
    }

    /// Units of `to` per 1 unit of `from`. Falls back to the historical
    /// EUR-pivot source when a live quote cannot be obtained.
    pub async fn get_rate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        if from == to {
            return Some(Decimal::ONE);
        }

        if let Some((symbol, inverse)) = rate_symbol(from, to) {
            if let Some(price) = self.live.quote(symbol).await {
                if price > Decimal::ZERO {
                    return Some(if inverse { Decimal::ONE / price } else { price });
                }
            }
            return self.fallback_rate(from, to).await;
        }

        if let Ok(path) = self.get_conversion_path(from, to) {
            if path.len() == 2 {
                let rate1 = Box::pin(self.get_rate(path[0].from, path[0].to)).await;
                let rate2 = Box::pin(self.get_rate(path[1].from, path[1].to)).await;
                if let (Some(r1), Some(r2)) = (rate1, rate2) {
                    return Some(r1 * r2);
                }
            }
        }

        self.fallback_rate(from, to).await
    }

    async fn fallback_rate(&self, from: Currency, to: Currency) -> Option<Decimal> {
        if to == Currency::Eur {
            let rate = self.historical.rate_to_eur(from).await?;
            if rate > Decimal::ZERO {
                return Some(Decimal::ONE / rate);
            }
            return None;
        }
        if from == Currency::Eur {
            let rate = self.historical.rate_to_eur(to).await?;
            if rate > Decimal::ZERO {
                return Some(rate);
            }
            return None;
        }
        let rate_from = self.historical.rate_to_eur(from).await?;
        let rate_to = self.historical.rate_to_eur(to).await?;
        if rate_from > Decimal::ZERO && rate_to > Decimal::ZERO {
            Some(rate_to / rate_from)
        } else {
            None
        }
    }

    /// Execute a conversion from `from` to `to` for `amount` units of `from`,
    /// walking the conversion path and placing one broker order per leg.
    /// Mirrors `_execute_multi_step_conversion`: the carried amount is
    /// rescaled by the observed rate between legs so a two-hop conversion
    /// (e.g. GBP->EUR->HKD) prices its second leg off the first leg's actual
    /// proceeds, not the original amount.
    pub async fn exchange(
        &self,
        broker: &dyn Broker,
        from: Currency,
        to: Currency,
        amount: Decimal,
    ) -> Result<Option<OrderResult>, CurrencyError> {
        if from == to {
            return Err(CurrencyError::SameCurrency(from));
        }
        if amount <= Decimal::ZERO {
            return Err(CurrencyError::InvalidAmount(amount));
        }

        let path = self.get_conversion_path(from, to)?;
        if path.is_empty() {
            return Ok(None);
        }

        let mut current_amount = amount;
        let mut last_result = None;

        for step in &path {
            let side = match step.action {
                Action::Buy => Side::Buy,
                Action::Sell => Side::Sell,
            };
            let quantity = current_amount.round().to_i64().unwrap_or(0);

            let result = broker
                .place_order(step.symbol, side, quantity)
                .await
                .map_err(|err| CurrencyError::BrokerRejected(err.to_string()))?;

            let Some(result) = result else {
                return Err(CurrencyError::BrokerRejected(format!(
                    "broker declined FX order {}->{} on {}",
                    step.from, step.to, step.symbol
                )));
            };

            if let Some(rate) = self.get_rate(step.from, step.to).await {
                current_amount *= rate;
            }

            last_result = Some(result);
        }

        Ok(last_result)
    }

    /// Ensure at least `min_amount` of `currency` is available, converting
    /// from `source_currency` (with a 2% buffer) if the current balance is
    /// short. Returns `false` (never an error) when the top-up cannot be
    /// performed — a negative source balance, an unreachable rate, or an
    /// insufficient source balance are all "could not ensure", not a hard
    /// failure, so the caller never worsens the deficit by treating this as
    /// fatal.
    pub async fn ensure_balance(
        &self,
        broker: &dyn Broker,
        currency: Currency,
        min_amount: Decimal,
        source_currency: Currency,
        current_balance: Decimal,
        source_balance: Decimal,
    ) -> Result<bool, CurrencyError> {
        if currency == source_currency {
            return Ok(true);
        }

        if source_balance < Decimal::ZERO {
            return Ok(false);
        }

        if current_balance >= min_amount {
            return Ok(true);
        }

        let needed = min_amount - current_balance;
        let needed_with_buffer = needed * BALANCE_BUFFER;

        let rate = match self.get_rate(source_currency, currency).await {
            Some(rate) => rate,
            None => return Ok(false),
        };

        let source_amount_needed = needed_with_buffer / rate;

        if source_balance < source_amount_needed {
            return Ok(false);
        }

        match self
            .exchange(broker, source_currency, currency, source_amount_needed)
            .await
        {
            Ok(Some(_)) => Ok(true),
            Ok(None) | Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CashBalance, PriceBar};
    use crate::domain::ports::{
        BrokerCashFlow, BrokerTrade, MarketStatusEntry, Quote, SecurityInfo, SymbolMatch,
    };
    use chrono::{DateTime, Utc};
    use tokio::sync::Mutex as AsyncMutex;

    struct FixedLive(HashMap<&'static str, Decimal>);

    #[async_trait]
    impl RateSource for FixedLive {
        async fn quote(&self, symbol: &str) -> Option<Decimal> {
            self.0.get(symbol).copied()
        }
    }

    struct NoHistorical;

    #[async_trait]
    impl HistoricalRateSource for NoHistorical {
        async fn rate_to_eur(&self, _currency: Currency) -> Option<Decimal> {
            None
        }
    }

    fn router_with(symbol: &'static str, price: Decimal) -> CurrencyRouter {
        let mut quotes = HashMap::new();
        quotes.insert(symbol, price);
        CurrencyRouter::new(Box::new(FixedLive(quotes)), Box::new(NoHistorical))
    }

    /// A broker fake that only implements order placement faithfully; every
    /// other capability is unused by the currency router and stubbed out.
    #[derive(Default)]
    struct FakeBroker {
        placed: AsyncMutex<Vec<(String, Side, i64)>>,
        fail: bool,
    }

    impl FakeBroker {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn is_connected(&self) -> bool {
            true
        }
        async fn connect(&self) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn get_cash_balances(&self) -> anyhow::Result<Vec<CashBalance>> {
            Ok(vec![])
        }
        async fn get_total_cash_eur(&self) -> anyhow::Result<Decimal> {
            Ok(Decimal::ZERO)
        }
        async fn get_quotes(&self, _symbols: &[String]) -> anyhow::Result<HashMap<String, Quote>> {
            Ok(HashMap::new())
        }
        async fn get_quote(&self, _symbol: &str) -> anyhow::Result<Option<Quote>> {
            Ok(None)
        }
        async fn get_historical_prices(
            &self,
            _symbol: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<PriceBar>> {
            Ok(vec![])
        }
        async fn get_historical_prices_bulk(
            &self,
            _symbols: &[String],
            _years: u32,
        ) -> anyhow::Result<HashMap<String, Vec<PriceBar>>> {
            Ok(HashMap::new())
        }
        async fn get_security_info(&self, _symbol: &str) -> anyhow::Result<Option<SecurityInfo>> {
            Ok(None)
        }
        async fn find_symbol(&self, _query: &str) -> anyhow::Result<Vec<SymbolMatch>> {
            Ok(vec![])
        }
        async fn get_market_status(&self) -> anyhow::Result<Vec<MarketStatusEntry>> {
            Ok(vec![])
        }
        async fn get_trades_history(&self, _start_date: DateTime<Utc>) -> anyhow::Result<Vec<BrokerTrade>> {
            Ok(vec![])
        }
        async fn get_cash_flows(&self, _start_date: DateTime<Utc>) -> anyhow::Result<Vec<BrokerCashFlow>> {
            Ok(vec![])
        }
        async fn get_all_cash_flows(&self, _limit: usize) -> anyhow::Result<Vec<BrokerCashFlow>> {
            Ok(vec![])
        }
        async fn place_order(
            &self,
            symbol: &str,
            side: Side,
            quantity: i64,
        ) -> anyhow::Result<Option<OrderResult>> {
            if self.fail {
                return Ok(None);
            }
            self.placed
                .lock()
                .await
                .push((symbol.to_string(), side, quantity));
            Ok(Some(OrderResult {
                order_id: "fake-order".to_string(),
            }))
        }
    }

    #[test]
    fn same_currency_path_is_empty() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let path = router
            .get_conversion_path(Currency::Eur, Currency::Eur)
            .unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn gbp_hkd_routes_via_eur() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let path = router
            .get_conversion_path(Currency::Gbp, Currency::Hkd)
            .unwrap();
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].to, Currency::Eur);
        assert_eq!(path[1].from, Currency::Eur);
    }

    #[tokio::test]
    async fn direct_rate_uses_live_quote() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let rate = router.get_rate(Currency::Eur, Currency::Usd).await.unwrap();
        assert_eq!(rate, dec!(1.1));
    }

    #[tokio::test]
    async fn inverse_rate_is_reciprocal() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let rate = router.get_rate(Currency::Usd, Currency::Eur).await.unwrap();
        assert_eq!(rate, Decimal::ONE / dec!(1.1));
    }

    #[tokio::test]
    async fn ensure_balance_blocks_on_negative_source() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let broker = FakeBroker::default();
        let result = router
            .ensure_balance(&broker, Currency::Usd, dec!(100), Currency::Eur, dec!(0), dec!(-50))
            .await
            .unwrap();
        assert!(!result);
        assert!(broker.placed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ensure_balance_converts_short_balance_via_source() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.08));
        let broker = FakeBroker::default();
        let result = router
            .ensure_balance(&broker, Currency::Eur, dec!(210), Currency::Usd, dec!(0), dec!(900))
            .await
            .unwrap();
        assert!(result);
        let placed = broker.placed.lock().await;
        assert_eq!(placed.len(), 1);
        let (symbol, side, quantity) = &placed[0];
        assert_eq!(symbol, "EURUSD_T0.ITS");
        assert_eq!(*side, Side::Buy);
        let expected = (dec!(210) * dec!(1.02) * dec!(1.08)).round().to_i64().unwrap();
        assert_eq!(*quantity, expected);
    }

    #[tokio::test]
    async fn ensure_balance_noop_when_sufficient() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.1));
        let broker = FakeBroker::default();
        let result = router
            .ensure_balance(&broker, Currency::Usd, dec!(100), Currency::Eur, dec!(200), dec!(500))
            .await
            .unwrap();
        assert!(result);
        assert!(broker.placed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ensure_balance_false_when_rate_unavailable() {
        let router = CurrencyRouter::new(
            Box::new(FixedLive(HashMap::new())),
            Box::new(NoHistorical),
        );
        let broker = FakeBroker::default();
        let result = router
            .ensure_balance(&broker, Currency::Usd, dec!(100), Currency::Eur, dec!(0), dec!(500))
            .await
            .unwrap();
        assert!(!result);
        assert!(broker.placed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn ensure_balance_false_when_source_insufficient() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.08));
        let broker = FakeBroker::default();
        let result = router
            .ensure_balance(&broker, Currency::Eur, dec!(210), Currency::Usd, dec!(0), dec!(10))
            .await
            .unwrap();
        assert!(!result);
        assert!(broker.placed.lock().await.is_empty());
    }

    #[tokio::test]
    async fn exchange_rejects_same_currency() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.08));
        let broker = FakeBroker::default();
        let result = router.exchange(&broker, Currency::Eur, Currency::Eur, dec!(100)).await;
        assert!(matches!(result, Err(CurrencyError::SameCurrency(_))));
    }

    #[tokio::test]
    async fn exchange_places_single_leg_order() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.08));
        let broker = FakeBroker::default();
        let result = router
            .exchange(&broker, Currency::Eur, Currency::Usd, dec!(100))
            .await
            .unwrap();
        assert!(result.is_some());
        let placed = broker.placed.lock().await;
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0], ("EURUSD_T0.ITS".to_string(), Side::Sell, 100));
    }

    #[tokio::test]
    async fn exchange_rescales_amount_across_two_hops() {
        let mut quotes = HashMap::new();
        quotes.insert("EURGBP_T0.ITS", dec!(0.86));
        quotes.insert("HKD/EUR", dec!(0.115));
        let router = CurrencyRouter::new(Box::new(FixedLive(quotes)), Box::new(NoHistorical));
        let broker = FakeBroker::default();

        let result = router
            .exchange(&broker, Currency::Gbp, Currency::Hkd, dec!(100))
            .await
            .unwrap();
        assert!(result.is_some());

        let placed = broker.placed.lock().await;
        assert_eq!(placed.len(), 2);
        // Leg 1: GBP -> EUR, placed at the original 100 GBP.
        assert_eq!(placed[0].0, "EURGBP_T0.ITS");
        assert_eq!(placed[0].1, Side::Buy);
        assert_eq!(placed[0].2, 100);
        // Leg 2 is placed for leg 1's rescaled proceeds (EUR received for
        // 100 GBP at rate EUR/GBP=0.86), not the original 100 GBP.
        let eur_amount = dec!(100) * (Decimal::ONE / dec!(0.86));
        assert_eq!(placed[1].0, "HKD/EUR");
        assert_eq!(placed[1].1, Side::Buy);
        assert_eq!(placed[1].2, eur_amount.round().to_i64().unwrap());
        assert_ne!(placed[1].2, 100);
    }

    #[tokio::test]
    async fn exchange_fails_when_broker_declines() {
        let router = router_with("EURUSD_T0.ITS", dec!(1.08));
        let broker = FakeBroker::failing();
        let result = router.exchange(&broker, Currency::Eur, Currency::Usd, dec!(100)).await;
        assert!(matches!(result, Err(CurrencyError::BrokerRejected(_))));
    }
}
