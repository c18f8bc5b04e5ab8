//! Refreshable wrapper around the pure market-hours oracle (C4).
//!
//! `domain::market_hours` is deliberately stateless — it decides over a
//! snapshot handed to it by reference. This module owns the mutable
//! snapshot: a static calendar of known exchange sessions, overlaid with
//! whatever the broker most recently reported via `get_market_status`. The
//! broker's live status wins when present; the calendar is the fallback
//! for exchanges the broker hasn't reported on this tick (or when no
//! broker refresh has happened yet).

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::market_hours::{self, MarketCalendar, TradingSession};
use crate::domain::model::Side;
use crate::domain::ports::{MarketState, MarketStatusEntry};

fn default_calendar() -> MarketCalendar {
    use chrono_tz::America::New_York;
    use chrono_tz::Asia::{Hong_Kong, Shanghai, Tokyo};
    use chrono_tz::Australia::Sydney;
    use chrono_tz::Europe::{Berlin, London};

    MarketCalendar::new()
        .with_session(TradingSession {
            exchange: "XNAS".into(),
            timezone: New_York,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        })
        .with_session(TradingSession {
            exchange: "XNYS".into(),
            timezone: New_York,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        })
        .with_session(TradingSession {
            exchange: "XETR".into(),
            timezone: Berlin,
            open_hour: 9,
            open_minute: 0,
            close_hour: 17,
            close_minute: 30,
        })
        .with_session(TradingSession {
            exchange: "XLON".into(),
            timezone: London,
            open_hour: 8,
            open_minute: 0,
            close_hour: 16,
            close_minute: 30,
        })
        .with_session(TradingSession {
            exchange: "XHKG".into(),
            timezone: Hong_Kong,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        })
        .with_session(TradingSession {
            exchange: "XSHG".into(),
            timezone: Shanghai,
            open_hour: 9,
            open_minute: 30,
            close_hour: 15,
            close_minute: 0,
        })
        .with_session(TradingSession {
            exchange: "XTSE".into(),
            timezone: Tokyo,
            open_hour: 9,
            open_minute: 0,
            close_hour: 15,
            close_minute: 0,
        })
        .with_session(TradingSession {
            exchange: "XASX".into(),
            timezone: Sydney,
            open_hour: 10,
            open_minute: 0,
            close_hour: 16,
            close_minute: 0,
        })
}

/// The scheduler's "active interval band" and the execution loop's
/// market-hours gate both read from this one refreshable snapshot.
pub struct LiveMarketOracle {
    calendar: MarketCalendar,
    live_status: RwLock<HashMap<String, MarketState>>,
}

impl Default for LiveMarketOracle {
    fn default() -> Self {
        Self {
            calendar: default_calendar(),
            live_status: RwLock::new(HashMap::new()),
        }
    }
}

impl LiveMarketOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live-status overlay with what the broker just reported.
    pub async fn refresh(&self, entries: Vec<MarketStatusEntry>) {
        let mut status = self.live_status.write().await;
        status.clear();
        for entry in entries {
            status.insert(entry.exchange_id, entry.state);
        }
    }

    pub async fn is_market_open(&self, exchange: &str) -> bool {
        if let Some(state) = self.live_status.read().await.get(exchange) {
            return match state {
                MarketState::Open => true,
                MarketState::Closed => false,
                MarketState::Unknown => {
                    market_hours::is_market_open(&self.calendar, exchange, Utc::now())
                }
            };
        }
        market_hours::is_market_open(&self.calendar, exchange, Utc::now())
    }

    pub fn should_check_market_hours(&self, exchange: &str, side: Side) -> bool {
        market_hours::should_check_market_hours(exchange, side)
    }

    /// Whether at least one known exchange is currently open — drives the
    /// `DuringOpen` / `AllMarketsClosed` job-timing gates and the
    /// scheduler's normal/market-open interval switch.
    pub async fn any_market_open(&self) -> bool {
        let status = self.live_status.read().await;
        if !status.is_empty() {
            return status.values().any(|s| matches!(s, MarketState::Open));
        }
        drop(status);
        let now = Utc::now();
        for exchange in market_hours::FLEXIBLE_EXCHANGES
            .iter()
            .chain(market_hours::STRICT_EXCHANGES.iter())
        {
            if market_hours::is_market_open(&self.calendar, exchange, now) {
                return true;
            }
        }
        false
    }

    pub async fn all_markets_closed(&self) -> bool {
        !self.any_market_open().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_status_overrides_calendar() {
        let oracle = LiveMarketOracle::new();
        oracle
            .refresh(vec![MarketStatusEntry {
                exchange_id: "XNAS".into(),
                exchange_name: "NASDAQ".into(),
                state: MarketState::Closed,
            }])
            .await;
        assert!(!oracle.is_market_open("XNAS").await);
    }

    #[tokio::test]
    async fn unknown_exchange_without_live_status_falls_back_to_calendar_fail_open() {
        let oracle = LiveMarketOracle::new();
        assert!(oracle.is_market_open("ZZZZ").await);
    }

    #[tokio::test]
    async fn any_market_open_true_when_no_status_and_no_calendar_match() {
        let oracle = LiveMarketOracle::new();
        oracle
            .refresh(vec![MarketStatusEntry {
                exchange_id: "XNAS".into(),
                exchange_name: "NASDAQ".into(),
                state: MarketState::Open,
            }])
            .await;
        assert!(oracle.any_market_open().await);
    }
}
