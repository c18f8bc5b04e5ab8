//! Market-hours oracle.
//!
//! Pure decisions over a refreshable snapshot of the current clock plus a
//! trading calendar. Never queries a broker directly — the snapshot is kept
//! current by the scheduler's market-status watcher.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use std::collections::HashMap;

use super::model::Side;

/// Exchanges where a BUY order does not require a market-hours check.
pub const FLEXIBLE_EXCHANGES: &[&str] = &["XNAS", "XNYS", "XETR", "XLON"];
/// Exchanges where BUY orders are checked exactly like SELL orders.
pub const STRICT_EXCHANGES: &[&str] = &["XHKG", "XSHG", "XTSE", "XASX"];

/// A single exchange's regular trading session, in its local timezone.
#[derive(Debug, Clone)]
pub struct TradingSession {
    pub exchange: String,
    pub timezone: Tz,
    pub open_hour: u32,
    pub open_minute: u32,
    pub close_hour: u32,
    pub close_minute: u32,
}

impl TradingSession {
    fn is_open_at(&self, now_utc: DateTime<Utc>) -> bool {
        let local = now_utc.with_timezone(&self.timezone);
        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes_since_midnight = local.hour() * 60 + local.minute();
        let open = self.open_hour * 60 + self.open_minute;
        let close = self.close_hour * 60 + self.close_minute;
        minutes_since_midnight >= open && minutes_since_midnight < close
    }
}

/// A refreshable snapshot of all known exchanges' sessions. Built once per
/// market-status watcher tick and handed to the oracle by reference.
#[derive(Debug, Clone, Default)]
pub struct MarketCalendar {
    sessions: HashMap<String, TradingSession>,
}

impl MarketCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: TradingSession) -> Self {
        self.sessions.insert(session.exchange.clone(), session);
        self
    }

    pub fn insert(&mut self, session: TradingSession) {
        self.sessions.insert(session.exchange.clone(), session);
    }

    pub fn get(&self, exchange: &str) -> Option<&TradingSession> {
        self.sessions.get(exchange)
    }
}

/// Decide whether `exchange` is open right now. Unknown exchanges fail open
/// (treated as open, i.e. do not block), matching the oracle's fail-open
/// policy for unknown stocks/exchanges.
pub fn is_market_open(calendar: &MarketCalendar, exchange: &str, now_utc: DateTime<Utc>) -> bool {
    match calendar.get(exchange) {
        Some(session) => session.is_open_at(now_utc),
        None => true,
    }
}

/// Classify whether a trade on `exchange` with the given `side` requires a
/// market-hours check before placement.
///
/// - SELL always requires a check.
/// - BUY on a flexible exchange does not require a check.
/// - BUY on a strict exchange requires a check.
/// - BUY on an exchange in neither list fails open (no check required).
pub fn should_check_market_hours(exchange: &str, side: Side) -> bool {
    match side {
        Side::Sell => true,
        Side::Buy => STRICT_EXCHANGES.contains(&exchange),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nasdaq_session() -> TradingSession {
        TradingSession {
            exchange: "XNAS".into(),
            timezone: chrono_tz::America::New_York,
            open_hour: 9,
            open_minute: 30,
            close_hour: 16,
            close_minute: 0,
        }
    }

    #[test]
    fn unknown_exchange_fails_open() {
        let calendar = MarketCalendar::new();
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        assert!(is_market_open(&calendar, "ZZZZ", now));
    }

    #[test]
    fn sell_always_requires_check() {
        assert!(should_check_market_hours("XNAS", Side::Sell));
        assert!(should_check_market_hours("XHKG", Side::Sell));
        assert!(should_check_market_hours("ZZZZ", Side::Sell));
    }

    #[test]
    fn buy_on_flexible_exchange_skips_check() {
        assert!(!should_check_market_hours("XNAS", Side::Buy));
        assert!(!should_check_market_hours("XNYS", Side::Buy));
    }

    #[test]
    fn buy_on_strict_exchange_requires_check() {
        assert!(should_check_market_hours("XHKG", Side::Buy));
        assert!(should_check_market_hours("XSHG", Side::Buy));
    }

    #[test]
    fn weekend_is_closed_on_known_exchange() {
        let calendar = MarketCalendar::new().with_session(nasdaq_session());
        // 2026-08-01 is a Saturday.
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 15, 0, 0).unwrap();
        assert!(!is_market_open(&calendar, "XNAS", now));
    }

    #[test]
    fn regular_session_open_boundary() {
        let calendar = MarketCalendar::new().with_session(nasdaq_session());
        // 14:30 UTC on a Tuesday is 9:30 ET during EDT.
        let open = Utc.with_ymd_and_hms(2026, 7, 28, 13, 30, 0).unwrap();
        assert!(is_market_open(&calendar, "XNAS", open));
    }
}
