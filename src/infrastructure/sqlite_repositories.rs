//! SQLite-backed repositories.
//!
//! Queries are built with the runtime `sqlx::query`/`query_as` API rather
//! than the `query!` macros: those require a live `DATABASE_URL` at compile
//! time to check column types against, which this workspace doesn't have.
//! Decimal and timestamp columns round-trip through `TEXT` so the exact
//! value survives (`rust_decimal::Decimal`'s `Display`/`FromStr` are
//! lossless; `sqlx`'s own decimal feature only covers `NUMERIC`, not
//! SQLite's untyped storage).
//!
//! Durable persistence is only wired up for the aggregates the execution
//! loop and scheduler actually need across restarts. `ScoreRepository`,
//! `SettingsRepository`, and `PlannerRepository` stay in-memory — scores
//! and in-flight planner sequences are cheap to recompute, and settings
//! have no write path yet.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::domain::model::{
    CashBalance, Currency, JobHistoryRecord, JobSchedule, JobStatus, MarketTiming, Position,
    Security, Side,
};
use crate::domain::repositories::{
    CashBalanceRepository, JobHistoryRepository, JobScheduleRepository, PositionRepository,
    RecordedTrade, StockRepository, TradeFilter, TradeRepository,
};

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "BUY",
        Side::Sell => "SELL",
    }
}

fn side_from_str(s: &str) -> Result<Side> {
    match s {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => anyhow::bail!("unknown side in database: {other}"),
    }
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Skipped => "skipped",
    }
}

fn job_status_from_str(s: &str) -> Result<JobStatus> {
    match s {
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "skipped" => Ok(JobStatus::Skipped),
        other => anyhow::bail!("unknown job status in database: {other}"),
    }
}

fn market_timing_to_str(timing: MarketTiming) -> &'static str {
    match timing {
        MarketTiming::Any => "any",
        MarketTiming::AfterClose => "after_close",
        MarketTiming::DuringOpen => "during_open",
        MarketTiming::AllMarketsClosed => "all_markets_closed",
    }
}

fn market_timing_from_str(s: &str) -> Result<MarketTiming> {
    match s {
        "any" => Ok(MarketTiming::Any),
        "after_close" => Ok(MarketTiming::AfterClose),
        "during_open" => Ok(MarketTiming::DuringOpen),
        "all_markets_closed" => Ok(MarketTiming::AllMarketsClosed),
        other => anyhow::bail!("unknown market timing in database: {other}"),
    }
}

fn decimal_opt_to_str(value: Option<Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

fn decimal_opt_from_str(value: Option<String>) -> Result<Option<Decimal>> {
    value.map(|s| Decimal::from_str(&s).context("parsing decimal column")).transpose()
}

/// Runs the `CREATE TABLE IF NOT EXISTS` statements for every table this
/// module owns. Safe to call repeatedly; bootstrap calls it once per pool.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stocks (
            symbol TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            currency TEXT NOT NULL,
            country TEXT,
            industry TEXT,
            min_lot INTEGER NOT NULL,
            allow_buy INTEGER NOT NULL,
            allow_sell INTEGER NOT NULL,
            active INTEGER NOT NULL,
            priority_multiplier TEXT NOT NULL,
            yahoo_symbol TEXT,
            isin TEXT,
            ml_enabled INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            symbol TEXT PRIMARY KEY,
            quantity INTEGER NOT NULL,
            avg_price TEXT NOT NULL,
            current_price TEXT,
            currency TEXT NOT NULL,
            market_value_eur TEXT,
            cost_basis_eur TEXT,
            first_bought_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cash_balances (
            currency TEXT PRIMARY KEY,
            amount TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            broker_trade_id TEXT PRIMARY KEY,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            price TEXT NOT NULL,
            currency TEXT NOT NULL,
            executed_at TEXT NOT NULL,
            commission TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_schedules (
            job_type TEXT PRIMARY KEY,
            interval_minutes INTEGER NOT NULL,
            interval_market_open_minutes INTEGER,
            market_timing TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            last_run INTEGER,
            consecutive_failures INTEGER NOT NULL,
            category TEXT NOT NULL,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_history (
            job_id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            duration_ms INTEGER NOT NULL,
            executed_at TEXT NOT NULL,
            retry_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub struct SqliteStockRepository {
    pool: SqlitePool,
}

impl SqliteStockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_security(row: &sqlx::sqlite::SqliteRow) -> Result<Security> {
        Ok(Security {
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            currency: Currency::from_str(&row.try_get::<String, _>("currency")?)
                .map_err(|e| anyhow::anyhow!(e))?,
            country: row.try_get("country")?,
            industry: row.try_get("industry")?,
            min_lot: row.try_get::<i64, _>("min_lot")? as u32,
            allow_buy: row.try_get("allow_buy")?,
            allow_sell: row.try_get("allow_sell")?,
            active: row.try_get("active")?,
            priority_multiplier: Decimal::from_str(&row.try_get::<String, _>("priority_multiplier")?)?,
            yahoo_symbol: row.try_get("yahoo_symbol")?,
            isin: row.try_get("isin")?,
            ml_enabled: row.try_get("ml_enabled")?,
        })
    }
}

#[async_trait]
impl StockRepository for SqliteStockRepository {
    async fn get_by_symbol(&self, symbol: &str) -> Result<Option<Security>> {
        let row = sqlx::query("SELECT * FROM stocks WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_security).transpose()
    }

    async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Security>> {
        let row = sqlx::query(
            "SELECT * FROM stocks WHERE symbol = ?1 OR isin = ?1 OR yahoo_symbol = ?1",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_security).transpose()
    }

    async fn get_all_active(&self) -> Result<Vec<Security>> {
        let rows = sqlx::query("SELECT * FROM stocks WHERE active = 1")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_security).collect()
    }

    async fn create(&self, security: Security) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stocks (
                symbol, name, currency, country, industry, min_lot, allow_buy,
                allow_sell, active, priority_multiplier, yahoo_symbol, isin, ml_enabled
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                name = excluded.name, currency = excluded.currency,
                country = excluded.country, industry = excluded.industry,
                min_lot = excluded.min_lot, allow_buy = excluded.allow_buy,
                allow_sell = excluded.allow_sell, active = excluded.active,
                priority_multiplier = excluded.priority_multiplier,
                yahoo_symbol = excluded.yahoo_symbol, isin = excluded.isin,
                ml_enabled = excluded.ml_enabled
            "#,
        )
        .bind(&security.symbol)
        .bind(&security.name)
        .bind(security.currency.to_string())
        .bind(&security.country)
        .bind(&security.industry)
        .bind(security.min_lot as i64)
        .bind(security.allow_buy)
        .bind(security.allow_sell)
        .bind(security.active)
        .bind(security.priority_multiplier.to_string())
        .bind(&security.yahoo_symbol)
        .bind(&security.isin)
        .bind(security.ml_enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, symbol: &str, security: Security) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE stocks SET
                name = ?, currency = ?, country = ?, industry = ?, min_lot = ?,
                allow_buy = ?, allow_sell = ?, active = ?, priority_multiplier = ?,
                yahoo_symbol = ?, isin = ?, ml_enabled = ?
            WHERE symbol = ?
            "#,
        )
        .bind(&security.name)
        .bind(security.currency.to_string())
        .bind(&security.country)
        .bind(&security.industry)
        .bind(security.min_lot as i64)
        .bind(security.allow_buy)
        .bind(security.allow_sell)
        .bind(security.active)
        .bind(security.priority_multiplier.to_string())
        .bind(&security.yahoo_symbol)
        .bind(&security.isin)
        .bind(security.ml_enabled)
        .bind(symbol)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqlitePositionRepository {
    pool: SqlitePool,
}

impl SqlitePositionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_position(row: &sqlx::sqlite::SqliteRow) -> Result<Position> {
        Ok(Position {
            symbol: row.try_get("symbol")?,
            quantity: row.try_get("quantity")?,
            avg_price: Decimal::from_str(&row.try_get::<String, _>("avg_price")?)?,
            current_price: decimal_opt_from_str(row.try_get("current_price")?)?,
            currency: Currency::from_str(&row.try_get::<String, _>("currency")?)
                .map_err(|e| anyhow::anyhow!(e))?,
            market_value_eur: decimal_opt_from_str(row.try_get("market_value_eur")?)?,
            cost_basis_eur: decimal_opt_from_str(row.try_get("cost_basis_eur")?)?,
            first_bought_at: row
                .try_get::<Option<String>, _>("first_bought_at")?
                .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
                .transpose()?,
        })
    }
}

#[async_trait]
impl PositionRepository for SqlitePositionRepository {
    async fn get_all(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn get(&self, symbol: &str) -> Result<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_position).transpose()
    }

    async fn upsert(&self, position: Position) -> Result<()> {
        if !position.is_present() {
            sqlx::query("DELETE FROM positions WHERE symbol = ?")
                .bind(&position.symbol)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, quantity, avg_price, current_price, currency,
                market_value_eur, cost_basis_eur, first_bought_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                quantity = excluded.quantity, avg_price = excluded.avg_price,
                current_price = excluded.current_price, currency = excluded.currency,
                market_value_eur = excluded.market_value_eur,
                cost_basis_eur = excluded.cost_basis_eur,
                first_bought_at = excluded.first_bought_at
            "#,
        )
        .bind(&position.symbol)
        .bind(position.quantity)
        .bind(position.avg_price.to_string())
        .bind(decimal_opt_to_str(position.current_price))
        .bind(position.currency.to_string())
        .bind(decimal_opt_to_str(position.market_value_eur))
        .bind(decimal_opt_to_str(position.cost_basis_eur))
        .bind(position.first_bought_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqliteCashBalanceRepository {
    pool: SqlitePool,
}

impl SqliteCashBalanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CashBalanceRepository for SqliteCashBalanceRepository {
    async fn get_all(&self) -> Result<Vec<CashBalance>> {
        let rows = sqlx::query("SELECT * FROM cash_balances").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(CashBalance {
                    currency: Currency::from_str(&row.try_get::<String, _>("currency")?)
                        .map_err(|e| anyhow::anyhow!(e))?,
                    amount: Decimal::from_str(&row.try_get::<String, _>("amount")?)?,
                })
            })
            .collect()
    }

    async fn get(&self, currency: Currency) -> Result<Option<CashBalance>> {
        let row = sqlx::query("SELECT * FROM cash_balances WHERE currency = ?")
            .bind(currency.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<CashBalance> {
            Ok(CashBalance {
                currency,
                amount: Decimal::from_str(&row.try_get::<String, _>("amount")?)?,
            })
        })
        .transpose()
    }

    async fn set(&self, balance: CashBalance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cash_balances (currency, amount) VALUES (?, ?)
            ON CONFLICT(currency) DO UPDATE SET amount = excluded.amount
            "#,
        )
        .bind(balance.currency.to_string())
        .bind(balance.amount.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqliteTradeRepository {
    pool: SqlitePool,
}

impl SqliteTradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_trade(row: &sqlx::sqlite::SqliteRow) -> Result<RecordedTrade> {
        Ok(RecordedTrade {
            broker_trade_id: row.try_get("broker_trade_id")?,
            symbol: row.try_get("symbol")?,
            side: side_from_str(&row.try_get::<String, _>("side")?)?,
            quantity: row.try_get("quantity")?,
            price: Decimal::from_str(&row.try_get::<String, _>("price")?)?,
            currency: Currency::from_str(&row.try_get::<String, _>("currency")?)
                .map_err(|e| anyhow::anyhow!(e))?,
            executed_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("executed_at")?)?
                .with_timezone(&Utc),
            commission: decimal_opt_from_str(row.try_get("commission")?)?,
        })
    }
}

#[async_trait]
impl TradeRepository for SqliteTradeRepository {
    async fn record(&self, trade: RecordedTrade) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                broker_trade_id, symbol, side, quantity, price, currency,
                executed_at, commission
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(broker_trade_id) DO NOTHING
            "#,
        )
        .bind(&trade.broker_trade_id)
        .bind(&trade.symbol)
        .bind(side_to_str(trade.side))
        .bind(trade.quantity)
        .bind(trade.price.to_string())
        .bind(trade.currency.to_string())
        .bind(trade.executed_at.to_rfc3339())
        .bind(decimal_opt_to_str(trade.commission))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn has_recent_sell_order(&self, symbol: &str, within_minutes: i64) -> Result<bool> {
        let cutoff = (Utc::now() - chrono::Duration::minutes(within_minutes)).to_rfc3339();
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM trades WHERE symbol = ? AND side = 'SELL' AND executed_at >= ?",
        )
        .bind(symbol)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    async fn get_trades(&self, filter: TradeFilter, limit: i64, offset: i64) -> Result<Vec<RecordedTrade>> {
        let mut query = String::from("SELECT * FROM trades WHERE 1 = 1");
        if filter.symbol.is_some() {
            query.push_str(" AND symbol = ?");
        }
        if filter.side.is_some() {
            query.push_str(" AND side = ?");
        }
        if filter.since.is_some() {
            query.push_str(" AND executed_at >= ?");
        }
        query.push_str(" ORDER BY executed_at DESC LIMIT ? OFFSET ?");

        let mut builder = sqlx::query(&query);
        if let Some(symbol) = &filter.symbol {
            builder = builder.bind(symbol);
        }
        if let Some(side) = filter.side {
            builder = builder.bind(side_to_str(side));
        }
        if let Some(since) = filter.since {
            builder = builder.bind(since.to_rfc3339());
        }
        builder = builder.bind(limit.max(0)).bind(offset.max(0));

        let rows = builder.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_trade).collect()
    }
}

pub struct SqliteJobScheduleRepository {
    pool: SqlitePool,
}

impl SqliteJobScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> Result<JobSchedule> {
        Ok(JobSchedule {
            job_type: row.try_get("job_type")?,
            interval_minutes: row.try_get::<i64, _>("interval_minutes")? as u32,
            interval_market_open_minutes: row
                .try_get::<Option<i64>, _>("interval_market_open_minutes")?
                .map(|v| v as u32),
            market_timing: market_timing_from_str(&row.try_get::<String, _>("market_timing")?)?,
            enabled: row.try_get("enabled")?,
            last_run: row.try_get("last_run")?,
            consecutive_failures: row.try_get::<i64, _>("consecutive_failures")? as u32,
            category: row.try_get("category")?,
            description: row.try_get("description")?,
        })
    }
}

#[async_trait]
impl JobScheduleRepository for SqliteJobScheduleRepository {
    async fn get_all(&self) -> Result<Vec<JobSchedule>> {
        let rows = sqlx::query("SELECT * FROM job_schedules").fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_schedule).collect()
    }

    async fn get(&self, job_type: &str) -> Result<Option<JobSchedule>> {
        let row = sqlx::query("SELECT * FROM job_schedules WHERE job_type = ?")
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_schedule).transpose()
    }

    async fn upsert(&self, schedule: JobSchedule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_schedules (
                job_type, interval_minutes, interval_market_open_minutes,
                market_timing, enabled, last_run, consecutive_failures,
                category, description
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_type) DO UPDATE SET
                interval_minutes = excluded.interval_minutes,
                interval_market_open_minutes = excluded.interval_market_open_minutes,
                market_timing = excluded.market_timing, enabled = excluded.enabled,
                last_run = excluded.last_run,
                consecutive_failures = excluded.consecutive_failures,
                category = excluded.category, description = excluded.description
            "#,
        )
        .bind(&schedule.job_type)
        .bind(schedule.interval_minutes as i64)
        .bind(schedule.interval_market_open_minutes.map(|v| v as i64))
        .bind(market_timing_to_str(schedule.market_timing))
        .bind(schedule.enabled)
        .bind(schedule.last_run)
        .bind(schedule.consecutive_failures as i64)
        .bind(&schedule.category)
        .bind(&schedule.description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_run(&self, job_type: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE job_schedules SET last_run = ?, consecutive_failures = 0 WHERE job_type = ?",
        )
        .bind(at.timestamp())
        .bind(job_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, job_type: &str) -> Result<u32> {
        sqlx::query(
            "UPDATE job_schedules SET consecutive_failures = consecutive_failures + 1 WHERE job_type = ?",
        )
        .bind(job_type)
        .execute(&self.pool)
        .await?;
        let row = sqlx::query("SELECT consecutive_failures FROM job_schedules WHERE job_type = ?")
            .bind(job_type)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<i64, _>("consecutive_failures")).transpose()?.unwrap_or(0) as u32)
    }

    async fn clear_failures(&self, job_type: &str) -> Result<()> {
        sqlx::query("UPDATE job_schedules SET consecutive_failures = 0 WHERE job_type = ?")
            .bind(job_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct SqliteJobHistoryRepository {
    pool: SqlitePool,
}

impl SqliteJobHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHistoryRepository for SqliteJobHistoryRepository {
    async fn record(&self, record: JobHistoryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_history (
                job_id, job_type, status, error, duration_ms, executed_at, retry_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO NOTHING
            "#,
        )
        .bind(&record.job_id)
        .bind(&record.job_type)
        .bind(job_status_to_str(record.status))
        .bind(&record.error)
        .bind(record.duration_ms)
        .bind(record.executed_at.to_rfc3339())
        .bind(record.retry_count as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_by_type(&self, limit: usize) -> Result<Vec<JobHistoryRecord>> {
        let rows = sqlx::query("SELECT * FROM job_history ORDER BY executed_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in &rows {
            let job_type: String = row.try_get("job_type")?;
            if seen.insert(job_type.clone()) {
                out.push(JobHistoryRecord {
                    job_id: row.try_get("job_id")?,
                    job_type,
                    status: job_status_from_str(&row.try_get::<String, _>("status")?)?,
                    error: row.try_get("error")?,
                    duration_ms: row.try_get("duration_ms")?,
                    executed_at: DateTime::parse_from_rfc3339(&row.try_get::<String, _>("executed_at")?)?
                        .with_timezone(&Utc),
                    retry_count: row.try_get::<i64, _>("retry_count")? as u32,
                });
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Currency;
    use rust_decimal_macros::dec;

    async fn pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn stock_round_trips_through_sqlite() {
        let repo = SqliteStockRepository::new(pool().await);
        let security = Security {
            symbol: "AAPL.US".into(),
            name: "Apple".into(),
            currency: Currency::Usd,
            country: Some("US".into()),
            industry: Some("Technology".into()),
            min_lot: 1,
            allow_buy: true,
            allow_sell: true,
            active: true,
            priority_multiplier: dec!(1.0),
            yahoo_symbol: Some("AAPL".into()),
            isin: None,
            ml_enabled: false,
        };
        repo.create(security.clone()).await.unwrap();
        let fetched = repo.get_by_symbol("AAPL.US").await.unwrap().unwrap();
        assert_eq!(fetched.name, "Apple");
        assert_eq!(fetched.priority_multiplier, dec!(1.0));

        let by_identifier = repo.get_by_identifier("AAPL").await.unwrap().unwrap();
        assert_eq!(by_identifier.symbol, "AAPL.US");
    }

    #[tokio::test]
    async fn position_upsert_deletes_closed_positions() {
        let repo = SqlitePositionRepository::new(pool().await);
        let position = Position {
            symbol: "AAPL.US".into(),
            quantity: 10,
            avg_price: dec!(150.0),
            current_price: Some(dec!(160.0)),
            currency: Currency::Usd,
            market_value_eur: Some(dec!(1480.0)),
            cost_basis_eur: Some(dec!(1390.0)),
            first_bought_at: Some(Utc::now()),
        };
        repo.upsert(position.clone()).await.unwrap();
        assert!(repo.get("AAPL.US").await.unwrap().is_some());

        repo.upsert(Position { quantity: 0, ..position }).await.unwrap();
        assert!(repo.get("AAPL.US").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trade_record_dedupes_by_broker_id() {
        let repo = SqliteTradeRepository::new(pool().await);
        let trade = RecordedTrade {
            broker_trade_id: "t1".into(),
            symbol: "AAPL.US".into(),
            side: Side::Buy,
            quantity: 5,
            price: dec!(100.0),
            currency: Currency::Usd,
            executed_at: Utc::now(),
            commission: None,
        };
        assert!(repo.record(trade.clone()).await.unwrap());
        assert!(!repo.record(trade).await.unwrap());
    }

    #[tokio::test]
    async fn job_schedule_tracks_failures_and_resets_on_run() {
        let repo = SqliteJobScheduleRepository::new(pool().await);
        let schedule = JobSchedule {
            job_type: "rebalance".into(),
            interval_minutes: 15,
            interval_market_open_minutes: Some(5),
            market_timing: MarketTiming::DuringOpen,
            enabled: true,
            last_run: None,
            consecutive_failures: 0,
            category: "trading".into(),
            description: "rebalance recompute".into(),
        };
        repo.upsert(schedule).await.unwrap();
        assert_eq!(repo.record_failure("rebalance").await.unwrap(), 1);
        assert_eq!(repo.record_failure("rebalance").await.unwrap(), 2);
        repo.mark_run("rebalance", Utc::now()).await.unwrap();
        let fetched = repo.get("rebalance").await.unwrap().unwrap();
        assert_eq!(fetched.consecutive_failures, 0);
        assert!(fetched.last_run.is_some());
    }
}
