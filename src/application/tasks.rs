//! Concrete scheduled tasks (the normative registry from §4.11).
//!
//! Each task is a thin `SchedulableTask` wrapper around a free async
//! function doing the actual work, so the execution loop (C10) can reuse
//! `sync_portfolio`/`portfolio_hash_now` directly without going through the
//! scheduler. Grounded in `original_source/sentinel/jobs/tasks.py`'s
//! function-per-job shape.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::domain::contrarian::{compute_contrarian_signal, compute_symbol_targets};
use crate::domain::model::{CashBalance, Currency, PlannerSequence, Position, PortfolioHash, Side, Sleeve, TradeRecommendation};
use crate::domain::ports::MarketState;
use crate::domain::rebalance::{build_recommendations, PositionState, RebalanceInput};
use crate::domain::registry::PortfolioContext;
use crate::domain::repositories::RecordedTrade;

use super::deps::AppDeps;
use super::maintenance::{BackupDailyTask, BackupWeeklyTask};
use super::scheduler::{SchedulableTask, TaskError};

/// Recompute the portfolio hash from current repository state. The planner
/// and execution loop both key their work off this value.
pub async fn portfolio_hash_now(deps: &AppDeps) -> anyhow::Result<PortfolioHash> {
    let positions = deps.positions.get_all().await?;
    let actives = deps.stocks.get_all_active().await?;
    let active_symbols: Vec<String> = actives.iter().map(|s| s.symbol.clone()).collect();
    let cash = deps.cash_balances.get_all().await?;
    Ok(PortfolioHash::compute(&positions, &active_symbols, Some(&cash)))
}

/// Round-trip the broker for positions and cash balances and persist them.
/// Shared by the `sync:portfolio` task and the execution loop's post-trade
/// resync (§4.10 step 6).
pub async fn sync_portfolio(deps: &AppDeps) -> anyhow::Result<PortfolioHash> {
    let balances = deps.broker.get_cash_balances().await?;
    for balance in &balances {
        deps.cash_balances.set(*balance).await?;
    }

    let actives = deps.stocks.get_all_active().await?;
    let symbols: Vec<String> = actives.iter().map(|s| s.symbol.clone()).collect();
    if !symbols.is_empty() {
        let quotes = deps.broker.get_quotes(&symbols).await?;
        for security in &actives {
            if let Some(existing) = deps.positions.get(&security.symbol).await? {
                let mut updated = existing;
                if let Some(quote) = quotes.get(&security.symbol) {
                    updated.current_price = Some(quote.price);
                }
                deps.positions.upsert(updated).await?;
            }
        }
    }

    deps.event_bus
        .publish(crate::domain::events::TradingEvent::SyncComplete {
            resource: "portfolio".into(),
            duration_ms: 0,
        })
        .await;

    portfolio_hash_now(deps).await
}

/// Build the shared planning snapshot out of the repository layer —
/// securities, positions, the latest scores, and fx rates to EUR.
pub async fn build_portfolio_context(deps: &AppDeps) -> anyhow::Result<PortfolioContext> {
    let securities = deps.stocks.get_all_active().await?;
    let positions = deps.positions.get_all().await?;
    let scores = deps.scores.get_all_latest().await?;
    let security_scores: HashMap<String, f64> =
        scores.into_iter().map(|s| (s.symbol, s.total_score)).collect();

    let mut exchange_rates_to_eur = HashMap::new();
    for currency in [Currency::Usd, Currency::Gbp, Currency::Hkd] {
        if let Some(rate) = deps.currency_router.get_rate(currency, Currency::Eur).await {
            exchange_rates_to_eur.insert(currency, rate.to_f64().unwrap_or(1.0));
        }
    }

    Ok(PortfolioContext {
        securities,
        positions,
        security_scores,
        exchange_rates_to_eur,
        ..Default::default()
    })
}

/// Run the full per-symbol rebalance engine: contrarian signal -> target
/// weight -> state machine -> lot-sized, cash-reconciled recommendation.
///
/// This is a second, allocation-driven view of the portfolio alongside the
/// opportunity-registry/planner pipeline that actually drives `trading:execute`;
/// it surfaces what the target-weight engine would do without submitting
/// orders itself, so the two sizing strategies never race for the same cash.
pub async fn compute_rebalance_recommendations(
    deps: &AppDeps,
    ctx: &PortfolioContext,
    available_cash_eur: f64,
) -> anyhow::Result<Vec<TradeRecommendation>> {
    let mut signals = HashMap::new();
    let mut multipliers = HashMap::new();
    for security in &ctx.securities {
        let bars = deps
            .price_provider
            .get_historical_prices(&security.symbol, security.yahoo_symbol.as_deref(), 400)
            .await
            .unwrap_or_default();
        let closes: Vec<f64> = bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect();
        signals.insert(security.symbol.clone(), compute_contrarian_signal(&closes));
        multipliers.insert(security.symbol.clone(), security.priority_multiplier.to_f64().unwrap_or(1.0));
    }

    let (targets, sleeves) =
        compute_symbol_targets(&signals, &multipliers, deps.config.strategy.target_builder_params());

    let positions_eur = positions_value_eur(&ctx.positions);
    let total_value_eur = positions_eur.values().sum::<f64>() + available_cash_eur;

    let mut inputs = Vec::new();
    for security in &ctx.securities {
        let Some(&target_allocation) = targets.get(&security.symbol) else {
            continue;
        };
        let position = ctx.position_for(&security.symbol).cloned();
        let price = position.as_ref().and_then(|p| p.current_price).unwrap_or(Decimal::ZERO);
        if price <= Decimal::ZERO {
            continue;
        }
        let signal = signals.get(&security.symbol).copied().unwrap_or_default();
        let fx_rate = ctx.exchange_rates_to_eur.get(&security.currency).copied().unwrap_or(1.0);
        let fx_to_eur = Decimal::try_from(fx_rate).unwrap_or(Decimal::ONE);
        let position_age_days = position
            .as_ref()
            .and_then(|p| p.first_bought_at)
            .map(|t| (Utc::now() - t).num_days())
            .unwrap_or(0);
        let sleeve = sleeves.get(&security.symbol).copied().unwrap_or(Sleeve::Opportunity);

        inputs.push(RebalanceInput {
            security: security.clone(),
            position,
            target_allocation,
            sleeve,
            contrarian_score: signal.opp_score,
            dd252: signal.dd252,
            mom20: signal.mom20,
            mom60: signal.mom60,
            price,
            fx_to_eur,
            position_age_days,
            state: PositionState::default(),
            is_core_holding: sleeve == Sleeve::Core,
        });
    }

    let recommendations = build_recommendations(
        &inputs,
        total_value_eur,
        available_cash_eur,
        deps.config.strategy.rebalance_params(),
        deps.config.strategy.state_machine_params(),
    );

    deps.event_bus
        .publish(crate::domain::events::TradingEvent::RebalanceComplete {
            recommendation_count: recommendations.len(),
        })
        .await;

    Ok(recommendations)
}

fn total_cash_eur(cash: &[CashBalance], rates: &HashMap<Currency, f64>) -> f64 {
    cash.iter()
        .map(|c| {
            let rate = if c.currency == Currency::Eur {
                1.0
            } else {
                rates.get(&c.currency).copied().unwrap_or(1.0)
            };
            c.amount.to_f64().unwrap_or(0.0) * rate
        })
        .sum()
}

/// Tradernet-style symbols carry their market as a dot-suffix (`AAPL.US`);
/// bare tickers have no known exchange and the market-hours check is
/// skipped for them (fail-open, per C4).
pub(super) fn exchange_suffix(symbol: &str) -> Option<String> {
    symbol.rsplit_once('.').map(|(_, suffix)| suffix.to_string())
}

fn positions_value_eur(positions: &[Position]) -> HashMap<String, f64> {
    positions
        .iter()
        .filter(|p| p.is_present())
        .filter_map(|p| p.market_value_eur.map(|v| (p.symbol.clone(), v.to_f64().unwrap_or(0.0))))
        .collect()
}

pub struct SyncPortfolioTask;
#[async_trait]
impl SchedulableTask for SyncPortfolioTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        sync_portfolio(deps).await.map_err(TaskError::Other)?;
        Ok(())
    }
}

/// Must clear the analysis cache before fetching new prices — an
/// ordering-sensitive invariant from §4.11.
pub struct SyncPricesTask;
#[async_trait]
impl SchedulableTask for SyncPricesTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        deps.settings.set("analysis_cache_cleared_at", &Utc::now().to_rfc3339()).await.map_err(TaskError::Other)?;

        let actives = deps.stocks.get_all_active().await.map_err(TaskError::Other)?;
        let symbols: Vec<String> = actives.iter().map(|s| s.symbol.clone()).collect();
        if symbols.is_empty() {
            return Ok(());
        }
        let bulk = deps
            .broker
            .get_historical_prices_bulk(&symbols, 1)
            .await
            .map_err(TaskError::Other)?;
        deps.event_bus
            .publish(crate::domain::events::TradingEvent::SyncComplete {
                resource: "prices".into(),
                duration_ms: bulk.len() as i64,
            })
            .await;
        Ok(())
    }
}

pub struct SyncQuotesTask;
#[async_trait]
impl SchedulableTask for SyncQuotesTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let actives = deps.stocks.get_all_active().await.map_err(TaskError::Other)?;
        let symbols: Vec<String> = actives.iter().map(|s| s.symbol.clone()).collect();
        if symbols.is_empty() {
            return Ok(());
        }
        let quotes = deps.broker.get_quotes(&symbols).await.map_err(TaskError::Other)?;
        deps.event_bus
            .publish(crate::domain::events::TradingEvent::SyncComplete {
                resource: "quotes".into(),
                duration_ms: quotes.len() as i64,
            })
            .await;
        Ok(())
    }
}

pub struct SyncMetadataTask;
#[async_trait]
impl SchedulableTask for SyncMetadataTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let actives = deps.stocks.get_all_active().await.map_err(TaskError::Other)?;
        for security in actives {
            if let Some(info) = deps
                .broker
                .get_security_info(&security.symbol)
                .await
                .map_err(TaskError::Other)?
            {
                let mut updated = security.clone();
                updated.min_lot = info.min_lot;
                updated.isin = info.isin;
                updated.last_synced = Some(Utc::now());
                deps.stocks
                    .update(&security.symbol, updated)
                    .await
                    .map_err(TaskError::Other)?;
            }
        }
        Ok(())
    }
}

pub struct SyncExchangeRatesTask;
#[async_trait]
impl SchedulableTask for SyncExchangeRatesTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        for currency in [Currency::Usd, Currency::Gbp, Currency::Hkd] {
            let _ = deps.currency_router.get_rate(currency, Currency::Eur).await;
        }
        Ok(())
    }
}

pub struct SyncTradesTask;
#[async_trait]
impl SchedulableTask for SyncTradesTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let since = Utc::now() - chrono::Duration::days(7);
        let broker_trades = deps.broker.get_trades_history(since).await.map_err(TaskError::Other)?;
        let mut new_count = 0;
        let mut skipped_count = 0;
        for trade in broker_trades {
            let currency = deps
                .stocks
                .get_by_symbol(&trade.symbol)
                .await
                .map_err(TaskError::Other)?
                .map(|s| s.currency)
                .unwrap_or(Currency::Eur);
            let inserted = deps
                .trades
                .record(RecordedTrade {
                    broker_trade_id: trade.broker_trade_id,
                    symbol: trade.symbol,
                    side: trade.side,
                    quantity: trade.quantity,
                    price: trade.price,
                    currency,
                    executed_at: trade.executed_at,
                    commission: trade.commission,
                })
                .await
                .map_err(TaskError::Other)?;
            if inserted {
                new_count += 1;
            } else {
                skipped_count += 1;
            }
        }
        deps.event_bus
            .publish(crate::domain::events::TradingEvent::TradeSyncComplete { new_count, skipped_count })
            .await;
        Ok(())
    }
}

pub struct SyncCashflowsTask;
#[async_trait]
impl SchedulableTask for SyncCashflowsTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let since = Utc::now() - chrono::Duration::days(30);
        let flows = deps.broker.get_cash_flows(since).await.map_err(TaskError::Other)?;
        deps.event_bus
            .publish(crate::domain::events::TradingEvent::CashFlowSyncComplete {
                new_count: flows.len(),
                skipped_count: 0,
            })
            .await;
        Ok(())
    }
}

/// Dividends are a subset of cash flows filtered by `type_id`; this task
/// reuses the cash-flow broker call rather than a separate wire operation.
pub struct SyncDividendsTask;
#[async_trait]
impl SchedulableTask for SyncDividendsTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let flows = deps.broker.get_all_cash_flows(500).await.map_err(TaskError::Other)?;
        let dividends = flows.iter().filter(|f| f.type_id == "dividend").count();
        info!(dividends, "dividend cash flows observed");
        Ok(())
    }
}

pub struct SnapshotBackfillTask;
#[async_trait]
impl SchedulableTask for SnapshotBackfillTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let hash = portfolio_hash_now(deps).await.map_err(TaskError::Other)?;
        deps.settings
            .set("last_snapshot_hash", &hash.0)
            .await
            .map_err(TaskError::Other)?;
        Ok(())
    }
}

pub struct AggregateComputeTask;
#[async_trait]
impl SchedulableTask for AggregateComputeTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let positions = deps.positions.get_all().await.map_err(TaskError::Other)?;
        let rates = {
            let mut map = HashMap::new();
            for currency in [Currency::Usd, Currency::Gbp, Currency::Hkd] {
                if let Some(rate) = deps.currency_router.get_rate(currency, Currency::Eur).await {
                    map.insert(currency, rate.to_f64().unwrap_or(1.0));
                }
            }
            map
        };
        let cash = deps.cash_balances.get_all().await.map_err(TaskError::Other)?;
        let total = positions_value_eur(&positions).values().sum::<f64>() + total_cash_eur(&cash, &rates);
        deps.settings
            .set("last_total_portfolio_value_eur", &total.to_string())
            .await
            .map_err(TaskError::Other)?;
        Ok(())
    }
}

pub struct ScoringCalculateTask;
#[async_trait]
impl SchedulableTask for ScoringCalculateTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let actives = deps.stocks.get_all_active().await.map_err(TaskError::Other)?;
        for security in actives {
            let fundamentals = deps
                .price_provider
                .get_fundamentals(&security.symbol)
                .await
                .unwrap_or_default();
            let fundamentals_score = fundamentals.financial_strength.unwrap_or(0.5).clamp(0.0, 1.0);
            let score = crate::domain::model::Score {
                symbol: security.symbol.clone(),
                calculated_at: Utc::now(),
                total_score: fundamentals_score,
                long_term: fundamentals_score,
                fundamentals: fundamentals_score,
                opportunity: 0.5,
                opinion: 0.5,
                diversification: 0.5,
            };
            deps.event_bus
                .publish(crate::domain::events::TradingEvent::ScoreCalculated {
                    symbol: security.symbol.clone(),
                    total_score: score.total_score,
                })
                .await;
            deps.scores.save(score).await.map_err(TaskError::Other)?;
        }
        Ok(())
    }
}

pub struct TradingCheckMarketsTask;
#[async_trait]
impl SchedulableTask for TradingCheckMarketsTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let statuses = deps.broker.get_market_status().await.map_err(TaskError::Other)?;
        for entry in &statuses {
            let event = match entry.state {
                MarketState::Open => Some(crate::domain::events::TradingEvent::MarketOpened {
                    exchange: entry.exchange_id.clone(),
                }),
                MarketState::Closed => Some(crate::domain::events::TradingEvent::MarketClosed {
                    exchange: entry.exchange_id.clone(),
                }),
                MarketState::Unknown => None,
            };
            if let Some(event) = event {
                deps.event_bus.publish(event).await;
            }
        }
        deps.market_oracle.refresh(statuses).await;
        Ok(())
    }
}

/// Research mode logs would-be trades; live mode executes sells before
/// buys, each side ordered by priority, restricted to symbols whose
/// exchange is currently open.
pub struct TradingExecuteTask;
#[async_trait]
impl SchedulableTask for TradingExecuteTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let hash = portfolio_hash_now(deps).await.map_err(TaskError::Other)?;
        let best = deps.planner.get_best_result(&hash).await.map_err(TaskError::Other)?;
        let Some(sequence) = best else { return Ok(()) };

        let mut actions = sequence.actions.clone();
        actions.sort_by(|a, b| {
            let side_rank = |s: Side| if s == Side::Sell { 0 } else { 1 };
            side_rank(a.side)
                .cmp(&side_rank(b.side))
                .then(b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal))
        });

        let is_live = matches!(deps.config.strategy.trading_mode, crate::config::strategy_config::TradingMode::Live);

        for action in actions {
            if !is_live {
                info!(symbol = %action.symbol, side = ?action.side, qty = action.quantity, "would-be trade (research mode)");
                continue;
            }

            if let Some(exchange) = exchange_suffix(&action.symbol) {
                if deps.market_oracle.should_check_market_hours(&exchange, action.side)
                    && !deps.market_oracle.is_market_open(&exchange).await
                {
                    continue;
                }
            }

            deps.broker
                .place_order(&action.symbol, action.side, action.quantity)
                .await
                .map_err(TaskError::Other)?;
        }
        Ok(())
    }
}

/// Drives the rebalance opportunity calculators and the planner's
/// incremental evaluation for the current portfolio hash.
pub struct TradingRebalanceTask;
#[async_trait]
impl SchedulableTask for TradingRebalanceTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let ctx = build_portfolio_context(deps).await.map_err(TaskError::Other)?;
        let hash = portfolio_hash_now(deps).await.map_err(TaskError::Other)?;
        let cash = deps.cash_balances.get_all().await.map_err(TaskError::Other)?;
        let available_cash_eur = total_cash_eur(&cash, &ctx.exchange_rates_to_eur);

        let registry = &deps.config.registry;
        let opportunities = registry.enabled_opportunities();
        let patterns = registry.enabled_patterns();
        let sequence_generators = registry.enabled_sequence_generators();
        let filters = registry.enabled_filters();

        deps.planner
            .ensure_sequences(&hash, &ctx, available_cash_eur, &opportunities, &patterns, &sequence_generators, &filters)
            .await
            .map_err(TaskError::Other)?;

        let positions_eur = positions_value_eur(&ctx.positions);
        let total_value_eur = positions_eur.values().sum::<f64>() + available_cash_eur;
        let metrics_cache = HashMap::new();
        let inputs = crate::domain::planner::EndStateInputs {
            total_value_eur,
            diversification_score: 0.5,
            metrics_cache: &metrics_cache,
            opinion_score: 0.5,
        };

        loop {
            let progress = deps
                .planner
                .evaluate_batch(&hash, &positions_eur, &inputs, false)
                .await
                .map_err(TaskError::Other)?;
            tokio::task::yield_now().await;
            if progress.is_finished {
                break;
            }
        }
        Ok(())
    }
}

/// Runs the target-allocation rebalance engine and logs its recommendations.
/// Advisory only: `trading:execute` places orders from the planner's
/// opportunity-driven sequences, not from this task's output.
pub struct TradingRebalanceTargetsTask;
#[async_trait]
impl SchedulableTask for TradingRebalanceTargetsTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let ctx = build_portfolio_context(deps).await.map_err(TaskError::Other)?;
        let cash = deps.cash_balances.get_all().await.map_err(TaskError::Other)?;
        let available_cash_eur = total_cash_eur(&cash, &ctx.exchange_rates_to_eur);

        let recommendations = compute_rebalance_recommendations(deps, &ctx, available_cash_eur)
            .await
            .map_err(TaskError::Other)?;

        for rec in &recommendations {
            info!(
                symbol = %rec.symbol,
                side = ?rec.side,
                quantity = rec.quantity,
                reason_code = %rec.reason_code,
                "rebalance target recommendation"
            );
        }
        Ok(())
    }
}

/// Resolves every negative balance — EUR included — by converting from
/// positive balances, preferring EUR as the source; blocks when the source
/// balance is itself negative. Grounded in `sentinel/jobs/tasks.py`'s
/// `trading_balance_fix` (negative/positive partition, per-deficit source
/// loop); each conversion is placed for real via
/// `CurrencyRouter::ensure_balance`, which now drives an actual broker order
/// instead of only recording an event.
pub struct TradingBalanceFixTask;
#[async_trait]
impl SchedulableTask for TradingBalanceFixTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let balances = deps.cash_balances.get_all().await.map_err(TaskError::Other)?;

        let mut positive: HashMap<Currency, Decimal> = HashMap::new();
        let mut negative: Vec<(Currency, Decimal)> = Vec::new();
        for b in &balances {
            if b.amount > Decimal::ZERO {
                positive.insert(b.currency, b.amount);
            } else if b.amount < Decimal::ZERO {
                negative.push((b.currency, b.amount));
            }
        }

        if negative.is_empty() || positive.is_empty() {
            return Ok(());
        }

        for (target_currency, neg_amount) in negative {
            // Target is always the negative currency itself (EUR included);
            // prefer EUR as the source, then fall back to other positives.
            let mut sources: Vec<Currency> = positive
                .iter()
                .filter(|(currency, amount)| **currency != target_currency && **amount > Decimal::ZERO)
                .map(|(currency, _)| *currency)
                .collect();
            sources.sort_by_key(|c| if *c == Currency::Eur { 0 } else { 1 });

            for source_currency in sources {
                let source_balance = *positive.get(&source_currency).unwrap_or(&Decimal::ZERO);
                if source_balance <= Decimal::ZERO {
                    continue;
                }

                let rate = deps
                    .currency_router
                    .get_rate(source_currency, target_currency)
                    .await
                    .unwrap_or(Decimal::ONE);

                match deps
                    .currency_router
                    .ensure_balance(
                        deps.broker.as_ref(),
                        target_currency,
                        Decimal::ZERO,
                        source_currency,
                        neg_amount,
                        source_balance,
                    )
                    .await
                {
                    Ok(true) => {
                        deps.event_bus
                            .publish(crate::domain::events::TradingEvent::CurrencyExchanged {
                                from: source_currency,
                                to: target_currency,
                                amount: -neg_amount,
                                rate,
                            })
                            .await;
                        // This run's source is spent; later deficits in the
                        // same run fall back to the next positive currency
                        // rather than over-allocating it before the next sync.
                        positive.remove(&source_currency);
                        break;
                    }
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(
                            target = %target_currency,
                            source = %source_currency,
                            error = %err,
                            "balance fix conversion failed"
                        );
                        deps.event_bus
                            .publish(crate::domain::events::TradingEvent::CurrencyExchangeFailed {
                                from: source_currency,
                                to: target_currency,
                                error: err.to_string(),
                            })
                            .await;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Refreshes the planner's evaluation for the current hash — the scheduled
/// counterpart to the planner's own API-driven self-trigger.
pub struct PlanningRefreshTask;
#[async_trait]
impl SchedulableTask for PlanningRefreshTask {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        TradingRebalanceTask.run(deps).await
    }
}

/// Uploads the most recent local archive. The network target is an
/// external collaborator (§1); this task only drives the scheduling slot.
pub struct BackupR2Task;
#[async_trait]
impl SchedulableTask for BackupR2Task {
    async fn run(&self, deps: &AppDeps) -> Result<(), TaskError> {
        let archive_dir = deps.config.data_dir.join("backups");
        let Ok(mut entries) = tokio::fs::read_dir(&archive_dir).await else {
            return Ok(());
        };
        let mut latest: Option<std::path::PathBuf> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                latest = Some(path);
            }
        }
        if let Some(path) = latest {
            deps.backup_uploader.upload(&path).await.map_err(TaskError::Other)?;
        }
        Ok(())
    }
}

/// Per-ML-enabled-symbol retrain/monitor tasks. ML training itself is an
/// external analytics collaborator (§1's non-goals); these exist only so
/// the scheduler's job_type naming scheme stays complete.
pub struct MlRetrainTask {
    pub symbol: String,
}
#[async_trait]
impl SchedulableTask for MlRetrainTask {
    async fn run(&self, _deps: &AppDeps) -> Result<(), TaskError> {
        info!(symbol = %self.symbol, "ml:retrain is a stub; model training is an external collaborator");
        Ok(())
    }
}

pub struct MlMonitorTask {
    pub symbol: String,
}
#[async_trait]
impl SchedulableTask for MlMonitorTask {
    async fn run(&self, _deps: &AppDeps) -> Result<(), TaskError> {
        info!(symbol = %self.symbol, "ml:monitor is a stub; model monitoring is an external collaborator");
        Ok(())
    }
}

/// Build the full normative task registry (§4.11), wired against whatever
/// ML-enabled symbols are currently active.
pub async fn build_task_registry(
    deps: &Arc<AppDeps>,
) -> anyhow::Result<super::scheduler::TaskRegistry> {
    let mut registry: super::scheduler::TaskRegistry = HashMap::new();

    registry.insert("sync:portfolio", job(SyncPortfolioTask, &[]));
    registry.insert("sync:prices", job(SyncPricesTask, &[]));
    registry.insert("sync:quotes", job(SyncQuotesTask, &[]));
    registry.insert("sync:metadata", job(SyncMetadataTask, &[]));
    registry.insert("sync:exchange_rates", job(SyncExchangeRatesTask, &[]));
    registry.insert("sync:trades", job(SyncTradesTask, &[]));
    registry.insert("sync:cashflows", job(SyncCashflowsTask, &[]));
    registry.insert("sync:dividends", job(SyncDividendsTask, &[]));
    registry.insert("snapshot:backfill", job(SnapshotBackfillTask, &["sync:portfolio"]));
    registry.insert("aggregate:compute", job(AggregateComputeTask, &["sync:portfolio"]));
    registry.insert("scoring:calculate", job(ScoringCalculateTask, &["sync:prices"]));
    registry.insert("trading:check_markets", job(TradingCheckMarketsTask, &[]));
    registry.insert("trading:execute", job(TradingExecuteTask, &["trading:rebalance"]));
    registry.insert("trading:rebalance", job(TradingRebalanceTask, &["sync:portfolio", "scoring:calculate"]));
    registry.insert(
        "trading:rebalance_targets",
        job(TradingRebalanceTargetsTask, &["sync:portfolio", "sync:prices"]),
    );
    registry.insert("trading:balance_fix", job(TradingBalanceFixTask, &["sync:portfolio"]));
    registry.insert("planning:refresh", job(PlanningRefreshTask, &["sync:portfolio"]));
    registry.insert("backup:r2", job(BackupR2Task, &[]));
    registry.insert("backup:daily", job(BackupDailyTask, &[]));
    registry.insert("backup:weekly", job(BackupWeeklyTask, &[]));

    let actives = deps.stocks.get_all_active().await?;
    for security in actives.iter().filter(|s| s.ml_enabled) {
        let retrain_name: &'static str = Box::leak(format!("ml:retrain:{}", security.symbol).into_boxed_str());
        let monitor_name: &'static str = Box::leak(format!("ml:monitor:{}", security.symbol).into_boxed_str());
        registry.insert(retrain_name, job(MlRetrainTask { symbol: security.symbol.clone() }, &[]));
        registry.insert(monitor_name, job(MlMonitorTask { symbol: security.symbol.clone() }, &[]));
    }

    Ok(registry)
}

fn job(task: impl SchedulableTask + 'static, dependencies: &'static [&'static str]) -> super::scheduler::JobSpec {
    super::scheduler::JobSpec { task: Arc::new(task), dependencies }
}

fn _use_planner_sequence_type(_: &PlannerSequence) {}
