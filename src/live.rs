//! Polling live trader
//!
//! One cycle per interval. While flat the trader scores every candidate
//! symbol and buys the best one with a positive score; while long it watches
//! only the held symbol and sells when the last closed candle carries a sell
//! signal. The held position is persisted so a restart resumes it.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::data::{MarketDataSource, SymbolScreener};
use crate::execution::{OrderRequest, OrderSink};
use crate::state_manager::{HeldPosition, SqliteStateManager, TradeRecord};
use crate::strategy::{SignalFrame, TrendStrategy};
use crate::{Position, Side, Symbol};

/// Trading parameters of the live loop
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSettings {
    pub timeframe: String,
    pub trade_amount: f64,
    pub fee_rate: f64,
    pub quote_currency: String,
    /// Fixed candidate list; empty means screen the exchange
    pub symbols: Vec<Symbol>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub eval_candles: usize,
    pub candle_limit: usize,
}

impl LiveSettings {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.trading;
        Self {
            timeframe: t.timeframe.clone(),
            trade_amount: t.trade_amount,
            fee_rate: config.exchange.fee_rate,
            quote_currency: config.exchange.quote_currency.clone(),
            symbols: t.symbols.iter().map(Symbol::new).collect(),
            min_price: t.min_price,
            max_price: t.max_price,
            eval_candles: t.eval_candles,
            candle_limit: t.candle_limit,
        }
    }
}

/// What a cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Bought {
        symbol: Symbol,
        price: f64,
        quantity: f64,
        score: f64,
    },
    Sold {
        symbol: Symbol,
        price: f64,
        profit_pct: f64,
    },
    Holding {
        symbol: Symbol,
    },
    /// Flat and nothing scored above zero
    NoCandidate,
}

pub struct LiveTrader {
    source: Arc<dyn MarketDataSource>,
    screener: Option<Arc<dyn SymbolScreener>>,
    sink: Box<dyn OrderSink>,
    state: SqliteStateManager,
    strategy: TrendStrategy,
    settings: LiveSettings,
    position: Option<HeldPosition>,
}

impl LiveTrader {
    /// Build a trader, resuming any position stored in `state`
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        screener: Option<Arc<dyn SymbolScreener>>,
        sink: Box<dyn OrderSink>,
        state: SqliteStateManager,
        strategy: TrendStrategy,
        settings: LiveSettings,
    ) -> Result<Self> {
        if settings.symbols.is_empty() && screener.is_none() {
            bail!("No candidate symbols configured and no symbol screener available");
        }

        let position = state.load_position()?;
        if let Some(pos) = &position {
            info!(
                "Resuming position: {} qty={:.6} @ {:.8}",
                pos.symbol, pos.quantity, pos.entry_price
            );
        }

        Ok(Self {
            source,
            screener,
            sink,
            state,
            strategy,
            settings,
            position,
        })
    }

    pub fn position(&self) -> Option<&HeldPosition> {
        self.position.as_ref()
    }

    pub fn state(&self) -> &SqliteStateManager {
        &self.state
    }

    /// Quote balance reported by the order sink
    pub async fn quote_balance(&self) -> Result<f64> {
        self.sink.quote_balance().await
    }

    async fn analyze_symbol(&self, symbol: &Symbol) -> Result<SignalFrame> {
        let candles = self
            .source
            .fetch_candles(symbol, &self.settings.timeframe, self.settings.candle_limit)
            .await
            .with_context(|| format!("Failed to fetch candles for {}", symbol))?;
        let frame = self
            .strategy
            .analyze(&candles)
            .with_context(|| format!("Failed to analyze {}", symbol))?;
        Ok(frame)
    }

    async fn candidates(&self) -> Result<Vec<Symbol>> {
        if !self.settings.symbols.is_empty() {
            return Ok(self.settings.symbols.clone());
        }
        match &self.screener {
            Some(screener) => {
                screener
                    .screen_symbols(
                        &self.settings.quote_currency,
                        self.settings.min_price,
                        self.settings.max_price,
                    )
                    .await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Run one polling cycle
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        match self.position.clone() {
            None => self.scan_and_buy().await,
            Some(pos) => self.check_exit(pos).await,
        }
    }

    async fn scan_and_buy(&mut self) -> Result<CycleOutcome> {
        let candidates = self.candidates().await?;
        info!("Scanning {} candidate symbols", candidates.len());

        let mut scored = Vec::with_capacity(candidates.len());
        for symbol in candidates {
            let frame = match self.analyze_symbol(&symbol).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping {}: {:#}", symbol, e);
                    continue;
                }
            };
            let Some(last) = frame.rows().last() else {
                debug!("Skipping {}: not enough candles for indicators", symbol);
                continue;
            };
            if let Some(score) = self
                .strategy
                .performance_score(&frame, self.settings.eval_candles)
            {
                debug!("{} score {:.4}", symbol, score);
                scored.push((symbol, score, last.candle.close));
            }
        }

        let best = scored
            .into_iter()
            .max_by_key(|(_, score, _)| OrderedFloat(*score));

        let Some((symbol, score, price)) = best.filter(|(_, score, _)| *score > 0.0) else {
            info!("No candidate with a positive score");
            return Ok(CycleOutcome::NoCandidate);
        };

        let balance = self.sink.quote_balance().await?;
        if balance < self.settings.trade_amount {
            warn!(
                "Insufficient {} balance ({:.2}) for trade amount {:.2}",
                self.settings.quote_currency, balance, self.settings.trade_amount
            );
            return Ok(CycleOutcome::NoCandidate);
        }

        let order = OrderRequest {
            symbol: symbol.clone(),
            side: Side::Buy,
            quantity: self.settings.trade_amount / price,
            reference_price: price,
        };
        let fill = self.sink.submit(&order).await?;

        // Same account model as the backtest: the fee is taken out of the
        // base quantity received
        let entry = Position::open(
            fill.quantity * fill.price,
            self.settings.fee_rate,
            fill.price,
            fill.time,
        );
        let position = HeldPosition::from_position(symbol.clone(), &entry, fill.order_id);
        self.state.save_position(&position)?;
        self.position = Some(position);

        info!(
            symbol = %symbol,
            price = fill.price,
            quantity = entry.size,
            cost = entry.cost,
            score,
            "BUY"
        );

        Ok(CycleOutcome::Bought {
            symbol,
            price: fill.price,
            quantity: entry.size,
            score,
        })
    }

    async fn check_exit(&mut self, pos: HeldPosition) -> Result<CycleOutcome> {
        let frame = self.analyze_symbol(&pos.symbol).await?;

        let sell = frame.last_closed().is_some_and(|row| row.sell_signal);
        let Some(last) = frame.rows().last().filter(|_| sell) else {
            debug!("Holding {}", pos.symbol);
            return Ok(CycleOutcome::Holding { symbol: pos.symbol });
        };

        let order = OrderRequest {
            symbol: pos.symbol.clone(),
            side: Side::Sell,
            quantity: pos.quantity,
            reference_price: last.candle.close,
        };
        let fill = self.sink.submit(&order).await?;

        let (_, trade) = pos
            .position()
            .close(fill.price, fill.time, self.settings.fee_rate);
        let profit_pct = trade.profit_pct;

        self.state.record_trade(&TradeRecord {
            id: None,
            symbol: pos.symbol.clone(),
            quantity: fill.quantity,
            entry_price: trade.entry_price,
            exit_price: trade.exit_price,
            entry_time: trade.entry_time,
            exit_time: trade.exit_time,
            profit_amount: trade.profit_amount,
            profit_pct,
            simulated: fill.simulated,
        })?;
        self.state.clear_position()?;
        self.position = None;

        info!(
            symbol = %pos.symbol,
            price = fill.price,
            profit_pct,
            "SELL"
        );

        Ok(CycleOutcome::Sold {
            symbol: pos.symbol,
            price: fill.price,
            profit_pct,
        })
    }

    /// Run cycles every `interval` until `shutdown` resolves.
    /// A failed cycle is logged and retried on the next tick.
    pub async fn run<S>(&mut self, interval: Duration, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut cycle: u64 = 0;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} cycles", cycle);
                    break;
                }
                _ = ticker.tick() => {
                    cycle += 1;
                    debug!("Cycle {} at {}", cycle, Utc::now());
                    if let Err(e) = self.run_cycle().await {
                        error!("Cycle {} failed: {:#}", cycle, e);
                    }
                }
            }
        }

        if let Some(pos) = &self.position {
            info!("Still holding {} (persisted)", pos.symbol);
        }
        let trades = self.state.load_trades()?;
        info!(
            "Closed trades: {} | total profit {:.2}",
            trades.len(),
            trades.iter().map(|t| t.profit_amount).sum::<f64>()
        );
        match self.quote_balance().await {
            Ok(balance) => info!("{} balance: {:.2}", self.settings.quote_currency, balance),
            Err(e) => warn!("Could not read {} balance: {:#}", self.settings.quote_currency, e),
        }
        Ok(())
    }

    /// Symbols ranked by score, best first (diagnostics for the CLI)
    pub async fn rank_candidates(&self) -> Result<Vec<(Symbol, f64)>> {
        let mut ranked = Vec::new();
        for symbol in self.candidates().await? {
            if let Ok(frame) = self.analyze_symbol(&symbol).await {
                if let Some(score) = self
                    .strategy
                    .performance_score(&frame, self.settings.eval_candles)
                {
                    ranked.push((symbol, score));
                }
            }
        }
        Ok(ranked
            .into_iter()
            .sorted_by_key(|(_, score)| std::cmp::Reverse(OrderedFloat(*score)))
            .collect())
    }
}
