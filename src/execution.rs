//! Order execution
//!
//! The live trader talks to an [`OrderSink`]; configuration decides whether
//! that is the paper sink (dry run) or the signed Binance sink.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::binance::types::{format_quantity, OrderResponse};
use crate::binance::BinanceClient;
use crate::{Side, Symbol};

/// Decimal places used when formatting live order quantities
pub const DEFAULT_QUANTITY_DECIMALS: u32 = 5;

const HOLDING_TOLERANCE: f64 = 1e-9;

/// Market order intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    /// Base-asset units
    pub quantity: f64,
    /// Last known price, used by the paper sink and for logging
    pub reference_price: f64,
}

impl OrderRequest {
    pub fn notional(&self) -> f64 {
        self.quantity * self.reference_price
    }
}

/// Executed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub time: DateTime<Utc>,
    pub order_id: Option<String>,
    pub simulated: bool,
}

#[async_trait]
pub trait OrderSink: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(&mut self, order: &OrderRequest) -> Result<OrderFill>;

    /// Quote balance available for new entries
    async fn quote_balance(&self) -> Result<f64>;
}

/// Fills immediately at the reference price without contacting an exchange.
///
/// Fees follow the backtest account model: a buy pays the full notional and
/// the fee is taken out of the base quantity received, a sell is credited
/// the notional minus the fee.
#[derive(Debug, Clone)]
pub struct PaperOrderSink {
    balance: f64,
    fee_rate: f64,
    holdings: HashMap<Symbol, f64>,
    fills: Vec<OrderFill>,
}

impl PaperOrderSink {
    pub fn new(initial_balance: f64, fee_rate: f64) -> Self {
        Self {
            balance: initial_balance,
            fee_rate,
            holdings: HashMap::new(),
            fills: Vec::new(),
        }
    }

    pub fn fills(&self) -> &[OrderFill] {
        &self.fills
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Base units held for `symbol`, net of entry fees
    pub fn holding(&self, symbol: &Symbol) -> f64 {
        self.holdings.get(symbol).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl OrderSink for PaperOrderSink {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit(&mut self, order: &OrderRequest) -> Result<OrderFill> {
        if !(order.quantity > 0.0 && order.reference_price > 0.0) {
            bail!(
                "Invalid order: quantity {} at {}",
                order.quantity,
                order.reference_price
            );
        }

        let notional = order.notional();
        let fee = notional * self.fee_rate;
        match order.side {
            Side::Buy => {
                if notional > self.balance {
                    bail!(
                        "Insufficient virtual balance: need {:.2}, have {:.2}",
                        notional,
                        self.balance
                    );
                }
                self.balance -= notional;
                *self.holdings.entry(order.symbol.clone()).or_insert(0.0) +=
                    order.quantity * (1.0 - self.fee_rate);
            }
            Side::Sell => {
                let held = self.holding(&order.symbol);
                if order.quantity > held + HOLDING_TOLERANCE {
                    // position resumed from state this sink never bought
                    warn!(
                        "[DRY RUN] selling {} {} with only {} held virtually",
                        order.quantity, order.symbol, held
                    );
                }
                let remaining = held - order.quantity;
                if remaining > HOLDING_TOLERANCE {
                    self.holdings.insert(order.symbol.clone(), remaining);
                } else {
                    self.holdings.remove(&order.symbol);
                }
                self.balance += notional - fee;
            }
        }

        info!(
            "[DRY RUN] {} {} {} @ {:.8} (virtual balance {:.2})",
            order.side, order.quantity, order.symbol, order.reference_price, self.balance
        );

        let fill = OrderFill {
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            price: order.reference_price,
            time: Utc::now(),
            order_id: None,
            simulated: true,
        };
        self.fills.push(fill.clone());
        Ok(fill)
    }

    async fn quote_balance(&self) -> Result<f64> {
        Ok(self.balance)
    }
}

/// Signed MARKET orders on Binance
#[derive(Debug, Clone)]
pub struct BinanceOrderSink {
    client: BinanceClient,
    quote_currency: String,
    quantity_decimals: u32,
}

impl BinanceOrderSink {
    pub fn new(client: BinanceClient, quote_currency: impl Into<String>) -> Result<Self> {
        if !client.has_credentials() {
            bail!("Live trading requires EXCHANGE_API_KEY and EXCHANGE_API_SECRET");
        }
        Ok(Self {
            client,
            quote_currency: quote_currency.into(),
            quantity_decimals: DEFAULT_QUANTITY_DECIMALS,
        })
    }

    pub fn with_quantity_decimals(mut self, decimals: u32) -> Self {
        self.quantity_decimals = decimals;
        self
    }
}

#[async_trait]
impl OrderSink for BinanceOrderSink {
    fn name(&self) -> &str {
        "binance"
    }

    async fn submit(&mut self, order: &OrderRequest) -> Result<OrderFill> {
        let quantity = format_quantity(order.quantity, self.quantity_decimals)?;
        info!(
            "Order request: {} {} {} (reference price {:.8})",
            order.side, quantity, order.symbol, order.reference_price
        );

        let response = self
            .client
            .place_market_order(&order.symbol.file_stem(), order.side, quantity)
            .await
            .with_context(|| format!("{} order for {} failed", order.side, order.symbol))?;

        fill_from_response(order, &response)
    }

    async fn quote_balance(&self) -> Result<f64> {
        self.client.get_free_balance(&self.quote_currency).await
    }
}

/// Turn an exchange order response into a fill; an unparsable or empty
/// execution is an error rather than an assumed fill
pub fn fill_from_response(order: &OrderRequest, response: &OrderResponse) -> Result<OrderFill> {
    let executed: f64 = response.executed_qty.parse().with_context(|| {
        format!(
            "Invalid executed quantity for order {}: {}",
            response.order_id, response.executed_qty
        )
    })?;
    if executed <= 0.0 {
        bail!(
            "Order {} for {} was not filled (status {})",
            response.order_id,
            order.symbol,
            response.status
        );
    }

    Ok(OrderFill {
        symbol: order.symbol.clone(),
        side: order.side,
        quantity: executed,
        price: response.average_price().unwrap_or(order.reference_price),
        time: Utc::now(),
        order_id: Some(response.order_id.to_string()),
        simulated: false,
    })
}

/// Paper sink when `dry_run`, otherwise the signed Binance sink
pub fn create_order_sink(
    dry_run: bool,
    client: &BinanceClient,
    quote_currency: &str,
    initial_balance: f64,
    fee_rate: f64,
) -> Result<Box<dyn OrderSink>> {
    if dry_run {
        info!("Order sink: paper trading (dry run)");
        Ok(Box::new(PaperOrderSink::new(initial_balance, fee_rate)))
    } else {
        info!("Order sink: LIVE Binance orders");
        Ok(Box::new(BinanceOrderSink::new(client.clone(), quote_currency)?))
    }
}
