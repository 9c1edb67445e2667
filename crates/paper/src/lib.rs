//! In-memory host engine and data feed for simulation.
//!
//! `PaperHost` implements the host-engine boundary entirely in memory: seeded
//! contracts, settable ticks, recorded orders. Market orders fill instantly
//! at the last known price; limit orders rest until `fill_order` is called.
//! No real orders are ever sent anywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use common::{
    AccountData, BarData, CancelRequest, ContractData, Datafeed, Direction, HistoryRequest,
    HostEngine, Offset, OrderData, OrderRequest, PositionData, Status, SubscribeRequest, TickData,
    TradeData,
};

#[derive(Default)]
struct PaperBook {
    contracts: HashMap<String, ContractData>,
    ticks: HashMap<String, TickData>,
    orders: HashMap<String, OrderData>,
    trades: Vec<TradeData>,
    positions: HashMap<String, PositionData>,
    accounts: HashMap<String, AccountData>,
    subscriptions: Vec<String>,
    emails: Vec<(String, String)>,
    connected: bool,
}

/// Simulated host engine.
pub struct PaperHost {
    gateway_name: String,
    book: RwLock<PaperBook>,
    trade_count: AtomicU64,
    order_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl PaperHost {
    pub fn new(gateway_name: impl Into<String>) -> Self {
        let gateway_name = gateway_name.into();
        info!(gateway = %gateway_name, "PaperHost initialized");
        Self {
            gateway_name,
            book: RwLock::new(PaperBook::default()),
            trade_count: AtomicU64::new(0),
            order_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PaperBook> {
        self.book.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PaperBook> {
        self.book.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Seeding and inspection ───────────────────────────────────────────────

    pub fn seed_contract(&self, contract: ContractData) {
        self.write()
            .contracts
            .insert(contract.vt_symbol(), contract);
    }

    pub fn seed_account(&self, account: AccountData) {
        self.write()
            .accounts
            .insert(account.vt_accountid(), account);
    }

    pub fn seed_position(&self, position: PositionData) {
        self.write()
            .positions
            .insert(position.vt_positionid(), position);
    }

    /// Set the latest tick (the price market orders fill at).
    pub fn update_tick(&self, tick: TickData) {
        self.write().ticks.insert(tick.vt_symbol(), tick);
    }

    /// Fill a resting limit order at its own price. Returns `false` when the
    /// order is unknown or no longer active.
    pub fn fill_order(&self, vt_orderid: &str) -> bool {
        let mut book = self.write();
        let Some(mut order) = book.orders.get(vt_orderid).cloned() else {
            return false;
        };
        if !order.is_active() {
            return false;
        }
        let price = order.price;
        Self::fill_at(&mut book, &mut order, price, &self.trade_count);
        book.orders.insert(vt_orderid.to_string(), order);
        true
    }

    pub fn order_call_count(&self) -> usize {
        self.order_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_call_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.read().subscriptions.clone()
    }

    pub fn emails(&self) -> Vec<(String, String)> {
        self.read().emails.clone()
    }

    pub fn connected(&self) -> bool {
        self.read().connected
    }

    // ── Fill simulation ──────────────────────────────────────────────────────

    fn fill_at(book: &mut PaperBook, order: &mut OrderData, price: f64, trade_count: &AtomicU64) {
        order.traded = order.volume;
        order.status = Status::AllTraded;

        let tradeid = trade_count.fetch_add(1, Ordering::SeqCst) + 1;
        book.trades.push(TradeData {
            tradeid: tradeid.to_string(),
            orderid: order.orderid.clone(),
            symbol: order.symbol.clone(),
            exchange: order.exchange.clone(),
            direction: order.direction,
            offset: order.offset,
            price,
            volume: order.volume,
            gateway_name: order.gateway_name.clone(),
        });

        // Opening grows the same-direction position; closing shrinks the
        // opposite one.
        let (pos_direction, delta) = match order.offset {
            Offset::Open => (order.direction, order.volume),
            Offset::Close => (
                match order.direction {
                    Direction::Long => Direction::Short,
                    Direction::Short => Direction::Long,
                },
                -order.volume,
            ),
        };

        let position = book
            .positions
            .entry(format!(
                "{}.{}.{}.{}",
                order.gateway_name, order.symbol, order.exchange, pos_direction
            ))
            .or_insert_with(|| PositionData {
                symbol: order.symbol.clone(),
                exchange: order.exchange.clone(),
                direction: pos_direction,
                volume: 0.0,
                frozen: 0.0,
                price: 0.0,
                pnl: 0.0,
                gateway_name: order.gateway_name.clone(),
            });

        let new_volume = (position.volume + delta).max(0.0);
        if delta > 0.0 && new_volume > 0.0 {
            position.price =
                (position.price * position.volume + price * delta) / new_volume;
        }
        position.volume = new_volume;
    }
}

impl HostEngine for PaperHost {
    fn send_order(&self, req: &OrderRequest, gateway_name: &str) -> String {
        self.order_calls.fetch_add(1, Ordering::SeqCst);

        let mut order = OrderData {
            orderid: uuid::Uuid::new_v4().to_string(),
            symbol: req.symbol.clone(),
            exchange: req.exchange.clone(),
            direction: req.direction,
            offset: req.offset,
            order_type: req.order_type,
            price: req.price,
            volume: req.volume,
            traded: 0.0,
            status: Status::NotTraded,
            gateway_name: gateway_name.to_string(),
        };
        let vt_orderid = order.vt_orderid();

        let mut book = self.write();
        if req.order_type == common::OrderType::Market {
            let last_price = book
                .ticks
                .get(&format!("{}.{}", req.symbol, req.exchange))
                .map(|tick| tick.last_price);
            if let Some(price) = last_price {
                Self::fill_at(&mut book, &mut order, price, &self.trade_count);
            }
        }
        debug!(
            vt_orderid = %vt_orderid,
            reference = %req.reference,
            status = ?order.status,
            "paper order recorded"
        );
        book.orders.insert(vt_orderid.clone(), order);

        vt_orderid
    }

    fn cancel_order(&self, req: &CancelRequest, gateway_name: &str) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let vt_orderid = format!("{}.{}", gateway_name, req.orderid);
        let mut book = self.write();
        if let Some(order) = book.orders.get_mut(&vt_orderid) {
            if order.is_active() {
                order.status = Status::Cancelled;
            }
        }
    }

    fn subscribe(&self, req: &SubscribeRequest, _gateway_name: &str) {
        self.write()
            .subscriptions
            .push(format!("{}.{}", req.symbol, req.exchange));
    }

    fn connect(&self, _settings: &Value, gateway_name: &str) {
        info!(gateway = %gateway_name, "paper gateway connected");
        self.write().connected = true;
    }

    fn send_email(&self, subject: &str, msg: &str) {
        self.write()
            .emails
            .push((subject.to_string(), msg.to_string()));
    }

    fn get_tick(&self, vt_symbol: &str) -> Option<TickData> {
        self.read().ticks.get(vt_symbol).cloned()
    }

    fn get_order(&self, vt_orderid: &str) -> Option<OrderData> {
        self.read().orders.get(vt_orderid).cloned()
    }

    fn get_contract(&self, vt_symbol: &str) -> Option<ContractData> {
        self.read().contracts.get(vt_symbol).cloned()
    }

    fn get_account(&self, vt_accountid: &str) -> Option<AccountData> {
        self.read().accounts.get(vt_accountid).cloned()
    }

    fn get_position(&self, vt_positionid: &str) -> Option<PositionData> {
        self.read().positions.get(vt_positionid).cloned()
    }

    fn get_all_orders(&self) -> Vec<OrderData> {
        self.read().orders.values().cloned().collect()
    }

    fn get_all_active_orders(&self) -> Vec<OrderData> {
        self.read()
            .orders
            .values()
            .filter(|order| order.is_active())
            .cloned()
            .collect()
    }

    fn get_all_trades(&self) -> Vec<TradeData> {
        self.read().trades.clone()
    }

    fn get_all_contracts(&self) -> Vec<ContractData> {
        self.read().contracts.values().cloned().collect()
    }

    fn get_all_accounts(&self) -> Vec<AccountData> {
        self.read().accounts.values().cloned().collect()
    }

    fn get_all_positions(&self) -> Vec<PositionData> {
        self.read().positions.values().cloned().collect()
    }
}

/// Simulated data feed serving bars loaded (or generated) up front.
pub struct PaperFeed {
    bars: RwLock<Vec<BarData>>,
}

impl PaperFeed {
    pub fn new() -> Self {
        Self {
            bars: RwLock::new(Vec::new()),
        }
    }

    pub fn load_bars(&self, bars: Vec<BarData>) {
        self.bars
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(bars);
    }

    /// Generate a deterministic daily history for demos and tests.
    pub fn seed_daily_history(
        &self,
        symbol: &str,
        exchange: &str,
        start: NaiveDate,
        days: u64,
        base_price: f64,
    ) {
        let bars = (0..days)
            .filter_map(|i| start.checked_add_days(Days::new(i)).map(|date| (i, date)))
            .map(|(i, date)| {
                let drift = (i % 20) as f64 - 10.0;
                let close = base_price + drift;
                BarData {
                    symbol: symbol.to_string(),
                    exchange: exchange.to_string(),
                    datetime: DateTime::<Utc>::from_naive_utc_and_offset(
                        date.and_time(NaiveTime::MIN),
                        Utc,
                    ),
                    interval: common::Interval::Daily,
                    open_price: close - 2.0,
                    high_price: close + 3.0,
                    low_price: close - 4.0,
                    close_price: close,
                    volume: 1000.0 + (i as f64) * 10.0,
                }
            })
            .collect();
        self.load_bars(bars);
    }
}

impl Default for PaperFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Datafeed for PaperFeed {
    fn init(&self) -> bool {
        info!("paper datafeed ready");
        true
    }

    fn query_bar_history(&self, req: &HistoryRequest) -> Vec<BarData> {
        self.bars
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|bar| {
                bar.symbol == req.symbol
                    && bar.exchange == req.exchange
                    && bar.interval == req.interval
                    && bar.datetime >= req.start
                    && bar.datetime <= req.end
            })
            .cloned()
            .collect()
    }
}
