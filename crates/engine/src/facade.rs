//! The trading facade: the only object a user script touches.
//!
//! Order and query intents are translated into host-engine calls; every
//! lookup is shaped through the data accessor. Resolution failures (unknown
//! symbol, order or contract) surface as empty or absent results and never
//! raise.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use common::{
    AccountData, BarData, ContractData, Datafeed, Direction, HistoryRequest, HostEngine, Interval,
    LogRecord, Offset, OrderData, OrderRequest, OrderType, PositionData, SubscribeRequest,
    TickData, TradeData,
};

use crate::accessor::{self, QueryResult, RenderMode};
use crate::runner::{RunState, ScriptRunner};

pub const APP_NAME: &str = "ScriptBot";

/// Reserved engine settings file. The schema is owned by the host.
pub const SETTING_FILENAME: &str = "scriptbot_setting.json";

const LOG_CHANNEL_CAPACITY: usize = 1024;

/// Script trading facade. Constructed once per process; shared with the
/// worker thread behind an `Arc`.
pub struct ScriptEngine {
    host: Arc<dyn HostEngine>,
    datafeed: Arc<dyn Datafeed>,
    log_tx: broadcast::Sender<LogRecord>,
    pub(crate) runner: ScriptRunner,
}

impl ScriptEngine {
    pub fn new(host: Arc<dyn HostEngine>, datafeed: Arc<dyn Datafeed>) -> Arc<Self> {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Arc::new(Self {
            host,
            datafeed,
            log_tx,
            runner: ScriptRunner::new(),
        })
    }

    /// Initialize the data feed. Failure is logged and never fatal.
    pub fn init(&self) {
        if self.datafeed.init() {
            self.write_log("Datafeed initialized");
        } else {
            self.write_log("Datafeed initialization failed");
        }
    }

    // ── Script lifecycle ─────────────────────────────────────────────────────

    /// Start the script at `script_path` on the worker thread.
    /// No-op while the run slot is occupied. Returns immediately.
    pub fn start_script(self: &Arc<Self>, script_path: impl Into<PathBuf>) {
        if self.runner.start(self.clone(), script_path.into()) {
            self.write_log("Script started");
        }
    }

    /// Signal the script to stop and join the worker to completion.
    /// No-op while the run slot is idle. Blocks until the script returns.
    pub fn stop_script(&self) {
        if self.runner.stop() {
            self.write_log("Script stopped");
        }
    }

    pub fn run_state(&self) -> RunState {
        self.runner.state()
    }

    /// Cooperative cancellation flag; scripts poll this to exit early.
    pub fn is_active(&self) -> bool {
        self.runner.is_active()
    }

    // ── Orders ───────────────────────────────────────────────────────────────

    /// Resolve the contract and submit an order. An unknown symbol returns an
    /// empty identifier without touching the host.
    pub fn send_order(
        &self,
        vt_symbol: &str,
        price: f64,
        volume: f64,
        direction: Direction,
        offset: Offset,
        order_type: OrderType,
    ) -> String {
        let Some(contract) = self.host.get_contract(vt_symbol) else {
            return String::new();
        };

        let req = OrderRequest {
            symbol: contract.symbol,
            exchange: contract.exchange,
            direction,
            order_type,
            volume,
            price,
            offset,
            reference: APP_NAME.to_string(),
        };

        self.host.send_order(&req, &contract.gateway_name)
    }

    /// Open a long position with a limit order.
    pub fn buy(&self, vt_symbol: &str, price: f64, volume: f64) -> String {
        self.send_order(vt_symbol, price, volume, Direction::Long, Offset::Open, OrderType::Limit)
    }

    /// Close a long position with a limit order.
    pub fn sell(&self, vt_symbol: &str, price: f64, volume: f64) -> String {
        self.send_order(vt_symbol, price, volume, Direction::Short, Offset::Close, OrderType::Limit)
    }

    /// Open a short position with a limit order.
    pub fn short(&self, vt_symbol: &str, price: f64, volume: f64) -> String {
        self.send_order(vt_symbol, price, volume, Direction::Short, Offset::Open, OrderType::Limit)
    }

    /// Close a short position with a limit order.
    pub fn cover(&self, vt_symbol: &str, price: f64, volume: f64) -> String {
        self.send_order(vt_symbol, price, volume, Direction::Long, Offset::Close, OrderType::Limit)
    }

    /// Cancel an existing order. Unknown ids are silently ignored.
    pub fn cancel_order(&self, vt_orderid: &str) {
        let Some(order) = self.host.get_order(vt_orderid) else {
            return;
        };
        let req = order.create_cancel_request();
        self.host.cancel_order(&req, &order.gateway_name);
    }

    /// Subscribe to market data, best-effort per symbol. Unresolvable symbols
    /// are skipped.
    pub fn subscribe(&self, vt_symbols: &[String]) {
        for vt_symbol in vt_symbols {
            if let Some(contract) = self.host.get_contract(vt_symbol) {
                let req = SubscribeRequest {
                    symbol: contract.symbol,
                    exchange: contract.exchange,
                };
                self.host.subscribe(&req, &contract.gateway_name);
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn get_tick(&self, vt_symbol: &str, mode: RenderMode) -> QueryResult<TickData> {
        accessor::fetch_one(|s| self.host.get_tick(s), vt_symbol, mode)
    }

    pub fn get_ticks(&self, vt_symbols: &[String], mode: RenderMode) -> QueryResult<TickData> {
        let slots = accessor::fetch_each(|s: &String| self.host.get_tick(s), vt_symbols);
        accessor::render_slots(slots, mode)
    }

    pub fn get_order(&self, vt_orderid: &str, mode: RenderMode) -> QueryResult<OrderData> {
        accessor::fetch_one(|id| self.host.get_order(id), vt_orderid, mode)
    }

    pub fn get_orders(&self, vt_orderids: &[String], mode: RenderMode) -> QueryResult<OrderData> {
        let slots = accessor::fetch_each(|id: &String| self.host.get_order(id), vt_orderids);
        accessor::render_slots(slots, mode)
    }

    /// Fills belonging to one order. This lookup filters rather than keeping
    /// null slots: only matching trades are returned.
    pub fn get_trades(&self, vt_orderid: &str, mode: RenderMode) -> QueryResult<TradeData> {
        accessor::fetch_all(
            || {
                self.host
                    .get_all_trades()
                    .into_iter()
                    .filter(|trade| trade.vt_orderid() == vt_orderid)
                    .collect()
            },
            mode,
        )
    }

    pub fn get_all_active_orders(&self, mode: RenderMode) -> QueryResult<OrderData> {
        accessor::fetch_all(|| self.host.get_all_active_orders(), mode)
    }

    pub fn get_contract(&self, vt_symbol: &str, mode: RenderMode) -> QueryResult<ContractData> {
        accessor::fetch_one(|s| self.host.get_contract(s), vt_symbol, mode)
    }

    pub fn get_all_contracts(&self, mode: RenderMode) -> QueryResult<ContractData> {
        accessor::fetch_all(|| self.host.get_all_contracts(), mode)
    }

    pub fn get_account(&self, vt_accountid: &str, mode: RenderMode) -> QueryResult<AccountData> {
        accessor::fetch_one(|id| self.host.get_account(id), vt_accountid, mode)
    }

    pub fn get_all_accounts(&self, mode: RenderMode) -> QueryResult<AccountData> {
        accessor::fetch_all(|| self.host.get_all_accounts(), mode)
    }

    pub fn get_position(&self, vt_positionid: &str, mode: RenderMode) -> QueryResult<PositionData> {
        accessor::fetch_one(|id| self.host.get_position(id), vt_positionid, mode)
    }

    /// Look up a position by symbol and direction, deriving the composite
    /// position identifier the host keys by. Yields nothing when the contract
    /// itself cannot be resolved.
    pub fn get_position_by_symbol_and_direction(
        &self,
        vt_symbol: &str,
        direction: Direction,
        mode: RenderMode,
    ) -> QueryResult<PositionData> {
        let Some(contract) = self.host.get_contract(vt_symbol) else {
            return match mode {
                RenderMode::Native => QueryResult::Record(None),
                RenderMode::Table => QueryResult::Table(None),
            };
        };

        let vt_positionid = format!(
            "{}.{}.{}",
            contract.gateway_name,
            contract.vt_symbol(),
            direction
        );
        accessor::fetch_one(|id: String| self.host.get_position(&id), vt_positionid, mode)
    }

    pub fn get_all_positions(&self, mode: RenderMode) -> QueryResult<PositionData> {
        accessor::fetch_all(|| self.host.get_all_positions(), mode)
    }

    /// Query history from `start_date` (`YYYYMMDD`) to now. An unknown
    /// contract or unparseable date yields an empty sequence, not an error.
    pub fn get_bars(
        &self,
        vt_symbol: &str,
        start_date: &str,
        interval: Interval,
        mode: RenderMode,
    ) -> QueryResult<BarData> {
        let contract = self.host.get_contract(vt_symbol);
        let start = NaiveDate::parse_from_str(start_date, "%Y%m%d").ok();

        let (Some(contract), Some(start)) = (contract, start) else {
            return accessor::render_slots(Vec::new(), mode);
        };

        let start = DateTime::<Utc>::from_naive_utc_and_offset(start.and_time(NaiveTime::MIN), Utc);
        let req = HistoryRequest {
            symbol: contract.symbol,
            exchange: contract.exchange,
            start,
            end: Utc::now(),
            interval,
        };

        accessor::fetch_all(|| self.datafeed.query_bar_history(&req), mode)
    }

    // ── Side channels ────────────────────────────────────────────────────────

    /// Connect a gateway with host-owned settings.
    pub fn connect_gateway(&self, settings: &Value, gateway_name: &str) {
        self.host.connect(settings, gateway_name);
    }

    /// Listen to the log-event channel. Both this channel and the console
    /// sink receive every record; ordering between the two sinks is not
    /// guaranteed, only that both eventually occur.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.log_tx.subscribe()
    }

    /// Log synchronously to the console sink and publish a log event for any
    /// listener. Fire-and-forget: no listener is required.
    pub fn write_log(&self, msg: &str) {
        let record = LogRecord::new(msg, APP_NAME);
        info!(source = APP_NAME, "{msg}");
        let _ = self.log_tx.send(record);
    }

    /// Send a notification email through the host engine.
    pub fn send_email(&self, msg: &str) {
        self.host.send_email("Script engine notification", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Status;
    use paper::{PaperFeed, PaperHost};

    fn contract(symbol: &str, exchange: &str) -> ContractData {
        ContractData {
            symbol: symbol.into(),
            exchange: exchange.into(),
            name: symbol.into(),
            size: 300.0,
            price_tick: 0.2,
            gateway_name: "PAPER".into(),
        }
    }

    fn make_engine() -> (Arc<ScriptEngine>, Arc<PaperHost>) {
        let host = Arc::new(PaperHost::new("PAPER"));
        host.seed_contract(contract("IF2303", "CFFEX"));
        let feed = Arc::new(PaperFeed::new());
        let engine = ScriptEngine::new(host.clone(), feed);
        (engine, host)
    }

    #[test]
    fn send_order_on_unknown_symbol_returns_empty_and_skips_host() {
        let (engine, host) = make_engine();
        let id = engine.buy("GHOST.NOWHERE", 100.0, 1.0);
        assert!(id.is_empty());
        assert_eq!(host.order_call_count(), 0);
    }

    #[test]
    fn buy_composes_long_open_limit() {
        let (engine, host) = make_engine();
        let vt_orderid = engine.buy("IF2303.CFFEX", 4000.0, 1.0);

        assert!(!vt_orderid.is_empty());
        assert_eq!(host.order_call_count(), 1);

        let order = host.get_order(&vt_orderid).unwrap();
        assert_eq!(order.direction, Direction::Long);
        assert_eq!(order.offset, Offset::Open);
        assert_eq!(order.order_type, OrderType::Limit);
        assert!((order.price - 4000.0).abs() < f64::EPSILON);
        assert!((order.volume - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn order_helpers_fix_direction_and_offset() {
        let (engine, host) = make_engine();
        let cases: Vec<(String, Direction, Offset)> = vec![
            (engine.sell("IF2303.CFFEX", 4000.0, 1.0), Direction::Short, Offset::Close),
            (engine.short("IF2303.CFFEX", 4000.0, 1.0), Direction::Short, Offset::Open),
            (engine.cover("IF2303.CFFEX", 4000.0, 1.0), Direction::Long, Offset::Close),
        ];
        for (vt_orderid, direction, offset) in cases {
            let order = host.get_order(&vt_orderid).unwrap();
            assert_eq!(order.direction, direction);
            assert_eq!(order.offset, offset);
        }
    }

    #[test]
    fn cancel_order_on_unknown_id_is_a_no_op() {
        let (engine, host) = make_engine();
        engine.cancel_order("PAPER.nope");
        assert_eq!(host.cancel_call_count(), 0);
    }

    #[test]
    fn cancel_order_forwards_for_known_order() {
        let (engine, host) = make_engine();
        let vt_orderid = engine.buy("IF2303.CFFEX", 4000.0, 1.0);
        engine.cancel_order(&vt_orderid);
        assert_eq!(host.cancel_call_count(), 1);
        assert_eq!(host.get_order(&vt_orderid).unwrap().status, Status::Cancelled);
    }

    #[test]
    fn subscribe_skips_unresolvable_symbols() {
        let (engine, host) = make_engine();
        engine.subscribe(&["IF2303.CFFEX".into(), "GHOST.NOWHERE".into()]);
        assert_eq!(host.subscriptions(), vec!["IF2303.CFFEX".to_string()]);
    }

    #[test]
    fn keyed_bulk_lookup_preserves_absent_slots() {
        let (engine, host) = make_engine();
        host.update_tick(tick("IF2303", "CFFEX", 4000.0));

        let symbols: Vec<String> = vec!["IF2303.CFFEX".into(), "GHOST.NOWHERE".into()];
        let slots = engine.get_ticks(&symbols, RenderMode::Native).records();
        assert_eq!(slots.len(), 2);
        assert!(slots[0].is_some());
        assert!(slots[1].is_none());
    }

    #[test]
    fn get_trades_filters_by_order() {
        let (engine, host) = make_engine();
        host.update_tick(tick("IF2303", "CFFEX", 4000.0));

        // Market orders fill instantly, producing one trade each.
        let first = engine.send_order(
            "IF2303.CFFEX",
            0.0,
            1.0,
            Direction::Long,
            Offset::Open,
            OrderType::Market,
        );
        let second = engine.send_order(
            "IF2303.CFFEX",
            0.0,
            2.0,
            Direction::Long,
            Offset::Open,
            OrderType::Market,
        );
        assert_ne!(first, second);

        let trades = engine.get_trades(&first, RenderMode::Native).records();
        assert_eq!(trades.len(), 1);
        let trade = trades.into_iter().flatten().next().unwrap();
        assert_eq!(trade.vt_orderid(), first);
    }

    #[test]
    fn position_lookup_by_direction_derives_composite_id() {
        let (engine, host) = make_engine();
        host.seed_position(PositionData {
            symbol: "IF2303".into(),
            exchange: "CFFEX".into(),
            direction: Direction::Long,
            volume: 3.0,
            frozen: 0.0,
            price: 3990.0,
            pnl: 0.0,
            gateway_name: "PAPER".into(),
        });

        let found = engine
            .get_position_by_symbol_and_direction("IF2303.CFFEX", Direction::Long, RenderMode::Native)
            .record();
        assert!((found.unwrap().volume - 3.0).abs() < f64::EPSILON);

        let missing = engine
            .get_position_by_symbol_and_direction("GHOST.NOWHERE", Direction::Long, RenderMode::Native)
            .record();
        assert!(missing.is_none());
    }

    #[test]
    fn get_bars_on_unknown_contract_is_empty() {
        let (engine, _host) = make_engine();
        let bars = engine
            .get_bars("GHOST.NOWHERE", "20230101", Interval::Daily, RenderMode::Native)
            .records();
        assert!(bars.is_empty());
    }

    #[test]
    fn get_bars_on_bad_date_is_empty() {
        let (engine, _host) = make_engine();
        let bars = engine
            .get_bars("IF2303.CFFEX", "not-a-date", Interval::Daily, RenderMode::Native)
            .records();
        assert!(bars.is_empty());
    }

    #[test]
    fn get_bars_returns_seeded_history() {
        let host = Arc::new(PaperHost::new("PAPER"));
        host.seed_contract(contract("IF2303", "CFFEX"));
        let feed = Arc::new(PaperFeed::new());
        feed.seed_daily_history(
            "IF2303",
            "CFFEX",
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            30,
            4000.0,
        );
        let engine = ScriptEngine::new(host, feed);

        let bars = engine
            .get_bars("IF2303.CFFEX", "20230110", Interval::Daily, RenderMode::Native)
            .records();
        // Only bars on or after the requested start date are returned.
        assert_eq!(bars.len(), 21);
        assert!(bars.iter().all(Option::is_some));
    }

    #[test]
    fn table_mode_renders_accounts() {
        let (engine, host) = make_engine();
        host.seed_account(AccountData {
            accountid: "USD".into(),
            balance: 1_000_000.0,
            frozen: 0.0,
            gateway_name: "PAPER".into(),
        });

        let table = engine.get_all_accounts(RenderMode::Table).table().unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.columns.iter().any(|c| c == "balance"));
    }

    #[tokio::test]
    async fn write_log_fans_out_to_event_channel() {
        let (engine, _host) = make_engine();
        let mut rx = engine.subscribe_logs();

        engine.write_log("hello from the facade");

        let record = rx.recv().await.unwrap();
        assert_eq!(record.msg, "hello from the facade");
        assert_eq!(record.source, APP_NAME);
    }

    #[test]
    fn send_email_forwards_with_fixed_subject() {
        let (engine, host) = make_engine();
        engine.send_email("fills complete");
        let emails = host.emails();
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].0, "Script engine notification");
        assert_eq!(emails[0].1, "fills complete");
    }

    fn tick(symbol: &str, exchange: &str, last_price: f64) -> TickData {
        TickData {
            symbol: symbol.into(),
            exchange: exchange.into(),
            datetime: Utc::now(),
            last_price,
            volume: 0.0,
            bid_price: last_price - 0.2,
            bid_volume: 1.0,
            ask_price: last_price + 0.2,
            ask_volume: 1.0,
            gateway_name: "PAPER".into(),
        }
    }
}
