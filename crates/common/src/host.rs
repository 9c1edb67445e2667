use serde_json::Value;

use crate::{
    AccountData, BarData, CancelRequest, ContractData, HistoryRequest, OrderData, OrderRequest,
    PositionData, SubscribeRequest, TickData, TradeData,
};

/// Abstraction over the host trading engine.
///
/// The script engine never touches order matching, risk checks or gateway
/// plumbing itself; everything flows through this boundary. All calls are
/// synchronous. Lookups represent absence as `None` (or an empty list) and
/// never fail: an unknown id is a missing record, not an error.
pub trait HostEngine: Send + Sync {
    /// Submit an order and return its vt_orderid.
    fn send_order(&self, req: &OrderRequest, gateway_name: &str) -> String;

    /// Forward a cancellation for an existing order.
    fn cancel_order(&self, req: &CancelRequest, gateway_name: &str);

    /// Subscribe to market data for one contract.
    fn subscribe(&self, req: &SubscribeRequest, gateway_name: &str);

    /// Connect a gateway with host-owned settings.
    fn connect(&self, settings: &Value, gateway_name: &str);

    /// Send a notification email.
    fn send_email(&self, subject: &str, msg: &str);

    fn get_tick(&self, vt_symbol: &str) -> Option<TickData>;
    fn get_order(&self, vt_orderid: &str) -> Option<OrderData>;
    fn get_contract(&self, vt_symbol: &str) -> Option<ContractData>;
    fn get_account(&self, vt_accountid: &str) -> Option<AccountData>;
    fn get_position(&self, vt_positionid: &str) -> Option<PositionData>;

    fn get_all_orders(&self) -> Vec<OrderData>;
    fn get_all_active_orders(&self) -> Vec<OrderData>;
    fn get_all_trades(&self) -> Vec<TradeData>;
    fn get_all_contracts(&self) -> Vec<ContractData>;
    fn get_all_accounts(&self) -> Vec<AccountData>;
    fn get_all_positions(&self) -> Vec<PositionData>;
}

/// Abstraction over the historical data feed provider.
pub trait Datafeed: Send + Sync {
    /// Initialize the feed. A `false` return is logged by the caller and is
    /// never fatal to the engine.
    fn init(&self) -> bool;

    /// Query historical bars. Returns an empty sequence when nothing matches.
    fn query_bar_history(&self, req: &HistoryRequest) -> Vec<BarData>;
}
