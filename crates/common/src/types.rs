use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Direction of an order, trade or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" => Ok(Direction::Long),
            "short" => Ok(Direction::Short),
            other => Err(Error::Other(format!("unknown direction '{other}'"))),
        }
    }
}

/// Whether an order opens a new position or closes an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Offset {
    Open,
    Close,
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Offset::Open => write!(f, "open"),
            Offset::Close => write!(f, "close"),
        }
    }
}

impl std::str::FromStr for Offset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Offset::Open),
            "close" => Ok(Offset::Close),
            other => Err(Error::Other(format!("unknown offset '{other}'"))),
        }
    }
}

/// Order pricing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

impl std::str::FromStr for OrderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "limit" => Ok(OrderType::Limit),
            "market" => Ok(OrderType::Market),
            other => Err(Error::Other(format!("unknown order type '{other}'"))),
        }
    }
}

/// Bar interval for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "d")]
    Daily,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Interval::Minute => write!(f, "1m"),
            Interval::Hour => write!(f, "1h"),
            Interval::Daily => write!(f, "d"),
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "minute" => Ok(Interval::Minute),
            "1h" | "hour" => Ok(Interval::Hour),
            "d" | "daily" => Ok(Interval::Daily),
            other => Err(Error::Other(format!("unknown interval '{other}'"))),
        }
    }
}

/// Lifecycle status of an order at the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Submitting,
    NotTraded,
    PartTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl Status {
    /// An active order can still trade and can still be cancelled.
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Submitting | Status::NotTraded | Status::PartTraded)
    }
}

/// A tradable contract known to the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractData {
    pub symbol: String,
    pub exchange: String,
    pub name: String,
    pub size: f64,
    pub price_tick: f64,
    pub gateway_name: String,
}

impl ContractData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

/// Latest market snapshot for one contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickData {
    pub symbol: String,
    pub exchange: String,
    pub datetime: DateTime<Utc>,
    pub last_price: f64,
    pub volume: f64,
    pub bid_price: f64,
    pub bid_volume: f64,
    pub ask_price: f64,
    pub ask_volume: f64,
    pub gateway_name: String,
}

impl TickData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

/// An order as tracked by the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    pub orderid: String,
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub offset: Offset,
    pub order_type: OrderType,
    pub price: f64,
    pub volume: f64,
    pub traded: f64,
    pub status: Status,
    pub gateway_name: String,
}

impl OrderData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }

    pub fn vt_orderid(&self) -> String {
        format!("{}.{}", self.gateway_name, self.orderid)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Build the cancellation request for this order.
    pub fn create_cancel_request(&self) -> CancelRequest {
        CancelRequest {
            orderid: self.orderid.clone(),
            symbol: self.symbol.clone(),
            exchange: self.exchange.clone(),
        }
    }
}

/// A fill reported by the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeData {
    pub tradeid: String,
    pub orderid: String,
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub gateway_name: String,
}

impl TradeData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }

    pub fn vt_orderid(&self) -> String {
        format!("{}.{}", self.gateway_name, self.orderid)
    }
}

/// An open position held at the host engine, one per (contract, direction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionData {
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub volume: f64,
    pub frozen: f64,
    pub price: f64,
    pub pnl: f64,
    pub gateway_name: String,
}

impl PositionData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }

    /// Composite position identifier: `{gateway}.{symbol}.{exchange}.{direction}`.
    ///
    /// The host engine must key its position records by this exact format.
    pub fn vt_positionid(&self) -> String {
        format!("{}.{}.{}", self.gateway_name, self.vt_symbol(), self.direction)
    }
}

/// A trading account balance at the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountData {
    pub accountid: String,
    pub balance: f64,
    pub frozen: f64,
    pub gateway_name: String,
}

impl AccountData {
    pub fn vt_accountid(&self) -> String {
        format!("{}.{}", self.gateway_name, self.accountid)
    }

    pub fn available(&self) -> f64 {
        self.balance - self.frozen
    }
}

/// One candle returned by the data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarData {
    pub symbol: String,
    pub exchange: String,
    pub datetime: DateTime<Utc>,
    pub interval: Interval,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub close_price: f64,
    pub volume: f64,
}

impl BarData {
    pub fn vt_symbol(&self) -> String {
        format!("{}.{}", self.symbol, self.exchange)
    }
}

/// A log message fanned out to the console sink and the event channel.
/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub msg: String,
    pub source: String,
}

impl LogRecord {
    pub fn new(msg: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            msg: msg.into(),
            source: source.into(),
        }
    }
}

/// Order submission request sent to the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub volume: f64,
    pub price: f64,
    pub offset: Offset,
    /// Tag identifying which component submitted the order.
    pub reference: String,
}

/// Order cancellation request sent to the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub orderid: String,
    pub symbol: String,
    pub exchange: String,
}

/// Market data subscription request sent to the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub symbol: String,
    pub exchange: String,
}

/// Historical bar query sent to the data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub symbol: String,
    pub exchange: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval: Interval,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_order(status: Status) -> OrderData {
        OrderData {
            orderid: "42".into(),
            symbol: "IF2303".into(),
            exchange: "CFFEX".into(),
            direction: Direction::Long,
            offset: Offset::Open,
            order_type: OrderType::Limit,
            price: 4000.0,
            volume: 1.0,
            traded: 0.0,
            status,
            gateway_name: "PAPER".into(),
        }
    }

    #[test]
    fn vt_orderid_combines_gateway_and_orderid() {
        let order = make_order(Status::NotTraded);
        assert_eq!(order.vt_orderid(), "PAPER.42");
        assert_eq!(order.vt_symbol(), "IF2303.CFFEX");
    }

    #[test]
    fn cancel_request_copies_order_identity() {
        let order = make_order(Status::NotTraded);
        let req = order.create_cancel_request();
        assert_eq!(req.orderid, "42");
        assert_eq!(req.symbol, "IF2303");
        assert_eq!(req.exchange, "CFFEX");
    }

    #[test]
    fn only_pre_terminal_statuses_are_active() {
        for status in [Status::Submitting, Status::NotTraded, Status::PartTraded] {
            assert!(make_order(status).is_active());
        }
        for status in [Status::AllTraded, Status::Cancelled, Status::Rejected] {
            assert!(!make_order(status).is_active());
        }
    }

    #[test]
    fn vt_positionid_includes_direction() {
        let position = PositionData {
            symbol: "IF2303".into(),
            exchange: "CFFEX".into(),
            direction: Direction::Short,
            volume: 2.0,
            frozen: 0.0,
            price: 3990.0,
            pnl: 0.0,
            gateway_name: "PAPER".into(),
        };
        assert_eq!(position.vt_positionid(), "PAPER.IF2303.CFFEX.short");
    }

    #[test]
    fn account_available_subtracts_frozen() {
        let account = AccountData {
            accountid: "USD".into(),
            balance: 1000.0,
            frozen: 250.0,
            gateway_name: "PAPER".into(),
        };
        assert_eq!(account.vt_accountid(), "PAPER.USD");
        assert!((account.available() - 750.0).abs() < f64::EPSILON);
    }

    #[test]
    fn enums_round_trip_through_from_str() {
        assert_eq!("long".parse::<Direction>().unwrap(), Direction::Long);
        assert_eq!("MARKET".parse::<OrderType>().unwrap(), OrderType::Market);
        assert_eq!("1h".parse::<Interval>().unwrap(), Interval::Hour);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
