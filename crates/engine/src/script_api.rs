//! Lua surface of the trading facade.
//!
//! User scripts receive a `bot` userdata as the sole argument of their
//! `run(bot)` entry function. Methods mirror the facade; domain records cross
//! into Lua as plain tables via serde. The interpreter lives entirely on the
//! worker thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{Lua, LuaSerdeExt, UserData, UserDataMethods, Value};
use serde::Serialize;

use common::{Direction, Interval, Offset, OrderType};

use crate::accessor::{QueryResult, RenderMode};
use crate::facade::ScriptEngine;

/// Poll granularity for `bot:sleep`, so `stop()` stays responsive.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// The `bot` argument handed to every script.
pub struct ScriptBot {
    engine: Arc<ScriptEngine>,
}

impl ScriptBot {
    pub fn new(engine: Arc<ScriptEngine>) -> Self {
        Self { engine }
    }
}

fn render(use_table: Option<bool>) -> RenderMode {
    if use_table.unwrap_or(false) {
        RenderMode::Table
    } else {
        RenderMode::Native
    }
}

fn bad_arg(e: common::Error) -> mlua::Error {
    mlua::Error::RuntimeError(e.to_string())
}

fn order_type_arg(arg: Option<String>) -> mlua::Result<OrderType> {
    match arg {
        None => Ok(OrderType::Limit),
        Some(s) => s.parse().map_err(bad_arg),
    }
}

fn push_result<T: Serialize>(lua: &Lua, result: QueryResult<T>) -> mlua::Result<Value> {
    match result {
        QueryResult::Record(None) | QueryResult::Table(None) => Ok(Value::Nil),
        QueryResult::Record(Some(record)) => lua.to_value(&record),
        QueryResult::Records(slots) => lua.to_value(&slots),
        QueryResult::Table(Some(table)) => lua.to_value(&table),
    }
}

impl UserData for ScriptBot {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        // ── Lifecycle ────────────────────────────────────────────────────────
        methods.add_method("is_active", |_, this, ()| Ok(this.engine.is_active()));

        methods.add_method("sleep", |_, this, secs: f64| {
            if !secs.is_finite() || secs <= 0.0 {
                return Ok(());
            }
            let deadline = Instant::now() + Duration::from_secs_f64(secs);
            while this.engine.is_active() {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep(SLEEP_SLICE.min(deadline - now));
            }
            Ok(())
        });

        // ── Orders ───────────────────────────────────────────────────────────
        methods.add_method(
            "buy",
            |_, this, (vt_symbol, price, volume, order_type): (String, f64, f64, Option<String>)| {
                let order_type = order_type_arg(order_type)?;
                Ok(this.engine.send_order(
                    &vt_symbol,
                    price,
                    volume,
                    Direction::Long,
                    Offset::Open,
                    order_type,
                ))
            },
        );

        methods.add_method(
            "sell",
            |_, this, (vt_symbol, price, volume, order_type): (String, f64, f64, Option<String>)| {
                let order_type = order_type_arg(order_type)?;
                Ok(this.engine.send_order(
                    &vt_symbol,
                    price,
                    volume,
                    Direction::Short,
                    Offset::Close,
                    order_type,
                ))
            },
        );

        methods.add_method(
            "short",
            |_, this, (vt_symbol, price, volume, order_type): (String, f64, f64, Option<String>)| {
                let order_type = order_type_arg(order_type)?;
                Ok(this.engine.send_order(
                    &vt_symbol,
                    price,
                    volume,
                    Direction::Short,
                    Offset::Open,
                    order_type,
                ))
            },
        );

        methods.add_method(
            "cover",
            |_, this, (vt_symbol, price, volume, order_type): (String, f64, f64, Option<String>)| {
                let order_type = order_type_arg(order_type)?;
                Ok(this.engine.send_order(
                    &vt_symbol,
                    price,
                    volume,
                    Direction::Long,
                    Offset::Close,
                    order_type,
                ))
            },
        );

        methods.add_method(
            "send_order",
            |_,
             this,
             (vt_symbol, price, volume, direction, offset, order_type): (
                String,
                f64,
                f64,
                String,
                String,
                String,
            )| {
                let direction: Direction = direction.parse().map_err(bad_arg)?;
                let offset: Offset = offset.parse().map_err(bad_arg)?;
                let order_type: OrderType = order_type.parse().map_err(bad_arg)?;
                Ok(this
                    .engine
                    .send_order(&vt_symbol, price, volume, direction, offset, order_type))
            },
        );

        methods.add_method("cancel_order", |_, this, vt_orderid: String| {
            this.engine.cancel_order(&vt_orderid);
            Ok(())
        });

        methods.add_method("subscribe", |_, this, vt_symbols: Vec<String>| {
            this.engine.subscribe(&vt_symbols);
            Ok(())
        });

        // ── Queries ──────────────────────────────────────────────────────────
        methods.add_method(
            "get_tick",
            |lua, this, (vt_symbol, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_tick(&vt_symbol, render(use_table)))
            },
        );

        methods.add_method(
            "get_ticks",
            |lua, this, (vt_symbols, use_table): (Vec<String>, Option<bool>)| {
                push_result(lua, this.engine.get_ticks(&vt_symbols, render(use_table)))
            },
        );

        methods.add_method(
            "get_order",
            |lua, this, (vt_orderid, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_order(&vt_orderid, render(use_table)))
            },
        );

        methods.add_method(
            "get_orders",
            |lua, this, (vt_orderids, use_table): (Vec<String>, Option<bool>)| {
                push_result(lua, this.engine.get_orders(&vt_orderids, render(use_table)))
            },
        );

        methods.add_method(
            "get_trades",
            |lua, this, (vt_orderid, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_trades(&vt_orderid, render(use_table)))
            },
        );

        methods.add_method("get_all_active_orders", |lua, this, use_table: Option<bool>| {
            push_result(lua, this.engine.get_all_active_orders(render(use_table)))
        });

        methods.add_method(
            "get_contract",
            |lua, this, (vt_symbol, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_contract(&vt_symbol, render(use_table)))
            },
        );

        methods.add_method("get_all_contracts", |lua, this, use_table: Option<bool>| {
            push_result(lua, this.engine.get_all_contracts(render(use_table)))
        });

        methods.add_method(
            "get_account",
            |lua, this, (vt_accountid, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_account(&vt_accountid, render(use_table)))
            },
        );

        methods.add_method("get_all_accounts", |lua, this, use_table: Option<bool>| {
            push_result(lua, this.engine.get_all_accounts(render(use_table)))
        });

        methods.add_method(
            "get_position",
            |lua, this, (vt_positionid, use_table): (String, Option<bool>)| {
                push_result(lua, this.engine.get_position(&vt_positionid, render(use_table)))
            },
        );

        methods.add_method(
            "get_position_by_symbol_and_direction",
            |lua, this, (vt_symbol, direction, use_table): (String, String, Option<bool>)| {
                let direction: Direction = direction.parse().map_err(bad_arg)?;
                push_result(
                    lua,
                    this.engine.get_position_by_symbol_and_direction(
                        &vt_symbol,
                        direction,
                        render(use_table),
                    ),
                )
            },
        );

        methods.add_method("get_all_positions", |lua, this, use_table: Option<bool>| {
            push_result(lua, this.engine.get_all_positions(render(use_table)))
        });

        methods.add_method(
            "get_bars",
            |lua,
             this,
             (vt_symbol, start_date, interval, use_table): (
                String,
                String,
                String,
                Option<bool>,
            )| {
                let interval: Interval = interval.parse().map_err(bad_arg)?;
                push_result(
                    lua,
                    this.engine
                        .get_bars(&vt_symbol, &start_date, interval, render(use_table)),
                )
            },
        );

        // ── Side channels ────────────────────────────────────────────────────
        methods.add_method(
            "connect_gateway",
            |lua, this, (settings, gateway_name): (Value, String)| {
                let settings: serde_json::Value = lua.from_value(settings)?;
                this.engine.connect_gateway(&settings, &gateway_name);
                Ok(())
            },
        );

        methods.add_method("write_log", |_, this, msg: String| {
            this.engine.write_log(&msg);
            Ok(())
        });

        methods.add_method("send_email", |_, this, msg: String| {
            this.engine.send_email(&msg);
            Ok(())
        });
    }
}
