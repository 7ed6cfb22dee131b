/*
[INPUT]:  Fixed-order numeric rows from REST responses and WebSocket data frames
[OUTPUT]: Trade and Candle domain values
[POS]:    Data layer - domain model shared by the REST fetcher and the stream dispatcher
[UPDATE]: When row layouts change or new domain fields are added
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::enums::Side;
use crate::error::{ConnectorError, Result};

/// Trade row layout: `[id, timeMillis, signedAmount, price]`
pub const TRADE_ROW_LEN: usize = 4;
/// Candle row layout: `[openTimeMillis, open, close, high, low, volume]`
pub const CANDLE_ROW_LEN: usize = 6;

/// One executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub pair: String,
    pub price: Decimal,
    /// Absolute traded quantity
    pub amount: Decimal,
    pub side: Side,
    pub time: DateTime<Utc>,
}

impl Trade {
    /// Parse a trade row. Extra trailing fields are ignored.
    pub fn from_row(pair: &str, row: &[Value]) -> Result<Self> {
        if row.len() < TRADE_ROW_LEN {
            return Err(malformed(format!(
                "trade row has {} fields, expected {}",
                row.len(),
                TRADE_ROW_LEN
            )));
        }

        let id = id_from_value(&row[0]).ok_or_else(|| malformed("trade id"))?;
        let time = time_from_value(&row[1]).ok_or_else(|| malformed("trade time"))?;
        let signed_amount = decimal_from_value(&row[2]).ok_or_else(|| malformed("trade amount"))?;
        let price = decimal_from_value(&row[3]).ok_or_else(|| malformed("trade price"))?;

        let side = Side::from_signed_amount(signed_amount)
            .ok_or_else(|| malformed("trade amount is zero"))?;
        if price <= Decimal::ZERO {
            return Err(malformed(format!("trade price {price} is not positive")));
        }

        Ok(Self {
            id,
            pair: pair.to_string(),
            price,
            amount: signed_amount.abs(),
            side,
            time,
        })
    }
}

/// One OHLC bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub pair: String,
    pub open_time: DateTime<Utc>,
    pub open_price: Decimal,
    pub close_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub total_volume: Decimal,
    /// Price-weighted total; not derivable from a single OHLC row, always zero here
    pub total_price: Decimal,
}

impl Candle {
    /// Parse a candle row. Extra trailing fields are ignored.
    pub fn from_row(pair: &str, row: &[Value]) -> Result<Self> {
        if row.len() < CANDLE_ROW_LEN {
            return Err(malformed(format!(
                "candle row has {} fields, expected {}",
                row.len(),
                CANDLE_ROW_LEN
            )));
        }

        let open_time = time_from_value(&row[0]).ok_or_else(|| malformed("candle time"))?;
        let open_price = decimal_from_value(&row[1]).ok_or_else(|| malformed("candle open"))?;
        let close_price = decimal_from_value(&row[2]).ok_or_else(|| malformed("candle close"))?;
        let high_price = decimal_from_value(&row[3]).ok_or_else(|| malformed("candle high"))?;
        let low_price = decimal_from_value(&row[4]).ok_or_else(|| malformed("candle low"))?;
        let total_volume = decimal_from_value(&row[5]).ok_or_else(|| malformed("candle volume"))?;

        if high_price < low_price {
            return Err(malformed(format!(
                "candle high {high_price} below low {low_price}"
            )));
        }
        if total_volume.is_sign_negative() && !total_volume.is_zero() {
            return Err(malformed(format!("candle volume {total_volume} is negative")));
        }

        Ok(Self {
            pair: pair.to_string(),
            open_time,
            open_price,
            close_price,
            high_price,
            low_price,
            total_volume,
            total_price: Decimal::ZERO,
        })
    }
}

/// Read a decimal from a JSON number (plain or exponent form) or numeric string.
pub(crate) fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => {
            let raw = number.to_string();
            raw.parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(&raw))
                .ok()
        }
        Value::String(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return None;
            }
            raw.parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(raw))
                .ok()
        }
        _ => None,
    }
}

fn time_from_value(value: &Value) -> Option<DateTime<Utc>> {
    let millis = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|raw| raw.is_finite() && raw.fract() == 0.0)
                .map(|raw| raw as i64)
        })?,
        Value::String(raw) => raw.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    DateTime::from_timestamp_millis(millis)
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(|id| id.to_string())
            .or_else(|| number.as_u64().map(|id| id.to_string())),
        Value::String(raw) if !raw.is_empty() => Some(raw.clone()),
        _ => None,
    }
}

fn malformed(detail: impl Into<String>) -> ConnectorError {
    ConnectorError::MalformedFrame(detail.into())
}
