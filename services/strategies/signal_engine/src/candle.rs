//! Market data candle

use crate::error::{EngineError, Result};
use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One closed OHLCV bar. Immutable once appended to a symbol's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    /// Bar open time, milliseconds since the Unix epoch (UTC)
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Structural checks that do not depend on history.
    pub fn validate(&self) -> Result<()> {
        let reject = |message: String| Err(EngineError::data(&self.symbol, message));

        if self.symbol.is_empty() {
            return reject("empty symbol".to_string());
        }
        if self.open <= Decimal::ZERO
            || self.high <= Decimal::ZERO
            || self.low <= Decimal::ZERO
            || self.close <= Decimal::ZERO
        {
            return reject(format!("non-positive price at {}", self.timestamp));
        }
        if self.high < self.low {
            return reject(format!(
                "high {} below low {} at {}",
                self.high, self.low, self.timestamp
            ));
        }
        if self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return reject(format!("open/close outside range at {}", self.timestamp));
        }
        if self.volume < Decimal::ZERO {
            return reject(format!("negative volume at {}", self.timestamp));
        }
        Ok(())
    }

    /// True range against the previous close (high - low when there is none).
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let range = self.high - self.low;
        match prev_close {
            Some(prev) => range
                .max((self.high - prev).abs())
                .max((self.low - prev).abs()),
            None => range,
        }
    }

    /// UTC trading day the candle belongs to
    pub fn trading_day(&self) -> Option<NaiveDate> {
        trading_day_at(self.timestamp)
    }
}

/// UTC trading day of a millisecond timestamp
pub fn trading_day_at(timestamp: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp).map(|dt| dt.date_naive())
}
