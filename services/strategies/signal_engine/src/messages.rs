//! Dashboard push protocol
//!
//! Every message serializes as `{"type": KIND, "data": {...}, "timestamp": RFC3339}`
//! with KIND one of `SIGNAL`, `STATS` or `LOG`.

use crate::regime::Regime;
use crate::risk::DailyStats;
use crate::signals::{SignalType, TradingSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalMessage {
    pub id: u64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub confidence: u8,
    pub regime: Regime,
    pub entry: Decimal,
    pub sl: Decimal,
    pub tp: Decimal,
    pub size: Decimal,
    pub reason: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&TradingSignal> for SignalMessage {
    fn from(signal: &TradingSignal) -> Self {
        Self {
            id: signal.signal_id,
            symbol: signal.symbol.clone(),
            signal_type: signal.signal_type,
            confidence: signal.confidence,
            regime: signal.regime,
            entry: signal.entry,
            sl: signal.stop_loss,
            tp: signal.take_profit,
            size: signal.size,
            reason: signal.reason.clone(),
            timestamp: DateTime::from_timestamp_millis(signal.timestamp),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "UPPERCASE")]
pub enum MessageBody {
    Signal(SignalMessage),
    Stats(DailyStats),
    Log(LogMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardMessage {
    #[serde(flatten)]
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
}

impl DashboardMessage {
    pub fn signal(signal: &TradingSignal) -> Self {
        Self::now(MessageBody::Signal(signal.into()))
    }

    pub fn stats(stats: DailyStats) -> Self {
        Self::now(MessageBody::Stats(stats))
    }

    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        Self {
            body: MessageBody::Log(LogMessage {
                level,
                message: message.into(),
                timestamp,
            }),
            timestamp,
        }
    }

    fn now(body: MessageBody) -> Self {
        Self {
            body,
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.body {
            MessageBody::Signal(_) => "SIGNAL",
            MessageBody::Stats(_) => "STATS",
            MessageBody::Log(_) => "LOG",
        }
    }

    pub fn as_signal(&self) -> Option<&SignalMessage> {
        match &self.body {
            MessageBody::Signal(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn as_stats(&self) -> Option<&DailyStats> {
        match &self.body {
            MessageBody::Stats(stats) => Some(stats),
            _ => None,
        }
    }

    pub fn as_log(&self) -> Option<&LogMessage> {
        match &self.body {
            MessageBody::Log(log) => Some(log),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signal_wire_format() {
        let signal = TradingSignal {
            signal_id: 7,
            symbol: "BTCUSDT".to_string(),
            signal_type: SignalType::Buy,
            confidence: 91,
            regime: Regime::Bull,
            entry: dec!(100),
            stop_loss: dec!(97),
            take_profit: dec!(106),
            size: dec!(2),
            risk_amount: dec!(6),
            reason: "MACD histogram crossed above zero".to_string(),
            timestamp: 1_700_000_000_000,
        };

        let json = DashboardMessage::signal(&signal).to_json().unwrap();
        assert_eq!(json["type"], "SIGNAL");
        assert_eq!(json["data"]["type"], "BUY");
        assert_eq!(json["data"]["confidence"], 91);
        assert_eq!(json["data"]["regime"], "BULL");
        assert_eq!(json["data"]["sl"], "97");
        assert_eq!(json["data"]["tp"], "106");
        assert_eq!(json["data"]["timestamp"], "2023-11-14T22:13:20Z");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_stats_and_log_kinds() {
        let stats = DailyStats {
            date: None,
            trades: 3,
            wins: 2,
            losses: 1,
            win_rate: dec!(2) / dec!(3),
            pnl: dec!(-12.5),
            drawdown: dec!(0.01),
            open_positions: 1,
            is_paused: true,
            signals_today: 4,
        };
        let json = DashboardMessage::stats(stats).to_json().unwrap();
        assert_eq!(json["type"], "STATS");
        assert_eq!(json["data"]["is_paused"], true);
        assert_eq!(json["data"]["signals_today"], 4);

        let log = DashboardMessage::log(LogLevel::Warn, "trading paused");
        assert_eq!(log.kind(), "LOG");
        let json = log.to_json().unwrap();
        assert_eq!(json["data"]["message"], "trading paused");
        assert_eq!(json["data"]["level"], "warn");
    }
}
