//! Position sizing, exit levels and the daily pause state machine
//!
//! `RiskManager` is owned by the coordinator task and is the only place the
//! global trading state changes:
//!
//! ```text
//! ACTIVE --(drawdown >= cap)--> PAUSED(Drawdown) --(rollover | resume | reset)--> ACTIVE
//! ACTIVE --(panic)-----------> PAUSED(Panic)    --(resume | reset)------------> ACTIVE
//! ```
//!
//! Drawdown is measured against the day-start equity and only ever grows
//! within a trading day.

use crate::candle::{trading_day_at, Candle};
use crate::config::RiskConfig;
use crate::error::{EngineError, Result};
use crate::regime::Regime;
use crate::scoring::ScoredSignal;
use crate::signals::{SignalType, TradingSignal};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Decimal places kept on position sizes
const SIZE_DECIMALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Drawdown,
    Panic,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PauseReason::Drawdown => f.write_str("daily drawdown limit"),
            PauseReason::Panic => f.write_str("panic"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradingState {
    Active,
    Paused(PauseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub stop_distance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionSize {
    pub size: Decimal,
    pub risk_amount: Decimal,
    pub notional: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Panic,
    /// Closed by the execution collaborator
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub signal_id: u64,
    pub symbol: String,
    pub direction: SignalType,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub size: Decimal,
    pub opened_at: i64,
    /// Set by panic; the position must be flattened
    pub pending_close: bool,
}

impl Position {
    pub fn from_signal(signal: &TradingSignal) -> Self {
        Self {
            signal_id: signal.signal_id,
            symbol: signal.symbol.clone(),
            direction: signal.signal_type,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            size: signal.size,
            opened_at: signal.timestamp,
            pending_close: false,
        }
    }

    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry) * self.size * self.direction.sign()
    }

    /// Stop or target touched by the candle's range. The stop wins when both are.
    pub fn exit_hit(&self, candle: &Candle) -> Option<(ExitReason, Decimal)> {
        let (stop_hit, target_hit) = match self.direction {
            SignalType::Buy => (
                candle.low <= self.stop_loss,
                candle.high >= self.take_profit,
            ),
            SignalType::Sell => (
                candle.high >= self.stop_loss,
                candle.low <= self.take_profit,
            ),
        };

        if stop_hit {
            Some((ExitReason::StopLoss, self.stop_loss))
        } else if target_hit {
            Some((ExitReason::TakeProfit, self.take_profit))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClosedTrade {
    pub signal_id: u64,
    pub symbol: String,
    pub direction: SignalType,
    pub entry: Decimal,
    pub exit: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub reason: ExitReason,
    pub closed_at: i64,
}

/// Result of recording a closed trade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub trade: ClosedTrade,
    /// The close pushed drawdown to the cap and paused trading
    pub breaker_tripped: bool,
}

/// Result of a panic command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicOutcome {
    /// Symbols newly marked for closure
    pub marked: Vec<String>,
    /// Pause that was already in effect, making the transition a no-op
    pub already_paused: Option<PauseReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyStats {
    pub date: Option<NaiveDate>,
    pub trades: u32,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: Decimal,
    pub pnl: Decimal,
    pub drawdown: Decimal,
    pub open_positions: usize,
    pub is_paused: bool,
    pub signals_today: u32,
}

/// Why a scored, quality-approved candidate was not emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    Paused(PauseReason),
    DailySignalLimit(u32),
    PositionOpen,
    MaxOpenPositions(usize),
    NonPositiveStopDistance,
    ZeroSize,
}

impl fmt::Display for GateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateRejection::Paused(reason) => write!(f, "trading paused ({})", reason),
            GateRejection::DailySignalLimit(max) => {
                write!(f, "daily signal limit of {} reached", max)
            }
            GateRejection::PositionOpen => f.write_str("position already open for symbol"),
            GateRejection::MaxOpenPositions(max) => {
                write!(f, "max open positions ({}) reached", max)
            }
            GateRejection::NonPositiveStopDistance => f.write_str("non-positive stop distance"),
            GateRejection::ZeroSize => f.write_str("position size rounds to zero"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    state: TradingState,
    day: Option<NaiveDate>,
    day_start_equity: Decimal,
    peak_equity: Decimal,
    realized_pnl: Decimal,
    drawdown: Decimal,
    trades: u32,
    wins: u32,
    losses: u32,
    signals_today: u32,
    positions: HashMap<String, Position>,
    /// Emitted signals awaiting a fill report (live mode only)
    pending: HashMap<u64, TradingSignal>,
    next_signal_id: u64,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let equity = config.starting_equity;
        Self {
            config,
            state: TradingState::Active,
            day: None,
            day_start_equity: equity,
            peak_equity: equity,
            realized_pnl: Decimal::ZERO,
            drawdown: Decimal::ZERO,
            trades: 0,
            wins: 0,
            losses: 0,
            signals_today: 0,
            positions: HashMap::new(),
            pending: HashMap::new(),
            next_signal_id: 1,
        }
    }

    pub fn state(&self) -> TradingState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        matches!(self.state, TradingState::Paused(_))
    }

    pub fn equity(&self) -> Decimal {
        self.day_start_equity + self.realized_pnl
    }

    pub fn drawdown(&self) -> Decimal {
        self.drawdown
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Emitted signals still waiting on a fill report
    pub fn awaiting_fill(&self) -> usize {
        self.pending.len()
    }

    /// Stop and target for an entry. ATR is rounded to the price precision
    /// first so the target distance is an exact multiple of the stop distance.
    pub fn exit_levels(
        &self,
        direction: SignalType,
        entry: Decimal,
        atr: Decimal,
    ) -> Option<ExitLevels> {
        let atr = atr.round_dp(self.config.price_decimals);
        let stop_distance = atr * self.config.stop_atr_multiple;
        if stop_distance <= Decimal::ZERO {
            return None;
        }
        let target_distance = stop_distance * self.config.reward_risk_ratio;
        let sign = direction.sign();

        Some(ExitLevels {
            stop_loss: entry - sign * stop_distance,
            take_profit: entry + sign * target_distance,
            stop_distance,
        })
    }

    /// Risked capital scales with confidence up to `max_risk_fraction` of
    /// equity; notional is capped at `max_notional_fraction` of equity.
    pub fn position_size(&self, confidence: u8, entry: Decimal, stop_distance: Decimal) -> PositionSize {
        let equity = self.equity().max(Decimal::ZERO);
        let confidence = Decimal::from(confidence.min(100)) / dec!(100);
        let risk_budget = equity * self.config.max_risk_fraction * confidence;

        let mut size = risk_budget / stop_distance;
        let notional_cap = equity * self.config.max_notional_fraction;
        if size * entry > notional_cap {
            size = notional_cap / entry;
        }
        let size = size.round_dp_with_strategy(SIZE_DECIMALS, RoundingStrategy::ToZero);

        PositionSize {
            size,
            risk_amount: size * stop_distance,
            notional: size * entry,
        }
    }

    /// Final gate for a candidate that passed scoring and quality.
    pub fn gate(
        &mut self,
        scored: &ScoredSignal,
        regime: Regime,
        reason: String,
    ) -> std::result::Result<TradingSignal, GateRejection> {
        if let TradingState::Paused(pause) = self.state {
            return Err(GateRejection::Paused(pause));
        }
        if self.signals_today >= self.config.max_signals_per_day {
            return Err(GateRejection::DailySignalLimit(
                self.config.max_signals_per_day,
            ));
        }

        let candidate = &scored.candidate;
        let awaiting_fill = self.pending.values().any(|s| s.symbol == candidate.symbol);
        if self.positions.contains_key(&candidate.symbol) || awaiting_fill {
            return Err(GateRejection::PositionOpen);
        }
        if self.positions.len() + self.pending.len() >= self.config.max_open_positions {
            return Err(GateRejection::MaxOpenPositions(
                self.config.max_open_positions,
            ));
        }

        let entry = candidate.snapshot.close;
        let levels = self
            .exit_levels(candidate.direction, entry, candidate.snapshot.atr)
            .ok_or(GateRejection::NonPositiveStopDistance)?;
        let sizing = self.position_size(scored.total, entry, levels.stop_distance);
        if sizing.size.is_zero() {
            return Err(GateRejection::ZeroSize);
        }

        let signal = TradingSignal {
            signal_id: self.next_signal_id,
            symbol: candidate.symbol.clone(),
            signal_type: candidate.direction,
            confidence: scored.total,
            regime,
            entry,
            stop_loss: levels.stop_loss,
            take_profit: levels.take_profit,
            size: sizing.size,
            risk_amount: sizing.risk_amount,
            reason,
            timestamp: candidate.snapshot.timestamp,
        };
        self.next_signal_id += 1;
        self.signals_today += 1;

        if self.config.paper_trading {
            self.positions
                .insert(signal.symbol.clone(), Position::from_signal(&signal));
        } else {
            self.pending.insert(signal.signal_id, signal.clone());
        }
        Ok(signal)
    }

    /// Fill report from the execution collaborator. Refused while paused so no
    /// in-flight signal opens a position after panic or a breaker trip.
    pub fn open_position(
        &mut self,
        signal_id: u64,
        fill_price: Option<Decimal>,
        size: Option<Decimal>,
    ) -> Result<&Position> {
        if let TradingState::Paused(reason) = self.state {
            self.pending.remove(&signal_id);
            return Err(EngineError::StateConflict {
                message: format!("fill for signal {} refused: paused ({})", signal_id, reason),
            });
        }
        let signal = self
            .pending
            .remove(&signal_id)
            .ok_or_else(|| EngineError::StateConflict {
                message: format!("no pending signal {}", signal_id),
            })?;
        if self.positions.contains_key(&signal.symbol) {
            return Err(EngineError::StateConflict {
                message: format!("position already open for {}", signal.symbol),
            });
        }

        let mut position = Position::from_signal(&signal);
        if let Some(price) = fill_price {
            position.entry = price;
        }
        if let Some(size) = size {
            position.size = size;
        }
        let symbol = signal.symbol;
        Ok(self.positions.entry(symbol).or_insert(position))
    }

    /// The execution collaborator passed on a signal; its symbol and slot
    /// are free again.
    pub fn decline(&mut self, signal_id: u64) -> Option<TradingSignal> {
        self.pending.remove(&signal_id)
    }

    /// Drop signals that have waited `pending_fill_ttl_secs` of candle time
    /// without a fill, or that were emitted on an earlier trading day.
    pub fn expire_pending(&mut self, now: i64) -> Vec<TradingSignal> {
        let ttl_ms = i64::try_from(self.config.pending_fill_ttl_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        let today = self.day;
        let stale: Vec<u64> = self
            .pending
            .values()
            .filter(|s| {
                now.saturating_sub(s.timestamp) >= ttl_ms
                    || matches!((today, trading_day_at(s.timestamp)), (Some(t), Some(d)) if d < t)
            })
            .map(|s| s.signal_id)
            .collect();

        let mut expired: Vec<TradingSignal> = stale
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .collect();
        expired.sort_by_key(|s| s.signal_id);
        expired
    }

    /// Close the symbol's position and account for the realized PnL.
    pub fn close_position(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        reason: ExitReason,
        closed_at: i64,
    ) -> Option<CloseOutcome> {
        let position = self.positions.remove(symbol)?;
        let pnl = position.pnl_at(exit_price);
        let trade = ClosedTrade {
            signal_id: position.signal_id,
            symbol: position.symbol,
            direction: position.direction,
            entry: position.entry,
            exit: exit_price,
            size: position.size,
            pnl,
            reason,
            closed_at,
        };

        let breaker_tripped = self.record_pnl(pnl);
        Some(CloseOutcome {
            trade,
            breaker_tripped,
        })
    }

    /// Account for a realized result. Returns true when this trade tripped
    /// the circuit breaker.
    pub fn record_pnl(&mut self, pnl: Decimal) -> bool {
        self.realized_pnl += pnl;
        self.trades += 1;
        if pnl > Decimal::ZERO {
            self.wins += 1;
        } else {
            self.losses += 1;
        }

        let equity = self.equity();
        self.peak_equity = self.peak_equity.max(equity);
        if self.day_start_equity > Decimal::ZERO {
            let current = (self.peak_equity - equity) / self.day_start_equity;
            self.drawdown = self.drawdown.max(current);
        }

        if self.drawdown >= self.config.max_daily_drawdown && !self.is_paused() {
            self.state = TradingState::Paused(PauseReason::Drawdown);
            return true;
        }
        false
    }

    /// Simulated exits for the candle's symbol, paper mode only. Live
    /// positions belong to the execution collaborator and close through its
    /// reports. Panic-marked paper positions are flattened at the close.
    pub fn check_exits(&mut self, candle: &Candle) -> Option<CloseOutcome> {
        if !self.config.paper_trading {
            return None;
        }
        let position = self.positions.get(&candle.symbol)?;
        let exit = if position.pending_close {
            Some((ExitReason::Panic, candle.close))
        } else if self.config.simulate_exits {
            position.exit_hit(candle)
        } else {
            None
        };

        let (reason, price) = exit?;
        self.close_position(&candle.symbol, price, reason, candle.timestamp)
    }

    /// Mark every open position for closure and force PAUSED.
    pub fn panic(&mut self) -> PanicOutcome {
        let mut marked: Vec<String> = self
            .positions
            .values_mut()
            .filter(|p| !p.pending_close)
            .map(|p| {
                p.pending_close = true;
                p.symbol.clone()
            })
            .collect();
        marked.sort();
        self.pending.clear();

        let already_paused = match self.state {
            TradingState::Paused(reason) => Some(reason),
            TradingState::Active => None,
        };
        // A drawdown pause is upgraded so rollover cannot lift it
        self.state = TradingState::Paused(PauseReason::Panic);

        PanicOutcome {
            marked,
            already_paused,
        }
    }

    /// Clear the pause without touching the day's accounting.
    pub fn resume(&mut self) -> Result<PauseReason> {
        match self.state {
            TradingState::Paused(reason) => {
                self.state = TradingState::Active;
                Ok(reason)
            }
            TradingState::Active => Err(EngineError::StateConflict {
                message: "resume requested while active".to_string(),
            }),
        }
    }

    /// Clear any pause, drop unfilled signals and re-baseline the day at the
    /// current equity.
    pub fn reset(&mut self) -> Option<PauseReason> {
        let previous = match self.state {
            TradingState::Paused(reason) => Some(reason),
            TradingState::Active => None,
        };
        self.state = TradingState::Active;
        self.pending.clear();
        self.start_day(self.day);
        previous
    }

    fn start_day(&mut self, day: Option<NaiveDate>) {
        let equity = self.equity();
        self.day = day;
        self.day_start_equity = equity;
        self.peak_equity = equity;
        self.realized_pnl = Decimal::ZERO;
        self.drawdown = Decimal::ZERO;
        self.trades = 0;
        self.wins = 0;
        self.losses = 0;
        self.signals_today = 0;
    }

    /// Advance the trading day. Returns true on rollover. A drawdown pause
    /// ends with the day; a panic pause does not.
    pub fn roll_day(&mut self, day: NaiveDate) -> bool {
        match self.day {
            None => {
                self.day = Some(day);
                false
            }
            Some(current) if day > current => {
                self.start_day(Some(day));
                if self.state == TradingState::Paused(PauseReason::Drawdown) {
                    self.state = TradingState::Active;
                }
                true
            }
            Some(_) => false,
        }
    }

    pub fn stats(&self) -> DailyStats {
        let win_rate = if self.trades == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(self.wins) / Decimal::from(self.trades)
        };

        DailyStats {
            date: self.day,
            trades: self.trades,
            wins: self.wins,
            losses: self.losses,
            win_rate,
            pnl: self.realized_pnl,
            drawdown: self.drawdown,
            open_positions: self.positions.len(),
            is_paused: self.is_paused(),
            signals_today: self.signals_today,
        }
    }
}
