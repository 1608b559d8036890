//! Trailing per-symbol trade outcomes feeding the historical-performance score

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Win/loss record of the last `window` closed trades for one symbol
#[derive(Debug, Clone, Serialize)]
pub struct SymbolPerformanceHistory {
    window: usize,
    outcomes: VecDeque<bool>,
    pub total_trades: u64,
    pub total_pnl: Decimal,
}

impl SymbolPerformanceHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            outcomes: VecDeque::with_capacity(window),
            total_trades: 0,
            total_pnl: Decimal::ZERO,
        }
    }

    /// Record a closed trade. Break-even counts as a loss.
    pub fn record(&mut self, pnl: Decimal) {
        self.outcomes.push_back(pnl > Decimal::ZERO);
        if self.outcomes.len() > self.window {
            self.outcomes.pop_front();
        }
        self.total_trades += 1;
        self.total_pnl += pnl;
    }

    pub fn trades(&self) -> usize {
        self.outcomes.len()
    }

    pub fn wins(&self) -> usize {
        self.outcomes.iter().filter(|won| **won).count()
    }

    /// Win rate over the trailing window, `None` with no trades
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.outcomes.is_empty() {
            None
        } else {
            Some(Decimal::from(self.wins()) / Decimal::from(self.trades()))
        }
    }
}

/// Histories for every symbol that has closed a trade
#[derive(Debug, Clone)]
pub struct PerformanceBook {
    window: usize,
    symbols: HashMap<String, SymbolPerformanceHistory>,
}

impl PerformanceBook {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            symbols: HashMap::new(),
        }
    }

    pub fn record(&mut self, symbol: &str, pnl: Decimal) {
        let window = self.window;
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolPerformanceHistory::new(window))
            .record(pnl);
    }

    pub fn get(&self, symbol: &str) -> Option<&SymbolPerformanceHistory> {
        self.symbols.get(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trailing_window() {
        let mut history = SymbolPerformanceHistory::new(4);
        for pnl in [dec!(-1), dec!(-1), dec!(2), dec!(3), dec!(1)] {
            history.record(pnl);
        }
        assert_eq!(history.trades(), 4);
        assert_eq!(history.win_rate(), Some(dec!(0.75)));
        assert_eq!(history.total_trades, 5);
        assert_eq!(history.total_pnl, dec!(4));
    }

    #[test]
    fn test_book_tracks_symbols_separately() {
        let mut book = PerformanceBook::new(20);
        for _ in 0..4 {
            book.record("ETHUSDT", dec!(10));
        }
        book.record("ETHUSDT", dec!(0));
        book.record("BTCUSDT", dec!(-5));

        assert_eq!(book.get("ETHUSDT").unwrap().win_rate(), Some(dec!(0.8)));
        assert_eq!(book.get("BTCUSDT").unwrap().win_rate(), Some(dec!(0)));
        assert!(book.get("SOLUSDT").is_none());
    }
}
