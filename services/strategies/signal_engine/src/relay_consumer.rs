//! Relay consumers feeding the engine
//!
//! Both relays speak newline-delimited JSON over a Unix socket: candles on the
//! market data relay, [`ExecutionReport`]s on the execution relay. A line that
//! does not parse, or a candle the engine refuses, is logged and skipped; only
//! a closed engine ends the session. When the market data connection drops, candles
//! still queued are discarded before resubscribing; indicator history is kept.

use crate::candle::Candle;
use crate::config::RelayConfig;
use crate::coordinator::ExecutionReport;
use crate::engine::SignalEngine;
use crate::error::{EngineError, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    MarketData,
    Execution,
}

impl Feed {
    fn name(&self) -> &'static str {
        match self {
            Feed::MarketData => "market data",
            Feed::Execution => "execution",
        }
    }
}

/// Line counts for one connection
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub accepted: u64,
    pub malformed: u64,
}

pub struct RelayConsumer {
    engine: Arc<SignalEngine>,
    config: RelayConfig,
}

impl RelayConsumer {
    pub fn new(engine: Arc<SignalEngine>, config: RelayConfig) -> Self {
        Self { engine, config }
    }

    fn path(&self, feed: Feed) -> &str {
        match feed {
            Feed::MarketData => &self.config.market_data_relay_path,
            Feed::Execution => &self.config.execution_relay_path,
        }
    }

    /// Consume a relay until it cannot be reached within the configured
    /// number of attempts.
    pub async fn run(&self, feed: Feed) -> Result<()> {
        info!("Starting {} consumer: {}", feed.name(), self.path(feed));

        loop {
            let stream = self.connect(feed).await?;
            match self.read_session(stream, feed).await {
                Ok(summary) => info!(
                    "{} relay closed after {} events ({} malformed)",
                    feed.name(),
                    summary.accepted,
                    summary.malformed
                ),
                Err(e) => warn!("{} relay session ended: {}", feed.name(), e),
            }

            if feed == Feed::MarketData {
                self.engine.discard_buffered();
            }
            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn connect(&self, feed: Feed) -> Result<UnixStream> {
        let path = self.path(feed);
        let mut attempts = 0;
        loop {
            match UnixStream::connect(path).await {
                Ok(stream) => {
                    info!("Connected to {} relay", feed.name());
                    return Ok(stream);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.config.max_reconnect_attempts {
                        return Err(EngineError::RelayConnection {
                            message: format!(
                                "Failed to connect to {} relay {} after {} attempts: {}",
                                feed.name(),
                                path,
                                attempts,
                                e
                            ),
                        });
                    }
                    warn!(
                        "Failed to connect to {} relay (attempt {}): {}",
                        feed.name(),
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }

    /// Read JSON lines until EOF or until the engine stops accepting events
    pub async fn read_session<R>(&self, reader: R, feed: Feed) -> Result<SessionSummary>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut summary = SessionSummary::default();

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.dispatch(line, feed).await {
                Ok(()) => summary.accepted += 1,
                Err(e @ (EngineError::Json(_) | EngineError::Data { .. })) => {
                    summary.malformed += 1;
                    warn!("Skipping malformed {} event: {}", feed.name(), e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summary)
    }

    async fn dispatch(&self, line: &str, feed: Feed) -> Result<()> {
        match feed {
            Feed::MarketData => {
                let candle: Candle = serde_json::from_str(line)?;
                debug!("Candle {} @ {}", candle.symbol, candle.timestamp);
                self.engine.submit(candle).await
            }
            Feed::Execution => {
                let report: ExecutionReport = serde_json::from_str(line)?;
                debug!("Execution report {:?}", report);
                self.engine.report_execution(report).await
            }
        }
    }
}
