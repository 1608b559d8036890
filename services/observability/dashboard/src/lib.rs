//! Signal Dashboard Server
//!
//! Pushes JSON messages to browser clients over WebSocket and exposes the
//! operator control surface (panic, resume, reset) over HTTP. The server knows
//! nothing about message contents beyond the `type` field; the engine decides
//! what is published.

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod server;

pub use client::{Client, ClientManager};
pub use config::DashboardConfig;
pub use control::{ControlReply, ControlSurface};
pub use error::{DashboardError, Result};
pub use server::DashboardServer;
