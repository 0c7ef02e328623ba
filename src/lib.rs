//! Signal lifecycle engine for algorithmic trading strategies.
//!
//! The engine drives a per-(symbol, strategy) state machine — idle,
//! scheduled, opened, active, closed/cancelled — identically whether it is
//! replaying historical candles or reacting to a live exchange feed. Every
//! time-sensitive read is routed through [`domain::context::ExecutionContext`]
//! so look-ahead bias is an architectural impossibility rather than a
//! convention.

pub mod config;
pub mod domain;
pub mod application;
pub mod infrastructure;
