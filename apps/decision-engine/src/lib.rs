// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access
    )
)]

//! Decision Engine - Rust Core Library
//!
//! Deterministic decision-and-execution engine for the Quorum trading
//! system.
//!
//! # Pipeline
//!
//! A run moves through fixed stages, in order:
//!
//! - **Analysts** (`analysts`): independent capabilities score each
//!   instrument from market data; one failing analyst degrades the run
//!   instead of aborting it.
//! - **Aggregation** (`pipeline`): per-instrument signals merge into a
//!   single opinion with a confidence-weighted score.
//! - **Synthesis** (`pipeline`): opinions become sized trade decisions
//!   against the live portfolio snapshot.
//! - **Risk** (`risk`): every decision passes the limit engine, which
//!   scales it down or blocks it outright.
//! - **Gate** (`gate`): the safety-level state machine decides whether
//!   a decision is simulated, parked for approval, or executed.
//! - **Execution** (`execution`, `broker`): approved orders go to the
//!   broker adapter with bounded retries.
//!
//! Alongside the pipeline, the risk monitor (`monitor`) watches the
//! account on its own clock and can force the HALTED level at any
//! time, and the HTTP API (`server`) exposes operator controls.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

pub mod analysts;
pub mod broker;
pub mod config;
pub mod engine;
pub mod execution;
pub mod gate;
pub mod journal;
pub mod marketdata;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod pipeline;
pub mod risk;
pub mod server;

// Configuration
pub use config::{Config, ConfigError, load_config, load_config_from_string};

// Engine orchestration
pub use engine::{Engine, EngineError, EngineStatus, InstrumentResult, RunReport};
pub use pipeline::RunOutcome;

// Brokers
pub use broker::{AlpacaBroker, BrokerAdapter, BrokerError, PaperBroker};

// Safety gate
pub use gate::{GateError, GateOutcome, SafetyController, SafetyLevel};

// Monitoring and observability
pub use journal::{Journal, JournalRecord, JsonlJournal, MemoryJournal};
pub use monitor::RiskMonitor;
pub use notify::{EngineEvent, Notifier, build_notifier};

// Market data
pub use marketdata::{MarketData, StaticMarketData};

// HTTP control API
pub use server::create_router;
