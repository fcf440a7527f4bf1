//! Driver worker communication.
//!
//! Networked engines are reached through a long-running worker process that
//! hosts their native wire drivers. The worker keeps database sessions open;
//! this side only sends SQL and reads rows back.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │  WorkerConnection ── WorkerConnection ── ...  │
//! │          \               /                    │
//! │           WorkerClient (shared)               │
//! │   - request ids for concurrent correlation    │
//! │   - background reader task                    │
//! └───────────────────────────────────────────────┘
//!          stdin (NDJSON) │ ▲ stdout (NDJSON)
//!                         ▼ │
//! ┌───────────────────────────────────────────────┐
//! │   Driver worker: session.open / session.close │
//! │   session.ping / query.execute                │
//! └───────────────────────────────────────────────┘
//! ```

mod client;
mod error;
pub mod protocol;

pub use client::WorkerClient;
pub use error::{WorkerError, WorkerResult};
