//! # chanrpc - in-process channel RPC and module scheduler
//!
//! Actor-style runtime for building servers out of independent modules:
//! - Channel RPC with fire-and-forget, blocking and callback-based calls
//! - Per-module event loop that runs one handler at a time
//! - Worker pool whose completions return to the owning module
//! - One-shot and recurring timers delivered on the module loop
//! - Operator console and message-type router on top of the call layer
//!
//! ## Architecture
//!
//! Each module owns its state and a [`module::Skeleton`]; other modules
//! reach it only through queues:
//! ```text
//!                   ┌──────────────── Module ────────────────┐
//!   Send / Call  →  │  Server ──┐                            │
//!   Commands     →  │  Command ─┤                            │
//!   Replies      →  │  Client ──┼─▶ Skeleton loop ─▶ handler │
//!   Completions  →  │  Workers ─┤    (one at a time)         │
//!   Timers       →  │  Timers ──┘                            │
//!                   └────────────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod chanrpc;
pub mod console;
pub mod module;
pub mod recovery;
pub mod router;
pub mod timer;
pub mod types;
pub mod worker;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, ErrorKind, FunctionId, Result};
