//! In-process channel RPC.
//!
//! Three call semantics share one substrate:
//!   - **Send**: fire-and-forget, waits for queue space
//!   - **Call**: blocking round trip through the client's single reply slot
//!   - **Async call**: callback-based, never waits, bounded by pending count
//!
//! ```text
//!   Client ──CallInfo──▶ [ CallQueue ] ──▶ Server::exec (owning task)
//!     ▲                                          │
//!     └──────────────ReplyInfo───────────────────┘
//! ```

mod client;
mod envelope;
mod registry;
mod server;
mod value;

pub use client::{AsyncCaller, Client};
pub use envelope::{CallInfo, Callback, ReplyInfo};
pub use registry::{FunctionRegistry, Handler, Shape};
pub use server::{Server, ServerRef};
pub use value::{downcast, Args, Ret, Value};
