//! ACP Orchestrator - admission control and the periodic tick
//!
//! The control plane has no worker threads of its own. A single timer calls
//! the tick, and the tick moves work forward by calling the store:
//!
//! ```text
//! ┌──────────────┐   every tick_interval_ms   ┌─────────────────────────┐
//! │  TickRunner  │ ─────────────────────────▶ │ process_control_plane_  │
//! │ (single-     │                            │ tick                    │
//! │  flight)     │                            │  1. plan pending tasks  │
//! └──────────────┘                            │  2. unblock ready jobs  │
//!                                             │  3. chief: limit        │
//!                                             │  4. dispatch            │
//!                                             └───────────┬─────────────┘
//!                                                         │ TickStore
//!                                             ┌───────────▼─────────────┐
//!                                             │  acp_storage::StateStore │
//!                                             └─────────────────────────┘
//! ```
//!
//! Workers claim and report through the same store, concurrently with the
//! tick. [`ControlPlane`] bundles the store and the runner for callers that
//! want both.

pub mod chief;
mod control_plane;
pub mod tick;
mod ticker;

pub use chief::{decide_dispatch_limit, ChiefOptions, DEFAULT_MAX_PARALLELISM};
pub use control_plane::{ControlPlane, HealthReport};
pub use tick::{process_control_plane_tick, TickOptions, TickStore, TickSummary};
pub use ticker::TickRunner;
