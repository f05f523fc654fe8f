//! tether-core: correlation engine for callback-driven host APIs
//!
//! Host UI toolkits answer "start this screen and tell me the result" or
//! "ask the user for these permissions" through a callback on the screen
//! object, not a return value. This crate turns each such exchange into one
//! awaitable call: the request side registers a response slot under a
//! correlation key, fires the host request, and waits; the host callback is
//! routed back by key and fulfils the slot.
//!
//! # Architecture
//!
//! ```text
//! request ─► Dispatcher ─► Registry.register(key, slot) ─► host request
//!                 │                                          │
//!             slot.receive()                          host callback
//!                 ▲                                          │
//!                 └── ExecutionContext ◄── slot.send ◄── Registry.find(key)
//! ```
//!
//! # Modules
//!
//! - `key`: request codes and correlation keys
//! - `slot`: one-shot response slot with open/fulfilled/consumed/closed states
//! - `registry`: per-session key → slot mapping
//! - `context`: designated execution context and its job loop
//! - `dispatcher`: request/response cycle shared by all request kinds
//! - `activity`: start-activity-for-result dispatch
//! - `permission`: runtime permission dispatch
//! - `session`: session-scoped registry ownership
//! - `config`: TOML configuration
//! - `logging`: tracing subscriber setup
//! - `error`: error types
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod activity;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod logging;
pub mod permission;
pub mod registry;
pub mod session;
pub mod slot;

pub use activity::{ActivityLauncher, ActivityResult, ActivityResultDispatcher, ResultCode};
pub use config::TetherConfig;
pub use context::{ExecutionContext, MainLoop, MainThread};
pub use dispatcher::{Delivery, Dispatcher};
pub use error::{Error, RegistryError, Result, SlotError};
pub use key::{CorrelationKey, RequestCode, RequestKind};
pub use permission::{
    GrantResult, PermissionDispatcher, PermissionHost, PermissionResult, PermissionStatus,
};
pub use registry::Registry;
pub use session::{SessionIdentity, SessionKey, SessionStore};
pub use slot::{ResponseSlot, SlotState};
