//! Fixed-capacity many-to-many message dispatch.
//!
//! [`dispatch::DispatchMatrix`] connects every registered producer to every
//! registered consumer through its own bounded SPSC link, built on the
//! lock-free ring in [`sync::spsc`].

pub mod dispatch;
mod spsc;
pub mod sync;
mod trace;

pub use dispatch::{
    ConfigError, DispatchConfig, DispatchMatrix, InputHandle, OutputHandle, UsageError,
};
pub use sync::spsc::Timeout;
pub use trace::init_tracing;
