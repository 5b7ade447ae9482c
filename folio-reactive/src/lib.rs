//! # folio-reactive: Reactive effect engine for Folio
//!
//! Observable state plus cancellable, retryable async pipelines. Entities
//! compose these primitives instead of inheriting them.
//!
//! ## Architecture
//!
//! ```text
//! UI action
//!     │
//!     ▼
//! Effect::invoke ──► Concurrency policy ──► handler task (tokio)
//!                                              │
//!                          EffectContext::attempt (retry, cancel)
//!                                              │
//!                          EffectContext::commit (gated by Scope)
//!                                              │
//!                                              ▼
//!                                     LiveData::set ──► subscribers
//! ```
//!
//! ## Modules
//!
//! - [`live_data`]: Observable containers and derived views
//! - [`scope`]: Lifecycle: cancellation + commit gate
//! - [`effect`]: Pipelines and concurrency operators
//! - [`retry`]: Backoff policy and transient-failure classification

pub mod live_data;
pub mod scope;
pub mod effect;
pub mod retry;

// Re-exports for convenience
pub use effect::{Attempt, Concurrency, Dispatch, Effect, EffectContext, Loading};
pub use live_data::{Computed, LiveData, Subscription};
pub use retry::{RetryPolicy, Retryable};
pub use scope::{Gate, Scope};
pub use tokio_util::sync::CancellationToken;
