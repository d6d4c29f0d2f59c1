//! Live circular queries.
//!
//! # Modules
//!
//! - [`engine`] — [`LiveQuery`] and the per-key classification machinery.
//! - [`event`] — [`QueryEvent`] payloads and [`QueryEventKind`].
//! - [`registration`] — cancellable [`CallbackRegistration`] handles.

pub mod engine;
pub mod event;
pub mod registration;

pub use engine::LiveQuery;
pub use event::{QueryEvent, QueryEventKind};
pub use registration::CallbackRegistration;
