//! Client-side state for the tax assistant panels.
//!
//! ARCHITECTURE
//! ============
//! `request` holds the per-panel controller that every AI call flows
//! through. `stream` folds streamed chunks for it, and `error_info` turns
//! failures into the user-facing error panel. `chat` models the streaming
//! chat panel on top of a controller. `session` carries the signed-in user
//! and taxpayer profile.

pub mod chat;
pub mod error_info;
pub mod request;
pub mod session;
pub mod stream;
