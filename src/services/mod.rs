//! Domain services built on the completion client.
//!
//! ARCHITECTURE
//! ============
//! Service modules own prompts and result decoding so the request
//! controller can stay focused on state transitions.

pub mod tax;
