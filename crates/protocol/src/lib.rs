//! Data types exchanged with the streaming avatar service.
//!
//! This crate contains the serde-serializable shapes used when talking to the
//! remote session service: the start configuration, event names, speak tasks
//! and connection quality values. They are the "protocol layer" and carry no
//! behaviour beyond conversion to and from their wire form.
//!
//! Lifecycle orchestration is built on top of these types in `avatar-session`.

pub mod config;
pub mod events;
pub mod quality;
pub mod task;

pub use config::*;
pub use events::*;
pub use quality::*;
pub use task::*;
