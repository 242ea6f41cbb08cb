//! # Pressroom Core
//!
//! Shared configuration and error plumbing used by every Pressroom crate.

pub mod config;
pub mod error;

pub use config::PressroomConfig;
pub use error::{PressroomError, Result};
