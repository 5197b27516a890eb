//! RibbonWorm Core Types
//!
//! This crate defines the fundamental data structures shared by the
//! discovery, relay and connection crates, including both wire formats.

mod announcement;
mod error;
mod relay_request;
mod types;

pub use announcement::*;
pub use error::*;
pub use relay_request::*;
pub use types::*;
