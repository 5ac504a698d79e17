//! Automove: move conversation threads between channels by reaction vote.

pub mod automove;
pub mod config;
pub mod error;
pub mod server;
pub mod slack;
pub mod store;

pub use error::{Error, Result};
