//! Shared types for the credential refresh workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
