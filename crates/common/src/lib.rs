//! Common types shared by the Tribe session crates

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
