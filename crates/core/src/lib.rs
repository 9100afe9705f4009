//! Domain model for the council debate pipeline.
//!
//! Everything that mutates a [`Session`] goes through [`Session::apply`], so a
//! session rebuilt from its log is indistinguishable from the live one.

pub mod domain;
pub mod error;
pub mod similarity;

pub use domain::*;
pub use error::{CoreError, CoreResult};
