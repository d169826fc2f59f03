//! Common utilities for mnemosyne
//!
//! This crate provides the error taxonomy, the violation payload produced by
//! document validation, and dotted-path helpers over BSON documents.

pub mod error;
pub mod path;
pub mod violation;

pub use error::{MnemosyneError, Result};
pub use violation::{Violation, Violations};
