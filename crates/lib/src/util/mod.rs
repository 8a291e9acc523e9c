//! Shared utilities.
//!
//! Common utilities used across the crate including hashing, slugs, shell
//! quoting and test helpers.

pub mod hash;
pub mod shell;

#[cfg(test)]
pub mod testutil;
