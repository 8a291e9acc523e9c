//! Tests against real repositories created with the `git` binary.

mod apply_tests;
mod common;
mod repo_tests;
