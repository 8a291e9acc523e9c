//! End-to-end tests of the stagecraft commands.

mod common;
mod dockerfile_digest_tests;
mod git_mapping_tests;
mod stages_tests;
