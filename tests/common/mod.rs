//! Common test utilities and helpers.
//!
//! This module provides shared functionality for the integration tests:
//! a synthetic PE image builder and temporary-file helpers.
#![allow(dead_code)]

pub mod pe_builder;
pub mod test_utils;

pub use pe_builder::*;
pub use test_utils::*;
