//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.

mod constants;
mod fixtures;
mod telemetry;

pub use constants::*;
pub use fixtures::TestEngine;
