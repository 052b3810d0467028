//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.

#![allow(dead_code)]

mod constants;
mod fakes;
mod fixtures;

pub use constants::*;
pub use fakes::{RecordingProvider, ScriptedStore};
pub use fixtures::{build_service, endpoint, subscription, test_config};
