//! Resilient access to the data store.
//!
//! Store calls go through a [`QueryExecutor`], which looks up a named
//! [`TimeoutProfile`], consults the [`CircuitBreaker`], enforces the profile's
//! timeout and retries transient failures following the [`RetryPolicy`].

mod circuit_breaker;
mod error;
mod executor;
mod retry_policy;
mod timeout_profile;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitStatus,
};
pub use error::{ExecutionError, StoreError};
pub use executor::QueryExecutor;
pub use retry_policy::RetryPolicy;
pub use timeout_profile::{
    TimeoutProfile, TimeoutProfiles, PROFILE_BACKGROUND, PROFILE_COMPLEX, PROFILE_NORMAL,
    PROFILE_QUICK,
};
