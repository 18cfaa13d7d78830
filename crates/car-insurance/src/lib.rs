//! Car insurance backend: cars, insurance policies, claims and the
//! background job that records policy expirations.

pub mod config;
pub mod error;
pub mod expiry;
pub mod insurance;
pub mod seed;
pub mod telemetry;
