//! Mobile-money payment gateway.
//!
//! Collects payments through MTN and Airtel mobile money, tracks each one
//! through its lifecycle, ingests provider webhooks and reconciles completed
//! payments daily.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
