//! Adjudication core for a third-party health-insurance administrator: member
//! eligibility, benefit coverage, and the claim and pre-authorization lifecycles.

pub mod adjudication;
pub mod config;
pub mod error;
pub mod telemetry;
