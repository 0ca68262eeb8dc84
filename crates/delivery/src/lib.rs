#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]
//! Resumable, verified payload delivery
//!
//! Pulls a payload from an ordered list of candidate sources (HTTPS server,
//! HTTP mirror, LAN peer), verifying bytes as they stream in and committing
//! durable checkpoints so an interrupted transfer resumes where it stopped
//! instead of starting over. Source failover is sequential and driven by
//! per-source retry ceilings; whole-payload failures feed an exponential
//! backoff gate.

mod client;
mod config;
mod orchestrator;
mod retry;
mod speed;
mod transfer;

pub use client::FetchClient;
pub use config::{DeliveryConfig, DeliveryResult, ExpectedPayload, FetchParams, RetryConfig};
pub use orchestrator::{
    AttemptDriver, CancelHandle, DeliveryOutcome, DeliveryState, DeliveryStatus,
    DownloadOrchestrator,
};
