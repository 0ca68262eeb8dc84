#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Durable download progress for upd
//!
//! This crate persists everything needed to resume a payload transfer after
//! a process crash or device reboot: the byte offset, the mid-stream hash
//! contexts, attempt counters, and the backoff bookkeeping the policy crate
//! layers on top. A structurally invalid record always reads back as absent,
//! forcing a clean restart rather than a corrupted resume.

pub mod keys;
mod record;
mod store;

pub use record::{record_update_check, ProgressRecord, ResumeState};
pub use store::ProgressStore;
