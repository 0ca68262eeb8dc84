#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the upd payload delivery core
//!
//! This crate provides fundamental types used throughout the system:
//! download source kinds, payload classification, and source descriptors.

pub mod source;

// Re-export commonly used types
pub use source::{DownloadSource, PayloadSource, SourceSet};

use serde::{Deserialize, Serialize};

/// Classification of a successfully applied payload, for reporting.
///
/// `ForcedFull` is a full payload transferred when a delta was available
/// for the update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadType {
    Full,
    Delta,
    ForcedFull,
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "Full"),
            Self::Delta => write!(f, "Delta"),
            Self::ForcedFull => write!(f, "ForcedFull"),
        }
    }
}
