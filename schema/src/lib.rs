//! Schema definitions for Gemstone
//!
//! This crate contains shared data structures used across the Gemstone
//! ecosystem: process definitions, runtime views, resource samples, and the
//! HTTP response envelope. All types implement JSON Schema generation for
//! external consumption.
//!
//! Wire format note: everything serializes with snake_case field names so
//! that `processes.json` files and API payloads remain stable.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod process;
pub mod stats;

pub use process::*;
pub use stats::*;

/// Generic response envelope returned by every control-plane endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
pub struct ApiResponse {
    /// Whether the request succeeded
    pub success: bool,
    /// Optional human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error description when `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    /// Successful response carrying a payload
    pub fn ok<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            ..Self::default()
        }
    }

    /// Successful response carrying only a message
    pub fn ok_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Successful response with both a message and a payload
    pub fn ok_with<T: Serialize>(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: serde_json::to_value(data).ok(),
            ..Self::default()
        }
    }

    /// Failed response carrying an error description
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
