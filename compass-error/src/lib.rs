//! Unified error handling for the compass subsystem
//!
//! This crate provides a single error type used across all compass components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using CompassError
pub type Result<T> = std::result::Result<T, CompassError>;

/// Unified error type for all compass operations
#[derive(thiserror::Error, Debug)]
pub enum CompassError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("File too large: {path} ({size} bytes, max {max_size} bytes)")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        max_size: u64,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Parameter Storage Errors
    // ============================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Unsupported store version {found} (newest known is {supported})")]
    UnsupportedStoreVersion {
        found: u32,
        supported: u32,
    },

    // ============================================================================
    // Identity and Registry Errors
    // ============================================================================
    #[error("Invalid device id: {0:#010x}")]
    InvalidDeviceId(u32),

    #[error("No room for compass {device_id:#010x}: {slots} slots and {overflow} overflow entries in use")]
    ResourceExhausted {
        device_id: u32,
        slots: usize,
        overflow: usize,
    },

    #[error("Index {index} out of range (capacity {capacity})")]
    InvalidIndex {
        index: usize,
        capacity: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl CompassError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a storage error from a string
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// True when the error means a table ran out of room
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted { .. })
    }
}

// Allow converting from String to CompassError
impl From<String> for CompassError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to CompassError
impl From<&str> for CompassError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
