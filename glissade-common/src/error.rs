//! Error types for Glissade

use thiserror::Error;

/// Main error type for Glissade operations
#[derive(Error, Debug)]
pub enum GlissadeError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid mapping: {0}")]
    Mapping(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("macOS error: {0}")]
    MacOS(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for GlissadeError {
    fn from(e: serde_json::Error) -> Self {
        GlissadeError::Serialization(e.to_string())
    }
}

/// Result type alias for Glissade operations
pub type GlissadeResult<T> = Result<T, GlissadeError>;

/// Input-subsystem errors
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Accessibility permission required")]
    AccessibilityRequired,

    #[error("Event tap error: {0}")]
    EventTap(String),

    #[error("HID device error: {0}")]
    HidDevice(String),

    #[error("Display link error: code {0}")]
    DisplayLink(i32),

    #[error("IOKit error: code {0}")]
    IOKit(i32),
}
