use crate::protocol::DecodeError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GloveError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Scan time must be a finite, non-negative number of seconds, got {0}")]
    InvalidScanTime(f32),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Failed to start notifications: {0}")]
    SubscribeFailure(String),

    #[error("Failed to stop notifications: {0}")]
    UnsubscribeFailure(String),

    #[error("Device disconnected")]
    UnexpectedDisconnect,

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Bluetooth(#[from] btleplug::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
