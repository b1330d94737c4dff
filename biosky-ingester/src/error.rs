//! Error types for the BioSky ingester

use crate::cbor::CborError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngesterError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("CBOR decode error: {0}")]
    Cbor(#[from] CborError),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Subscription already stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, IngesterError>;
