//! Error taxonomy for the gateway
//!
//! Most code returns `anyhow::Result` with context. The variants here are the
//! ones the orchestrator needs to tell apart: hardware failures abort startup,
//! remote failures are retried.

use std::fmt;

/// Port direction, used in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to initialize MIDI {0}: {1}")]
    MidiInit(PortDirection, String),

    #[error("No MIDI {0} port found matching pattern: {1}")]
    PortNotFound(PortDirection, String),

    #[error("Failed to connect to MIDI {0} port '{1}': {2}")]
    PortConnect(PortDirection, String, String),

    #[error("Failed to connect to OBS at {0}: {1}")]
    RemoteConnect(String, String),

    #[error("OBS rejected the websocket password")]
    Authentication,

    #[error("OBS not connected")]
    NotConnected,

    #[error("LED intensity out of range (green={green}, red={red}, must be 0-3)")]
    LedRange { green: u8, red: u8 },
}

impl GatewayError {
    /// Hardware errors have no substitute and end the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::MidiInit(..)
                | GatewayError::PortNotFound(..)
                | GatewayError::PortConnect(..)
        )
    }
}

/// Whether an error chain contains a fatal gateway error
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<GatewayError>()
            .is_some_and(GatewayError::is_fatal)
    })
}
