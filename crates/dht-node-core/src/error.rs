//! Node-level error type
//!
//! Component errors stay next to their component ([`ProtocolError`],
//! [`LinkError`], [`ControlError`]). [`NodeError`] is what reaches the
//! runtime loop boundary, where every variant is fatal.
//!
//! [`ProtocolError`]: crate::sensors::ProtocolError

use heapless::String;
use thiserror_no_std::Error;

use crate::connectivity::LinkError;
use crate::control::ControlError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("WiFi link lost: {0}")]
    Link(LinkError),

    #[error("control surface failed: {0}")]
    Control(ControlError),

    #[error("fatal runtime fault: {0}")]
    Fatal(String<64>),
}

impl From<LinkError> for NodeError {
    fn from(value: LinkError) -> Self {
        Self::Link(value)
    }
}

impl From<ControlError> for NodeError {
    fn from(value: ControlError) -> Self {
        Self::Control(value)
    }
}

impl NodeError {
    /// Builds a [`NodeError::Fatal`], truncating the message to fit.
    pub fn fatal(message: &str) -> Self {
        let mut text = String::new();
        for ch in message.chars() {
            if text.push(ch).is_err() {
                break;
            }
        }
        Self::Fatal(text)
    }
}
