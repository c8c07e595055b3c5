//! Call envelopes passed to the executor.

/// Action the executor's debugger hook listens on for websocket frames.
pub const ACTION_WEBSOCKET_MESSAGE: &str = "onWebsocketMsg";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("call action is empty")]
    EmptyAction,

    #[error("window {offset}+{length} exceeds buffer of {buffer_len} bytes")]
    OutOfBounds {
        offset: usize,
        length: usize,
        buffer_len: usize,
    },
}

/// One outbound call: an action name plus a window into a borrowed buffer.
///
/// Built per call and never retained, so the buffer is only borrowed. A
/// zero-length window is valid and dispatches an empty payload.
#[derive(Debug, Clone, Copy)]
pub struct CallEnvelope<'a> {
    action: &'a str,
    buffer: &'a [u8],
    offset: usize,
    length: usize,
}

impl<'a> CallEnvelope<'a> {
    pub fn new(
        action: &'a str,
        buffer: &'a [u8],
        offset: usize,
        length: usize,
    ) -> Result<Self, EnvelopeError> {
        if action.is_empty() {
            return Err(EnvelopeError::EmptyAction);
        }
        match offset.checked_add(length) {
            Some(end) if end <= buffer.len() => Ok(Self {
                action,
                buffer,
                offset,
                length,
            }),
            _ => Err(EnvelopeError::OutOfBounds {
                offset,
                length,
                buffer_len: buffer.len(),
            }),
        }
    }

    /// Envelope covering the whole buffer.
    pub fn whole(action: &'a str, buffer: &'a [u8]) -> Result<Self, EnvelopeError> {
        Self::new(action, buffer, 0, buffer.len())
    }

    pub fn action(&self) -> &'a str {
        self.action
    }

    /// The `[offset, offset + length)` window.
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[self.offset..self.offset + self.length]
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}
