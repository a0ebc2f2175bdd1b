use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::RelayError;

/// A message relayed between the members of a session.
///
/// `payload` is carried as raw JSON and never inspected, so whatever the
/// client put there (drawing strokes, cursor moves, ...) reaches the other
/// members byte for byte.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Envelope {
    #[serde(default)]
    pub kind: String,
    #[serde(default, rename = "sessionKey")]
    pub session_key: String,
    #[serde(default, rename = "userID")]
    pub user_id: String,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    /// Decode a frame received from a client
    pub fn decode(frame: &[u8]) -> Result<Self, RelayError> {
        Ok(serde_json::from_slice(frame)?)
    }

    /// Encode for delivery
    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Replace whatever identity the client claimed with the one bound to its connection
    pub fn stamp(mut self, session_key: &str, user_id: &str) -> Self {
        self.session_key = session_key.to_string();
        self.user_id = user_id.to_string();
        self
    }
}
