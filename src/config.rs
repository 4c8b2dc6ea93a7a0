use serde::{Deserialize, Serialize};

/// Per session settings, chosen when the session is opened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// PIN/UV auth protocol versions in order of preference.
    pub pin_uv_protocols: Vec<u8>,

    /// Whether large smartcard requests may use extended length APDUs instead of
    /// command chaining.
    pub extended_length: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            pin_uv_protocols: vec![2, 1],
            extended_length: true,
        }
    }
}
