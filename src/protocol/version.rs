use serde::{Deserialize, Serialize};

/// Wire protocol generation a plugin speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Legacy protocol: datasource queries only
    V1,
    /// Current protocol: data, diagnostics, resources and streaming
    V2,
}

impl ProtocolVersion {
    /// Map the version number reported in the handshake.
    ///
    /// Anything above 1 is served by the v2 client; 1 and an unspecified (0)
    /// version fall back to the legacy client.
    pub fn from_negotiated(version: u32) -> Self {
        if version > 1 {
            Self::V2
        } else {
            Self::V1
        }
    }

    pub fn as_number(&self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_number())
    }
}
