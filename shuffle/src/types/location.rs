use std::fmt;

/// Role of a partition location in a replicated pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionMode {
    Primary,
    Replica,
}

impl PartitionMode {
    /// Returns the mode byte used on the wire.
    pub fn as_u8(self) -> u8 {
        match self {
            PartitionMode::Primary => 0,
            PartitionMode::Replica => 1,
        }
    }
}

/// A remote storage endpoint serving one logical partition.
///
/// Locations are assigned by the lifecycle manager. Each split replaces a location with a
/// successor carrying the same id and a higher epoch, so `(id, epoch)` tells a stale location
/// apart from its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionLocation {
    pub id: i32,
    pub epoch: i32,
    pub host: String,
    pub push_port: u16,
    pub mode: PartitionMode,
}

impl PartitionLocation {
    /// Creates a primary location.
    pub fn new(id: i32, epoch: i32, host: impl Into<String>, push_port: u16) -> Self {
        Self {
            id,
            epoch,
            host: host.into(),
            push_port,
            mode: PartitionMode::Primary,
        }
    }

    /// Returns the identifier of this location on the wire, `"{id}-{epoch}"`.
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.id, self.epoch)
    }

    /// Returns the push endpoint, `"{host}:{push_port}"`.
    ///
    /// In-flight batches are accounted per endpoint, so every location served by the same
    /// worker shares one in-flight cap.
    pub fn host_and_push_port(&self) -> String {
        format!("{}:{}", self.host, self.push_port)
    }
}

impl fmt::Display for PartitionLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} (location {}, epoch {}, {:?})",
            self.host, self.push_port, self.id, self.epoch, self.mode
        )
    }
}
