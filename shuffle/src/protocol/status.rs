use bytes::Bytes;

/// Status codes exchanged with shuffle workers and the lifecycle manager.
///
/// Worker responses carry at most one status byte; an empty response means success with no
/// special status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success,
    PartialSuccess,
    RequestFailed,
    ShuffleNotRegistered,
    ReserveSlotsFailed,
    SlotNotAvailable,
    WorkerNotFound,
    PartitionNotFound,
    ReviveFailed,
    /// The map task was already reported finished to the lifecycle manager.
    MapEnded,
    /// The shuffle stage has ended; further data for it is discarded by the worker.
    StageEnded,
    /// The target location is full and must be replaced before more data is written.
    HardSplit,
    SoftSplit,
    PushDataCreateConnectionFailPrimary,
    Other(u8),
}

impl StatusCode {
    /// Returns the byte value of this status.
    pub fn as_u8(self) -> u8 {
        match self {
            StatusCode::Success => 0,
            StatusCode::PartialSuccess => 1,
            StatusCode::RequestFailed => 2,
            StatusCode::ShuffleNotRegistered => 4,
            StatusCode::ReserveSlotsFailed => 5,
            StatusCode::SlotNotAvailable => 6,
            StatusCode::WorkerNotFound => 7,
            StatusCode::PartitionNotFound => 8,
            StatusCode::ReviveFailed => 12,
            StatusCode::MapEnded => 15,
            StatusCode::StageEnded => 16,
            StatusCode::HardSplit => 21,
            StatusCode::SoftSplit => 22,
            StatusCode::PushDataCreateConnectionFailPrimary => 38,
            StatusCode::Other(value) => value,
        }
    }

    /// Reads the optional status byte at the head of a worker response.
    pub fn from_response(response: &Bytes) -> Option<StatusCode> {
        response.first().copied().map(StatusCode::from)
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0 => StatusCode::Success,
            1 => StatusCode::PartialSuccess,
            2 => StatusCode::RequestFailed,
            4 => StatusCode::ShuffleNotRegistered,
            5 => StatusCode::ReserveSlotsFailed,
            6 => StatusCode::SlotNotAvailable,
            7 => StatusCode::WorkerNotFound,
            8 => StatusCode::PartitionNotFound,
            12 => StatusCode::ReviveFailed,
            15 => StatusCode::MapEnded,
            16 => StatusCode::StageEnded,
            21 => StatusCode::HardSplit,
            22 => StatusCode::SoftSplit,
            38 => StatusCode::PushDataCreateConnectionFailPrimary,
            other => StatusCode::Other(other),
        }
    }
}
