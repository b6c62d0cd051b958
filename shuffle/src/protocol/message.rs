use byteorder::{BigEndian, ByteOrder};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::bail;
use crate::error::{ErrorKind, ShuffleResult};
use crate::types::{BatchId, PartitionMode};

/// Size in bytes of the header reserved at the head of every pushed buffer.
pub const BATCH_HEADER_SIZE: usize = 16;

/// Type tags of the synchronous request messages.
const HANDSHAKE_TYPE: u8 = 0x10;
const REGION_START_TYPE: u8 = 0x11;
const REGION_FINISH_TYPE: u8 = 0x12;

/// Fixed header identifying a pushed batch.
///
/// Laid out big-endian as `[partition_id][attempt_id][batch_id][payload_len]`, where
/// `payload_len` excludes the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchHeader {
    pub partition_id: i32,
    pub attempt_id: i32,
    pub batch_id: BatchId,
    pub payload_len: i32,
}

impl BatchHeader {
    /// Writes a header for the given batch into the reserved head of `buffer`.
    ///
    /// The buffer must already contain the header region followed by the payload.
    pub fn frame(
        buffer: &mut [u8],
        partition_id: i32,
        attempt_id: i32,
        batch_id: BatchId,
    ) -> ShuffleResult<BatchHeader> {
        let Some(payload_len) = buffer.len().checked_sub(BATCH_HEADER_SIZE) else {
            bail!(
                ErrorKind::InvalidData,
                "Push buffer is smaller than the batch header",
                format!(
                    "buffer has {} bytes, header needs {BATCH_HEADER_SIZE}",
                    buffer.len()
                )
            );
        };
        let Ok(payload_len) = i32::try_from(payload_len) else {
            bail!(
                ErrorKind::InvalidData,
                "Push payload does not fit the batch header",
                format!("payload has {payload_len} bytes")
            );
        };

        let header = BatchHeader {
            partition_id,
            attempt_id,
            batch_id,
            payload_len,
        };
        BigEndian::write_i32(&mut buffer[0..4], header.partition_id);
        BigEndian::write_i32(&mut buffer[4..8], header.attempt_id);
        BigEndian::write_i32(&mut buffer[8..12], header.batch_id);
        BigEndian::write_i32(&mut buffer[12..16], header.payload_len);

        Ok(header)
    }

    /// Reads the header at the head of a framed buffer.
    pub fn read(buffer: &[u8]) -> ShuffleResult<BatchHeader> {
        if buffer.len() < BATCH_HEADER_SIZE {
            bail!(
                ErrorKind::InvalidData,
                "Framed batch is smaller than the batch header",
                format!("buffer has {} bytes", buffer.len())
            );
        }

        Ok(BatchHeader {
            partition_id: BigEndian::read_i32(&buffer[0..4]),
            attempt_id: BigEndian::read_i32(&buffer[4..8]),
            batch_id: BigEndian::read_i32(&buffer[8..12]),
            payload_len: BigEndian::read_i32(&buffer[12..16]),
        })
    }
}

/// One-way push of a framed batch to a partition location.
///
/// Handed to the transport as is; the transport owns the outer encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushData {
    pub mode: PartitionMode,
    pub shuffle_key: String,
    pub partition_unique_id: String,
    pub body: Bytes,
}

/// Opens a push stream for a map attempt on a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushDataHandshake {
    pub mode: PartitionMode,
    pub shuffle_key: String,
    pub partition_unique_id: String,
    pub attempt_id: i32,
    pub num_partitions: i32,
    pub buffer_size: i32,
}

/// Marks the start of a region within a push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionStart {
    pub mode: PartitionMode,
    pub shuffle_key: String,
    pub partition_unique_id: String,
    pub attempt_id: i32,
    pub current_region_index: i32,
    pub is_broadcast: bool,
}

/// Marks the end of the current region within a push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionFinish {
    pub mode: PartitionMode,
    pub shuffle_key: String,
    pub partition_unique_id: String,
    pub attempt_id: i32,
}

/// Synchronous requests sent to a worker, each answered with an optional status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcRequest {
    Handshake(PushDataHandshake),
    RegionStart(RegionStart),
    RegionFinish(RegionFinish),
}

impl RpcRequest {
    /// Returns the name of the request, used in logs and error details.
    pub fn name(&self) -> &'static str {
        match self {
            RpcRequest::Handshake(_) => "push data handshake",
            RpcRequest::RegionStart(_) => "region start",
            RpcRequest::RegionFinish(_) => "region finish",
        }
    }

    /// Encodes the request as `[type][mode][shuffle_key][partition_unique_id][attempt_id]...`.
    ///
    /// Integers are big-endian and strings are prefixed by their byte length as an `i32`.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            RpcRequest::Handshake(handshake) => {
                buf.put_u8(HANDSHAKE_TYPE);
                put_stream_prefix(
                    &mut buf,
                    handshake.mode,
                    &handshake.shuffle_key,
                    &handshake.partition_unique_id,
                    handshake.attempt_id,
                );
                buf.put_i32(handshake.num_partitions);
                buf.put_i32(handshake.buffer_size);
            }
            RpcRequest::RegionStart(region_start) => {
                buf.put_u8(REGION_START_TYPE);
                put_stream_prefix(
                    &mut buf,
                    region_start.mode,
                    &region_start.shuffle_key,
                    &region_start.partition_unique_id,
                    region_start.attempt_id,
                );
                buf.put_i32(region_start.current_region_index);
                buf.put_u8(u8::from(region_start.is_broadcast));
            }
            RpcRequest::RegionFinish(region_finish) => {
                buf.put_u8(REGION_FINISH_TYPE);
                put_stream_prefix(
                    &mut buf,
                    region_finish.mode,
                    &region_finish.shuffle_key,
                    &region_finish.partition_unique_id,
                    region_finish.attempt_id,
                );
            }
        }

        buf.freeze()
    }

    /// Decodes a request produced by [`RpcRequest::encode`].
    pub fn decode(mut bytes: Bytes) -> ShuffleResult<RpcRequest> {
        let message_type = read_u8(&mut bytes)?;
        let mode = read_mode(&mut bytes)?;
        let shuffle_key = read_string(&mut bytes)?;
        let partition_unique_id = read_string(&mut bytes)?;
        let attempt_id = read_i32(&mut bytes)?;

        let request = match message_type {
            HANDSHAKE_TYPE => RpcRequest::Handshake(PushDataHandshake {
                mode,
                shuffle_key,
                partition_unique_id,
                attempt_id,
                num_partitions: read_i32(&mut bytes)?,
                buffer_size: read_i32(&mut bytes)?,
            }),
            REGION_START_TYPE => RpcRequest::RegionStart(RegionStart {
                mode,
                shuffle_key,
                partition_unique_id,
                attempt_id,
                current_region_index: read_i32(&mut bytes)?,
                is_broadcast: read_u8(&mut bytes)? != 0,
            }),
            REGION_FINISH_TYPE => RpcRequest::RegionFinish(RegionFinish {
                mode,
                shuffle_key,
                partition_unique_id,
                attempt_id,
            }),
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown push request type",
                format!("type tag {other:#04x}")
            ),
        };

        if bytes.has_remaining() {
            bail!(
                ErrorKind::InvalidData,
                "Trailing bytes after push request",
                format!("{} bytes left", bytes.remaining())
            );
        }

        Ok(request)
    }
}

fn put_stream_prefix(
    buf: &mut BytesMut,
    mode: PartitionMode,
    shuffle_key: &str,
    partition_unique_id: &str,
    attempt_id: i32,
) {
    buf.put_u8(mode.as_u8());
    put_string(buf, shuffle_key);
    put_string(buf, partition_unique_id);
    buf.put_i32(attempt_id);
}

fn put_string(buf: &mut BytesMut, value: &str) {
    // Keys and location ids are short identifiers, far below i32::MAX bytes.
    buf.put_i32(value.len() as i32);
    buf.put_slice(value.as_bytes());
}

fn read_u8(bytes: &mut Bytes) -> ShuffleResult<u8> {
    if bytes.remaining() < 1 {
        bail!(ErrorKind::InvalidData, "Push request is truncated");
    }

    Ok(bytes.get_u8())
}

fn read_i32(bytes: &mut Bytes) -> ShuffleResult<i32> {
    if bytes.remaining() < 4 {
        bail!(ErrorKind::InvalidData, "Push request is truncated");
    }

    Ok(bytes.get_i32())
}

fn read_mode(bytes: &mut Bytes) -> ShuffleResult<PartitionMode> {
    match read_u8(bytes)? {
        0 => Ok(PartitionMode::Primary),
        1 => Ok(PartitionMode::Replica),
        other => bail!(
            ErrorKind::InvalidData,
            "Unknown partition mode",
            format!("mode byte {other}")
        ),
    }
}

fn read_string(bytes: &mut Bytes) -> ShuffleResult<String> {
    let len = read_i32(bytes)?;
    let Ok(len) = usize::try_from(len) else {
        bail!(
            ErrorKind::InvalidData,
            "Negative string length in push request",
            format!("length {len}")
        );
    };
    if bytes.remaining() < len {
        bail!(ErrorKind::InvalidData, "Push request is truncated");
    }

    let raw = bytes.split_to(len);
    match String::from_utf8(raw.to_vec()) {
        Ok(value) => Ok(value),
        Err(err) => bail!(
            ErrorKind::InvalidData,
            "Push request string is not valid UTF-8",
            source: err
        ),
    }
}
