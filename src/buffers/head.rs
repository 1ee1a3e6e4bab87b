use crate::error::{FlowError, FlowResult};

/// Size of the private head region every buffer carries.
pub const MBUF_HEAD_MAX_SIZE: usize = 256;

/// Size of the transaction record stored at the tail of the private head.
pub const HEAD_MSG_SIZE: usize = 64;

/// Offset of the transaction record inside the private head region.
pub const HEAD_MSG_OFFSET: usize = MBUF_HEAD_MAX_SIZE - HEAD_MSG_SIZE;

pub const HEAD_MSG_VERSION: u16 = 1;

/// Payload starts with a tensor descriptor.
pub const MSG_TYPE_TENSOR: u16 = 0;
/// Payload is opaque bytes.
pub const MSG_TYPE_RAW: u16 = 1;

/// `data_flag` bit: the message carries no payload.
pub const DATA_FLAG_NULL: u8 = 0x01;
/// `data_flag` bit: last message of a stream.
pub const DATA_FLAG_EOS: u8 = 0x02;

/// Transaction metadata stored inside every buffer.
///
/// The binary layout is fixed (64 bytes, little-endian) and shared with
/// every other producer and consumer of the queues:
///
/// | offset | field            |
/// |--------|------------------|
/// | 0      | `transaction_id` |
/// | 8      | `version`        |
/// | 10     | `msg_type`       |
/// | 12     | `ret_code`       |
/// | 16     | `start_time`     |
/// | 24     | `end_time`       |
/// | 32     | `flags`          |
/// | 36     | `data_flag`      |
/// | 37     | reserved (3)     |
/// | 40     | `worker_id`      |
/// | 44     | `step_id`        |
/// | 48     | reserved (8)     |
/// | 56     | `stream_label`   |
/// | 60     | `route_label`    |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MbufHeadMsg {
    pub transaction_id: u64,
    pub version: u16,
    pub msg_type: u16,
    pub ret_code: i32,
    pub start_time: u64,
    pub end_time: u64,
    pub flags: u32,
    pub data_flag: u8,
    pub worker_id: i32,
    pub step_id: u32,
    pub stream_label: u32,
    pub route_label: u32,
}

impl MbufHeadMsg {
    pub fn new(msg_type: u16) -> Self {
        Self {
            version: HEAD_MSG_VERSION,
            msg_type,
            ..Default::default()
        }
    }

    pub fn encode(&self) -> [u8; HEAD_MSG_SIZE] {
        let mut buf = [0u8; HEAD_MSG_SIZE];
        buf[0..8].copy_from_slice(&self.transaction_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.msg_type.to_le_bytes());
        buf[12..16].copy_from_slice(&self.ret_code.to_le_bytes());
        buf[16..24].copy_from_slice(&self.start_time.to_le_bytes());
        buf[24..32].copy_from_slice(&self.end_time.to_le_bytes());
        buf[32..36].copy_from_slice(&self.flags.to_le_bytes());
        buf[36] = self.data_flag;
        buf[40..44].copy_from_slice(&self.worker_id.to_le_bytes());
        buf[44..48].copy_from_slice(&self.step_id.to_le_bytes());
        buf[56..60].copy_from_slice(&self.stream_label.to_le_bytes());
        buf[60..64].copy_from_slice(&self.route_label.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> FlowResult<Self> {
        if bytes.len() < HEAD_MSG_SIZE {
            return Err(FlowError::ParamInvalid);
        }
        Ok(Self {
            transaction_id: u64::from_le_bytes(field(bytes, 0)),
            version: u16::from_le_bytes(field(bytes, 8)),
            msg_type: u16::from_le_bytes(field(bytes, 10)),
            ret_code: i32::from_le_bytes(field(bytes, 12)),
            start_time: u64::from_le_bytes(field(bytes, 16)),
            end_time: u64::from_le_bytes(field(bytes, 24)),
            flags: u32::from_le_bytes(field(bytes, 32)),
            data_flag: bytes[36],
            worker_id: i32::from_le_bytes(field(bytes, 40)),
            step_id: u32::from_le_bytes(field(bytes, 44)),
            stream_label: u32::from_le_bytes(field(bytes, 56)),
            route_label: u32::from_le_bytes(field(bytes, 60)),
        })
    }

    pub fn is_null_data(&self) -> bool {
        self.data_flag & DATA_FLAG_NULL != 0
    }

    pub fn is_end_of_sequence(&self) -> bool {
        self.data_flag & DATA_FLAG_EOS != 0
    }
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        let head = MbufHeadMsg {
            transaction_id: 0x0102_0304_0506_0708,
            version: 0x1122,
            msg_type: 0x3344,
            ret_code: -2,
            start_time: 7,
            end_time: 9,
            flags: 0xAABB_CCDD,
            data_flag: DATA_FLAG_EOS,
            worker_id: 5,
            step_id: 6,
            stream_label: 0xDEAD_BEEF,
            route_label: 3,
        };
        let bytes = head.encode();

        assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&bytes[10..12], &0x3344u16.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-2i32).to_le_bytes());
        assert_eq!(bytes[36], DATA_FLAG_EOS);
        assert_eq!(&bytes[37..40], &[0, 0, 0]);
        assert_eq!(&bytes[48..56], &[0u8; 8]);
        assert_eq!(&bytes[56..60], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(MbufHeadMsg::decode(&bytes).unwrap(), head);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(MbufHeadMsg::decode(&[0u8; 10]), Err(FlowError::ParamInvalid));
    }
}
