use serde::{Deserialize, Serialize};
use std::fmt;

use crate::buffers::head::{DATA_FLAG_EOS, DATA_FLAG_NULL, MSG_TYPE_RAW, MSG_TYPE_TENSOR};
use crate::buffers::{Mbuf, MbufHeadMsg, MbufPool};
use crate::error::{FlowError, FlowResult, SUCCESS_CODE};

pub const MAX_TENSOR_DIMS: usize = 32;

/// Element type of a tensor payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Float16,
    Int32,
    UInt32,
    Float32,
    Int64,
    UInt64,
    Float64,
}

impl DataType {
    /// Bytes per element
    pub fn size(&self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 | DataType::Float16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => 8,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            DataType::Float32 => 0,
            DataType::Float16 => 1,
            DataType::Int8 => 2,
            DataType::Int32 => 3,
            DataType::UInt8 => 4,
            DataType::Int16 => 6,
            DataType::UInt16 => 7,
            DataType::UInt32 => 8,
            DataType::Int64 => 9,
            DataType::UInt64 => 10,
            DataType::Float64 => 11,
            DataType::Bool => 12,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        let dtype = match code {
            0 => DataType::Float32,
            1 => DataType::Float16,
            2 => DataType::Int8,
            3 => DataType::Int32,
            4 => DataType::UInt8,
            6 => DataType::Int16,
            7 => DataType::UInt16,
            8 => DataType::UInt32,
            9 => DataType::Int64,
            10 => DataType::UInt64,
            11 => DataType::Float64,
            12 => DataType::Bool,
            _ => return None,
        };
        Some(dtype)
    }
}

/// Tensor descriptor stored at the front of a tensor payload:
/// `dtype: u32, ndim: u32, dims: [i64; ndim]`, little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DataType,
    pub shape: Vec<i64>,
}

impl TensorDesc {
    pub fn new(dtype: DataType, shape: Vec<i64>) -> Self {
        Self { dtype, shape }
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &dim| {
            usize::try_from(dim).ok().and_then(|dim| acc.checked_mul(dim))
        })
    }

    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size())
    }

    pub fn encoded_len(&self) -> usize {
        8 + 8 * self.shape.len()
    }

    fn encode_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.dtype.code().to_le_bytes());
        out[4..8].copy_from_slice(&(self.shape.len() as u32).to_le_bytes());
        for (i, dim) in self.shape.iter().enumerate() {
            let at = 8 + i * 8;
            out[at..at + 8].copy_from_slice(&dim.to_le_bytes());
        }
    }

    fn decode(data: &[u8]) -> FlowResult<Self> {
        if data.len() < 8 {
            return Err(FlowError::ParamInvalid);
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&data[0..4]);
        let dtype = DataType::from_code(u32::from_le_bytes(word)).ok_or(FlowError::ParamInvalid)?;
        word.copy_from_slice(&data[4..8]);
        let ndim = u32::from_le_bytes(word) as usize;
        if ndim > MAX_TENSOR_DIMS || data.len() < 8 + ndim * 8 {
            return Err(FlowError::ParamInvalid);
        }

        let shape = (0..ndim)
            .map(|i| {
                let mut dim = [0u8; 8];
                dim.copy_from_slice(&data[8 + i * 8..16 + i * 8]);
                i64::from_le_bytes(dim)
            })
            .collect();
        Ok(Self { dtype, shape })
    }
}

/// A buffer plus the typed view derived from its header and payload.
///
/// Dropping the message releases the buffer.
pub struct FlowMessage {
    mbuf: Mbuf,
    desc: Option<TensorDesc>,
}

impl FlowMessage {
    /// Wraps a dequeued buffer, parsing its tensor descriptor if it has one.
    pub fn from_mbuf(mbuf: Mbuf) -> FlowResult<Self> {
        let head = mbuf.head_msg();
        if head.is_null_data() || head.msg_type != MSG_TYPE_TENSOR {
            return Ok(Self { mbuf, desc: None });
        }

        let desc = TensorDesc::decode(mbuf.data())?;
        let expected = desc.byte_len().ok_or(FlowError::ParamInvalid)?;
        if mbuf.len() != desc.encoded_len() + expected {
            return Err(FlowError::ParamInvalid);
        }
        Ok(Self {
            mbuf,
            desc: Some(desc),
        })
    }

    pub fn tensor(pool: &MbufPool, dtype: DataType, shape: Vec<i64>, payload: &[u8]) -> FlowResult<Self> {
        if shape.len() > MAX_TENSOR_DIMS {
            return Err(FlowError::ParamInvalid);
        }
        let desc = TensorDesc::new(dtype, shape);
        if desc.byte_len() != Some(payload.len()) {
            return Err(FlowError::ParamInvalid);
        }

        let header_len = desc.encoded_len();
        let mut mbuf = pool.alloc(header_len + payload.len())?;
        let data = mbuf.data_mut().ok_or(FlowError::MemBufError)?;
        desc.encode_into(&mut data[..header_len]);
        data[header_len..].copy_from_slice(payload);
        mbuf.set_head_msg(&MbufHeadMsg::new(MSG_TYPE_TENSOR));

        Ok(Self {
            mbuf,
            desc: Some(desc),
        })
    }

    pub fn raw(pool: &MbufPool, bytes: &[u8]) -> FlowResult<Self> {
        let mut mbuf = pool.alloc(bytes.len())?;
        mbuf.data_mut()
            .ok_or(FlowError::MemBufError)?
            .copy_from_slice(bytes);
        mbuf.set_head_msg(&MbufHeadMsg::new(MSG_TYPE_RAW));
        Ok(Self { mbuf, desc: None })
    }

    /// Payload-less message carrying only a return code.
    pub fn empty(pool: &MbufPool, ret_code: i32) -> FlowResult<Self> {
        let mbuf = pool.alloc(0)?;
        let mut head = MbufHeadMsg::new(MSG_TYPE_RAW);
        head.data_flag |= DATA_FLAG_NULL;
        head.ret_code = ret_code;
        mbuf.set_head_msg(&head);
        Ok(Self { mbuf, desc: None })
    }

    pub fn tensor_desc(&self) -> Option<&TensorDesc> {
        self.desc.as_ref()
    }

    pub fn dtype(&self) -> Option<DataType> {
        self.desc.as_ref().map(|desc| desc.dtype)
    }

    pub fn shape(&self) -> &[i64] {
        self.desc.as_ref().map(|desc| desc.shape.as_slice()).unwrap_or(&[])
    }

    pub fn payload(&self) -> &[u8] {
        match &self.desc {
            Some(desc) => &self.mbuf.data()[desc.encoded_len()..],
            None => self.mbuf.data(),
        }
    }

    pub fn head(&self) -> MbufHeadMsg {
        self.mbuf.head_msg()
    }

    pub fn ret_code(&self) -> i32 {
        self.mbuf.head_msg().ret_code
    }

    pub fn is_success(&self) -> bool {
        self.ret_code() == SUCCESS_CODE
    }

    pub fn set_ret_code(&self, ret_code: i32) {
        self.mbuf.update_head_msg(|head| head.ret_code = ret_code);
    }

    pub fn transaction_id(&self) -> u64 {
        self.mbuf.transaction_id()
    }

    pub fn set_transaction_id(&self, trans_id: u64) {
        self.mbuf.update_head_msg(|head| head.transaction_id = trans_id);
    }

    pub fn stream_label(&self) -> u32 {
        self.mbuf.stream_label()
    }

    pub fn set_stream_label(&self, label: u32) {
        self.mbuf.update_head_msg(|head| head.stream_label = label);
    }

    pub fn is_null_data(&self) -> bool {
        self.mbuf.head_msg().is_null_data()
    }

    pub fn is_end_of_sequence(&self) -> bool {
        self.mbuf.head_msg().is_end_of_sequence()
    }

    pub fn set_end_of_sequence(&self, eos: bool) {
        self.mbuf.update_head_msg(|head| {
            if eos {
                head.data_flag |= DATA_FLAG_EOS;
            } else {
                head.data_flag &= !DATA_FLAG_EOS;
            }
        });
    }

    pub fn mbuf(&self) -> &Mbuf {
        &self.mbuf
    }

    pub fn into_mbuf(self) -> Mbuf {
        self.mbuf
    }

    /// Shares the underlying buffer with a second message.
    pub fn clone_ref(&self) -> FlowMessage {
        FlowMessage {
            mbuf: self.mbuf.clone_ref(),
            desc: self.desc.clone(),
        }
    }
}

impl fmt::Debug for FlowMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowMessage")
            .field("trans_id", &self.transaction_id())
            .field("ret_code", &self.ret_code())
            .field("desc", &self.desc)
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_parse_back() {
        let pool = MbufPool::new();
        let payload: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let msg = FlowMessage::tensor(&pool, DataType::Float32, vec![2, 2], &payload).unwrap();

        let parsed = FlowMessage::from_mbuf(msg.into_mbuf()).unwrap();
        assert_eq!(parsed.dtype(), Some(DataType::Float32));
        assert_eq!(parsed.shape(), &[2, 2]);
        assert_eq!(parsed.payload(), payload.as_slice());
    }

    #[test]
    fn test_tensor_rejects_wrong_payload_len() {
        let pool = MbufPool::new();
        let result = FlowMessage::tensor(&pool, DataType::Int32, vec![3], &[0u8; 8]);
        assert_eq!(result.err(), Some(FlowError::ParamInvalid));
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_empty_message_flags() {
        let pool = MbufPool::new();
        let msg = FlowMessage::empty(&pool, 6).unwrap();
        assert!(msg.is_null_data());
        assert_eq!(msg.ret_code(), 6);
        assert!(msg.payload().is_empty());
    }
}
