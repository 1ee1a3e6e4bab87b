use thiserror::Error;

/// Status taxonomy shared by the queue layer, the aligner and the
/// scheduling state machine.
///
/// `QueueEmpty`, `QueueFull`, `InitAgain` and `ProcPending` are transient and
/// drive retry logic; everything else is a real failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum FlowError {
    #[error("queue is empty")]
    QueueEmpty,
    #[error("queue is full")]
    QueueFull,
    #[error("queue driver fault")]
    QueueError,
    #[error("invalid parameter")]
    ParamInvalid,
    #[error("buffer allocation or copy failed")]
    MemBufError,
    #[error("operation timed out")]
    TimeOut,
    #[error("function requested re-initialization")]
    InitAgain,
    #[error("function processing pending")]
    ProcPending,
    #[error("operation not supported")]
    NotSupported,
    #[error("runtime is redeploying")]
    Redeploying,
    #[error("runtime is exiting")]
    Exit,
    #[error("function failed with code {0}")]
    Failed(i32),
}

pub type FlowResult<T> = Result<T, FlowError>;

/// Return code carried by successful messages.
pub const SUCCESS_CODE: i32 = 0;

impl FlowError {
    /// Stable integer code, written into message headers.
    pub fn code(&self) -> i32 {
        match self {
            FlowError::QueueEmpty => 1,
            FlowError::QueueFull => 2,
            FlowError::QueueError => 3,
            FlowError::ParamInvalid => 4,
            FlowError::MemBufError => 5,
            FlowError::TimeOut => 6,
            FlowError::InitAgain => 7,
            FlowError::ProcPending => 8,
            FlowError::NotSupported => 9,
            FlowError::Redeploying => 10,
            FlowError::Exit => 11,
            FlowError::Failed(code) => *code,
        }
    }

    /// Inverse of [`FlowError::code`]. `0` is success and maps to `None`.
    pub fn from_code(code: i32) -> Option<FlowError> {
        let err = match code {
            SUCCESS_CODE => return None,
            1 => FlowError::QueueEmpty,
            2 => FlowError::QueueFull,
            3 => FlowError::QueueError,
            4 => FlowError::ParamInvalid,
            5 => FlowError::MemBufError,
            6 => FlowError::TimeOut,
            7 => FlowError::InitAgain,
            8 => FlowError::ProcPending,
            9 => FlowError::NotSupported,
            10 => FlowError::Redeploying,
            11 => FlowError::Exit,
            other => FlowError::Failed(other),
        };
        Some(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for err in [
            FlowError::QueueEmpty,
            FlowError::QueueFull,
            FlowError::QueueError,
            FlowError::ParamInvalid,
            FlowError::MemBufError,
            FlowError::TimeOut,
            FlowError::InitAgain,
            FlowError::ProcPending,
            FlowError::NotSupported,
            FlowError::Redeploying,
            FlowError::Exit,
            FlowError::Failed(-42),
        ] {
            assert_eq!(FlowError::from_code(err.code()), Some(err));
        }
        assert_eq!(FlowError::from_code(SUCCESS_CODE), None);
    }
}
