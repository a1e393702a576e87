//! 块设备错误类型
//!
//! 定义块设备协议使用的错误码。每个错误码对应响应记录中的一个有符号 32 位状态值，
//! 可通过 [`BlockError::to_status()`] 与 [`BlockError::from_status()`] 互相转换。

use thiserror::Error;

/// 块设备操作结果
pub type Result<T> = core::result::Result<T, BlockError>;

/// 成功状态码
pub const STATUS_OK: i32 = 0;

/// 块设备错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BlockError {
    /// 内部错误 (-1)
    #[error("internal error")]
    Internal,
    /// 操作不支持 (-2)
    #[error("operation not supported")]
    NotSupported,
    /// 资源耗尽，例如 vmoid 表已满 (-3)
    #[error("resources exhausted")]
    ResourceExhausted,
    /// 无效参数 (-10)
    #[error("invalid argument")]
    InvalidArgument,
    /// 偏移或长度超出范围 (-14)
    #[error("out of range")]
    OutOfRange,
    /// 状态不正确 (-20)
    #[error("bad state")]
    BadState,
    /// 对端已关闭 (-24)
    #[error("peer closed")]
    PeerClosed,
    /// 对象不存在 (-25)
    #[error("not found")]
    NotFound,
    /// 访问被拒绝 (-30)
    #[error("access denied")]
    AccessDenied,
    /// I/O 错误 (-40)
    #[error("i/o error")]
    Io,
}

impl BlockError {
    /// 转换为响应记录中的状态码（负数）
    pub fn to_status(&self) -> i32 {
        match self {
            BlockError::Internal => -1,
            BlockError::NotSupported => -2,
            BlockError::ResourceExhausted => -3,
            BlockError::InvalidArgument => -10,
            BlockError::OutOfRange => -14,
            BlockError::BadState => -20,
            BlockError::PeerClosed => -24,
            BlockError::NotFound => -25,
            BlockError::AccessDenied => -30,
            BlockError::Io => -40,
        }
    }

    /// 从状态码还原结果
    ///
    /// 无法识别的负数状态码统一视为 [`BlockError::Io`]。
    pub fn from_status(status: i32) -> Result<()> {
        let err = match status {
            STATUS_OK => return Ok(()),
            -1 => BlockError::Internal,
            -2 => BlockError::NotSupported,
            -3 => BlockError::ResourceExhausted,
            -10 => BlockError::InvalidArgument,
            -14 => BlockError::OutOfRange,
            -20 => BlockError::BadState,
            -24 => BlockError::PeerClosed,
            -25 => BlockError::NotFound,
            -30 => BlockError::AccessDenied,
            _ => BlockError::Io,
        };
        Err(err)
    }
}

/// 将操作结果转换为状态码
pub fn status_of(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => e.to_status(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        assert_eq!(BlockError::PeerClosed.to_status(), -24);
        assert_eq!(BlockError::OutOfRange.to_status(), -14);
        assert_eq!(BlockError::NotFound.to_status(), -25);
        assert_eq!(status_of(&Ok(())), STATUS_OK);
    }

    #[test]
    fn test_from_status() {
        assert_eq!(BlockError::from_status(0), Ok(()));
        for err in [
            BlockError::Internal,
            BlockError::NotSupported,
            BlockError::ResourceExhausted,
            BlockError::InvalidArgument,
            BlockError::OutOfRange,
            BlockError::BadState,
            BlockError::PeerClosed,
            BlockError::NotFound,
            BlockError::AccessDenied,
            BlockError::Io,
        ] {
            assert_eq!(BlockError::from_status(err.to_status()), Err(err));
        }
        assert_eq!(BlockError::from_status(-999), Err(BlockError::Io));
    }
}
