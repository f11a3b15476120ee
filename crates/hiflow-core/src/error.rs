//! 统一错误类型定义.
//!
//! 解封装插件的所有返回状态都收敛到 [`HiError`]. 调用方按照以下约定处理:
//! - [`HiError::EndOfStream`] 是正常结束, 不是失败
//! - [`HiError::UnsupportedFormat`] 表示换下一个插件再试
//! - [`HiError::Unimplemented`] 表示该格式不提供此功能, 不是瞬时故障

use std::fmt;

use thiserror::Error;

/// hiflow 统一错误类型
#[derive(Debug, Error)]
pub enum HiError {
    /// 已到达流末尾
    #[error("已到达流末尾")]
    EndOfStream,

    /// 重试预算耗尽, 数据源仍未提供数据
    #[error("数据不足, 重试次数已用尽")]
    NotEnoughData,

    /// 探测/解析时格式不匹配
    #[error("不支持的格式: {0}")]
    UnsupportedFormat(String),

    /// 容器结构合法, 但字段值超出支持的表
    #[error("类型不匹配: {0}")]
    MismatchedType(String),

    /// 调用方违反接口约定
    #[error("无效参数: {0}")]
    InvalidParameter(String),

    /// 内部不变量被破坏
    #[error("未知错误: {0}")]
    Unknown(String),

    /// 该格式不提供此功能
    #[error("功能未实现: {0}")]
    Unimplemented(String),

    /// 生命周期状态不允许此操作
    #[error("状态错误: {0}")]
    WrongState(String),

    /// 底层 I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl HiError {
    /// 是否为流结束
    pub fn is_eos(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// 对应的状态码
    pub fn status(&self) -> Status {
        Status::from(self)
    }
}

/// hiflow 统一 Result 类型
pub type HiResult<T> = Result<T, HiError>;

/// 状态码
///
/// 与 [`HiError`] 一一对应的无负载枚举, 用于日志与序列化输出.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    EndOfStream,
    ErrorNotEnoughData,
    ErrorUnsupportedFormat,
    ErrorMismatchedType,
    ErrorInvalidParameter,
    ErrorUnknown,
    ErrorUnimplemented,
    ErrorWrongState,
    ErrorIo,
}

impl Status {
    /// 状态名 (大写下划线风格)
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::EndOfStream => "END_OF_STREAM",
            Self::ErrorNotEnoughData => "ERROR_NOT_ENOUGH_DATA",
            Self::ErrorUnsupportedFormat => "ERROR_UNSUPPORTED_FORMAT",
            Self::ErrorMismatchedType => "ERROR_MISMATCHED_TYPE",
            Self::ErrorInvalidParameter => "ERROR_INVALID_PARAMETER",
            Self::ErrorUnknown => "ERROR_UNKNOWN",
            Self::ErrorUnimplemented => "ERROR_UNIMPLEMENTED",
            Self::ErrorWrongState => "ERROR_WRONG_STATE",
            Self::ErrorIo => "ERROR_IO",
        }
    }

    /// 从结果中提取状态码
    pub fn of<T>(result: &HiResult<T>) -> Self {
        match result {
            Ok(_) => Self::Ok,
            Err(e) => Self::from(e),
        }
    }
}

impl From<&HiError> for Status {
    fn from(err: &HiError) -> Self {
        match err {
            HiError::EndOfStream => Self::EndOfStream,
            HiError::NotEnoughData => Self::ErrorNotEnoughData,
            HiError::UnsupportedFormat(_) => Self::ErrorUnsupportedFormat,
            HiError::MismatchedType(_) => Self::ErrorMismatchedType,
            HiError::InvalidParameter(_) => Self::ErrorInvalidParameter,
            HiError::Unknown(_) => Self::ErrorUnknown,
            HiError::Unimplemented(_) => Self::ErrorUnimplemented,
            HiError::WrongState(_) => Self::ErrorWrongState,
            HiError::Io(_) => Self::ErrorIo,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(HiError::EndOfStream.status(), Status::EndOfStream);
        assert_eq!(HiError::NotEnoughData.status(), Status::ErrorNotEnoughData);
        assert_eq!(
            HiError::Unimplemented("select_track".into()).status(),
            Status::ErrorUnimplemented
        );
        let io = HiError::from(std::io::Error::other("boom"));
        assert_eq!(io.status(), Status::ErrorIo);
    }

    #[test]
    fn test_status_of_result() {
        let ok: HiResult<u32> = Ok(1);
        assert_eq!(Status::of(&ok), Status::Ok);
        let eos: HiResult<u32> = Err(HiError::EndOfStream);
        assert_eq!(Status::of(&eos), Status::EndOfStream);
        assert!(eos.unwrap_err().is_eos());
    }

    #[test]
    fn test_status_name() {
        assert_eq!(Status::ErrorMismatchedType.to_string(), "ERROR_MISMATCHED_TYPE");
    }
}
