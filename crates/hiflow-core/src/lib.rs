//! # hiflow-core
//!
//! hiflow 解封装框架核心库, 提供基础类型定义、错误处理和工具函数.

pub mod buffer;
pub mod channel_layout;
pub mod error;
pub mod meta;
pub mod sample_format;
pub mod time;

// 重导出常用类型
pub use buffer::{Buffer, BufferFlags};
pub use channel_layout::ChannelLayout;
pub use error::{HiError, HiResult, Status};
pub use meta::{Meta, Seekable, Tag, TagKey};
pub use sample_format::SampleFormat;
