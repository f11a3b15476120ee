//! 解封装输出的帧缓冲.
//!
//! 解析器产出一帧后以值的方式移交给调用方, 不存在跨函数的手动释放.

use bitflags::bitflags;
use bytes::Bytes;

use crate::time::HST_TIME_NONE;

bitflags! {
    /// 帧标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        /// 可独立解码的帧 (音频帧均为关键帧)
        const KEY_FRAME = 1 << 0;
        /// 流结束标记, 不附带数据
        const EOS       = 1 << 1;
    }
}

/// 一帧解封装结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    /// 帧数据
    pub data: Bytes,
    /// 显示时间戳 (HST 纳秒), `HST_TIME_NONE` 表示未知
    pub pts: i64,
    /// 帧时长 (HST 纳秒)
    pub duration: i64,
    /// 所属轨道
    pub track_id: u32,
    /// 帧标志
    pub flags: BufferFlags,
}

impl Buffer {
    /// 创建空缓冲
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: HST_TIME_NONE,
            duration: 0,
            track_id: 0,
            flags: BufferFlags::empty(),
        }
    }

    /// 从数据创建缓冲
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 设置时间戳与时长
    pub fn with_timing(mut self, pts: i64, duration: i64) -> Self {
        self.pts = pts;
        self.duration = duration;
        self
    }

    /// 设置轨道
    pub fn with_track(mut self, track_id: u32) -> Self {
        self.track_id = track_id;
        self
    }

    /// 追加标志
    pub fn with_flags(mut self, flags: BufferFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// 数据长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 是否为关键帧
    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::empty()
    }
}
