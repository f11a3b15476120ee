//! 输入暂存缓冲区.
//!
//! 固定容量的字节缓冲, 有效数据位于 `[start, start + remain)`.
//! 解析器每次消费若干字节后, 下一次填充前把未消费的尾部滑动到 0 处.

use hiflow_core::{HiError, HiResult};

/// 输入暂存缓冲区
#[derive(Debug, Clone)]
pub struct IngestBuffer {
    data: Vec<u8>,
    /// 有效数据起点
    start: usize,
    /// 有效数据长度
    remain: usize,
}

impl IngestBuffer {
    /// 创建指定容量的缓冲区
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            start: 0,
            remain: 0,
        }
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// 未消费的字节数
    pub fn remain(&self) -> usize {
        self.remain
    }

    /// 尾部空闲字节数
    pub fn free_space(&self) -> usize {
        self.capacity() - self.start - self.remain
    }

    /// 未消费的数据
    pub fn data(&self) -> &[u8] {
        &self.data[self.start..self.start + self.remain]
    }

    /// 消费 `n` 字节 (超出部分截断到 `remain`)
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.remain);
        self.start += n;
        self.remain -= n;
        if self.remain == 0 {
            self.start = 0;
        }
    }

    /// 把未消费数据滑动到起点, 并清零腾出的尾部
    pub fn compact(&mut self) -> HiResult<()> {
        if self.start + self.remain > self.capacity() {
            return Err(HiError::Unknown(format!(
                "缓冲区越界: start={}, remain={}, capacity={}",
                self.start,
                self.remain,
                self.capacity()
            )));
        }
        if self.start == 0 {
            return Ok(());
        }
        self.data.copy_within(self.start..self.start + self.remain, 0);
        self.data[self.remain..].fill(0);
        self.start = 0;
        Ok(())
    }

    /// 追加数据, 返回实际写入的字节数
    ///
    /// 只写入尾部空闲区域, 多余数据被丢弃.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let tail = self.start + self.remain;
        let n = bytes.len().min(self.free_space());
        self.data[tail..tail + n].copy_from_slice(&bytes[..n]);
        self.remain += n;
        n
    }

    /// 尾部空闲区域, 配合 [`IngestBuffer::commit`] 原地填充
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let tail = self.start + self.remain;
        &mut self.data[tail..]
    }

    /// 确认通过 [`IngestBuffer::spare_mut`] 写入的 `n` 字节
    pub fn commit(&mut self, n: usize) -> HiResult<()> {
        if n > self.free_space() {
            return Err(HiError::Unknown(format!(
                "提交长度 {} 超过空闲空间 {}",
                n,
                self.free_space()
            )));
        }
        self.remain += n;
        Ok(())
    }

    /// 丢弃全部数据并清零
    pub fn clear(&mut self) {
        self.data.fill(0);
        self.start = 0;
        self.remain = 0;
    }
}
