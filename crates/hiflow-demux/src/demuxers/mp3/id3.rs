//! ID3v2 标签头识别.

/// ID3v2 标签头长度
pub const ID3_HEADER_SIZE: usize = 10;

/// 计算文件开头 ID3v2 标签的总长度
///
/// 不是合法标签头时返回 0. 带页脚标志时长度再加 10 字节.
pub fn id3v2_size(buf: &[u8]) -> usize {
    let Some(head) = buf.get(..ID3_HEADER_SIZE) else {
        return 0;
    };
    if &head[..3] != b"ID3" || head[3] == 0xFF || head[4] == 0xFF {
        return 0;
    }
    // 低 4 位标志保留
    if head[5] & 0x0F != 0 {
        return 0;
    }
    if head[6..10].iter().any(|&b| b >= 0x80) {
        return 0;
    }
    let syncsafe = head[6..10]
        .iter()
        .fold(0usize, |acc, &b| (acc << 7) | usize::from(b));
    let mut size = syncsafe + ID3_HEADER_SIZE;
    if head[5] & 0x10 != 0 {
        size += ID3_HEADER_SIZE;
    }
    size
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 构造空白负载的 ID3v2.4 标签
    pub(crate) fn build_id3(payload_len: usize, footer: bool) -> Vec<u8> {
        let mut tag = b"ID3".to_vec();
        tag.extend_from_slice(&[4, 0, if footer { 0x10 } else { 0 }]);
        let n = payload_len as u32;
        tag.extend_from_slice(&[
            ((n >> 21) & 0x7F) as u8,
            ((n >> 14) & 0x7F) as u8,
            ((n >> 7) & 0x7F) as u8,
            (n & 0x7F) as u8,
        ]);
        tag.resize(ID3_HEADER_SIZE + payload_len + if footer { ID3_HEADER_SIZE } else { 0 }, 0);
        tag
    }

    #[test]
    fn test_标签长度() {
        // syncsafe 00 00 02 01 = 257
        let head = [b'I', b'D', b'3', 4, 0, 0, 0, 0, 2, 1];
        assert_eq!(id3v2_size(&head), 267);
        let mut footer = head;
        footer[5] = 0x10;
        assert_eq!(id3v2_size(&footer), 277);
        assert_eq!(id3v2_size(&build_id3(1000, false)), 1010);
    }

    #[test]
    fn test_非法标签头() {
        assert_eq!(id3v2_size(b"ID3"), 0);
        assert_eq!(id3v2_size(&[b'I', b'D', b'3', 0xFF, 0, 0, 0, 0, 2, 1]), 0);
        assert_eq!(id3v2_size(&[b'I', b'D', b'3', 4, 0, 0x01, 0, 0, 2, 1]), 0);
        assert_eq!(id3v2_size(&[b'I', b'D', b'3', 4, 0, 0, 0x80, 0, 2, 1]), 0);
        assert_eq!(id3v2_size(&[0xFF, 0xFB, 0x90, 0, 0, 0, 0, 0, 0, 0]), 0);
    }
}
