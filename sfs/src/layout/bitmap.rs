use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

/// 位图，一位对应一个扇区，置位表示已分配。
///
/// 磁盘格式：`u64` 组按小端序依次排列，扇区 `s` 对应第 `s / 64` 组的第 `s % 64` 位。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    groups: Vec<u64>,
    /// 有效位数，即设备扇区总数
    bits: usize,
}

/// 位编号
struct BitId(usize);

impl Bitmap {
    pub fn new(bits: usize) -> Self {
        Self {
            groups: vec![0; bits.div_ceil(64)],
            bits,
        }
    }

    /// 有效位数
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bits
    }

    /// 编码后的字节数
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.groups.len() * 8
    }

    pub fn test(&self, bit: usize) -> bool {
        let (group_index, ingroup_index) = BitId(bit).decode();
        self.groups[group_index] & (1 << ingroup_index) != 0
    }

    pub fn set(&mut self, bit: usize) {
        assert!(bit < self.bits);
        let (group_index, ingroup_index) = BitId(bit).decode();
        self.groups[group_index] |= 1 << ingroup_index;
    }

    pub fn reset(&mut self, bit: usize) {
        let (group_index, ingroup_index) = BitId(bit).decode();
        // 编号一定得有对应的位
        assert_ne!(
            self.groups[group_index] & (1 << ingroup_index),
            0,
            "bit {bit} is already clear"
        );
        self.groups[group_index] &= !(1 << ingroup_index);
    }

    /// 找出 `count` 个空闲位，不修改位图。空闲位不够时返回空。
    pub fn find_free(&self, count: usize) -> Option<Vec<usize>> {
        let found: Vec<usize> = self
            .groups
            .iter()
            .enumerate()
            .filter(|&(_, &bits)| bits != u64::MAX)
            .flat_map(|(group_index, &bits)| {
                (0..64)
                    .filter(move |&ingroup_index| bits & (1 << ingroup_index) == 0)
                    .map(move |ingroup_index| BitId::encode(group_index, ingroup_index))
            })
            .take_while(|&bit| bit < self.bits)
            .take(count)
            .collect();

        (found.len() == count).then_some(found)
    }

    pub fn count_ones(&self) -> usize {
        self.groups.iter().map(|bits| bits.count_ones() as usize).sum()
    }

    /// 覆盖位 `bits` 的组所对应的字节区间
    pub fn byte_range(bits: &[usize]) -> Option<Range<usize>> {
        let first = bits.iter().min()? / 64;
        let last = bits.iter().max()? / 64;
        Some(first * 8..(last + 1) * 8)
    }

    /// 编码字节区间 `range`，区间须按组对齐
    pub fn encode(&self, range: Range<usize>) -> Vec<u8> {
        assert!(range.start % 8 == 0 && range.end % 8 == 0);
        self.groups[range.start / 8..range.end / 8]
            .iter()
            .flat_map(|bits| bits.to_le_bytes())
            .collect()
    }

    pub fn decode(bytes: &[u8], bits: usize) -> Self {
        let mut bitmap = Self::new(bits);
        assert_eq!(bytes.len(), bitmap.byte_len(), "free map size mismatch");

        for (group, chunk) in bitmap.groups.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut raw = [0; 8];
            raw.copy_from_slice(chunk);
            *group = u64::from_le_bytes(raw);
        }

        bitmap
    }
}

impl BitId {
    /// 线性映射编码得到位编号
    #[inline]
    fn encode(group_index: usize, ingroup_index: usize) -> usize {
        group_index * 64 + ingroup_index
    }

    #[inline]
    fn decode(self) -> (usize, usize) {
        (self.0 / 64, self.0 % 64)
    }
}
