use derive_more::{Display, From, Into};

/// 扇区编号
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct SectorId(u32);

impl SectorId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<SectorId> for usize {
    #[inline]
    fn from(id: SectorId) -> Self {
        id.index()
    }
}
