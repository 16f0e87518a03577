use derive_more::Display;

/// 文件系统对调用者报告的错误。
///
/// 结构损坏（魔数不符、重复释放扇区等）不在此列，那属于程序缺陷，直接 panic。
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "no such file or directory")]
    NotFound,
    #[display(fmt = "file exists")]
    AlreadyExists,
    /// 路径分量为空或超长
    #[display(fmt = "invalid file name")]
    InvalidName,
    /// 空闲扇区耗尽
    #[display(fmt = "no space left on device")]
    NoSpace,
    #[display(fmt = "not a directory")]
    NotADirectory,
    #[display(fmt = "is a directory")]
    IsADirectory,
    /// 删除仍被打开或非空的目录
    #[display(fmt = "resource busy")]
    Busy,
}
