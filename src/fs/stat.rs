use zerocopy::{AsBytes, FromBytes};

/// Metadata returned by `fstat`.
#[repr(C)]
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, AsBytes, FromBytes)]
pub struct Stat {
    /// File system's disk device.
    pub dev: u32,

    /// Inode number.
    pub ino: u32,

    /// Size of file in bytes.
    pub size: u32,

    /// Type of file.
    pub typ: i16,

    pub pad: i16,
}
