//! Descriptor rights masks.
//!
//! Every descriptor slot carries a base mask (what the holder may do with the
//! descriptor itself) and an inheriting mask (the upper bound for rights of
//! descriptors derived from it). The bit assignment is ABI-fixed.

/// A set of descriptor rights.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Rights(pub u64);

impl Rights {
    pub const NONE: Self = Self(0);

    pub const FD_DATASYNC: Self = Self(1 << 0);
    pub const FD_READ: Self = Self(1 << 1);
    pub const FD_SEEK: Self = Self(1 << 2);
    pub const FD_STAT_PUT_FLAGS: Self = Self(1 << 3);
    pub const FD_SYNC: Self = Self(1 << 4);
    pub const FD_TELL: Self = Self(1 << 5);
    pub const FD_WRITE: Self = Self(1 << 6);
    pub const FILE_ADVISE: Self = Self(1 << 7);
    pub const FILE_ALLOCATE: Self = Self(1 << 8);
    pub const FILE_CREATE_DIRECTORY: Self = Self(1 << 9);
    pub const FILE_CREATE_FILE: Self = Self(1 << 10);
    pub const FILE_LINK_SOURCE: Self = Self(1 << 12);
    pub const FILE_LINK_TARGET: Self = Self(1 << 13);
    pub const FILE_OPEN: Self = Self(1 << 14);
    pub const FILE_READDIR: Self = Self(1 << 15);
    pub const FILE_READLINK: Self = Self(1 << 16);
    pub const FILE_RENAME_SOURCE: Self = Self(1 << 17);
    pub const FILE_RENAME_TARGET: Self = Self(1 << 18);
    pub const FILE_STAT_FGET: Self = Self(1 << 19);
    pub const FILE_STAT_FPUT_SIZE: Self = Self(1 << 20);
    pub const FILE_STAT_FPUT_TIMES: Self = Self(1 << 21);
    pub const FILE_STAT_GET: Self = Self(1 << 22);
    pub const FILE_STAT_PUT_TIMES: Self = Self(1 << 23);
    pub const FILE_SYMLINK: Self = Self(1 << 24);
    pub const FILE_UNLINK: Self = Self(1 << 25);
    pub const MEM_MAP: Self = Self(1 << 26);
    pub const MEM_MAP_EXEC: Self = Self(1 << 27);
    pub const POLL_FD_READWRITE: Self = Self(1 << 28);
    pub const POLL_MODIFY: Self = Self(1 << 29);
    pub const POLL_PROC_TERMINATE: Self = Self(1 << 30);
    pub const POLL_WAIT: Self = Self(1 << 31);
    pub const PROC_EXEC: Self = Self(1 << 32);
    pub const SOCK_SHUTDOWN: Self = Self(1 << 33);

    pub const ALL: Self = Self(u64::MAX);

    /// Rights that only make sense on directories.
    pub const DIRECTORY_ONLY: Self = Self(
        Self::FILE_CREATE_DIRECTORY.0
            | Self::FILE_CREATE_FILE.0
            | Self::FILE_LINK_SOURCE.0
            | Self::FILE_LINK_TARGET.0
            | Self::FILE_OPEN.0
            | Self::FILE_READDIR.0
            | Self::FILE_READLINK.0
            | Self::FILE_RENAME_SOURCE.0
            | Self::FILE_RENAME_TARGET.0
            | Self::FILE_STAT_GET.0
            | Self::FILE_STAT_PUT_TIMES.0
            | Self::FILE_SYMLINK.0
            | Self::FILE_UNLINK.0,
    );

    /// Rights that make no sense on directories.
    pub const NON_DIRECTORY: Self = Self(
        Self::FD_READ.0
            | Self::FD_SEEK.0
            | Self::FD_TELL.0
            | Self::MEM_MAP.0
            | Self::MEM_MAP_EXEC.0,
    );

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[inline]
    pub const fn is_subset_of(self, other: Self) -> bool {
        (self.0 & !other.0) == 0
    }
}

impl core::ops::BitOr for Rights {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitAnd for Rights {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subset_checks() {
        let base = Rights::FD_READ | Rights::FD_SEEK;
        assert!(Rights::FD_READ.is_subset_of(base));
        assert!(!(Rights::FD_WRITE.is_subset_of(base)));
        assert!(base.contains(Rights::FD_READ));
        assert!(!base.contains(Rights::FD_READ | Rights::FD_WRITE));
    }

    #[test]
    fn directory_masks_are_disjoint() {
        assert_eq!(
            Rights::DIRECTORY_ONLY.intersection(Rights::NON_DIRECTORY),
            Rights::NONE
        );
    }

    #[test]
    fn difference_removes_bits() {
        let all = Rights::ALL;
        let trimmed = all.difference(Rights::PROC_EXEC);
        assert!(!trimmed.contains(Rights::PROC_EXEC));
        assert!(trimmed.contains(Rights::FD_READ));
    }
}
