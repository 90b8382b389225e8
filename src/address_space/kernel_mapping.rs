use super::memory_range::MemoryRange;
use crate::{
    remote_ptr::{RemotePtr, Void},
    util::page_size,
};
use libc::{dev_t, ino_t, MAP_ANONYMOUS, MAP_GROWSDOWN, MAP_NORESERVE, MAP_PRIVATE, MAP_SHARED, MAP_STACK};
use nix::sys::{
    mman::{MapFlags, ProtFlags},
    stat::{major, minor},
};
use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result},
    ops::Deref,
};

/// One mapping of a traced address space, as the kernel would describe
/// it in /proc/<pid>/maps. The patcher uses these to find the vdso and
/// known libraries, and to describe the jump pages it creates to the
/// trace.
///
/// This type cannot be Copy as fsname_, an OsString, is not Copy.
/// Clone is manually derived, see below.
#[derive(Debug)]
pub struct KernelMapping {
    mr: MemoryRange,
    /// The kernel's name for the mapping, as per /proc/<pid>/maps.
    fsname_: OsString,
    device_: dev_t,
    inode_: ino_t,
    prot_: ProtFlags,
    flags_: MapFlags,
    offset: u64,
}

impl Default for KernelMapping {
    fn default() -> Self {
        KernelMapping {
            device_: 0,
            inode_: 0,
            prot_: ProtFlags::empty(),
            flags_: MapFlags::empty(),
            offset: 0,
            fsname_: OsString::from(""),
            mr: MemoryRange::default(),
        }
    }
}

impl KernelMapping {
    pub const NO_DEVICE: dev_t = 0;
    pub const NO_INODE: ino_t = 0;

    /// These are the flags we track internally to distinguish between
    /// adjacent segments.  For example, the kernel considers a
    /// NORESERVE anonymous mapping that's adjacent to a non-NORESERVE
    /// mapping distinct, even if all other metadata are the same.
    pub const MAP_FLAGS_MASK: MapFlags = MapFlags::from_bits_truncate(
        MAP_ANONYMOUS | MAP_NORESERVE | MAP_PRIVATE | MAP_SHARED | MAP_STACK | MAP_GROWSDOWN,
    );

    pub fn new_with_opts(
        start: RemotePtr<Void>,
        end: RemotePtr<Void>,
        fsname: &OsStr,
        device: dev_t,
        inode: ino_t,
        prot: ProtFlags,
        flags: MapFlags,
        offset: u64,
    ) -> KernelMapping {
        let result = KernelMapping {
            device_: device,
            inode_: inode,
            prot_: prot,
            flags_: flags & Self::MAP_FLAGS_MASK,
            offset,
            fsname_: fsname.into(),
            mr: MemoryRange::from_range(start, end),
        };
        result.assert_valid();
        result
    }

    pub fn assert_valid(&self) {
        debug_assert!(self.end() >= self.start());
        debug_assert_eq!(self.size() % page_size(), 0);
        debug_assert!((self.flags_ & !KernelMapping::MAP_FLAGS_MASK).is_empty());
        debug_assert_eq!(self.offset % page_size() as u64, 0);
    }

    pub fn fsname(&self) -> &OsStr {
        &self.fsname_
    }

    pub fn device(&self) -> dev_t {
        self.device_
    }

    pub fn inode(&self) -> ino_t {
        self.inode_
    }

    pub fn prot(&self) -> ProtFlags {
        self.prot_
    }

    pub fn flags(&self) -> MapFlags {
        self.flags_
    }

    pub fn file_offset_bytes(&self) -> u64 {
        self.offset
    }

    /// Return true if this file is/was backed by an external device,
    /// as opposed to a transient RAM mapping.
    pub fn is_real_device(&self) -> bool {
        self.device() > Self::NO_DEVICE
    }

    pub fn is_vdso(&self) -> bool {
        self.fsname() == "[vdso]"
    }

    /// Dump a representation of `self` to a string in a format similar
    /// to the former part of /proc/{tid}/maps.
    pub fn str(&self) -> String {
        let map_shared = if self.flags_.contains(MapFlags::MAP_SHARED) {
            's'
        } else {
            'p'
        };

        format!(
            "{:#x}-{:#x} {}{} {:08x} {:02x}:{:02x} {:<10} {:?}",
            self.start().as_usize(),
            self.end().as_usize(),
            self.prot_string(),
            map_shared,
            self.offset,
            major(self.device()),
            minor(self.device()),
            self.inode(),
            self.fsname()
        )
    }

    fn prot_string(&self) -> String {
        let mut s = String::with_capacity(3);
        s += if self.prot_.contains(ProtFlags::PROT_READ) {
            "r"
        } else {
            "-"
        };
        s += if self.prot_.contains(ProtFlags::PROT_WRITE) {
            "w"
        } else {
            "-"
        };
        s += if self.prot_.contains(ProtFlags::PROT_EXEC) {
            "x"
        } else {
            "-"
        };
        s
    }
}

/// Need to implement this manually because of the assert_valid() check
impl Clone for KernelMapping {
    fn clone(&self) -> Self {
        let result = KernelMapping {
            device_: self.device_,
            inode_: self.inode_,
            prot_: self.prot_,
            flags_: self.flags_,
            offset: self.offset,
            fsname_: self.fsname_.clone(),
            mr: self.mr,
        };
        result.assert_valid();
        result
    }
}

impl Deref for KernelMapping {
    type Target = MemoryRange;
    fn deref(&self) -> &Self::Target {
        &self.mr
    }
}

impl Display for KernelMapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::page_size;

    fn page_mapping(fsname: &str, prot: ProtFlags) -> KernelMapping {
        KernelMapping::new_with_opts(
            RemotePtr::from(0x1000usize),
            RemotePtr::from(0x1000 + page_size()),
            OsStr::new(fsname),
            KernelMapping::NO_DEVICE,
            KernelMapping::NO_INODE,
            prot,
            MapFlags::MAP_PRIVATE,
            0,
        )
    }

    #[test]
    fn vdso_recognition() {
        assert!(page_mapping("[vdso]", ProtFlags::PROT_READ | ProtFlags::PROT_EXEC).is_vdso());
        assert!(!page_mapping("/usr/lib/libpthread.so", ProtFlags::PROT_READ).is_vdso());
    }

    #[test]
    fn str_shows_prot_bits() {
        let m = page_mapping("[vdso]", ProtFlags::PROT_READ | ProtFlags::PROT_EXEC);
        assert!(m.str().contains("r-xp"));
        assert!(!m.is_real_device());
    }
}
