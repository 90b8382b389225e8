//! The seam between this subsystem and the recording control loop.
//!
//! The debugger's task objects implement these traits; the patcher
//! never touches a tracee except through them. `Task` covers plain
//! address-space access, `RecordTask` adds the recording-only
//! operations a successful patch needs (fresh mappings and trace
//! records).

use crate::{
    address_space::{KernelMapping, MemoryRange},
    kernel_abi::SupportedArch,
    registers::Registers,
    remote_ptr::{RemotePtr, Void},
};
use libc::pid_t;
use std::{mem::size_of, mem::zeroed, slice};

bitflags! {
    /// Flags for `Task::write_bytes_helper`.
    pub struct WriteFlags: u32 {
        /// The write plants or restores breakpoint bytes owned by the
        /// debugger core; implementations must not treat it as a
        /// program-visible memory change.
        const IS_BREAKPOINT_RELATED = 0x1;
    }
}

pub trait Task {
    fn tid(&self) -> pid_t;

    fn arch(&self) -> SupportedArch;

    fn regs_ref(&self) -> &Registers;

    fn set_regs(&mut self, regs: &Registers);

    /// Read up to `buf.len()` bytes from `addr`, returning how many
    /// were read. Short reads happen at mapping boundaries; an
    /// entirely unmapped `addr` is an error.
    fn read_bytes_fallible(&mut self, addr: RemotePtr<Void>, buf: &mut [u8]) -> Result<usize, ()>;

    /// Write `buf` to `addr`. Implementations must make the written
    /// bytes coherently visible to the tracee's execution unit before
    /// it next resumes; on x86 a ptrace or /proc/<pid>/mem write
    /// already provides this.
    ///
    /// If the data can't all be written, then if `ok` is non-null,
    /// sets *ok to false, otherwise aborts.
    fn write_bytes_helper(
        &mut self,
        addr: RemotePtr<Void>,
        buf: &[u8],
        ok: Option<&mut bool>,
        flags: WriteFlags,
    );

    /// If the data can't all be read, then if `ok` is non-null, sets
    /// *ok to false, otherwise aborts.
    fn read_bytes_helper(&mut self, addr: RemotePtr<Void>, buf: &mut [u8], ok: Option<&mut bool>) {
        let result_nread = self.read_bytes_fallible(addr, buf);
        match result_nread {
            Ok(nread) if nread == buf.len() => (),
            _ => {
                let nread = result_nread.unwrap_or(0);
                match ok {
                    Some(ok) => *ok = false,
                    None => {
                        ed_assert!(
                            self,
                            false,
                            "Should have read {} bytes from {}, but only read {}",
                            buf.len(),
                            addr,
                            nread
                        );
                    }
                }
            }
        }
    }

    /// The mapping of the kernel-provided fast-syscall page, if one
    /// exists in this address space.
    fn vdso_range(&self) -> Option<MemoryRange>;

    /// The mapping containing `addr`, if any.
    fn mapping_of(&self, addr: RemotePtr<Void>) -> Option<KernelMapping>;

    /// The start of a gap of at least `required_space` bytes of
    /// unmapped address space at or after `after`; null if the
    /// address space has no such gap.
    fn find_free_memory(&self, required_space: usize, after: RemotePtr<Void>) -> RemotePtr<Void>;
}

pub trait RecordTask: Task {
    fn as_task(&self) -> &dyn Task;

    fn as_task_mut(&mut self) -> &mut dyn Task;

    /// Map a fresh page of anonymous writable-executable memory at
    /// exactly `addr` in the tracee. Returns false if the kernel
    /// refuses.
    fn map_patch_page(&mut self, addr: RemotePtr<Void>, size: usize) -> bool;

    /// Emit a mapping-change record to the trace so replay can
    /// recreate `map` without running any patching logic.
    fn record_patch_mapping(&mut self, map: KernelMapping);

    /// Record `buf` as the new contents of tracee memory at `addr`.
    fn record_local(&mut self, addr: RemotePtr<Void>, buf: &[u8]);
}

/// Read `count` values from `child_addr`.
pub fn read_mem<D: Clone>(
    task: &mut dyn Task,
    child_addr: RemotePtr<D>,
    count: usize,
    ok: Option<&mut bool>,
) -> Vec<D> {
    let mut v: Vec<D> = Vec::with_capacity(count);
    v.resize(count, unsafe { zeroed() });
    let u8_slice =
        unsafe { slice::from_raw_parts_mut(v.as_mut_ptr() as *mut u8, count * size_of::<D>()) };
    task.read_bytes_helper(RemotePtr::cast(child_addr), u8_slice, ok);
    v
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::util::{ceil_page_size, page_size};
    use nix::sys::mman::{MapFlags, ProtFlags};
    use std::ffi::OsStr;

    pub struct FakeSegment {
        pub map: KernelMapping,
        pub data: Vec<u8>,
    }

    /// An in-memory stand-in for the recording control loop's task
    /// handle: a handful of mapped segments, a register file, and
    /// counters for the records a real task would push to the trace.
    pub struct FakeTask {
        pub regs: Registers,
        pub segments: Vec<FakeSegment>,
        pub recorded_mappings: Vec<KernelMapping>,
        pub recorded_locals: Vec<(RemotePtr<Void>, Vec<u8>)>,
        /// Arena where map_patch_page/find_free_memory may place pages.
        pub mappable: MemoryRange,
        pub fail_mmap: bool,
        pub reads: usize,
        pub writes: usize,
        arch_: SupportedArch,
    }

    impl FakeTask {
        pub fn new(arch: SupportedArch) -> FakeTask {
            FakeTask {
                regs: Registers::new(arch),
                segments: Vec::new(),
                recorded_mappings: Vec::new(),
                recorded_locals: Vec::new(),
                mappable: MemoryRange::default(),
                fail_mmap: false,
                reads: 0,
                writes: 0,
                arch_: arch,
            }
        }

        /// Map `data` at page-aligned `start`, padded out to whole
        /// pages. `prot` defaults to r-x.
        pub fn add_segment(
            &mut self,
            start: usize,
            mut data: Vec<u8>,
            fsname: &str,
            prot: Option<ProtFlags>,
        ) {
            assert_eq!(0, start % page_size());
            let prot = prot.unwrap_or(ProtFlags::PROT_READ | ProtFlags::PROT_EXEC);
            let mapped_len = ceil_page_size(std::cmp::max(data.len(), 1));
            data.resize(mapped_len, 0);
            let map = KernelMapping::new_with_opts(
                RemotePtr::from(start),
                RemotePtr::from(start + mapped_len),
                OsStr::new(fsname),
                KernelMapping::NO_DEVICE,
                KernelMapping::NO_INODE,
                prot,
                MapFlags::MAP_PRIVATE,
                0,
            );
            self.segments.push(FakeSegment { map, data });
        }

        pub fn bytes_at(&self, addr: usize, len: usize) -> Vec<u8> {
            for s in &self.segments {
                if s.map.contains_ptr(RemotePtr::from(addr)) {
                    let offset = addr - s.map.start().as_usize();
                    return s.data[offset..offset + len].to_vec();
                }
            }
            panic!("no segment contains {:#x}", addr);
        }
    }

    impl Task for FakeTask {
        fn tid(&self) -> pid_t {
            1000
        }

        fn arch(&self) -> SupportedArch {
            self.arch_
        }

        fn regs_ref(&self) -> &Registers {
            &self.regs
        }

        fn set_regs(&mut self, regs: &Registers) {
            self.regs = *regs;
        }

        fn read_bytes_fallible(
            &mut self,
            addr: RemotePtr<Void>,
            buf: &mut [u8],
        ) -> Result<usize, ()> {
            self.reads += 1;
            for s in &self.segments {
                if s.map.contains_ptr(addr) {
                    let offset = addr.as_usize() - s.map.start().as_usize();
                    let n = std::cmp::min(buf.len(), s.data.len() - offset);
                    buf[..n].copy_from_slice(&s.data[offset..offset + n]);
                    return Ok(n);
                }
            }
            Err(())
        }

        fn write_bytes_helper(
            &mut self,
            addr: RemotePtr<Void>,
            buf: &[u8],
            ok: Option<&mut bool>,
            _flags: WriteFlags,
        ) {
            self.writes += 1;
            for s in &mut self.segments {
                if s.map.contains_ptr(addr)
                    && addr.as_usize() + buf.len() <= s.map.end().as_usize()
                {
                    let offset = addr.as_usize() - s.map.start().as_usize();
                    s.data[offset..offset + buf.len()].copy_from_slice(buf);
                    return;
                }
            }
            match ok {
                Some(ok) => *ok = false,
                None => panic!("no segment holds a write of {} bytes at {}", buf.len(), addr),
            }
        }

        fn vdso_range(&self) -> Option<MemoryRange> {
            self.segments
                .iter()
                .find(|s| s.map.is_vdso())
                .map(|s| MemoryRange::from_range(s.map.start(), s.map.end()))
        }

        fn mapping_of(&self, addr: RemotePtr<Void>) -> Option<KernelMapping> {
            self.segments
                .iter()
                .find(|s| s.map.contains_ptr(addr))
                .map(|s| s.map.clone())
        }

        fn find_free_memory(&self, required_space: usize, after: RemotePtr<Void>) -> RemotePtr<Void> {
            let mut candidate = ceil_page_size(std::cmp::max(
                after.as_usize(),
                self.mappable.start().as_usize(),
            ));
            loop {
                if candidate + required_space > self.mappable.end().as_usize() {
                    return RemotePtr::null();
                }
                let range = MemoryRange::new_range(RemotePtr::from(candidate), required_space);
                match self.segments.iter().find(|s| s.map.intersects(&range)) {
                    Some(s) => candidate = ceil_page_size(s.map.end().as_usize()),
                    None => return RemotePtr::from(candidate),
                }
            }
        }
    }

    impl RecordTask for FakeTask {
        fn as_task(&self) -> &dyn Task {
            self
        }

        fn as_task_mut(&mut self) -> &mut dyn Task {
            self
        }

        fn map_patch_page(&mut self, addr: RemotePtr<Void>, size: usize) -> bool {
            if self.fail_mmap {
                return false;
            }
            self.add_segment(
                addr.as_usize(),
                vec![0; size],
                "",
                Some(ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC),
            );
            true
        }

        fn record_patch_mapping(&mut self, map: KernelMapping) {
            self.recorded_mappings.push(map);
        }

        fn record_local(&mut self, addr: RemotePtr<Void>, buf: &[u8]) {
            self.recorded_locals.push((addr, buf.to_vec()));
        }
    }

    fn p16(v: &mut Vec<u8>, x: u16) {
        v.extend_from_slice(&x.to_le_bytes());
    }

    fn p32(v: &mut Vec<u8>, x: u32) {
        v.extend_from_slice(&x.to_le_bytes());
    }

    fn p64(v: &mut Vec<u8>, x: u64) {
        v.extend_from_slice(&x.to_le_bytes());
    }

    const TEXT_OFFSET: usize = 0x200;

    /// Build a minimal vdso-shaped ELF image: one PT_LOAD segment,
    /// `text` at image offset 0x200, and a dynamic symbol table whose
    /// entries are (name, offset-into-image) pairs with st_value
    /// biased by `vaddr_base`.
    pub fn build_vdso_image(
        class64: bool,
        machine: u16,
        vaddr_base: u64,
        text: &[u8],
        syms: &[(&str, u64)],
    ) -> Vec<u8> {
        assert!(TEXT_OFFSET + text.len() < 0x1000);
        let (ehsize, phentsize, shentsize, symsize) = if class64 {
            (64usize, 56usize, 64usize, 24usize)
        } else {
            (52usize, 32usize, 40usize, 16usize)
        };

        // Names first so symbol records can reference them.
        let mut dynstr: Vec<u8> = vec![0];
        let mut name_offsets: Vec<u32> = Vec::new();
        for (name, _) in syms {
            name_offsets.push(dynstr.len() as u32);
            dynstr.extend_from_slice(name.as_bytes());
            dynstr.push(0);
        }

        let dynstr_off = TEXT_OFFSET + text.len();
        let dynsym_off = (dynstr_off + dynstr.len() + 7) & !7;
        let nsyms = syms.len() + 1; // leading null symbol
        let shoff = (dynsym_off + nsyms * symsize + 7) & !7;
        let image_size = shoff + 3 * shentsize;

        let mut v: Vec<u8> = Vec::with_capacity(image_size);
        // e_ident
        v.extend_from_slice(&[0x7f, b'E', b'L', b'F']);
        v.push(if class64 { 2 } else { 1 });
        v.extend_from_slice(&[1, 1, 0]);
        v.extend_from_slice(&[0u8; 8]);
        p16(&mut v, 3); // ET_DYN
        p16(&mut v, machine);
        p32(&mut v, 1);
        if class64 {
            p64(&mut v, 0); // e_entry
            p64(&mut v, ehsize as u64); // e_phoff
            p64(&mut v, shoff as u64);
            p32(&mut v, 0); // e_flags
            p16(&mut v, ehsize as u16);
            p16(&mut v, phentsize as u16);
            p16(&mut v, 1);
            p16(&mut v, shentsize as u16);
            p16(&mut v, 3);
            p16(&mut v, 0); // e_shstrndx: none
        } else {
            p32(&mut v, 0);
            p32(&mut v, ehsize as u32);
            p32(&mut v, shoff as u32);
            p32(&mut v, 0);
            p16(&mut v, ehsize as u16);
            p16(&mut v, phentsize as u16);
            p16(&mut v, 1);
            p16(&mut v, shentsize as u16);
            p16(&mut v, 3);
            p16(&mut v, 0);
        }
        // One PT_LOAD covering the whole image.
        if class64 {
            p32(&mut v, 1); // PT_LOAD
            p32(&mut v, 5); // r-x
            p64(&mut v, 0);
            p64(&mut v, vaddr_base);
            p64(&mut v, vaddr_base);
            p64(&mut v, image_size as u64);
            p64(&mut v, image_size as u64);
            p64(&mut v, 0x1000);
        } else {
            p32(&mut v, 1);
            p32(&mut v, 0);
            p32(&mut v, vaddr_base as u32);
            p32(&mut v, vaddr_base as u32);
            p32(&mut v, image_size as u32);
            p32(&mut v, image_size as u32);
            p32(&mut v, 5);
            p32(&mut v, 0x1000);
        }
        v.resize(TEXT_OFFSET, 0);
        v.extend_from_slice(text);
        v.extend_from_slice(&dynstr);
        v.resize(dynsym_off, 0);
        // Null symbol, then the real entries.
        v.resize(dynsym_off + symsize, 0);
        for (i, (_, offset)) in syms.iter().enumerate() {
            let st_value = vaddr_base + offset;
            if class64 {
                p32(&mut v, name_offsets[i]);
                v.push(0x12); // GLOBAL FUNC
                v.push(0);
                p16(&mut v, 1);
                p64(&mut v, st_value);
                p64(&mut v, 16);
            } else {
                p32(&mut v, name_offsets[i]);
                p32(&mut v, st_value as u32);
                p32(&mut v, 16);
                v.push(0x12);
                v.push(0);
                p16(&mut v, 1);
            }
        }
        v.resize(shoff, 0);
        // Section headers: null, .dynsym, .dynstr.
        let shdr = |v: &mut Vec<u8>,
                    sh_type: u32,
                    sh_offset: usize,
                    sh_size: usize,
                    sh_link: u32,
                    sh_entsize: usize| {
            if class64 {
                p32(v, 0);
                p32(v, sh_type);
                p64(v, 2); // SHF_ALLOC
                p64(v, vaddr_base + sh_offset as u64);
                p64(v, sh_offset as u64);
                p64(v, sh_size as u64);
                p32(v, sh_link);
                p32(v, 0);
                p64(v, 8);
                p64(v, sh_entsize as u64);
            } else {
                p32(v, 0);
                p32(v, sh_type);
                p32(v, 2);
                p32(v, (vaddr_base as u32).wrapping_add(sh_offset as u32));
                p32(v, sh_offset as u32);
                p32(v, sh_size as u32);
                p32(v, sh_link);
                p32(v, 0);
                p32(v, 8);
                p32(v, sh_entsize as u32);
            }
        };
        v.resize(shoff + shentsize, 0); // null section header
        shdr(&mut v, 11, dynsym_off, nsyms * symsize, 2, symsize); // SHT_DYNSYM
        shdr(&mut v, 3, dynstr_off, dynstr.len(), 0, 0); // SHT_STRTAB
        assert_eq!(image_size, v.len());
        v
    }
}
