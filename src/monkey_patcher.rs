//! Code patching state and logic, one instance per tracee address
//! space.
//!
//! The patcher performs the following tasks during recording:
//!
//! 1) Patch the vdso's user-space-only implementation of certain
//! system calls (e.g. gettimeofday) to do a proper kernel system call
//! instead, so we can trap and record it (x86-64 only).
//!
//! 2) Patch the vdso __kernel_vsyscall fast-system-call stub to
//! redirect to the syscall hook in the preload library (x86 only).
//!
//! 3) Patch syscall instructions whose following instructions match a
//! known pattern to call the syscall hook.
//!
//! None of this runs during replay; the mapping and memory records a
//! successful patch emits are all the replayer needs.

use crate::{
    address_space::{KernelMapping, MemoryRange},
    assembly_templates::{
        SyscallPatchJump, SyscallStubHookCall, X64VsyscallMonkeypatch,
        X86SysenterVsyscallImplementation, X86SysenterVsyscallSyscallHook,
        X86SysenterVsyscallUseInt80, X86VsyscallMonkeypatch, NOP_INSN,
    },
    kernel_abi::{
        get_syscall_instruction_arch, max_branch_displacement, stub_code_alignment,
        syscall_instruction_length, x64, x86, SupportedArch,
    },
    log::LogLevel::{LogDebug, LogWarn},
    preload_interface::{syscall_patch_hook, NEXT_INSTRUCTION_BYTES_LEN},
    remote_code_ptr::RemoteCodePtr,
    remote_ptr::{RemotePtr, Void},
    task::{read_mem, RecordTask, Task, WriteFlags},
    util::{find, page_size},
    vdso::VdsoSymbols,
};
use memchr::memmem;
use nix::sys::mman::{MapFlags, ProtFlags};
use std::{
    cmp::{max, min},
    collections::HashSet,
    ffi::OsStr,
    os::unix::ffi::OsStrExt,
};

/// One page of memory we've mapped into the tracee to hold stubs for
/// patch sites the registered stub buffer can't reach with a rel32
/// branch.
#[derive(Clone, Debug)]
pub struct ExtendedJumpPage {
    pub addr: RemotePtr<u8>,
    pub allocated: usize,
}

impl ExtendedJumpPage {
    pub fn new(addr: RemotePtr<u8>) -> ExtendedJumpPage {
        ExtendedJumpPage { addr, allocated: 0 }
    }
}

/// A class encapsulating patching state. There is one instance of this
/// class per tracee address space; it is owned by the recording
/// session object for that address space and lives exactly as long as
/// the address space does. An exec produces a fresh address space and
/// with it a fresh patcher, which is what makes the post-exec patches
/// one-shot per generation.
#[derive(Clone)]
pub struct MonkeyPatcher {
    /// The address of the x86 sysenter vsyscall stub located at exec
    /// time, so patch_at_preload_init can redirect it later.
    pub x86_sysenter_vsyscall: RemotePtr<Void>,
    /// The list of supported syscall patches obtained from the preload
    /// library. Each one matches a specific byte signature for the
    /// instruction(s) after a syscall instruction.
    syscall_hooks: Vec<syscall_patch_hook>,
    /// The addresses of the instructions following syscalls that we've
    /// tried (or are currently trying) to patch.
    tried_to_patch_syscall_addresses: HashSet<RemoteCodePtr>,
    /// Writable executable memory where we can generate stubs,
    /// pre-allocated for us by the preload library.
    stub_buffer: RemotePtr<Void>,
    stub_buffer_end: RemotePtr<Void>,
    stub_buffer_allocated: usize,
    syscall_hook_trampoline: RemotePtr<Void>,
    /// The list of pages we've allocated to hold our extended jumps.
    pub extended_jump_pages: Vec<ExtendedJumpPage>,
}

impl Default for MonkeyPatcher {
    fn default() -> Self {
        MonkeyPatcher::new()
    }
}

impl MonkeyPatcher {
    pub fn new() -> MonkeyPatcher {
        MonkeyPatcher {
            x86_sysenter_vsyscall: RemotePtr::null(),
            syscall_hooks: Vec::new(),
            tried_to_patch_syscall_addresses: HashSet::new(),
            stub_buffer: RemotePtr::null(),
            stub_buffer_end: RemotePtr::null(),
            stub_buffer_allocated: 0,
            syscall_hook_trampoline: RemotePtr::null(),
            extended_jump_pages: Vec::new(),
        }
    }

    /// Apply any necessary patching immediately after exec. In this
    /// hook we patch everything that doesn't depend on the preload
    /// library being loaded.
    pub fn patch_after_exec(&mut self, t: &mut dyn RecordTask) {
        match t.arch() {
            SupportedArch::X86 => patch_after_exec_arch_x86(t, self),
            SupportedArch::X64 => patch_after_exec_arch_x64(t, self),
        }
    }

    /// During preload library initialization, apply patches that
    /// require the preload library's addresses, registered beforehand
    /// via init_dynamic_syscall_patching.
    pub fn patch_at_preload_init(&mut self, t: &mut dyn RecordTask) {
        // NB: the tracee can't be interrupted with a signal while
        // we're processing this, because the preload library masks off
        // all signals around its init call.
        match t.arch() {
            SupportedArch::X86 => {
                if self.x86_sysenter_vsyscall.is_null() {
                    log!(
                        LogDebug,
                        "no sysenter stub was located at exec; nothing to redirect"
                    );
                    return;
                }
                ed_assert!(t, !self.syscall_hook_trampoline.is_null());
                let mut patch = [0u8; X86SysenterVsyscallSyscallHook::SIZE];
                let jump_end =
                    self.x86_sysenter_vsyscall.as_usize() + X86SysenterVsyscallSyscallHook::SIZE;
                X86SysenterVsyscallSyscallHook::substitute(
                    &mut patch,
                    rel32(jump_end, self.syscall_hook_trampoline.as_usize()),
                );
                if write_and_record_bytes(t, self.x86_sysenter_vsyscall, &patch) {
                    log!(
                        LogDebug,
                        "monkeypatched __kernel_vsyscall to jump to the syscall hook"
                    );
                }
            }
            SupportedArch::X64 => {
                // Nothing static left to do here; x86-64 syscall
                // sites are picked up dynamically by
                // try_patch_syscall.
            }
        }
    }

    /// One-time registration call made on behalf of the preload
    /// library: read its hook signature table out of tracee memory and
    /// remember the stub buffer bounds and trampoline entry. Must
    /// happen before any try_patch_syscall call; registering twice is
    /// not supported.
    pub fn init_dynamic_syscall_patching(
        &mut self,
        t: &mut dyn RecordTask,
        syscall_patch_hook_count: usize,
        syscall_patch_hooks: RemotePtr<syscall_patch_hook>,
        stub_buffer: RemotePtr<Void>,
        stub_buffer_end: RemotePtr<Void>,
        syscall_hook_trampoline: RemotePtr<Void>,
    ) {
        debug_assert!(self.syscall_hooks.is_empty() && self.stub_buffer.is_null());
        ed_assert!(t, stub_buffer <= stub_buffer_end);
        ed_assert!(t, syscall_hook_trampoline <= stub_buffer);
        if syscall_patch_hook_count != 0 {
            self.syscall_hooks = read_mem(
                t.as_task_mut(),
                syscall_patch_hooks,
                syscall_patch_hook_count,
                None,
            );
        }
        self.stub_buffer = stub_buffer;
        self.stub_buffer_end = stub_buffer_end;
        self.syscall_hook_trampoline = syscall_hook_trampoline;
        log!(
            LogDebug,
            "registered {} syscall hooks, stub buffer {}-{}, trampoline {}",
            self.syscall_hooks.len(),
            stub_buffer,
            stub_buffer_end,
            syscall_hook_trampoline
        );
    }

    /// Try to patch the syscall instruction the tracee just executed,
    /// with its ip at the instruction following the syscall. If this
    /// returns false, patching failed and the syscall should be
    /// processed as normal. If this returns true, patching succeeded;
    /// ip() has been reset to the start of the patched syscall, and
    /// resuming executes the patched code. Zero or more mapping
    /// records are also written to the trace and must be replayed.
    ///
    /// Patching can fail for a given site exactly once: the first
    /// outcome, success or failure, is remembered and later calls for
    /// the same address short-circuit to "not patched".
    pub fn try_patch_syscall(&mut self, t: &mut dyn RecordTask) -> bool {
        if self.syscall_hooks.is_empty() {
            // The preload library hasn't registered its hook table.
            return false;
        }
        let ip = t.regs_ref().ip();
        if self.tried_to_patch_syscall_addresses.contains(&ip) {
            return false;
        }
        self.tried_to_patch_syscall_addresses.insert(ip);

        let arch = t.arch();
        let mut insn_arch = SupportedArch::default();
        if !get_syscall_instruction_arch(
            t.as_task_mut(),
            ip.decrement_by_syscall_insn_length(arch),
            &mut insn_arch,
        ) || insn_arch != arch
        {
            log!(
                LogDebug,
                "declining to patch {}: not at a syscall instruction of the task's arch",
                ip
            );
            return false;
        }

        // A patchable instruction sequence never comes close to this
        // window size.
        let mut bytes = [0u8; 256];
        let bytes_count = t
            .read_bytes_fallible(ip.to_data_ptr::<u8>(), &mut bytes)
            .unwrap_or(0);

        let syscallno = t.regs_ref().original_syscallno();
        for i in 0..self.syscall_hooks.len() {
            let hook = self.syscall_hooks[i];
            let next_instruction_length = hook.next_instruction_length as usize;
            if bytes_count >= next_instruction_length
                && bytes[..next_instruction_length]
                    == hook.next_instruction_bytes[..next_instruction_length]
            {
                if syscall_instruction_length(arch) + next_instruction_length
                    < SyscallPatchJump::SIZE
                {
                    log!(
                        LogDebug,
                        "declining to patch {}: matched signature too short to hold a jump",
                        ip
                    );
                    return false;
                }
                if !self.patch_syscall_with_hook(t, &hook) {
                    log!(
                        LogDebug,
                        "failed to patch syscall {} at {} for tid {}",
                        syscallno,
                        ip,
                        t.tid()
                    );
                    return false;
                }
                log!(
                    LogDebug,
                    "patched syscall {} at {} for tid {}",
                    syscallno,
                    ip,
                    t.tid()
                );
                return true;
            }
        }

        if is_logging!(LogDebug) {
            let shown = min(bytes_count, NEXT_INSTRUCTION_BYTES_LEN);
            log!(
                LogDebug,
                "no syscall hook matches syscall {} at {}; next bytes {:02x?}",
                syscallno,
                ip,
                &bytes[..shown]
            );
        }
        false
    }

    /// Try to allocate a stub from the syscall patching stub buffer.
    /// Returns null if there's no buffer or we've run out of space.
    /// A failing call consumes nothing.
    pub fn allocate_stub(&mut self, t: &dyn Task, bytes: usize) -> RemotePtr<u8> {
        if self.stub_buffer.is_null() {
            return RemotePtr::null();
        }
        let bytes = align_stub_size(bytes, t.arch());
        let capacity = self.stub_buffer_end.as_usize() - self.stub_buffer.as_usize();
        if self.stub_buffer_allocated + bytes > capacity {
            return RemotePtr::null();
        }
        let result = self.stub_buffer.as_rptr_u8() + self.stub_buffer_allocated;
        self.stub_buffer_allocated += bytes;
        result
    }

    pub fn stub_bytes_allocated(&self) -> usize {
        self.stub_buffer_allocated
    }

    /// Apply any necessary patching immediately after an mmap. Known
    /// platform libraries get fixed rewrites; anything else is left
    /// alone.
    pub fn patch_after_mmap(
        &mut self,
        t: &mut dyn RecordTask,
        start: RemotePtr<Void>,
        size: usize,
        offset_pages: usize,
        child_fd: i32,
    ) {
        let map = match t.mapping_of(start) {
            Some(m) => m,
            None => return,
        };
        if !map.prot().contains(ProtFlags::PROT_EXEC) {
            return;
        }
        for patch in MMAP_PATCHES {
            debug_assert_eq!(patch.bytes_to_find.len(), patch.replacement.len());
            if find(map.fsname().as_bytes(), patch.fsname_substring).is_none() {
                continue;
            }
            let mut ok = true;
            let data = read_mem::<u8>(t.as_task_mut(), start, size, Some(&mut ok));
            if !ok {
                log!(LogWarn, "failed to read mapping {} for patching", map);
                continue;
            }
            let mut search_offset = 0;
            while let Some(pos) = memmem::find(&data[search_offset..], patch.bytes_to_find) {
                let patch_addr = start + (search_offset + pos);
                if write_and_record_bytes(t, patch_addr, patch.replacement) {
                    log!(
                        LogDebug,
                        "monkeypatched {:?} at {} (mapped at file page {}, fd {})",
                        map.fsname(),
                        patch_addr,
                        offset_pages,
                        child_fd
                    );
                }
                search_offset += pos + patch.bytes_to_find.len();
            }
        }
    }

    /// Returns true if the instruction at address `p` should be
    /// considered "not part of the syscallbuf code", i.e. it's safe to
    /// deliver signals there without affecting the syscall buffering
    /// logic. If not sure, returns false; in particular it is false
    /// before the preload library has registered its addresses.
    pub fn is_syscallbuf_excluded_instruction(&self, p: RemotePtr<Void>) -> bool {
        p >= self.syscall_hook_trampoline && p < self.stub_buffer_end
    }

    fn patch_syscall_with_hook(
        &mut self,
        t: &mut dyn RecordTask,
        hook: &syscall_patch_hook,
    ) -> bool {
        let arch = t.arch();
        let next_instruction_length = hook.next_instruction_length as usize;
        ed_assert!(t, next_instruction_length <= NEXT_INSTRUCTION_BYTES_LEN);

        let ip = t.regs_ref().ip();
        let jump_patch_start = ip
            .decrement_by_syscall_insn_length(arch)
            .to_data_ptr::<u8>();
        let patch_region_size = syscall_instruction_length(arch) + next_instruction_length;
        let return_addr = jump_patch_start + patch_region_size;
        let hook_entry =
            self.syscall_hook_trampoline.as_rptr_u8() + hook.trampoline_relative_addr as usize;

        let stub_size =
            SyscallStubHookCall::SIZE + next_instruction_length + SyscallPatchJump::SIZE;
        let stub_start = self.allocate_reachable_stub(t, stub_size, return_addr, hook_entry);
        if stub_start.is_null() {
            return false;
        }

        // The stub enters the hook, replays the displaced
        // instructions, then resumes the original code.
        let mut stub = vec![0u8; stub_size];
        let call_end = stub_start.as_usize() + SyscallStubHookCall::SIZE;
        SyscallStubHookCall::substitute(&mut stub, rel32(call_end, hook_entry.as_usize()));
        stub[SyscallStubHookCall::SIZE..SyscallStubHookCall::SIZE + next_instruction_length]
            .copy_from_slice(&hook.next_instruction_bytes[..next_instruction_length]);
        let stub_jump_offset = SyscallStubHookCall::SIZE + next_instruction_length;
        let stub_end = stub_start.as_usize() + stub_jump_offset + SyscallPatchJump::SIZE;
        SyscallPatchJump::substitute(
            &mut stub[stub_jump_offset..],
            rel32(stub_end, return_addr.as_usize()),
        );
        if !write_and_record_bytes(t, RemotePtr::cast(stub_start), &stub) {
            return false;
        }

        // The site becomes a jump into the stub, nop-padded over the
        // rest of the displaced bytes.
        let mut jump_patch = vec![NOP_INSN; patch_region_size];
        let jump_patch_end = jump_patch_start.as_usize() + SyscallPatchJump::SIZE;
        SyscallPatchJump::substitute(
            &mut jump_patch,
            rel32(jump_patch_end, stub_start.as_usize()),
        );
        if !write_and_record_bytes(t, jump_patch_start, &jump_patch) {
            return false;
        }

        // Resume from the patched syscall instruction so execution
        // enters the stub.
        let mut r = *t.regs_ref();
        r.set_ip(jump_patch_start.to_code_ptr());
        t.set_regs(&r);
        true
    }

    fn allocate_reachable_stub(
        &mut self,
        t: &mut dyn RecordTask,
        stub_size: usize,
        return_addr: RemotePtr<u8>,
        hook_entry: RemotePtr<u8>,
    ) -> RemotePtr<u8> {
        let arch = t.arch();
        // The registered stub buffer is preferred; it sits next to the
        // preload library, so the hook call is always in range there.
        if !self.stub_buffer.is_null() {
            let candidate = self.stub_buffer.as_rptr_u8() + self.stub_buffer_allocated;
            if stub_is_reachable(candidate, stub_size, return_addr, hook_entry, arch) {
                let p = self.allocate_stub(t.as_task(), stub_size);
                if !p.is_null() {
                    return p;
                }
                log!(LogDebug, "syscall patch stub buffer is full");
            }
        }
        self.allocate_extended_jump(t, stub_size, return_addr, hook_entry)
    }

    /// Allocation targets the most recently created extended jump page
    /// unless reachability forces an older one, or a new one.
    fn allocate_extended_jump(
        &mut self,
        t: &mut dyn RecordTask,
        stub_size: usize,
        return_addr: RemotePtr<u8>,
        hook_entry: RemotePtr<u8>,
    ) -> RemotePtr<u8> {
        let arch = t.arch();
        let aligned_size = align_stub_size(stub_size, arch);
        for page in self.extended_jump_pages.iter_mut().rev() {
            if page.allocated + aligned_size > page_size() {
                continue;
            }
            let candidate = page.addr + page.allocated;
            if stub_is_reachable(candidate, stub_size, return_addr, hook_entry, arch) {
                page.allocated += aligned_size;
                return candidate;
            }
        }

        // No existing page works; a fresh one must land inside the
        // window that can reach both targets.
        let limit = max_branch_displacement(arch);
        let lo = max(
            return_addr.as_usize().saturating_sub(limit),
            hook_entry.as_usize().saturating_sub(limit),
        );
        let hi = min(
            return_addr.as_usize().saturating_add(limit),
            hook_entry.as_usize().saturating_add(limit),
        );
        if lo.saturating_add(page_size()) > hi {
            log!(
                LogDebug,
                "no address window reaches both {} and {}",
                return_addr,
                hook_entry
            );
            return RemotePtr::null();
        }
        let page_addr = t.find_free_memory(page_size(), RemotePtr::from(lo));
        if page_addr.is_null() || page_addr.as_usize() + page_size() > hi {
            log!(
                LogDebug,
                "no free page within branch range of {} and {}",
                return_addr,
                hook_entry
            );
            return RemotePtr::null();
        }
        if !t.map_patch_page(page_addr, page_size()) {
            log!(LogWarn, "failed to map extended jump page at {}", page_addr);
            return RemotePtr::null();
        }
        let km = KernelMapping::new_with_opts(
            page_addr,
            page_addr + page_size(),
            OsStr::new(""),
            KernelMapping::NO_DEVICE,
            KernelMapping::NO_INODE,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE | ProtFlags::PROT_EXEC,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            0,
        );
        log!(LogDebug, "added extended jump page {}", km);
        t.record_patch_mapping(km);
        let mut page = ExtendedJumpPage::new(page_addr.as_rptr_u8());
        let result = page.addr;
        page.allocated = aligned_size;
        self.extended_jump_pages.push(page);
        result
    }
}

struct NamedSyscall {
    name: &'static str,
    syscall_number: u32,
}

/// The vdso functions with pure-userspace implementations that would
/// otherwise be unrecordable.
const X64_SYSCALLS_TO_MONKEYPATCH: &[NamedSyscall] = &[
    NamedSyscall {
        name: "__vdso_clock_gettime",
        syscall_number: x64::CLOCK_GETTIME,
    },
    NamedSyscall {
        name: "__vdso_getcpu",
        syscall_number: x64::GETCPU,
    },
    NamedSyscall {
        name: "__vdso_gettimeofday",
        syscall_number: x64::GETTIMEOFDAY,
    },
    NamedSyscall {
        name: "__vdso_time",
        syscall_number: x64::TIME,
    },
];

const X86_SYSCALLS_TO_MONKEYPATCH: &[NamedSyscall] = &[
    NamedSyscall {
        name: "__vdso_clock_gettime",
        syscall_number: x86::CLOCK_GETTIME,
    },
    NamedSyscall {
        name: "__vdso_getcpu",
        syscall_number: x86::GETCPU,
    },
    NamedSyscall {
        name: "__vdso_gettimeofday",
        syscall_number: x86::GETTIMEOFDAY,
    },
    NamedSyscall {
        name: "__vdso_time",
        syscall_number: x86::TIME,
    },
];

struct MmapPatch {
    fsname_substring: &'static [u8],
    bytes_to_find: &'static [u8],
    replacement: &'static [u8],
}

/// glibc's __lll_lock_elision enters its transactional fast path with
/// `xbegin .+6`, the abort path immediately following the xbegin.
/// Rewriting the xbegin as an unconditional jump to that abort path
/// keeps recorded processes out of transactional regions, which can't
/// be counted deterministically.
const LIBPTHREAD_ELISION_PATCH: MmapPatch = MmapPatch {
    fsname_substring: b"libpthread",
    bytes_to_find: &[0xc7, 0xf8, 0x06, 0x00, 0x00, 0x00],
    replacement: &[0xe9, 0x07, 0x00, 0x00, 0x00, NOP_INSN],
};

const MMAP_PATCHES: &[MmapPatch] = &[LIBPTHREAD_ELISION_PATCH];

fn align_stub_size(bytes: usize, arch: SupportedArch) -> usize {
    let alignment = stub_code_alignment(arch);
    (bytes + alignment - 1) & !(alignment - 1)
}

/// rel32 displacement from the end of a branch instruction at
/// `from_end` to `target`.
fn rel32(from_end: usize, target: usize) -> u32 {
    let displacement = target.wrapping_sub(from_end) as isize;
    debug_assert!(
        displacement <= i32::max_value() as isize && displacement >= i32::min_value() as isize
    );
    displacement as i32 as u32
}

fn is_reachable_via_rel32(from_end: usize, target: usize, arch: SupportedArch) -> bool {
    let limit = max_branch_displacement(arch);
    let (lo, hi) = if from_end <= target {
        (from_end, target)
    } else {
        (target, from_end)
    };
    hi - lo <= limit
}

/// A stub at `stub_start` branches to two places: the hook entry from
/// its call and the resume address from its final jump. The patch
/// site's own jump into the stub is covered by the resume check, the
/// two addresses being a few bytes apart.
fn stub_is_reachable(
    stub_start: RemotePtr<u8>,
    stub_size: usize,
    return_addr: RemotePtr<u8>,
    hook_entry: RemotePtr<u8>,
    arch: SupportedArch,
) -> bool {
    is_reachable_via_rel32(
        stub_start.as_usize() + stub_size,
        return_addr.as_usize(),
        arch,
    ) && is_reachable_via_rel32(
        stub_start.as_usize() + SyscallStubHookCall::SIZE,
        hook_entry.as_usize(),
        arch,
    )
}

fn write_and_record_bytes(t: &mut dyn RecordTask, addr: RemotePtr<Void>, buf: &[u8]) -> bool {
    let mut ok = true;
    t.write_bytes_helper(addr, buf, Some(&mut ok), WriteFlags::empty());
    if ok {
        t.record_local(addr, buf);
    } else {
        log!(LogWarn, "failed to write {} patch bytes at {}", buf.len(), addr);
    }
    ok
}

fn read_vdso_symbols(t: &mut dyn RecordTask) -> Option<(MemoryRange, VdsoSymbols)> {
    let vdso = match t.vdso_range() {
        Some(r) => r,
        None => {
            log!(LogDebug, "no vdso mapped; nothing to patch");
            return None;
        }
    };
    let mut ok = true;
    let data = read_mem::<u8>(t.as_task_mut(), vdso.start(), vdso.size(), Some(&mut ok));
    if !ok {
        log!(LogWarn, "failed to read the vdso at {}", vdso.start());
        return None;
    }
    match VdsoSymbols::parse(&data) {
        Ok(symbols) => Some((vdso, symbols)),
        Err(e) => {
            log!(LogWarn, "failed to parse the vdso image: {:?}", e);
            None
        }
    }
}

/// Rewrite the vdso's pure-userspace time functions into real
/// syscalls so they trap and get recorded.
fn patch_after_exec_arch_x64(t: &mut dyn RecordTask, _patcher: &mut MonkeyPatcher) {
    let (vdso, symbols) = match read_vdso_symbols(t) {
        Some(x) => x,
        None => return,
    };
    for syscall in X64_SYSCALLS_TO_MONKEYPATCH {
        if let Some(offset) = symbols.offset_of(syscall.name) {
            let addr = vdso.start() + offset;
            let mut patch = [0u8; X64VsyscallMonkeypatch::SIZE];
            X64VsyscallMonkeypatch::substitute(&mut patch, syscall.syscall_number);
            if write_and_record_bytes(t, addr, &patch) {
                log!(
                    LogDebug,
                    "monkeypatched {} to syscall {}",
                    syscall.name,
                    syscall.syscall_number
                );
            }
        }
    }
}

/// Same as the x64 hook, plus: locate the sysenter-based
/// __kernel_vsyscall stub and force it through int80 so fast syscalls
/// are traceable before the preload library takes it over.
fn patch_after_exec_arch_x86(t: &mut dyn RecordTask, patcher: &mut MonkeyPatcher) {
    let (vdso, symbols) = match read_vdso_symbols(t) {
        Some(x) => x,
        None => return,
    };
    for syscall in X86_SYSCALLS_TO_MONKEYPATCH {
        if let Some(offset) = symbols.offset_of(syscall.name) {
            let addr = vdso.start() + offset;
            let mut patch = [0u8; X86VsyscallMonkeypatch::SIZE];
            X86VsyscallMonkeypatch::substitute(&mut patch, syscall.syscall_number);
            if write_and_record_bytes(t, addr, &patch) {
                log!(
                    LogDebug,
                    "monkeypatched {} to syscall {}",
                    syscall.name,
                    syscall.syscall_number
                );
            }
        }
    }
    match symbols.offset_of("__kernel_vsyscall") {
        Some(offset) => {
            let addr = vdso.start() + offset;
            let mut ok = true;
            let impl_bytes = read_mem::<u8>(
                t.as_task_mut(),
                addr,
                X86SysenterVsyscallImplementation::SIZE,
                Some(&mut ok),
            );
            if ok && X86SysenterVsyscallImplementation::matches(&impl_bytes) {
                let mut patch = [0u8; X86SysenterVsyscallUseInt80::SIZE];
                X86SysenterVsyscallUseInt80::substitute(&mut patch);
                if write_and_record_bytes(t, addr, &patch) {
                    patcher.x86_sysenter_vsyscall = addr;
                    log!(
                        LogDebug,
                        "monkeypatched __kernel_vsyscall at {} to use int80",
                        addr
                    );
                }
            } else {
                log!(
                    LogWarn,
                    "__kernel_vsyscall at {} does not look like a sysenter stub; leaving it alone",
                    addr
                );
            }
        }
        None => log!(LogWarn, "the vdso has no __kernel_vsyscall symbol"),
    }
}
