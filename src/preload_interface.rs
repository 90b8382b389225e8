#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

pub const SYSCALLBUF_LIB_FILENAME_BASE: &str = "librdpreload";
pub const SYSCALLBUF_LIB_FILENAME: &str = "librdpreload.so";
pub const SYSCALLBUF_LIB_FILENAME_32: &str = "librdpreload_32.so";

/// To intercept a syscall without a kernel trap, the patcher replaces
/// the syscall instruction and one or more of the instructions that
/// follow it with a jump into a generated stub; the stub calls a hook
/// in the preload library, re-executes a relocated copy of the
/// displaced instructions, and jumps back. Each instance of this
/// struct describes one instruction sequence that may follow a syscall
/// instruction and the hook entry to use when it does.
///
/// The preload library owns the table of these records; the patcher
/// reads it out of tracee memory once, at preload initialization.
/// This is never used during replay, so its layout can change without
/// any trace-format versioning.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct syscall_patch_hook {
    /// Number of bytes of `next_instruction_bytes` that must match,
    /// and that get relocated into the stub.
    pub next_instruction_length: u8,
    /// Avoid any padding or anything that would make the layout
    /// arch-specific.
    pub next_instruction_bytes: [u8; 14],
    /// Offset of this hook's entry point from the syscall hook
    /// trampoline base registered alongside the table.
    pub trampoline_relative_addr: u64,
}

/// IMPORTANT! This needs to be kept in sync with the
/// syscall_patch_hook struct
pub const NEXT_INSTRUCTION_BYTES_LEN: usize = 14;

// The preload library and the patcher must agree on this layout:
// one length byte, 14 pattern bytes, padding to 16, then the u64.
assert_eq_size!(syscall_patch_hook, [u8; 24]);
const_assert!(NEXT_INSTRUCTION_BYTES_LEN == 14);
