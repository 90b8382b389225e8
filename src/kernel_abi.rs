#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

use crate::{
    remote_code_ptr::RemoteCodePtr,
    task::{read_mem, Task},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SupportedArch {
    X86,
    X64,
}

impl Default for SupportedArch {
    fn default() -> Self {
        Self::X64
    }
}

#[cfg(target_arch = "x86_64")]
pub const RD_NATIVE_ARCH: SupportedArch = SupportedArch::X64;

#[cfg(target_arch = "x86")]
pub const RD_NATIVE_ARCH: SupportedArch = SupportedArch::X86;

const INT80_INSN: [u8; 2] = [0xcd, 0x80];
const SYSENTER_INSN: [u8; 2] = [0x0f, 0x34];
const SYSCALL_INSN: [u8; 2] = [0x0f, 0x05];

/// Determine the architecture of the syscall instruction at `ptr`, if
/// there is one. Compatibility-mode switches can happen in user space,
/// and int80 (which uses the 32-bit syscall table) can be invoked from
/// 64-bit processes, so the instruction's arch is not simply the
/// task's arch.
pub fn get_syscall_instruction_arch(
    t: &mut dyn Task,
    ptr: RemoteCodePtr,
    arch: &mut SupportedArch,
) -> bool {
    let mut ok = true;
    let code: Vec<u8> = read_mem(t, ptr.to_data_ptr::<u8>(), 2, Some(&mut ok));
    if !ok {
        return false;
    }
    if code[..] == INT80_INSN || code[..] == SYSENTER_INSN {
        *arch = SupportedArch::X86;
        true
    } else if code[..] == SYSCALL_INSN {
        *arch = SupportedArch::X64;
        true
    } else {
        false
    }
}

pub fn is_at_syscall_instruction(t: &mut dyn Task, ptr: RemoteCodePtr) -> bool {
    let mut arch = SupportedArch::default();
    get_syscall_instruction_arch(t, ptr, &mut arch)
}

/// Return the code bytes of an invoke-syscall instruction.
pub fn syscall_instruction(arch: SupportedArch) -> &'static [u8] {
    match arch {
        SupportedArch::X86 => &INT80_INSN,
        SupportedArch::X64 => &SYSCALL_INSN,
    }
}

/// Return the length of all invoke-syscall instructions. Currently,
/// they must all have the same length!
pub fn syscall_instruction_length(arch: SupportedArch) -> usize {
    match arch {
        SupportedArch::X86 => 2,
        SupportedArch::X64 => 2,
    }
}

/// The furthest a rel32 branch may land from the end of the branch
/// instruction, backed off by a page so that an entire stub or jump
/// page placed at the edge of the window stays reachable.
pub fn max_branch_displacement(arch: SupportedArch) -> usize {
    match arch {
        SupportedArch::X86 | SupportedArch::X64 => 0x7fff_f000,
    }
}

/// Generated stubs start on this boundary.
pub fn stub_code_alignment(arch: SupportedArch) -> usize {
    match arch {
        SupportedArch::X86 | SupportedArch::X64 => 4,
    }
}

/// The syscall numbers the vdso patcher substitutes into its
/// fast-call rewrites. Only the time-related calls the vdso implements
/// in pure userspace appear here.
pub mod x64 {
    pub const GETTIMEOFDAY: u32 = 96;
    pub const TIME: u32 = 201;
    pub const CLOCK_GETTIME: u32 = 228;
    pub const GETCPU: u32 = 309;
}

pub mod x86 {
    pub const TIME: u32 = 13;
    pub const GETTIMEOFDAY: u32 = 78;
    pub const CLOCK_GETTIME: u32 = 265;
    pub const GETCPU: u32 = 318;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::test_support::FakeTask;

    #[test]
    fn recognizes_syscall_instructions() {
        let mut t = FakeTask::new(SupportedArch::X64);
        t.add_segment(0x1000, vec![0x0f, 0x05, 0xcd, 0x80, 0x0f, 0x34, 0x90, 0x90], "", None);

        let mut arch = SupportedArch::default();
        assert!(get_syscall_instruction_arch(
            &mut t,
            RemoteCodePtr::from_val(0x1000),
            &mut arch
        ));
        assert_eq!(SupportedArch::X64, arch);

        assert!(get_syscall_instruction_arch(
            &mut t,
            RemoteCodePtr::from_val(0x1002),
            &mut arch
        ));
        assert_eq!(SupportedArch::X86, arch);

        assert!(is_at_syscall_instruction(&mut t, RemoteCodePtr::from_val(0x1004)));
        assert!(!is_at_syscall_instruction(&mut t, RemoteCodePtr::from_val(0x1006)));
        // Unmapped: the read fails, not a syscall instruction.
        assert!(!is_at_syscall_instruction(&mut t, RemoteCodePtr::from_val(0x9000)));
    }
}
