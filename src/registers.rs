use crate::{kernel_abi::SupportedArch, remote_code_ptr::RemoteCodePtr};

/// The slice of the tracee register file this subsystem consumes: the
/// instruction pointer and the syscall number the tracee entered the
/// current syscall with. The full register set stays with the
/// recording control loop.
#[derive(Copy, Clone, Debug, Default)]
pub struct Registers {
    arch_: SupportedArch,
    ip_: usize,
    original_syscallno_: isize,
}

impl Registers {
    pub fn new(arch: SupportedArch) -> Registers {
        Registers {
            arch_: arch,
            ip_: 0,
            original_syscallno_: 0,
        }
    }

    pub fn arch(&self) -> SupportedArch {
        self.arch_
    }

    pub fn ip(&self) -> RemoteCodePtr {
        RemoteCodePtr::from_val(self.ip_)
    }

    pub fn set_ip(&mut self, addr: RemoteCodePtr) {
        self.ip_ = addr.as_usize();
    }

    pub fn original_syscallno(&self) -> isize {
        self.original_syscallno_
    }

    pub fn set_original_syscallno(&mut self, syscallno: isize) {
        self.original_syscallno_ = syscallno;
    }
}
