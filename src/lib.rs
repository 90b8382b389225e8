//! Syscall monkeypatching for a deterministic record/replay debugger.
//!
//! During recording, selected syscall instructions in the tracee are
//! rewritten so that execution enters a userspace hook in the injected
//! preload library instead of trapping into the kernel on every call.
//! This crate owns all of that rewriting: the per-address-space patch
//! state, the stub allocator, the signature-driven pattern matcher, and
//! the static patches applied to the vdso and to known platform
//! libraries.
//!
//! None of this code runs during replay. A successful patch leaves
//! enough mapping and memory records in the trace for the replayer to
//! reconstruct the patched address space bit-for-bit.
//!
//! The recording control loop supplies its traced-process handle through
//! the [`task::Task`] and [`task::RecordTask`] traits; see those for the
//! exact seam between this subsystem and the rest of the debugger.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
pub mod log;

pub mod address_space;
pub mod assembly_templates;
pub mod kernel_abi;
pub mod monkey_patcher;
pub mod preload_interface;
pub mod registers;
pub mod remote_code_ptr;
pub mod remote_ptr;
pub mod task;
pub mod util;
pub mod vdso;
