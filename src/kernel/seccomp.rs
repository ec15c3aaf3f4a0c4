//! Seccomp-BPF syscall policies.
//!
//! A policy is resolved by name into a [`FilterProgram`] in the parent, before
//! fork. The child only installs the prebuilt instructions, so installation
//! allocates nothing. Once installed the filter survives `execve` and stays
//! in force for the lifetime of the process.
//!
//! ## Program layout
//!
//! 1. Kill if the audit architecture is not the native one
//! 2. Load the syscall number (on x86_64, kill x32 ABI numbers)
//! 3. Walk the policy's rules; each rule either returns or falls through
//!    with the syscall number still in the accumulator
//! 4. Return the policy's default action
//!
//! ## Policies
//!
//! - `c_cpp`: allow-list for single-threaded C/C++ programs. `open`/`openat`
//!   only without write access.
//! - `c_cpp_file_io`: `c_cpp` plus writable opens and `dup*`.
//! - `general`: deny-list. Kills process creation, signalling, sockets,
//!   writable opens and `execve` of anything but the configured executable.
//!
//! Every policy also admits the calls the child makes after installation:
//! stdio rebinding, the credential switch and its read-back, progress and
//! failure reports, and `execve(executable_path)`. The `execve` check compares the path pointer,
//! so only the launcher's own call matches.

use crate::config::types::PolicyError;
use nix::errno::Errno;
use std::ffi::CStr;

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("judgebox syscall policies support x86_64 and aarch64 only");

const SECCOMP_SET_MODE_FILTER: libc::c_uint = 1;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

// BPF instruction classes
const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;

// BPF ld/ldx fields
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;

// BPF alu/jmp fields
const BPF_JEQ: u16 = 0x10;
const BPF_JGE: u16 = 0x30;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;

/// Kernel limit on filter length.
const BPF_MAXINSNS: usize = 4096;

// seccomp_data offsets (little-endian argument halves)
const OFFSET_SYSCALL_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;
const OFFSET_ARGS: u32 = 16;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_003e;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH_NATIVE: u32 = 0xc000_00b7;

#[cfg(target_arch = "x86_64")]
const X32_SYSCALL_BIT: u32 = 0x4000_0000;

const OPEN_WRITE_FLAGS: u32 = (libc::O_WRONLY | libc::O_RDWR) as u32;

/// Names accepted by [`PolicyLoader::load`].
pub const POLICY_NAMES: [&str; 3] = ["c_cpp", "c_cpp_file_io", "general"];

#[cfg(target_arch = "x86_64")]
mod table {
    pub const C_CPP_ALLOWED: &[i64] = &[
        libc::SYS_access,
        libc::SYS_arch_prctl,
        libc::SYS_brk,
        libc::SYS_clock_gettime,
        libc::SYS_close,
        libc::SYS_exit_group,
        libc::SYS_faccessat,
        libc::SYS_fstat,
        libc::SYS_futex,
        libc::SYS_getrandom,
        libc::SYS_lseek,
        libc::SYS_mmap,
        libc::SYS_mprotect,
        libc::SYS_munmap,
        libc::SYS_newfstatat,
        libc::SYS_pread64,
        libc::SYS_prlimit64,
        libc::SYS_read,
        libc::SYS_readlink,
        libc::SYS_readv,
        libc::SYS_rseq,
        libc::SYS_set_robust_list,
        libc::SYS_set_tid_address,
        libc::SYS_write,
        libc::SYS_writev,
    ];

    /// (syscall, index of the flags argument)
    pub const OPEN_CALLS: &[(i64, u32)] = &[(libc::SYS_open, 1), (libc::SYS_openat, 2)];

    pub const DUP_CALLS: &[i64] = &[libc::SYS_dup, libc::SYS_dup2, libc::SYS_dup3];

    pub const BOOTSTRAP_CALLS: &[i64] = &[
        libc::SYS_dup2,
        libc::SYS_dup3,
        libc::SYS_setgroups,
        libc::SYS_setresgid,
        libc::SYS_setresuid,
        libc::SYS_getresgid,
        libc::SYS_getresuid,
        libc::SYS_write,
        libc::SYS_exit_group,
    ];

    pub const GENERAL_DENIED: &[i64] = &[
        libc::SYS_clone,
        libc::SYS_clone3,
        libc::SYS_fork,
        libc::SYS_vfork,
        libc::SYS_kill,
        libc::SYS_execveat,
        libc::SYS_socket,
    ];
}

#[cfg(target_arch = "aarch64")]
mod table {
    // newfstatat
    const SYS_FSTATAT: i64 = 79;

    pub const C_CPP_ALLOWED: &[i64] = &[
        libc::SYS_brk,
        libc::SYS_clock_gettime,
        libc::SYS_close,
        libc::SYS_exit_group,
        libc::SYS_faccessat,
        libc::SYS_fstat,
        SYS_FSTATAT,
        libc::SYS_futex,
        libc::SYS_getrandom,
        libc::SYS_lseek,
        libc::SYS_mmap,
        libc::SYS_mprotect,
        libc::SYS_munmap,
        libc::SYS_pread64,
        libc::SYS_prlimit64,
        libc::SYS_read,
        libc::SYS_readlinkat,
        libc::SYS_readv,
        libc::SYS_rseq,
        libc::SYS_set_robust_list,
        libc::SYS_set_tid_address,
        libc::SYS_write,
        libc::SYS_writev,
    ];

    pub const OPEN_CALLS: &[(i64, u32)] = &[(libc::SYS_openat, 2)];

    pub const DUP_CALLS: &[i64] = &[libc::SYS_dup, libc::SYS_dup3];

    pub const BOOTSTRAP_CALLS: &[i64] = &[
        libc::SYS_dup3,
        libc::SYS_setgroups,
        libc::SYS_setresgid,
        libc::SYS_setresuid,
        libc::SYS_getresgid,
        libc::SYS_getresuid,
        libc::SYS_write,
        libc::SYS_exit_group,
    ];

    pub const GENERAL_DENIED: &[i64] = &[
        libc::SYS_clone,
        libc::SYS_clone3,
        libc::SYS_kill,
        libc::SYS_execveat,
        libc::SYS_socket,
    ];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    #[inline]
    pub const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    #[inline]
    pub const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
#[derive(Debug)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Label(usize);

#[derive(Clone, Copy, Debug)]
enum Target {
    Next,
    To(Label),
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Stmt(SockFilter),
    Jump {
        code: u16,
        k: u32,
        jt: Target,
        jf: Target,
    },
    Bind(Label),
}

/// Forward-only BPF assembler with symbolic jump targets.
#[derive(Default)]
struct Assembler {
    ops: Vec<Op>,
    labels: usize,
}

impl Assembler {
    fn label(&mut self) -> Label {
        self.labels += 1;
        Label(self.labels - 1)
    }

    fn bind(&mut self, label: Label) {
        self.ops.push(Op::Bind(label));
    }

    fn load(&mut self, offset: u32) {
        self.ops
            .push(Op::Stmt(SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, offset)));
    }

    fn load_arg_low(&mut self, index: u32) {
        self.load(OFFSET_ARGS + 8 * index);
    }

    fn load_arg_high(&mut self, index: u32) {
        self.load(OFFSET_ARGS + 8 * index + 4);
    }

    fn ret(&mut self, action: u32) {
        self.ops
            .push(Op::Stmt(SockFilter::stmt(BPF_RET | BPF_K, action)));
    }

    fn jump(&mut self, cond: u16, k: u32, jt: Target, jf: Target) {
        self.ops.push(Op::Jump {
            code: BPF_JMP | cond | BPF_K,
            k,
            jt,
            jf,
        });
    }

    fn finish(self) -> Result<Vec<SockFilter>, PolicyError> {
        let mut positions = vec![None; self.labels];
        let mut pc = 0usize;
        for op in &self.ops {
            match op {
                Op::Bind(label) => positions[label.0] = Some(pc),
                _ => pc += 1,
            }
        }
        if pc > BPF_MAXINSNS {
            return Err(PolicyError::ProgramTooLarge(pc));
        }

        let mut program = Vec::with_capacity(pc);
        for op in &self.ops {
            match *op {
                Op::Bind(_) => {}
                Op::Stmt(insn) => program.push(insn),
                Op::Jump { code, k, jt, jf } => {
                    let here = program.len();
                    let offset = |target: Target| match target {
                        Target::Next => Ok(0),
                        Target::To(label) => positions[label.0]
                            .and_then(|dest: usize| dest.checked_sub(here + 1))
                            .and_then(|delta| u8::try_from(delta).ok())
                            .ok_or(PolicyError::JumpOutOfRange(here)),
                    };
                    program.push(SockFilter::jump(code, k, offset(jt)?, offset(jf)?));
                }
            }
        }
        Ok(program)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rule {
    Allow(i64),
    Kill(i64),
    /// Allow unless the flags argument asks for write access.
    ReadOnlyOpen { nr: i64, flags_arg: u32 },
    /// Allow only when argument 0 is the configured executable pointer.
    ExecOnly(i64),
}

/// Named syscall policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyscallPolicy {
    CCpp,
    CCppFileIo,
    General,
}

impl SyscallPolicy {
    pub fn from_name(name: &str) -> Result<Self, PolicyError> {
        match name {
            "c_cpp" => Ok(SyscallPolicy::CCpp),
            "c_cpp_file_io" => Ok(SyscallPolicy::CCppFileIo),
            "general" => Ok(SyscallPolicy::General),
            other => Err(PolicyError::UnknownPolicy(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SyscallPolicy::CCpp => "c_cpp",
            SyscallPolicy::CCppFileIo => "c_cpp_file_io",
            SyscallPolicy::General => "general",
        }
    }

    fn default_action(self) -> u32 {
        match self {
            SyscallPolicy::CCpp | SyscallPolicy::CCppFileIo => SECCOMP_RET_KILL_PROCESS,
            SyscallPolicy::General => SECCOMP_RET_ALLOW,
        }
    }

    fn rules(self) -> Vec<Rule> {
        let mut rules = vec![Rule::ExecOnly(libc::SYS_execve)];

        match self {
            SyscallPolicy::CCpp | SyscallPolicy::CCppFileIo => {
                let mut allowed: Vec<i64> = table::C_CPP_ALLOWED.to_vec();
                allowed.extend_from_slice(table::BOOTSTRAP_CALLS);
                if self == SyscallPolicy::CCppFileIo {
                    allowed.extend_from_slice(table::DUP_CALLS);
                    allowed.extend(table::OPEN_CALLS.iter().map(|&(nr, _)| nr));
                } else {
                    rules.extend(
                        table::OPEN_CALLS
                            .iter()
                            .map(|&(nr, flags_arg)| Rule::ReadOnlyOpen { nr, flags_arg }),
                    );
                }
                allowed.sort_unstable();
                allowed.dedup();
                rules.extend(allowed.into_iter().map(Rule::Allow));
            }
            SyscallPolicy::General => {
                rules.extend(table::GENERAL_DENIED.iter().copied().map(Rule::Kill));
                rules.extend(
                    table::OPEN_CALLS
                        .iter()
                        .map(|&(nr, flags_arg)| Rule::ReadOnlyOpen { nr, flags_arg }),
                );
            }
        }

        rules
    }

    /// Assemble the filter. `exec_target` is the address of the path that
    /// the child will pass to `execve`.
    pub fn compile(self, exec_target: u64) -> Result<FilterProgram, PolicyError> {
        let mut asm = Assembler::default();
        let allow = asm.label();
        let kill = asm.label();

        asm.load(OFFSET_ARCH);
        asm.jump(BPF_JEQ, AUDIT_ARCH_NATIVE, Target::Next, Target::To(kill));
        asm.load(OFFSET_SYSCALL_NR);
        #[cfg(target_arch = "x86_64")]
        asm.jump(BPF_JGE, X32_SYSCALL_BIT, Target::To(kill), Target::Next);

        for rule in self.rules() {
            match rule {
                Rule::Allow(nr) => asm.jump(BPF_JEQ, nr as u32, Target::To(allow), Target::Next),
                Rule::Kill(nr) => asm.jump(BPF_JEQ, nr as u32, Target::To(kill), Target::Next),
                Rule::ReadOnlyOpen { nr, flags_arg } => {
                    let skip = asm.label();
                    asm.jump(BPF_JEQ, nr as u32, Target::Next, Target::To(skip));
                    asm.load_arg_low(flags_arg);
                    asm.jump(
                        BPF_JSET,
                        OPEN_WRITE_FLAGS,
                        Target::To(kill),
                        Target::To(allow),
                    );
                    asm.bind(skip);
                }
                Rule::ExecOnly(nr) => {
                    let skip = asm.label();
                    asm.jump(BPF_JEQ, nr as u32, Target::Next, Target::To(skip));
                    asm.load_arg_low(0);
                    asm.jump(BPF_JEQ, exec_target as u32, Target::Next, Target::To(kill));
                    asm.load_arg_high(0);
                    asm.jump(
                        BPF_JEQ,
                        (exec_target >> 32) as u32,
                        Target::To(allow),
                        Target::To(kill),
                    );
                    asm.bind(skip);
                }
            }
        }

        asm.ret(self.default_action());
        asm.bind(allow);
        asm.ret(SECCOMP_RET_ALLOW);
        asm.bind(kill);
        asm.ret(SECCOMP_RET_KILL_PROCESS);

        Ok(FilterProgram {
            policy: self,
            instructions: asm.finish()?,
        })
    }
}

/// Assembled, installable filter.
#[derive(Clone, Debug)]
pub struct FilterProgram {
    policy: SyscallPolicy,
    instructions: Vec<SockFilter>,
}

impl FilterProgram {
    pub fn policy(&self) -> SyscallPolicy {
        self.policy
    }

    pub fn instructions(&self) -> &[SockFilter] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Set `PR_SET_NO_NEW_PRIVS` and install the filter on the calling
    /// thread. Async-signal-safe; meant for the forked child.
    pub fn install(&self) -> Result<(), Errno> {
        let prog = SockFprog {
            len: self.instructions.len() as u16,
            filter: self.instructions.as_ptr(),
        };

        // SAFETY: prctl with integer arguments only.
        let ret = unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) };
        if ret != 0 {
            return Err(Errno::last());
        }

        // SAFETY: prog points into self.instructions for the duration of the
        // call; the kernel copies the program before returning.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_seccomp,
                SECCOMP_SET_MODE_FILTER,
                0u32,
                &prog as *const SockFprog,
            )
        };
        if ret != 0 {
            return Err(Errno::last());
        }
        Ok(())
    }
}

/// Resolves policy names into filter programs.
pub struct PolicyLoader;

impl PolicyLoader {
    /// `None` disables syscall containment and yields no program.
    pub fn load(
        name: Option<&str>,
        exec_target: &CStr,
    ) -> Result<Option<FilterProgram>, PolicyError> {
        let Some(name) = name else {
            return Ok(None);
        };
        let policy = SyscallPolicy::from_name(name)?;
        let program = policy.compile(exec_target.as_ptr() as usize as u64)?;
        log::debug!(
            "Loaded syscall policy {} ({} instructions)",
            policy.name(),
            program.len()
        );
        Ok(Some(program))
    }
}
