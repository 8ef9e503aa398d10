use crate::println;
use crate::proc::{ProcData, CPUS, PROCS};
use crate::sysproc;
use crate::vm::UVAddr;

/// System call numbers. The gaps are the file-system calls (pipe,
/// read, open, ...) that belong to layers this kernel does not carry.
#[derive(Copy, Clone, Debug)]
#[repr(usize)]
pub enum SysCalls {
    Fork = 1,
    Exit = 2,
    Wait = 3,
    Kill = 6,
    Getpid = 11,
    Sbrk = 12,
    Sleep = 13,
    Uptime = 14,
    Waitx = 22,
    Chpr = 23,
    SetPriority = 24,
    Cps = 25,
    ProcDump = 26,
    Getyear = 27,
}

impl SysCalls {
    fn from_usize(n: usize) -> Option<Self> {
        match n {
            1 => Some(Self::Fork),
            2 => Some(Self::Exit),
            3 => Some(Self::Wait),
            6 => Some(Self::Kill),
            11 => Some(Self::Getpid),
            12 => Some(Self::Sbrk),
            13 => Some(Self::Sleep),
            14 => Some(Self::Uptime),
            22 => Some(Self::Waitx),
            23 => Some(Self::Chpr),
            24 => Some(Self::SetPriority),
            25 => Some(Self::Cps),
            26 => Some(Self::ProcDump),
            27 => Some(Self::Getyear),
            _ => None,
        }
    }

    fn dispatch(self) -> Result<usize, ()> {
        match self {
            Self::Fork => sysproc::fork(),
            Self::Exit => sysproc::exit(),
            Self::Wait => sysproc::wait(),
            Self::Kill => sysproc::kill(),
            Self::Getpid => sysproc::getpid(),
            Self::Sbrk => sysproc::sbrk(),
            Self::Sleep => sysproc::sleep(),
            Self::Uptime => sysproc::uptime(),
            Self::Waitx => sysproc::waitx(),
            Self::Chpr => sysproc::chpr(),
            Self::SetPriority => sysproc::set_priority(),
            Self::Cps => sysproc::cps(),
            Self::ProcDump => sysproc::proc_dump(),
            Self::Getyear => sysproc::getyear(),
        }
    }
}

impl ProcData {
    /// Fetch the nth word-sized system call argument from the saved
    /// user registers.
    pub fn arg(&self, n: usize) -> usize {
        let tf = unsafe { self.trapframe.unwrap().as_ref() };
        match n {
            0 => tf.a0,
            1 => tf.a1,
            2 => tf.a2,
            3 => tf.a3,
            4 => tf.a4,
            5 => tf.a5,
            _ => panic!("arg"),
        }
    }

    /// Retrieve an argument as a user virtual address. Legality is not
    /// checked here; copyout will do that.
    pub fn arg_addr(&self, n: usize) -> UVAddr {
        UVAddr::from(self.arg(n))
    }
}

pub fn syscall() {
    let i = CPUS.my_proc().expect("syscall: no process");
    let data = PROCS.data(i);
    let tf = unsafe { data.trapframe.unwrap().as_mut() };

    let ret = match SysCalls::from_usize(tf.a7) {
        Some(call) => call.dispatch(),
        None => {
            let table = PROCS.table.lock();
            println!(
                "{} {}: unknown sys call {}",
                table.procs[i].pid, table.procs[i].name, tf.a7
            );
            Err(())
        }
    };
    tf.a0 = ret.unwrap_or(-1isize as usize);
}
