//! Process-related system call bodies. Argument parsing happens here,
//! at the boundary; the mechanics live in proc.rs and table.rs.

use crate::param::NPROC;
use crate::println;
use crate::proc::{CPUS, PROCS};
use crate::sched::{PRIORITY_MAX, SCHEDULER};
use crate::table::ProcInfo;
use crate::trap::TICKS;
use alloc::vec;

pub fn fork() -> Result<usize, ()> {
    PROCS.fork()
}

pub fn exit() -> Result<usize, ()> {
    PROCS.exit()
    // not reached
}

pub fn wait() -> Result<usize, ()> {
    PROCS.wait().ok_or(())
}

pub fn kill() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let pid = PROCS.data(i).arg(0);
    PROCS.kill(pid).and(Ok(0))
}

pub fn getpid() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    Ok(PROCS.table.lock().procs[i].pid)
}

pub fn sbrk() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let n = PROCS.data(i).arg(0) as isize;
    let addr = PROCS.table.lock().procs[i].sz;
    PROCS.grow_proc(n).and(Ok(addr))
}

pub fn sleep() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let n = PROCS.data(i).arg(0);
    let mut ticks = TICKS.lock();
    let ticks0 = *ticks;
    while *ticks - ticks0 < n {
        if PROCS.table.lock().procs[i].killed {
            return Err(());
        }
        // block on the tick counter; every clock interrupt wakes it.
        ticks = PROCS.sleep(&(*ticks) as *const usize as usize, ticks);
    }
    Ok(0)
}

// how many clock tick interrupts have occurred since start.
pub fn uptime() -> Result<usize, ()> {
    Ok(*TICKS.lock())
}

pub fn waitx() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let data = PROCS.data(i);
    let wtime_addr = data.arg_addr(0);
    let rtime_addr = data.arg_addr(1);

    let (pid, wtime, rtime) = PROCS.waitx().ok_or(())?;

    let uvm = data.uvm.as_mut().unwrap();
    uvm.copyout(wtime_addr, &wtime)?;
    uvm.copyout(rtime_addr, &rtime)?;
    Ok(pid)
}

pub fn chpr() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let data = PROCS.data(i);
    let pid = data.arg(0);
    let priority = data.arg(1);

    if let Err(msg) = SCHEDULER.validate_chpr(priority) {
        println!("{}", msg);
        return Err(());
    }
    PROCS.chpr(pid, priority).ok_or(())
}

pub fn set_priority() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let priority = PROCS.data(i).arg(0);
    if priority > PRIORITY_MAX {
        println!("invalid priority value");
        return Err(());
    }
    Ok(PROCS.set_priority(priority))
}

pub fn cps() -> Result<usize, ()> {
    PROCS.cps();
    Ok(0)
}

pub fn proc_dump() -> Result<usize, ()> {
    let i = CPUS.my_proc().ok_or(())?;
    let data = PROCS.data(i);
    let addr = data.arg_addr(0);
    let n = data.arg(1) as isize;

    if n <= 0 {
        println!("proc_dump only accepts a positive row count");
        return Err(());
    }
    let n = n as usize;
    if n > NPROC {
        println!("proc_dump: the row count must be at most {}", NPROC);
        return Err(());
    }

    let mut infos = vec![ProcInfo::default(); n];
    let filled = PROCS.proc_dump(&mut infos);
    data.uvm.as_mut().unwrap().copyout(addr, &infos[..filled])?;
    Ok(filled)
}

pub fn getyear() -> Result<usize, ()> {
    // the year Unix version 6 was released
    Ok(1975)
}
