//! Processes, CPUs and the schedulers.
//!
//! All shared per-slot state lives in one [`Table`] behind one spinlock
//! (`PROCS.table`); the per-process private half is [`ProcData`].
//! Context switches hand that single lock across kernel stacks: the
//! scheduler acquires it, the dispatched process releases it (in
//! `fork_ret` the first time, by dropping its own guard afterwards),
//! and the reverse handoff happens in `sched`. The `MutexGuard`
//! returned by `Cpu::sched` makes the "still holding the lock on
//! resumption" rule a type-level fact.

use crate::file::{self, Inode};
use crate::lazy::{SyncLazy, SyncOnceCell};
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NOFILE, NPROC};
use crate::riscv::{intr_get, intr_off, intr_on, PGSIZE};
use crate::sched::{Policy, SCHEDULER};
use crate::spinlock::{Mutex, MutexGuard};
use crate::swtch::swtch;
use crate::table::{ProcInfo, ProcState, Table};
use crate::trampoline::trampoline;
use crate::trap::{usertrap_ret, TICKS};
use crate::vm::{Page, PageAllocator, PteFlags, Uvm};
use crate::{print, println, table};
use alloc::boxed::Box;
use array_macro::array;
use core::arch::asm;
use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

pub static CPUS: Cpus = Cpus::new();
pub static PROCS: SyncLazy<Procs> = SyncLazy::new(Procs::new);
/// Slot index of the first process, the adopter of orphans.
pub static INITPROC: SyncOnceCell<usize> = SyncOnceCell::new();

// Saved registers for kernel context switches.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub fn write_zero(&mut self) {
        *self = Self::new();
    }
}

// Per-process data for the trap handling code in trampoline.rs. It
// sits at the base of the process's kernel-stack page, which is mapped
// at TRAPFRAME in the user page table (the kernel stack itself grows
// down from the top of the same page). uservec saves the user
// registers here, loads kernel_sp/kernel_hartid/kernel_satp and jumps
// to kernel_trap; usertrap_ret() and userret reverse that. The
// callee-saved s0-s11 are included because the return-to-user path
// does not go back through the kernel call stack.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: usize, // kernel page table
    /*   8 */ pub kernel_sp: usize, // top of process's kernel stack
    /*  16 */ pub kernel_trap: usize, // usertrap()
    /*  24 */ pub epc: usize, // saved user program counter
    /*  32 */ pub kernel_hartid: usize, // saved kernel tp
    /*  40 */ pub ra: usize,
    /*  48 */ pub sp: usize,
    /*  56 */ pub gp: usize,
    /*  64 */ pub tp: usize,
    /*  72 */ pub t0: usize,
    /*  80 */ pub t1: usize,
    /*  88 */ pub t2: usize,
    /*  96 */ pub s0: usize,
    /* 104 */ pub s1: usize,
    /* 112 */ pub a0: usize,
    /* 120 */ pub a1: usize,
    /* 128 */ pub a2: usize,
    /* 136 */ pub a3: usize,
    /* 144 */ pub a4: usize,
    /* 152 */ pub a5: usize,
    /* 160 */ pub a6: usize,
    /* 168 */ pub a7: usize,
    /* 176 */ pub s2: usize,
    /* 184 */ pub s3: usize,
    /* 192 */ pub s4: usize,
    /* 200 */ pub s5: usize,
    /* 208 */ pub s6: usize,
    /* 216 */ pub s7: usize,
    /* 224 */ pub s8: usize,
    /* 232 */ pub s9: usize,
    /* 240 */ pub s10: usize,
    /* 248 */ pub s11: usize,
    /* 256 */ pub t3: usize,
    /* 264 */ pub t4: usize,
    /* 272 */ pub t5: usize,
    /* 280 */ pub t6: usize,
}

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);
unsafe impl Sync for Cpus {}

// Per-CPU state.
pub struct Cpu {
    /// Slot index of the process running on this cpu, or None.
    pub proc: Option<usize>,
    /// swtch() here to enter this cpu's scheduler loop.
    pub context: Context,
    /// Depth of interrupt-disable nesting.
    pub noff: UnsafeCell<isize>,
    /// Were interrupts enabled before the outermost disable? A property
    /// of the kernel thread, not the CPU: sched() carries it across
    /// context switches.
    pub intena: bool,
}

/// Lifetime of one interrupt-disable level on the current CPU. More
/// than one can be alive at a time, so it holds a shared reference.
pub struct IntrLock<'a> {
    cpu: &'a Cpu,
}

impl Cpus {
    const fn new() -> Self {
        Self(array![_ => UnsafeCell::new(Cpu::new()); NCPU])
    }

    /// This CPU's hartid, kept in tp since machine mode.
    ///
    /// # Safety
    ///
    /// Call with interrupts disabled, to prevent a race with being
    /// moved to a different CPU.
    #[inline]
    pub unsafe fn cpu_id() -> usize {
        let id;
        asm!("mv {0}, tp", out(reg) id);
        id
    }

    /// This CPU's Cpu struct.
    ///
    /// # Safety
    ///
    /// Interrupts must be disabled (enforced), and the caller must not
    /// let the reference outlive the interrupt-disabled region.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn my_cpu(&self) -> &mut Cpu {
        assert!(!intr_get(), "my_cpu: interrupts enabled");
        let id = Self::cpu_id();
        &mut *self.0[id].get()
    }

    /// Raw identity of this CPU's Cpu struct, for lock ownership.
    ///
    /// # Safety
    ///
    /// Interrupts must be disabled.
    pub unsafe fn my_cpu_ptr() -> *mut Cpu {
        assert!(!intr_get(), "my_cpu: interrupts enabled");
        let id = Self::cpu_id();
        CPUS.0[id].get()
    }

    /// Disable interrupts on this CPU and push one nesting level.
    /// Dropping the returned lock pops it, re-enabling interrupts when
    /// the outermost level goes and they were enabled before.
    pub fn intr_lock(&self) -> IntrLock<'_> {
        let old = intr_get();
        intr_off();
        unsafe { self.my_cpu().lock(old) }
    }

    /// Pop one interrupt-disable level without an IntrLock in hand.
    ///
    /// # Safety
    ///
    /// Only for `Mutex::force_unlock`, which releases a lock whose
    /// guard (and IntrLock) lives on another kernel stack.
    pub unsafe fn intr_unlock(&self) {
        self.my_cpu().unlock()
    }

    /// Slot index of the process running on this CPU, or None.
    pub fn my_proc(&self) -> Option<usize> {
        let _intr_lock = self.intr_lock();
        unsafe { self.my_cpu().proc }
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            noff: UnsafeCell::new(0),
            intena: false,
        }
    }

    // interrupts must be disabled.
    unsafe fn lock(&mut self, old: bool) -> IntrLock<'_> {
        if *self.noff.get() == 0 {
            self.intena = old;
        }
        *self.noff.get() += 1;
        IntrLock { cpu: self }
    }

    // interrupts must be disabled.
    unsafe fn unlock(&self) {
        assert!(!intr_get(), "cpu unlock: interruptible");
        let noff = self.noff.get();
        assert!(*noff >= 1, "cpu unlock");
        *noff -= 1;
        if *noff == 0 && self.intena {
            intr_on();
        }
    }

    /// Switch to this cpu's scheduler loop, and return once the
    /// scheduler switches back here. Must hold the process-table lock
    /// (and nothing else), with the process's state already changed
    /// away from RUNNING. intena is saved and restored because it
    /// belongs to this kernel thread: the thread may well resume on a
    /// different CPU.
    unsafe fn sched<'a>(
        &mut self,
        guard: MutexGuard<'a, Table>,
        ctx: *mut Context,
    ) -> MutexGuard<'a, Table> {
        assert!(guard.holding(), "sched ptable lock");
        assert!(*self.noff.get() == 1, "sched locks");
        let i = self.proc.expect("sched: no process");
        assert!(guard.procs[i].state != ProcState::RUNNING, "sched running");
        assert!(!intr_get(), "sched interruptible");

        let intena = self.intena;
        swtch(ctx, &self.context);
        // possibly on a different CPU now
        CPUS.my_cpu().intena = intena;
        guard
    }

    /// Dispatch slot i. It is the process's job to release the table
    /// lock and then reacquire it before jumping back here.
    unsafe fn run<'a>(
        &mut self,
        i: usize,
        mut table: MutexGuard<'a, Table>,
    ) -> MutexGuard<'a, Table> {
        table.procs[i].state = ProcState::RUNNING;
        self.proc = Some(i);
        let data = PROCS.pool[i].data_mut();
        swtch(&mut self.context, &data.context);

        // Process is done running for now; it changed its state before
        // coming back.
        self.proc = None;
        table
    }
}

impl<'a> Drop for IntrLock<'a> {
    fn drop(&mut self) {
        unsafe { self.cpu.unlock() }
    }
}

/// One process slot. The lock-free half: everything here is private to
/// the process itself (or to the reaper, once the slot is a zombie).
pub struct Proc {
    data: UnsafeCell<ProcData>,
}

unsafe impl Sync for Proc {}

pub struct ProcData {
    /// The process's kernel-stack page, owned by this slot from
    /// allocation to reaping. Its base holds the trap frame; the stack
    /// grows down from kstack + PGSIZE. Zero when the slot is free.
    pub kstack: usize,
    pub trapframe: Option<NonNull<Trapframe>>,
    /// swtch() here to run the process.
    pub context: Context,
    pub uvm: Option<Box<Uvm>>,
    pub ofile: [Option<file::File>; NOFILE],
    pub cwd: Option<Inode>,
}

unsafe impl Send for ProcData {}
unsafe impl Sync for ProcData {}

impl Proc {
    fn new() -> Self {
        Self {
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn data(&self) -> &ProcData {
        unsafe { &*self.data.get() }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn data_mut(&self) -> &mut ProcData {
        unsafe { &mut *self.data.get() }
    }

    // Create a user page table for this process: empty but for the
    // trampoline and the trap-frame page (the kernel-stack page, whose
    // base is the trap frame).
    fn proc_uvmcreate(&self) -> Option<Box<Uvm>> {
        let mut uvm = Uvm::create()?;
        if uvm
            .mappages(
                TRAMPOLINE,
                trampoline as usize,
                PGSIZE,
                PteFlags::R | PteFlags::X,
            )
            .is_err()
        {
            uvm.free(0);
            return None;
        }
        if uvm
            .mappages(
                TRAPFRAME,
                self.data().kstack,
                PGSIZE,
                PteFlags::R | PteFlags::W,
            )
            .is_err()
        {
            uvm.unmap(TRAMPOLINE, 1, false);
            uvm.free(0);
            return None;
        }
        Some(uvm)
    }
}

impl ProcData {
    fn new() -> Self {
        Self {
            kstack: 0,
            trapframe: None,
            context: Context::new(),
            uvm: None,
            ofile: array![_ => None; NOFILE],
            cwd: None,
        }
    }
}

pub struct Procs {
    /// The process-table lock. Everything in `Table` is protected by
    /// it; it is the only lock a kernel thread may hold across sched().
    pub table: Mutex<Table>,
    pool: [Proc; NPROC],
}

/// The first user program: reap children forever. Orphans are adopted
/// by this process, so its wait loop is what finally frees them.
///   li a7, 3 (wait); ecall; jump back
static INITCODE: [u8; 12] = [
    0x93, 0x08, 0x30, 0x00, // li a7, 3
    0x73, 0x00, 0x00, 0x00, // ecall
    0x6f, 0xf0, 0x9f, 0xff, // jal x0, -8
];

impl Procs {
    fn new() -> Self {
        Self {
            table: Mutex::new(Table::new(), "ptable"),
            pool: array![_ => Proc::new(); NPROC],
        }
    }

    pub fn data(&self, i: usize) -> &mut ProcData {
        self.pool[i].data_mut()
    }

    /// The wait channel that stands for slot i: its address.
    fn chan(&self, i: usize) -> usize {
        &self.pool[i] as *const Proc as usize
    }

    // Allocate a process slot and its kernel stack, and point the
    // saved context at fork_ret so the first dispatch "returns" toward
    // user space. Returns with the table lock held; None if the table
    // is full or the stack page cannot be had.
    fn alloc_proc(&self) -> Option<(usize, MutexGuard<'_, Table>)> {
        let mut table = self.table.lock();
        let now = unsafe { *TICKS.get_mut() };
        let i = table.alloc_slot(now, SCHEDULER)?;

        let data = self.pool[i].data_mut();
        match Page::try_new_zeroed() {
            Some(kstack) => {
                data.kstack = kstack;
                data.trapframe = NonNull::new(kstack as *mut Trapframe);
                data.context.write_zero();
                data.context.ra = fork_ret as usize;
                data.context.sp = kstack + PGSIZE;
                Some((i, table))
            }
            None => {
                table.undo_alloc(i, SCHEDULER);
                None
            }
        }
    }

    // Free a slot and everything it owns. Only the reaper runs this,
    // from its own stack, holding the table lock: the zombie finished
    // its final switch before that lock was last released, so its
    // kernel stack is dead by now and safe to give back.
    fn free_proc(&self, i: usize, table: &mut Table) {
        let data = self.pool[i].data_mut();
        if let Some(mut uvm) = data.uvm.take() {
            uvm.proc_free(table.procs[i].sz);
        }
        data.trapframe = None;
        if data.kstack != 0 {
            unsafe { Page::free(data.kstack) };
            data.kstack = 0;
        }
        table.procs[i].sz = 0;
        table.reap(i);
    }

    /// Set up the first user process.
    pub fn user_init(&self) {
        let (i, mut table) = self.alloc_proc().expect("user_init: alloc_proc");
        INITPROC.set(i).expect("user_init: already running");

        let data = self.pool[i].data_mut();
        let uvm = self.pool[i].proc_uvmcreate().expect("user_init: out of memory");
        data.uvm.replace(uvm);
        data.uvm.as_mut().unwrap().init(&INITCODE);
        table.procs[i].sz = PGSIZE;

        // prepare the very first "return" from kernel to user: the
        // kstack page arrived zeroed, so only pc and sp need setting.
        let tf = unsafe { data.trapframe.unwrap().as_mut() };
        tf.epc = 0; // beginning of initcode
        tf.sp = PGSIZE;

        table.procs[i].name.push_str("initcode");
        data.cwd = Some(Inode::root());

        // This store is what lets other CPUs run the process; holding
        // the lock across all of the above means no CPU can observe a
        // half-built slot.
        table.procs[i].state = ProcState::RUNNABLE;
        drop(table);
    }

    /// Grow or shrink the current process's memory by n bytes.
    pub fn grow_proc(&self, n: isize) -> Result<(), ()> {
        let i = CPUS.my_proc().ok_or(())?;
        let sz = self.table.lock().procs[i].sz;
        let data = self.pool[i].data_mut();
        let uvm = data.uvm.as_mut().unwrap();
        let newsz = if n > 0 {
            uvm.alloc(sz, sz + n as usize).ok_or(())?
        } else if n < 0 {
            let target = sz as isize + n;
            if target < 0 {
                return Err(());
            }
            uvm.dealloc(sz, target as usize)
        } else {
            sz
        };
        self.table.lock().procs[i].sz = newsz;
        Ok(())
    }

    /// Create a new process copying the current one; the child returns
    /// 0 from the same system call, the parent gets the child's pid.
    pub fn fork(&self) -> Result<usize, ()> {
        let pi = CPUS.my_proc().ok_or(())?;
        let pdata = self.pool[pi].data_mut();

        // Allocate a slot with its kernel stack and context.
        let (ci, table) = self.alloc_proc().ok_or(())?;
        let psz = table.procs[pi].sz;
        // The child is EMBRYO: invisible to the schedulers and to
        // wait(), so the rest of the setup can run unlocked.
        drop(table);

        let cdata = self.pool[ci].data_mut();

        // Clone the parent's address space.
        let mut uvm = match self.pool[ci].proc_uvmcreate() {
            Some(uvm) => uvm,
            None => return self.undo_fork(ci),
        };
        if pdata.uvm.as_mut().unwrap().copy(&mut uvm, psz).is_err() {
            uvm.proc_free(0);
            return self.undo_fork(ci);
        }
        cdata.uvm.replace(uvm);

        // The child resumes from the same trap frame, with 0 in a0.
        let tf = unsafe { cdata.trapframe.unwrap().as_mut() };
        *tf = *unsafe { pdata.trapframe.unwrap().as_ref() };
        tf.a0 = 0;

        // Duplicate open files; take another reference on the cwd.
        cdata.ofile.clone_from_slice(&pdata.ofile);
        cdata.cwd = pdata.cwd.clone();

        let mut table = self.table.lock();
        let name = table.procs[pi].name.clone();
        table.procs[ci].name = name;
        table.procs[ci].sz = psz;
        table.procs[ci].parent = Some(pi);
        table.procs[ci].state = ProcState::RUNNABLE;
        let pid = table.procs[ci].pid;
        drop(table);

        Ok(pid)
    }

    // Back out of a fork whose memory setup failed: release the kstack
    // and return the slot (and its MLQ queue membership) to the pool.
    fn undo_fork(&self, ci: usize) -> Result<usize, ()> {
        let data = self.pool[ci].data_mut();
        if data.kstack != 0 {
            unsafe { Page::free(data.kstack) };
            data.kstack = 0;
            data.trapframe = None;
        }
        let mut table = self.table.lock();
        table.undo_alloc(ci, SCHEDULER);
        Err(())
    }

    /// Exit the current process. Does not return; the process stays a
    /// zombie until its parent calls wait.
    pub fn exit(&self) -> ! {
        let i = CPUS.my_proc().expect("exit: no process");
        let init = *INITPROC.get().expect("exit: no init process");
        if i == init {
            panic!("init exiting");
        }

        // Release the file table and the working directory before
        // taking the table lock; dropping the last reference may do
        // real work.
        let data = self.pool[i].data_mut();
        for fd in data.ofile.iter_mut() {
            fd.take();
        }
        data.cwd.take();

        let mut table = self.table.lock();

        // Parent might be sleeping in wait().
        if let Some(parent) = table.procs[i].parent {
            table.wakeup1(self.chan(parent));
        }

        // Pass abandoned children to init.
        for j in 0..NPROC {
            if table.procs[j].parent == Some(i) {
                table.procs[j].parent = Some(init);
                if table.procs[j].state == ProcState::ZOMBIE {
                    table.wakeup1(self.chan(init));
                }
            }
        }

        table.procs[i].etime = unsafe { *TICKS.get_mut() };
        table.procs[i].state = ProcState::ZOMBIE;

        // Jump into the scheduler, never to return. The guard dies
        // with this stack; the scheduler inherits the lock.
        unsafe {
            let data = self.pool[i].data_mut();
            let _table = CPUS.my_cpu().sched(table, &mut data.context);
        }
        panic!("zombie exit");
    }

    /// Wait for a child to exit; returns its pid.
    pub fn wait(&self) -> Option<usize> {
        self.wait_reap().map(|(pid, _, _)| pid)
    }

    /// wait(), additionally reporting how the child's lifetime divided
    /// into waiting and running ticks.
    pub fn waitx(&self) -> Option<(usize, usize, usize)> {
        self.wait_reap()
    }

    // Scan for zombie children and reap one, blocking on our own slot
    // address until exit() signals it. Returns (pid, wtime, rtime).
    fn wait_reap(&self) -> Option<(usize, usize, usize)> {
        let i = CPUS.my_proc().expect("wait: no process");
        let mut table = self.table.lock();
        loop {
            let mut havekids = false;
            for j in 0..NPROC {
                if table.procs[j].parent != Some(i) {
                    continue;
                }
                havekids = true;
                if table.procs[j].state == ProcState::ZOMBIE {
                    let p = &table.procs[j];
                    let pid = p.pid;
                    let rtime = p.rtime;
                    // Everything that was neither running nor blocked
                    // counts as time spent waiting for a CPU.
                    let wtime = (p.etime - p.stime).saturating_sub(p.rtime);
                    self.free_proc(j, &mut table);
                    return Some((pid, wtime, rtime));
                }
            }

            // No point waiting if we don't have any children.
            if !havekids || table.procs[i].killed {
                return None;
            }

            // Wait for a child to exit.
            table = self.sleep1(self.chan(i), table);
        }
    }

    /// Kill the process with the given pid. The victim won't exit
    /// until it next crosses the kernel/user boundary.
    pub fn kill(&self, pid: usize) -> Result<(), ()> {
        self.table.lock().kill(pid)
    }

    /// Give up the CPU for one scheduling round.
    pub fn yielding(&self) {
        let i = CPUS.my_proc().expect("yield: no process");
        let mut table = self.table.lock();
        table.procs[i].state = ProcState::RUNNABLE;
        unsafe {
            let data = self.pool[i].data_mut();
            table = CPUS.my_cpu().sched(table, &mut data.context);
        }
        drop(table);
    }

    /// Atomically release the caller's lock and block on chan;
    /// reacquires the lock once woken. The table lock bridges the gap,
    /// so no wakeup between the release and the sleep can be lost.
    pub fn sleep<'a, T>(&self, chan: usize, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let table = self.table.lock();
        let mutex = Mutex::unlock(guard);
        let table = self.sleep1(chan, table);
        drop(table);
        // Reacquire the original lock.
        mutex.lock()
    }

    // Sleep for callers that already hold the table lock (wait does;
    // everyone else comes through sleep above).
    fn sleep1<'a>(
        &'a self,
        chan: usize,
        mut table: MutexGuard<'a, Table>,
    ) -> MutexGuard<'a, Table> {
        let i = CPUS.my_proc().expect("sleep: no process");
        table.procs[i].chan = chan;
        table.procs[i].state = ProcState::SLEEPING;
        unsafe {
            let data = self.pool[i].data_mut();
            table = CPUS.my_cpu().sched(table, &mut data.context);
        }
        // Tidy up.
        table.procs[i].chan = 0;
        table
    }

    /// Wake up all processes sleeping on chan.
    pub fn wakeup(&self, chan: usize) {
        self.table.lock().wakeup1(chan);
    }

    /// Change the priority of the process with the given pid, and give
    /// up the CPU in case the caller just deprioritised itself.
    /// Returns the old priority, or None if the pid is absent.
    pub fn chpr(&self, pid: usize, priority: usize) -> Option<usize> {
        let old = self.table.lock().chpr(pid, priority);
        self.yielding();
        old
    }

    /// Change the current process's own priority; same yield-after
    /// discipline as chpr. Returns the old priority.
    pub fn set_priority(&self, priority: usize) -> usize {
        let i = CPUS.my_proc().expect("set_priority: no process");
        let old = self.table.lock().set_priority(i, priority, SCHEDULER);
        self.yielding();
        old
    }

    /// Fill out with {pid, memsize} of every scheduled or schedulable
    /// process, then sort ascending by memory size. The sort runs after
    /// the lock is released; the snapshot is private to the caller.
    pub fn proc_dump(&self, out: &mut [ProcInfo]) -> usize {
        let n = self.table.lock().running_snapshot(out);
        table::sort_by_memsize(&mut out[..n]);
        n
    }

    /// Print the scheduler in use and one line per live process.
    pub fn cps(&self) {
        let table = self.table.lock();
        println!("{} scheduler", SCHEDULER.name());
        println!("name \t pid \t state \t priority");
        for p in table.procs.iter() {
            match p.state {
                ProcState::SLEEPING | ProcState::RUNNING | ProcState::RUNNABLE => {
                    println!(
                        "{} \t {} \t {} \t {}",
                        p.name,
                        p.pid,
                        p.state.as_str(),
                        p.priority
                    );
                }
                _ => {}
            }
        }
    }
}

/// Force the process table into existence. Must run after the
/// allocator is up and before any CPU enters its scheduler.
pub fn init() {
    SyncLazy::force(&PROCS);
}

/// Per-CPU scheduler loops. Each CPU calls scheduler() after setting
/// itself up and never returns: it keeps choosing a process, switching
/// to it, and taking back over when the process switches away via
/// sched(). The policy is fixed at build time.
pub fn scheduler() -> ! {
    match SCHEDULER {
        Policy::Main => main_scheduler(),
        Policy::Test => test_scheduler(),
        Policy::Priority => priority_scheduler(),
        Policy::Mlq => mlq_scheduler(),
    }
}

// Round-robin over the table in slot order.
fn main_scheduler() -> ! {
    loop {
        // Let devices (and the timer) interrupt between rounds.
        intr_on();

        let mut table = PROCS.table.lock();
        for i in 0..NPROC {
            if table.procs[i].state != ProcState::RUNNABLE {
                continue;
            }
            table = unsafe { CPUS.my_cpu().run(i, table) };
        }
        drop(table);
    }
}

// Slot-order scan, re-scanning the whole table per candidate for the
// best (lowest-number) priority. Quadratic in NPROC per round, which
// is why this stays an experiment and not the default.
fn test_scheduler() -> ! {
    loop {
        intr_on();

        let mut table = PROCS.table.lock();
        for i in 0..NPROC {
            if table.procs[i].state != ProcState::RUNNABLE {
                continue;
            }
            let mut high = i;
            for j in 0..NPROC {
                if table.procs[j].state == ProcState::RUNNABLE
                    && table.procs[j].priority < table.procs[high].priority
                {
                    high = j;
                }
            }
            table = unsafe { CPUS.my_cpu().run(high, table) };
        }
        drop(table);
    }
}

// Strict best-priority-first, round-robin inside the band. After each
// dispatch the loop consults this CPU's "priority changed" flag: a
// chpr on any CPU invalidates the chosen band, so the round restarts
// from the minimum computation.
fn priority_scheduler() -> ! {
    let cpu = unsafe { Cpus::cpu_id() };
    loop {
        intr_on();

        let mut table = PROCS.table.lock();
        let best = match table.min_runnable_priority() {
            Some(best) => best,
            None => {
                drop(table);
                continue;
            }
        };
        for i in 0..NPROC {
            if table.procs[i].state != ProcState::RUNNABLE || table.procs[i].priority != best {
                continue;
            }
            table = unsafe { CPUS.my_cpu().run(i, table) };
            if table.take_priority_changed(cpu) {
                break;
            }
        }
        drop(table);
    }
}

// Three-level queue. Queue 1 picks by guaranteed share, queue 2 by
// arrival time, queue 3 round-robin; a dispatched process drops one
// level when it comes back, and every dispatch restarts from the top
// so the higher bands keep strict priority.
fn mlq_scheduler() -> ! {
    loop {
        intr_on();

        let mut table = PROCS.table.lock();
        let now = unsafe { *TICKS.get_mut() };
        if table.queue[0] > 0 {
            if let Some(i) = table.pick_guaranteed(now) {
                table = unsafe { CPUS.my_cpu().run(i, table) };
                table.mlq_requeue(i, 0);
            }
        } else if table.queue[1] > 0 {
            if let Some(i) = table.pick_fifo() {
                table = unsafe { CPUS.my_cpu().run(i, table) };
                table.mlq_requeue(i, 1);
            }
        } else if table.queue[2] > 0 {
            if let Some(i) = table.first_runnable_at(3) {
                table = unsafe { CPUS.my_cpu().run(i, table) };
                table.mlq_retire_bottom(i);
            }
        }
        drop(table);
    }
}

/// A fork child's very first scheduling by scheduler() will swtch
/// here, "returning" into user space.
pub unsafe extern "C" fn fork_ret() -> ! {
    static FIRST: AtomicBool = AtomicBool::new(true);

    // Still holding the process-table lock from scheduler.
    PROCS.table.force_unlock();

    if FIRST.swap(false, Ordering::AcqRel) {
        // Initialization that has to run in the context of a regular
        // process, not from main().
        file::init();
    }

    usertrap_ret()
}

// Print a process listing to the console when a user types control-p.
// No lock, to avoid wedging a stuck machine further; values may be
// torn. Sleeping processes also get a walk of their saved call chain,
// bounded to the kernel-stack page and ten frames.
pub fn procdump() {
    println!("");
    let table = unsafe { PROCS.table.get_mut() };
    for (i, p) in table.procs.iter().enumerate() {
        if p.state == ProcState::UNUSED {
            continue;
        }
        print!("{} {} {}", p.pid, p.state.as_str(), p.name);
        if p.state == ProcState::SLEEPING {
            let data = PROCS.pool[i].data();
            let kstack = data.kstack;
            let mut fp = data.context.s0;
            for _ in 0..10 {
                // saved ra sits at fp-8, the caller's fp at fp-16
                if fp < kstack + 16 || fp > kstack + PGSIZE {
                    break;
                }
                let ra = unsafe { *((fp - 8) as *const usize) };
                if ra == 0 {
                    break;
                }
                print!(" {:#x}", ra);
                fp = unsafe { *((fp - 16) as *const usize) };
            }
        }
        println!("");
    }
}
