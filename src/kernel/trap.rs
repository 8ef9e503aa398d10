use crate::kernelvec::kernelvec;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME, UART0_IRQ};
use crate::plic;
use crate::println;
use crate::proc::{Cpus, CPUS, PROCS};
use crate::riscv::{intr_get, intr_off, intr_on, r_sstatus, registers::satp, w_sip, w_sstatus, PGSIZE};
use crate::spinlock::Mutex;
use crate::syscall;
use crate::table::ProcState;
use crate::trampoline::{trampoline, userret, uservec};
use crate::uart;
use riscv::register::*;
use scause::{Exception, Interrupt, Trap};

#[derive(PartialEq)]
pub enum Intr {
    Timer,
    Device,
}

/// The tick counter. Its inner address doubles as the rendezvous
/// channel the sleep system call blocks on.
pub static TICKS: Mutex<usize> = Mutex::new(0, "time");

// set up to take exceptions and traps while in the kernel.
pub fn inithart() {
    unsafe {
        stvec::write(kernelvec as usize, stvec::TrapMode::Direct);
    }
}

//
// handle an interrupt, exception, or system call from user space.
// called from trampoline.rs
//
#[no_mangle]
pub extern "C" fn usertrap() -> ! {
    assert!(
        sstatus::read().spp() == sstatus::SPP::User,
        "usertrap: not from user mode"
    );
    assert!(!intr_get(), "usertrap: interrupts enabled");

    // send interrupts and exceptions to kerneltrap(),
    // since we're now in the kernel.
    unsafe {
        stvec::write(kernelvec as usize, stvec::TrapMode::Direct);
    }

    let i = CPUS.my_proc().expect("usertrap: no process");
    let data = PROCS.data(i);
    let tf = unsafe { data.trapframe.unwrap().as_mut() };

    // save the user program counter.
    tf.epc = sepc::read();

    let mut which_dev = None;
    match scause::read().cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            // system call

            if PROCS.table.lock().procs[i].killed {
                PROCS.exit();
            }

            // sepc points to the ecall instruction,
            // but we want to return to the next instruction.
            tf.epc += 4;

            // an interrupt will change sepc, scause and sstatus,
            // so don't enable until done with those registers.
            intr_on();

            syscall::syscall();
        }
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            let mut table = PROCS.table.lock();
            println!(
                "usertrap(): unexpected scause {:?}, pid={}",
                scause::read().cause(),
                table.procs[i].pid
            );
            println!(
                "            sepc={:#x} stval={:#x}",
                sepc::read(),
                stval::read()
            );
            table.procs[i].killed = true;
        }
    }

    if PROCS.table.lock().procs[i].killed {
        PROCS.exit();
    }

    // give up the CPU if this is a timer interrupt.
    if which_dev == Some(Intr::Timer) {
        PROCS.yielding();
    }

    unsafe { usertrap_ret() }
}

//
// return to user space
//
#[no_mangle]
pub unsafe extern "C" fn usertrap_ret() -> ! {
    let i = CPUS.my_proc().expect("usertrap_ret: no process");

    // we're about to switch the destination of traps from
    // kerneltrap() to usertrap(), so turn off interrupts until
    // we're back in user space, where usertrap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to uservec in
    // trampoline.rs
    stvec::write(
        TRAMPOLINE + (uservec as usize - trampoline as usize),
        stvec::TrapMode::Direct,
    );

    let data = PROCS.data(i);

    // set up the trap-frame values that uservec will need when
    // the process next re-enters the kernel.
    let tf = data.trapframe.unwrap().as_mut();
    tf.kernel_satp = satp::read();
    tf.kernel_sp = data.kstack + PGSIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = Cpus::cpu_id();

    // set up the registers that trampoline.rs's sret will use
    // to get to user space.

    // set S Previous Privilege mode to User,
    // and enable interrupts in user mode.
    sstatus::set_spp(sstatus::SPP::User);
    sstatus::set_spie();

    // set S Exception Program Counter to the saved user pc.
    sepc::write(tf.epc);

    // tell trampoline.rs the user page table to switch to.
    let user_satp = data.uvm.as_ref().unwrap().as_satp();

    // jump to userret in trampoline.rs at the top of memory, which
    // switches to the user page table, restores user registers,
    // and switches to user mode with sret.
    let f: usize = TRAMPOLINE + (userret as usize - trampoline as usize);
    let f: extern "C" fn(usize, usize) -> ! = core::mem::transmute(f);
    f(TRAPFRAME, user_satp)
}

// interrupts and exceptions from kernel code go here via kernelvec,
// on whatever the current kernel stack is.
#[no_mangle]
pub extern "C" fn kerneltrap() {
    let sepc_saved = sepc::read();
    let sstatus_saved = r_sstatus();

    assert!(
        sstatus::read().spp() == sstatus::SPP::Supervisor,
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    let mut which_dev = None;
    match scause::read().cause() {
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        cause => {
            println!("scause {:?}", cause);
            println!("sepc={:#x} stval={:#x}", sepc::read(), stval::read());
            panic!("kerneltrap");
        }
    }

    // give up the CPU if this is a timer interrupt.
    if which_dev == Some(Intr::Timer) {
        if let Some(i) = CPUS.my_proc() {
            if PROCS.table.lock().procs[i].state == ProcState::RUNNING {
                PROCS.yielding();
            }
        }
    }

    // yielding() may have caused traps to occur on other processes,
    // so restore the trap registers for kernelvec's sret.
    sepc::write(sepc_saved);
    w_sstatus(sstatus_saved);
}

fn clockintr() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
    PROCS.wakeup(&(*ticks) as *const usize as usize);
    drop(ticks);

    // per-tick accounting for every process slot.
    PROCS.table.lock().update_statistics();
}

// check if it's an external interrupt or software interrupt,
// and handle it.
fn devintr(intr: Interrupt) -> Option<Intr> {
    match intr {
        Interrupt::SupervisorExternal => {
            // this is a supervisor external interrupt, via PLIC.

            // irq indicates which device interrupted.
            let irq = plic::claim();

            if let Some(irq) = irq {
                match irq as usize {
                    UART0_IRQ => uart::intr(),
                    _ => println!("unexpected interrupt irq={}", irq),
                }
                // the PLIC allows each device to raise at most one
                // interrupt at a time; tell it the device is now
                // allowed to interrupt again.
                plic::complete(irq);
            }

            Some(Intr::Device)
        }
        Interrupt::SupervisorSoft => {
            // software interrupt from a machine-mode timer interrupt,
            // forwarded by timervec in kernelvec.rs.

            if unsafe { Cpus::cpu_id() } == 0 {
                clockintr();
            }

            // acknowledge the software interrupt by clearing
            // the SSIP bit in sip.
            w_sip(sip::read().bits() & !2);

            Some(Intr::Timer)
        }
        _ => None,
    }
}
