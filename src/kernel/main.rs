#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use core::sync::atomic::{AtomicBool, Ordering};
#[cfg(target_os = "none")]
use kernel::{
    console, kalloc, kmain, plic, println,
    proc::{self, Cpus, PROCS},
    trap, vm,
};

#[cfg(target_os = "none")]
static STARTED: AtomicBool = AtomicBool::new(false);

#[cfg(target_os = "none")]
kmain!(main);

#[cfg(target_os = "none")]
extern "C" fn main() -> ! {
    if unsafe { Cpus::cpu_id() } == 0 {
        console::init();
        println!("");
        println!("schedos kernel is booting");
        println!("");
        kalloc::init(); // physical memory allocator
        vm::kinit(); // create the kernel page table
        vm::kinithart(); // turn on paging
        proc::init(); // process table
        trap::inithart(); // install the kernel trap vector
        plic::init(); // set up the interrupt controller
        plic::inithart(); // ask the PLIC for device interrupts
        PROCS.user_init(); // first user process
        STARTED.store(true, Ordering::SeqCst);
    } else {
        while !STARTED.load(Ordering::SeqCst) {}
        println!("hart {} starting", unsafe { Cpus::cpu_id() });
        vm::kinithart(); // turn on paging
        trap::inithart(); // install the kernel trap vector
        plic::inithart(); // ask the PLIC for device interrupts
    }

    proc::scheduler()
}

// the binary only means something on the riscv target; building the
// workspace for the host (cargo test) still type-checks it.
#[cfg(not(target_os = "none"))]
fn main() {}
