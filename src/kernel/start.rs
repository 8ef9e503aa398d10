//! Machine-mode bring-up: entry.rs points every hart here. Set up
//! enough M-mode state to drop to supervisor mode in main(), and
//! arrange for the CLINT to deliver timer interrupts that timervec
//! converts into supervisor software interrupts.

use crate::kernelvec::timervec;
use crate::memlayout::{clint_mtimecmp, CLINT_MTIME};
use crate::param::NCPU;
use crate::riscv::registers::*;
use core::arch::asm;
use core::ptr;

const STACK_SIZE: usize = 16384; // entry.rs knows this number too

#[repr(C, align(16))]
struct Stack([u8; STACK_SIZE * NCPU]);

#[no_mangle]
static mut STACK0: Stack = Stack([0; STACK_SIZE * NCPU]);

// scratch area per CPU for machine-mode timer interrupts.
static mut TIMER_SCRATCH: [[u64; 5]; NCPU] = [[0; 5]; NCPU];

extern "C" {
    fn main() -> !;
}

#[no_mangle]
pub unsafe extern "C" fn start() -> ! {
    // set M Previous Privilege mode to Supervisor, for mret.
    let mut x = mstatus::read();
    x &= !mstatus_bits::MPP_MASK;
    x |= mstatus_bits::MPP_S;
    mstatus::write(x);

    // set M Exception Program Counter to main, for mret.
    mepc::write(main as usize);

    // disable paging for now.
    satp::write(0);

    // delegate all interrupts and exceptions to supervisor mode.
    medeleg::write(0xffff);
    mideleg::write(0xffff);
    sie::write(sie::read() | sie_bits::SEIE | sie_bits::STIE | sie_bits::SSIE);

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    pmpaddr0::write(0x3f_ffff_ffff_ffff);
    pmpcfg0::write(0xf);

    // ask for clock interrupts.
    timer_init();

    // keep each CPU's hartid in its tp register, for Cpus::cpu_id().
    tp::write(mhartid::read());

    // switch to supervisor mode and jump to main().
    asm!("mret", options(noreturn));
}

// arrange to receive timer interrupts in machine mode at timervec,
// which turns them into supervisor software interrupts.
unsafe fn timer_init() {
    let id = mhartid::read();

    // ask the CLINT for a timer interrupt.
    let interval = 1_000_000u64; // cycles; about 1/10th second in qemu.
    let mtimecmp = clint_mtimecmp(id) as *mut u64;
    let mtime = CLINT_MTIME as *const u64;
    ptr::write_volatile(mtimecmp, ptr::read_volatile(mtime) + interval);

    // prepare information in scratch[] for timervec.
    let scratch = &mut TIMER_SCRATCH[id];
    scratch[3] = mtimecmp as u64;
    scratch[4] = interval;
    mscratch::write(scratch.as_mut_ptr() as usize);

    // set the machine-mode trap handler.
    mtvec::write(timervec as usize);

    // enable machine-mode interrupts.
    mstatus::write(mstatus::read() | mstatus_bits::MIE);

    // enable machine-mode timer interrupts.
    mie::write(mie::read() | mie_bits::MTIE);
}
