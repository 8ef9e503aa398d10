//! Physical memory layout of qemu's -machine virt, plus the fixed
//! virtual addresses the kernel hands to user page tables.
//!
//! 00001000 -- boot ROM, provided by qemu
//! 0c000000 -- PLIC
//! 02000000 -- CLINT (timer)
//! 10000000 -- uart0
//! 80000000 -- boot ROM jumps here in machine mode; kernel loads itself
//!             here and uses the rest of RAM up to PHYSTOP.

use crate::riscv::{MAXVA, PGSIZE};

pub const UART0: usize = 0x1000_0000;
pub const UART0_IRQ: usize = 10;

// core local interruptor (CLINT), which contains the timer.
pub const CLINT: usize = 0x200_0000;
pub const CLINT_MTIME: usize = CLINT + 0xBFF8; // cycles since boot

pub const fn clint_mtimecmp(hartid: usize) -> usize {
    CLINT + 0x4000 + 8 * hartid
}

// qemu puts platform-level interrupt controller (PLIC) here.
pub const PLIC: usize = 0x0c00_0000;

pub const fn plic_senable(hartid: usize) -> usize {
    PLIC + 0x2080 + hartid * 0x100
}

pub const fn plic_spriority(hartid: usize) -> usize {
    PLIC + 0x20_1000 + hartid * 0x2000
}

pub const fn plic_sclaim(hartid: usize) -> usize {
    PLIC + 0x20_1004 + hartid * 0x2000
}

pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;

// map the trampoline page to the highest address,
// in both user and kernel space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

// the process's kernel-stack page, holding its trap frame, is mapped
// just under the trampoline in every user page table.
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;
