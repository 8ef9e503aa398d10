//! The riscv platform-level interrupt controller (PLIC). The uart is
//! the only device routed through it here.

use crate::memlayout::{plic_sclaim, plic_senable, plic_spriority, PLIC, UART0_IRQ};
use crate::proc::Cpus;
use core::ptr;

pub fn init() {
    // set the uart's device priority to non-zero (zero disables it).
    unsafe {
        ptr::write_volatile((PLIC + UART0_IRQ * 4) as *mut u32, 1);
    }
}

pub fn inithart() {
    unsafe {
        let hart = Cpus::cpu_id();
        // enable the uart irq for this hart's S-mode,
        // and accept interrupts of any priority.
        ptr::write_volatile(plic_senable(hart) as *mut u32, 1 << UART0_IRQ);
        ptr::write_volatile(plic_spriority(hart) as *mut u32, 0);
    }
}

/// Ask the PLIC which interrupt we should serve.
pub fn claim() -> Option<u32> {
    let irq = unsafe {
        let hart = Cpus::cpu_id();
        ptr::read_volatile(plic_sclaim(hart) as *const u32)
    };
    if irq == 0 {
        None
    } else {
        Some(irq)
    }
}

/// Tell the PLIC we've served this irq.
pub fn complete(irq: u32) {
    unsafe {
        let hart = Cpus::cpu_id();
        ptr::write_volatile(plic_sclaim(hart) as *mut u32, irq);
    }
}
