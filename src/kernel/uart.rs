//! Low-level driver for the 16550a uart on qemu's virt board.
//! Output is synchronous (busy-wait on the transmit holding register);
//! input arrives via the PLIC and is handed to the console layer.

use crate::console;
use crate::memlayout::UART0;
use core::ptr;

// the registers, as byte offsets from UART0.
const RHR: usize = 0; // receive holding register (read)
const THR: usize = 0; // transmit holding register (write)
const IER: usize = 1; // interrupt enable register
const FCR: usize = 2; // FIFO control register
const LCR: usize = 3; // line control register
const LSR: usize = 5; // line status register

const IER_RX_ENABLE: u8 = 1 << 0;
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1;
const LCR_EIGHT_BITS: u8 = 3 << 0;
const LCR_BAUD_LATCH: u8 = 1 << 7;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

unsafe fn write_reg(reg: usize, value: u8) {
    ptr::write_volatile((UART0 + reg) as *mut u8, value);
}

unsafe fn read_reg(reg: usize) -> u8 {
    ptr::read_volatile((UART0 + reg) as *const u8)
}

pub unsafe fn init() {
    // disable interrupts while configuring
    write_reg(IER, 0x00);

    // 38.4K baud: enter the latch, set the divisor, leave it again
    write_reg(LCR, LCR_BAUD_LATCH);
    write_reg(0, 0x03);
    write_reg(1, 0x00);
    write_reg(LCR, LCR_EIGHT_BITS);

    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

    // receive interrupts only; transmission is synchronous
    write_reg(IER, IER_RX_ENABLE);
}

/// Busy-wait until the uart accepts the byte. Used by the console
/// printer and for echoing, so it must work from any context, locks
/// held or not.
pub fn putc_sync(c: u8) {
    unsafe {
        while read_reg(LSR) & LSR_TX_IDLE == 0 {}
        write_reg(THR, c);
    }
}

/// Handle a uart interrupt: drain received characters into the console.
pub fn intr() {
    loop {
        let c = unsafe {
            if read_reg(LSR) & LSR_RX_READY == 0 {
                break;
            }
            read_reg(RHR)
        };
        console::intr(c);
    }
}
