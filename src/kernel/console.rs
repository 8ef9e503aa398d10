//! Console output, and just enough console input for the debug hooks:
//! control-p prints the process listing, everything else is echoed so
//! the operator can see the machine is alive. Line-oriented input
//! belongs to the file-descriptor layer, which this kernel does not
//! carry.

use crate::proc;
use crate::uart;

const BS: u8 = 0x08;

// Control-x
const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

pub fn init() {
    unsafe { uart::init() }
}

// send one character to the uart.
// called by printf, and to echo input characters.
pub fn putc(c: u8) {
    if c == ctrl(b'H') {
        uart::putc_sync(BS);
        uart::putc_sync(b' ');
        uart::putc_sync(BS);
    } else {
        uart::putc_sync(c);
    }
}

/// The console input interrupt handler; uart::intr() calls this for
/// each arriving character.
pub fn intr(c: u8) {
    match c {
        // print the process listing
        m if m == ctrl(b'P') => proc::procdump(),
        0 => {}
        b'\r' => putc(b'\n'),
        _ => putc(c),
    }
}
