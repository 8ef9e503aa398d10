//! qemu -kernel loads the kernel at 0x80000000 and causes each hart to
//! jump there in machine mode. kernel.ld places this first.

core::arch::global_asm!(
    r#"
.section .entry
.globl _entry
_entry:
        # set up a stack for Rust.
        # STACK0 is declared in start.rs,
        # with 16KB of stack per CPU.
        # sp = STACK0 + ((hartid + 1) * 16384)
        la sp, STACK0
        li a0, 16384
        csrr a1, mhartid
        addi a1, a1, 1
        mul a0, a0, a1
        add sp, sp, a0
        # jump to start() in start.rs
        call start
spin:
        j spin
"#
);
