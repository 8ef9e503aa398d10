use core::arch::asm;
use riscv::register::sstatus;

pub const PGSIZE: usize = 4096; // bytes per page
pub const PGSHIFT: usize = 12; // bits of offset within a page

// one beyond the highest possible virtual address.
// MAXVA is actually one bit less than the max allowed by
// Sv39, to avoid having to sign-extend virtual addresses
// that have the high bit set.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pgrounddown(sz: usize) -> usize {
    sz & !(PGSIZE - 1)
}

// enable device interrupts
pub fn intr_on() {
    unsafe {
        sstatus::set_sie();
    }
}

// disable device interrupts
pub fn intr_off() {
    unsafe {
        sstatus::clear_sie();
    }
}

// are device interrupts enabled?
pub fn intr_get() -> bool {
    sstatus::read().sie()
}

pub fn w_sstatus(sstatus: usize) {
    unsafe {
        asm!("csrw sstatus, {}", in(reg) sstatus);
    }
}

pub fn r_sstatus() -> usize {
    let sstatus: usize;
    unsafe { asm!("csrr {}, sstatus", out(reg) sstatus) }
    sstatus
}

pub fn w_sip(sip: usize) {
    unsafe {
        asm!("csrw sip, {}", in(reg) sip);
    }
}

// flush the TLB. the zero, zero means flush all entries.
pub unsafe fn sfence_vma() {
    asm!("sfence.vma zero, zero");
}

/// Accessors for the CSRs the `riscv` crate does not cover for us:
/// everything machine mode needs during boot, plus satp and tp.
pub mod registers {
    macro_rules! csr {
        ($name:ident) => {
            pub mod $name {
                use core::arch::asm;

                #[inline]
                pub unsafe fn read() -> usize {
                    let bits: usize;
                    asm!(concat!("csrr {}, ", stringify!($name)), out(reg) bits);
                    bits
                }

                #[inline]
                pub unsafe fn write(bits: usize) {
                    asm!(concat!("csrw ", stringify!($name), ", {}"), in(reg) bits);
                }
            }
        };
    }

    csr!(mstatus);
    csr!(mepc);
    csr!(medeleg);
    csr!(mideleg);
    csr!(mie);
    csr!(mscratch);
    csr!(mtvec);
    csr!(sie);
    csr!(pmpaddr0);
    csr!(pmpcfg0);

    pub mod mstatus_bits {
        /// machine previous privilege mask and the supervisor setting
        pub const MPP_MASK: usize = 3 << 11;
        pub const MPP_S: usize = 1 << 11;
        /// machine-mode interrupt enable
        pub const MIE: usize = 1 << 3;
    }

    pub mod sie_bits {
        pub const SEIE: usize = 1 << 9; // external
        pub const STIE: usize = 1 << 5; // timer
        pub const SSIE: usize = 1 << 1; // software
    }

    pub mod mie_bits {
        pub const MTIE: usize = 1 << 7; // machine timer
    }

    pub mod mhartid {
        use core::arch::asm;

        #[inline]
        pub unsafe fn read() -> usize {
            let id: usize;
            asm!("csrr {}, mhartid", out(reg) id);
            id
        }
    }

    /// Each hart keeps its id in tp so the kernel can tell which CPU it
    /// is on; written once in machine mode and never changed.
    pub mod tp {
        use core::arch::asm;

        #[inline]
        pub unsafe fn read() -> usize {
            let id: usize;
            asm!("mv {}, tp", out(reg) id);
            id
        }

        #[inline]
        pub unsafe fn write(id: usize) {
            asm!("mv tp, {}", in(reg) id);
        }
    }

    pub mod satp {
        use crate::riscv::PGSHIFT;
        use core::arch::asm;

        // sv39 page table scheme
        pub const SATP_SV39: usize = 8 << 60;

        pub const fn make(pagetable: usize) -> usize {
            SATP_SV39 | (pagetable >> PGSHIFT)
        }

        #[inline]
        pub unsafe fn read() -> usize {
            let bits: usize;
            asm!("csrr {}, satp", out(reg) bits);
            bits
        }

        #[inline]
        pub unsafe fn write(bits: usize) {
            asm!("csrw satp, {}", in(reg) bits);
        }
    }
}
