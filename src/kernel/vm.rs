//! Sv39 page tables: the kernel's direct map and the per-process user
//! address spaces. The process core uses a narrow slice of this module:
//! create a user space, load initcode into it, grow/shrink it for
//! sbrk, clone it for fork, copy results out to it, free it on reap.

use crate::lazy::SyncOnceCell;
use crate::memlayout::{KERNBASE, PHYSTOP, PLIC, TRAMPOLINE, TRAPFRAME, UART0};
use crate::riscv::{pgrounddown, pgroundup, registers::satp, sfence_vma, MAXVA, PGSHIFT, PGSIZE};
use crate::trampoline::trampoline;
use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::boxed::Box;
use bitflags::bitflags;
use core::ops::{Deref, DerefMut};
use core::ptr;
use zerocopy::AsBytes;

pub static KVM: SyncOnceCell<Kvm> = SyncOnceCell::new();

bitflags! {
    pub struct PteFlags: usize {
        const V = 1 << 0; // valid
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4; // user-accessible
    }
}

/// A user virtual address, to keep it from being confused with the
/// kernel addresses everything else traffics in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct UVAddr(usize);

impl UVAddr {
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for UVAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

/// Page-granularity allocation out of the kernel heap. Implementors are
/// page-aligned types; the raw address travels as usize because the
/// owners hold it across unsafe boundaries (trampoline, swtch).
pub trait PageAllocator: Sized {
    fn try_new_zeroed() -> Option<usize> {
        let mem = unsafe { alloc_zeroed(Layout::new::<Self>()) };
        if mem.is_null() {
            None
        } else {
            Some(mem as usize)
        }
    }

    /// # Safety
    ///
    /// `raw` must have come from `try_new_zeroed` of the same type and
    /// not have been freed already.
    unsafe fn free(raw: usize) {
        dealloc(raw as *mut u8, Layout::new::<Self>());
    }
}

#[repr(C, align(4096))]
pub struct Page([u8; PGSIZE]);
impl PageAllocator for Page {}

#[repr(C, align(4096))]
struct RawPageTable {
    entries: [PageTableEntry; 512],
}
impl PageAllocator for RawPageTable {}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct PageTableEntry(usize);

impl PageTableEntry {
    fn is_v(self) -> bool {
        self.0 & PteFlags::V.bits() != 0
    }

    fn is_u(self) -> bool {
        self.0 & PteFlags::U.bits() != 0
    }

    fn is_leaf(self) -> bool {
        self.0 & 0x3FF != PteFlags::V.bits()
    }

    fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    fn to_pa(self) -> usize {
        (self.0 >> 10) << PGSHIFT
    }

    fn set(&mut self, pa: usize, perm: PteFlags) {
        self.0 = ((pa >> PGSHIFT) << 10) | perm.bits();
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

pub struct PageTable {
    ptr: *mut RawPageTable,
}

impl PageTable {
    fn new() -> Option<Self> {
        Some(Self {
            ptr: RawPageTable::try_new_zeroed()? as *mut RawPageTable,
        })
    }

    pub fn as_satp(&self) -> usize {
        satp::make(self.ptr as usize)
    }

    // Find the PTE for virtual address va, allocating intermediate
    // page-table pages if alloc is set.
    //
    // The risc-v Sv39 scheme has three levels of page-table pages. A
    // page-table page contains 512 64-bit PTEs. A 64-bit virtual
    // address is split into five fields:
    //   39..63 -- must be zero.
    //   30..38 -- 9 bits of level-2 index.
    //   21..29 -- 9 bits of level-1 index.
    //   12..20 -- 9 bits of level-0 index.
    //    0..11 -- 12 bits of byte offset within the page.
    fn walk(&mut self, va: usize, alloc: bool) -> Option<&mut PageTableEntry> {
        if va >= MAXVA {
            panic!("walk");
        }
        let mut pagetable = self.ptr;
        for level in (1..3).rev() {
            let idx = (va >> (PGSHIFT + 9 * level)) & 0x1FF;
            let pte = unsafe { &mut (*pagetable).entries[idx] };
            if pte.is_v() {
                pagetable = pte.to_pa() as *mut RawPageTable;
            } else {
                if !alloc {
                    return None;
                }
                pagetable = RawPageTable::try_new_zeroed()? as *mut RawPageTable;
                pte.set(pagetable as usize, PteFlags::V);
            }
        }
        let idx = (va >> PGSHIFT) & 0x1FF;
        Some(unsafe { &mut (*pagetable).entries[idx] })
    }

    // Look up a user virtual address and return its physical address,
    // or None if it is unmapped or not a user page.
    fn walkaddr(&mut self, va: usize) -> Option<usize> {
        if va >= MAXVA {
            return None;
        }
        match self.walk(va, false) {
            None => None,
            Some(pte) if !pte.is_v() => None,
            Some(pte) if !pte.is_u() => None,
            Some(pte) => Some(pte.to_pa()),
        }
    }

    // Create PTEs for virtual addresses starting at va that refer to
    // physical addresses starting at pa. va and size might not be
    // page-aligned.
    pub fn mappages(
        &mut self,
        va: usize,
        mut pa: usize,
        size: usize,
        perm: PteFlags,
    ) -> Result<(), ()> {
        if size == 0 {
            panic!("mappages: size");
        }
        let mut a = pgrounddown(va);
        let last = pgrounddown(va + size - 1);
        loop {
            let pte = self.walk(a, true).ok_or(())?;
            if pte.is_v() {
                panic!("mappages: remap");
            }
            pte.set(pa, perm | PteFlags::V);
            if a == last {
                break Ok(());
            }
            a += PGSIZE;
            pa += PGSIZE;
        }
    }

    // Remove npages of mappings starting from va, which must be
    // page-aligned and mapped. Optionally free the physical pages.
    pub fn unmap(&mut self, va: usize, npages: usize, do_free: bool) {
        if va % PGSIZE != 0 {
            panic!("unmap: not aligned");
        }
        let mut a = va;
        while a < va + npages * PGSIZE {
            match self.walk(a, false) {
                None => panic!("unmap: walk"),
                Some(pte) if !pte.is_v() => panic!("unmap: not mapped"),
                Some(pte) if !pte.is_leaf() => panic!("unmap: not a leaf"),
                Some(pte) => {
                    if do_free {
                        unsafe { Page::free(pte.to_pa()) };
                    }
                    pte.clear();
                }
            }
            a += PGSIZE;
        }
    }

    // Recursively free page-table pages. All leaf mappings must have
    // been removed already.
    fn freewalk(&mut self) {
        let pagetable = unsafe { &mut *self.ptr };
        for pte in pagetable.entries.iter_mut() {
            if pte.is_v() && !pte.is_leaf() {
                let mut child = PageTable {
                    ptr: pte.to_pa() as *mut RawPageTable,
                };
                child.freewalk();
                pte.clear();
            } else if pte.is_v() {
                panic!("freewalk: leaf");
            }
        }
        unsafe { RawPageTable::free(self.ptr as usize) };
    }
}

/// A process's user address space.
pub struct Uvm {
    page_table: PageTable,
}

impl Deref for Uvm {
    type Target = PageTable;
    fn deref(&self) -> &PageTable {
        &self.page_table
    }
}

impl DerefMut for Uvm {
    fn deref_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }
}

impl Uvm {
    // An empty user page table; the caller maps the trampoline and the
    // trap-frame page before anything runs on it.
    pub fn create() -> Option<Box<Uvm>> {
        Some(Box::new(Uvm {
            page_table: PageTable::new()?,
        }))
    }

    // Load initcode into address 0, for the very first process.
    // src must be less than a page.
    pub fn init(&mut self, src: &[u8]) {
        if src.len() > PGSIZE {
            panic!("inituvm: more than a page");
        }
        let mem = Page::try_new_zeroed().expect("inituvm");
        self.mappages(
            0,
            mem,
            PGSIZE,
            PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U,
        )
        .expect("inituvm: map");
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), mem as *mut u8, src.len());
        }
    }

    // Allocate memory to grow the process from oldsz to newsz, which
    // need not be page-aligned.
    pub fn alloc(&mut self, oldsz: usize, newsz: usize) -> Option<usize> {
        if newsz < oldsz {
            return Some(oldsz);
        }
        let oldsz = pgroundup(oldsz);
        for a in (oldsz..newsz).step_by(PGSIZE) {
            let mem = match Page::try_new_zeroed() {
                Some(mem) => mem,
                None => {
                    self.dealloc(a, oldsz);
                    return None;
                }
            };
            if self
                .mappages(
                    a,
                    mem,
                    PGSIZE,
                    PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U,
                )
                .is_err()
            {
                unsafe { Page::free(mem) };
                self.dealloc(a, oldsz);
                return None;
            }
        }
        Some(newsz)
    }

    // Deallocate user pages to bring the process size from oldsz to
    // newsz; returns the new size. oldsz and newsz need not be
    // page-aligned.
    pub fn dealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            self.unmap(pgroundup(newsz), npages, true);
        }
        newsz
    }

    // Copy this address space's memory into a child's: both the page
    // table and the physical pages.
    pub fn copy(&mut self, new: &mut Uvm, sz: usize) -> Result<(), ()> {
        let mut va = 0;
        while va < sz {
            let pte = self.walk(va, false).expect("uvmcopy: pte should exist");
            if !pte.is_v() {
                panic!("uvmcopy: page not present");
            }
            let pa = pte.to_pa();
            let flags = pte.flags();
            let mem = match Page::try_new_zeroed() {
                Some(mem) => mem,
                None => {
                    new.unmap(0, va / PGSIZE, true);
                    return Err(());
                }
            };
            unsafe {
                ptr::copy_nonoverlapping(pa as *const u8, mem as *mut u8, PGSIZE);
            }
            if new.mappages(va, mem, PGSIZE, flags).is_err() {
                unsafe { Page::free(mem) };
                new.unmap(0, va / PGSIZE, true);
                return Err(());
            }
            va += PGSIZE;
        }
        Ok(())
    }

    // Free user memory pages, then the page-table pages.
    pub fn free(&mut self, sz: usize) {
        if sz > 0 {
            self.unmap(0, pgroundup(sz) / PGSIZE, true);
        }
        self.page_table.freewalk();
    }

    // Tear down a process's address space: drop the trampoline and
    // trap-frame mappings (their pages are owned elsewhere), then free
    // the user memory and the page-table pages.
    pub fn proc_free(&mut self, sz: usize) {
        self.unmap(TRAMPOLINE, 1, false);
        self.unmap(TRAPFRAME, 1, false);
        self.free(sz);
    }

    // Copy from kernel to user: write the bytes of src at virtual
    // address dstva in this address space.
    //
    // # Safety is carried by the AsBytes bound: only types with a fixed
    // byte layout can cross the boundary.
    pub fn copyout<T: AsBytes + ?Sized>(&mut self, dstva: UVAddr, src: &T) -> Result<(), ()> {
        let src = src.as_bytes();
        let mut dstva = dstva.into_usize();
        let mut offset = 0;
        while offset < src.len() {
            let va0 = pgrounddown(dstva);
            let pa0 = self.walkaddr(va0).ok_or(())?;
            let n = core::cmp::min(PGSIZE - (dstva - va0), src.len() - offset);
            unsafe {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(offset),
                    (pa0 + (dstva - va0)) as *mut u8,
                    n,
                );
            }
            offset += n;
            dstva = va0 + PGSIZE;
        }
        Ok(())
    }
}

/// The kernel's own page table: a direct map of devices and RAM, plus
/// the trampoline at the top of the address space.
pub struct Kvm {
    page_table: PageTable,
}

unsafe impl Send for Kvm {}
unsafe impl Sync for Kvm {}

extern "C" {
    // kernel.ld sets this to the end of kernel code.
    fn etext();
}

impl Kvm {
    fn new() -> Option<Self> {
        Some(Self {
            page_table: PageTable::new()?,
        })
    }

    // add a mapping to the kernel page table.
    // only used when booting; does not flush the TLB.
    fn map(&mut self, va: usize, pa: usize, size: usize, perm: PteFlags) {
        if self.page_table.mappages(va, pa, size, perm).is_err() {
            panic!("kvmmap");
        }
    }

    fn make(&mut self) {
        // uart registers
        self.map(UART0, UART0, PGSIZE, PteFlags::R | PteFlags::W);

        // PLIC
        self.map(PLIC, PLIC, 0x40_0000, PteFlags::R | PteFlags::W);

        // kernel text, executable and read-only
        self.map(
            KERNBASE,
            KERNBASE,
            etext as usize - KERNBASE,
            PteFlags::R | PteFlags::X,
        );

        // kernel data and the physical RAM we'll make use of
        self.map(
            etext as usize,
            etext as usize,
            PHYSTOP - etext as usize,
            PteFlags::R | PteFlags::W,
        );

        // the trampoline, at the highest virtual address in both the
        // kernel and every user address space
        self.map(
            TRAMPOLINE,
            trampoline as usize,
            PGSIZE,
            PteFlags::R | PteFlags::X,
        );
    }

    pub fn as_satp(&self) -> usize {
        self.page_table.as_satp()
    }
}

// Initialize the one kernel page table.
pub fn kinit() {
    let mut kvm = Kvm::new().expect("kinit");
    kvm.make();
    if KVM.set(kvm).is_err() {
        panic!("kinit: twice");
    }
}

// Switch the hardware page-table register to the kernel's page table
// and enable paging.
pub fn kinithart() {
    unsafe {
        satp::write(KVM.get().unwrap().as_satp());
        sfence_vma();
    }
}
