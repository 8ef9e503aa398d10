//! One-shot and lazy statics.
//!
//! The process pool and the root inode need heap allocation, so they
//! cannot be built in a const initializer; SyncLazy defers construction
//! to first use, after the allocator is up.

use core::cell::{Cell, UnsafeCell};
use core::hint;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};

const UNINIT: usize = 0;
const RUNNING: usize = 1;
const READY: usize = 2;

pub struct SyncOnceCell<T> {
    state: AtomicUsize,
    inner: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send> Send for SyncOnceCell<T> {}
unsafe impl<T: Send + Sync> Sync for SyncOnceCell<T> {}

impl<T> SyncOnceCell<T> {
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(UNINIT),
            inner: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            Some(unsafe { self.get_unchecked() })
        } else {
            None
        }
    }

    pub fn get_or_init(&self, func: impl FnOnce() -> T) -> &T {
        let mut func = Some(func);
        loop {
            match self.state.load(Ordering::Acquire) {
                READY => break unsafe { self.get_unchecked() },
                UNINIT
                    if self
                        .state
                        .compare_exchange(UNINIT, RUNNING, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok() =>
                {
                    unsafe {
                        (*self.inner.get()).as_mut_ptr().write(match func.take() {
                            Some(f) => f(),
                            None => unreachable!(),
                        });
                    }
                    self.state.store(READY, Ordering::Release);
                    break unsafe { self.get_unchecked() };
                }
                // another hart is mid-initialization
                _ => hint::spin_loop(),
            }
        }
    }

    pub fn set(&self, value: T) -> Result<(), T> {
        let mut value = Some(value);
        self.get_or_init(|| value.take().unwrap());
        match value {
            None => Ok(()),
            Some(value) => Err(value),
        }
    }

    unsafe fn get_unchecked(&self) -> &T {
        (*self.inner.get()).assume_init_ref()
    }
}

impl<T> Drop for SyncOnceCell<T> {
    fn drop(&mut self) {
        if self.state.load(Ordering::Acquire) == READY {
            unsafe { (*self.inner.get()).assume_init_drop() }
        }
    }
}

pub struct SyncLazy<T, F = fn() -> T> {
    cell: SyncOnceCell<T>,
    init: Cell<Option<F>>,
}

unsafe impl<T, F: Send> Sync for SyncLazy<T, F> where SyncOnceCell<T>: Sync {}

impl<T, F> SyncLazy<T, F> {
    pub const fn new(init: F) -> Self {
        Self {
            cell: SyncOnceCell::new(),
            init: Cell::new(Some(init)),
        }
    }
}

impl<T, F: FnOnce() -> T> SyncLazy<T, F> {
    pub fn force(this: &SyncLazy<T, F>) -> &T {
        this.cell.get_or_init(|| match this.init.take() {
            Some(f) => f(),
            None => panic!("SyncLazy poisoned"),
        })
    }
}

impl<T, F: FnOnce() -> T> Deref for SyncLazy<T, F> {
    type Target = T;
    fn deref(&self) -> &T {
        SyncLazy::force(self)
    }
}
