//! Mutual exclusion spin locks.
//!
//! Interrupts are disabled for as long as a CPU holds any spinlock (the
//! push/pop nesting lives in `Cpu`), so lock acquisition order is the
//! only thing that can deadlock us. The process-table handshake needs
//! two operations an ordinary guard cannot express: a lock acquired on
//! one kernel stack is sometimes released on another. `Mutex::unlock`
//! dissolves a guard back into its mutex, and `force_unlock` releases a
//! lock whose guard lives on a different stack (the scheduler's, when a
//! freshly created process first runs).

use crate::proc::{Cpu, Cpus, IntrLock, CPUS};
use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

pub struct Mutex<T> {
    /// CPU holding the lock; null means unlocked.
    cpu: AtomicPtr<Cpu>,
    data: UnsafeCell<T>,
    name: &'static str, // for debugging
}

unsafe impl<T: Send> Sync for Mutex<T> {}

pub struct MutexGuard<'a, T: 'a> {
    mutex: &'a Mutex<T>,
    _intr_lock: IntrLock<'static>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<T> Mutex<T> {
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            cpu: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(value),
            name,
        }
    }

    /// Does this CPU hold the lock? Interrupts must be disabled.
    pub fn holding(&self) -> bool {
        self.cpu.load(Ordering::Relaxed) == unsafe { Cpus::my_cpu_ptr() }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        let _intr_lock = CPUS.intr_lock(); // disable interrupts first
        assert!(!self.holding(), "acquire {}", self.name);
        loop {
            if self
                .cpu
                .compare_exchange(
                    ptr::null_mut(),
                    unsafe { Cpus::my_cpu_ptr() },
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break MutexGuard {
                    mutex: self,
                    _intr_lock,
                };
            }
            hint::spin_loop();
        }
    }

    /// Release and hand back the mutex so the caller can re-lock it
    /// later, as sleep() does with the lock its caller passed in.
    pub fn unlock<'a>(guard: MutexGuard<'a, T>) -> &'a Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }

    /// Release a lock acquired on another kernel stack. The scheduler
    /// dispatches a process while holding the process-table lock; the
    /// process releases it from its own stack on the way out.
    ///
    /// # Safety
    ///
    /// Only for that handshake: this CPU must hold the lock, and the
    /// guard it came from must never be used (or dropped) afterwards.
    pub unsafe fn force_unlock(&self) {
        assert!(self.holding(), "force_unlock {}", self.name);
        self.cpu.store(ptr::null_mut(), Ordering::Release);
        CPUS.intr_unlock();
    }

    /// Access the data without taking the lock.
    ///
    /// # Safety
    ///
    /// Caller must know no CPU can be mutating it, or accept torn
    /// values (procdump does, deliberately).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }
}

impl<'a, T: 'a> MutexGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<'a, T: 'a> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        assert!(self.mutex.holding(), "release {}", self.mutex.name);
        self.mutex.cpu.store(ptr::null_mut(), Ordering::Release);
        // _intr_lock drops next and pops the interrupt-disable level.
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}
