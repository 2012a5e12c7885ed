//! The reader-writer lock guarding tree mutation.
//!
//! Mirrors the per-core reader-counter design of the original engine: each
//! thread is assigned a slot (cache-line padded to avoid false sharing
//! between cores) and bumps its own counter to register a read; a writer
//! sets a single flag and then spins until every slot's counter drains to
//! zero. The reference implementation picked a thread's slot via a
//! Linux-only `sched_getcpu()`; this port assigns slots with a portable
//! thread-local counter instead, so the lock works the same on any target.

use crossbeam_utils::CachePadded;
use std::cell::Cell;
use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Used when `num_cpus::get()` can't be trusted (e.g. under a restrictive
/// container cgroup reporting zero).
const DEFAULT_NUM_THREADS: usize = 48;

thread_local! {
    static THREAD_SLOT: Cell<Option<usize>> = Cell::new(None);
}

static NEXT_SLOT: AtomicU32 = AtomicU32::new(0);

/// Returns a stable, process-wide slot index for the calling thread,
/// assigned on first use and reused for the thread's lifetime.
pub(crate) fn current_thread_slot(num_slots: usize) -> usize {
    THREAD_SLOT.with(|slot| {
        if let Some(s) = slot.get() {
            return s % num_slots;
        }
        let assigned = NEXT_SLOT.fetch_add(1, Ordering::Relaxed) as usize;
        slot.set(Some(assigned));
        assigned % num_slots
    })
}

/// A spinning, writer-priority reader-writer lock with one counter per
/// thread slot, so concurrent readers never contend on a shared atomic.
pub struct SpinRwLock {
    readers: Vec<CachePadded<AtomicU32>>,
    writer: AtomicBool,
}

impl SpinRwLock {
    pub fn new(num_slots: usize) -> Self {
        let num_slots = num_slots.max(1);
        let readers = (0..num_slots)
            .map(|_| CachePadded::new(AtomicU32::new(0)))
            .collect();
        SpinRwLock {
            readers,
            writer: AtomicBool::new(false),
        }
    }

    pub fn num_slots(&self) -> usize {
        self.readers.len()
    }

    pub fn acquire_read(&self, slot: usize) {
        let slot = slot % self.readers.len();
        loop {
            self.readers[slot].fetch_add(1, Ordering::AcqRel);
            if !self.writer.load(Ordering::Acquire) {
                return;
            }
            // A writer is active (or racing us). Back off and retry; the
            // decrement-then-retry here can transiently race a writer that
            // just observed our incremented counter and is about to spin on
            // it, which is a known, benign race inherited from the original
            // design: the writer simply spins a little longer.
            self.readers[slot].fetch_sub(1, Ordering::AcqRel);
            while self.writer.load(Ordering::Acquire) {
                hint::spin_loop();
            }
        }
    }

    pub fn release_read(&self, slot: usize) {
        let slot = slot % self.readers.len();
        self.readers[slot].fetch_sub(1, Ordering::Release);
    }

    pub fn acquire_write(&self) {
        while self
            .writer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            hint::spin_loop();
        }
        for counter in &self.readers {
            while counter.load(Ordering::Acquire) != 0 {
                hint::spin_loop();
            }
        }
    }

    pub fn release_write(&self) {
        self.writer.store(false, Ordering::Release);
    }
}

/// The two lock strategies a [`crate::tree::Tree`] can be configured with:
/// the default spinning per-slot lock, or a blocking `parking_lot::RwLock`
/// for workloads where spinning burns more CPU than it saves.
pub enum Concurrency {
    Spin(SpinRwLock),
    Blocking(parking_lot::RwLock<()>),
}

/// RAII guard releasing whichever read lock was acquired.
pub struct ReadGuard<'a> {
    inner: ReadGuardInner<'a>,
}

enum ReadGuardInner<'a> {
    Spin { lock: &'a SpinRwLock, slot: usize },
    Blocking(parking_lot::RwLockReadGuard<'a, ()>),
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let ReadGuardInner::Spin { lock, slot } = &self.inner {
            lock.release_read(*slot);
        }
    }
}

/// RAII guard releasing whichever write lock was acquired.
pub struct WriteGuard<'a> {
    inner: WriteGuardInner<'a>,
}

enum WriteGuardInner<'a> {
    Spin(&'a SpinRwLock),
    Blocking(parking_lot::RwLockWriteGuard<'a, ()>),
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let WriteGuardInner::Spin(lock) = &self.inner {
            lock.release_write();
        }
    }
}

impl Concurrency {
    pub fn spin(num_slots: usize) -> Self {
        Concurrency::Spin(SpinRwLock::new(num_slots))
    }

    pub fn blocking() -> Self {
        Concurrency::Blocking(parking_lot::RwLock::new(()))
    }

    pub fn num_slots(&self) -> usize {
        match self {
            Concurrency::Spin(lock) => lock.num_slots(),
            Concurrency::Blocking(_) => DEFAULT_NUM_THREADS,
        }
    }

    pub fn read(&self) -> ReadGuard<'_> {
        match self {
            Concurrency::Spin(lock) => {
                let slot = current_thread_slot(lock.num_slots());
                lock.acquire_read(slot);
                ReadGuard {
                    inner: ReadGuardInner::Spin { lock, slot },
                }
            }
            Concurrency::Blocking(lock) => ReadGuard {
                inner: ReadGuardInner::Blocking(lock.read()),
            },
        }
    }

    pub fn write(&self) -> WriteGuard<'_> {
        match self {
            Concurrency::Spin(lock) => {
                lock.acquire_write();
                WriteGuard {
                    inner: WriteGuardInner::Spin(lock),
                }
            }
            Concurrency::Blocking(lock) => WriteGuard {
                inner: WriteGuardInner::Blocking(lock.write()),
            },
        }
    }
}
