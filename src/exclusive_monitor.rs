use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};

/// Reservation granule. ARM requires at least 8 bytes; we track 16-byte
/// granules so adjacent-word stores correctly clear a neighbour's
/// reservation.
pub const RESERVATION_GRANULE_MASK: u64 = !0xF;

const INVALID_EXCLUSIVE_ADDRESS: u64 = 0xDEAD_DEAD_DEAD_DEAD & RESERVATION_GRANULE_MASK;

struct MonitorState {
    /// Per-processor reserved granule address, or `INVALID_EXCLUSIVE_ADDRESS`.
    exclusive_addresses: Vec<u64>,
    /// Per-processor 128-bit value snapshot taken at `read_and_mark` time.
    exclusive_values: Vec<u128>,
}

/// Global exclusive monitor shared between all cores of a guest system.
///
/// All operations serialize on a single test-and-set spinlock. A successful
/// exclusive store by one processor clears every other processor's
/// reservation for the same granule, which is what gives LDREX/STREX
/// (and LDXR/STXR) their mutual-exclusion semantics.
pub struct ExclusiveMonitor {
    lock: AtomicBool,
    state: UnsafeCell<MonitorState>,
}

// State is only touched while `lock` is held.
unsafe impl Sync for ExclusiveMonitor {}
unsafe impl Send for ExclusiveMonitor {}

impl ExclusiveMonitor {
    pub fn new(processor_count: usize) -> Self {
        Self {
            lock: AtomicBool::new(false),
            state: UnsafeCell::new(MonitorState {
                exclusive_addresses: vec![INVALID_EXCLUSIVE_ADDRESS; processor_count],
                exclusive_values: vec![0; processor_count],
            }),
        }
    }

    pub fn processor_count(&self) -> usize {
        self.with_lock(|state| state.exclusive_addresses.len())
    }

    /// Mark `address` as exclusive to `processor_id` and read the current
    /// value through `op`. The read happens under the monitor lock so the
    /// snapshot and the reservation are consistent.
    pub fn read_and_mark<T, F>(&self, processor_id: usize, address: u64, op: F) -> T
    where
        T: Copy + Into<u128>,
        F: FnOnce() -> T,
    {
        let masked = address & RESERVATION_GRANULE_MASK;
        self.with_lock(|state| {
            let value = op();
            state.exclusive_addresses[processor_id] = masked;
            state.exclusive_values[processor_id] = value.into();
            value
        })
    }

    /// Attempt the exclusive-store half of a LDREX/STREX pair.
    ///
    /// Returns true (and runs `op` with the snapshot value) only if
    /// `processor_id` still holds a reservation for `address`'s granule.
    /// On success every other processor's reservation for the granule is
    /// cleared before the lock is released.
    pub fn do_exclusive_operation<F>(&self, processor_id: usize, address: u64, op: F) -> bool
    where
        F: FnOnce(u128),
    {
        let masked = address & RESERVATION_GRANULE_MASK;
        self.with_lock(|state| {
            if state.exclusive_addresses[processor_id] != masked {
                return false;
            }
            let expected = state.exclusive_values[processor_id];
            op(expected);
            for (id, addr) in state.exclusive_addresses.iter_mut().enumerate() {
                if id == processor_id || *addr == masked {
                    *addr = INVALID_EXCLUSIVE_ADDRESS;
                }
            }
            true
        })
    }

    /// Invalidate reservations overlapping a granule written by a
    /// non-exclusive store (or by the host).
    pub fn clear_exclusive_address(&self, address: u64) {
        let masked = address & RESERVATION_GRANULE_MASK;
        self.with_lock(|state| {
            for addr in state.exclusive_addresses.iter_mut() {
                if *addr == masked {
                    *addr = INVALID_EXCLUSIVE_ADDRESS;
                }
            }
        });
    }

    /// Drop one processor's reservation (CLREX).
    pub fn clear_processor(&self, processor_id: usize) {
        self.with_lock(|state| {
            state.exclusive_addresses[processor_id] = INVALID_EXCLUSIVE_ADDRESS;
        });
    }

    /// Drop every reservation.
    pub fn clear(&self) {
        self.with_lock(|state| {
            for addr in state.exclusive_addresses.iter_mut() {
                *addr = INVALID_EXCLUSIVE_ADDRESS;
            }
        });
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut MonitorState) -> T) -> T {
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let result = f(unsafe { &mut *self.state.get() });
        self.lock.store(false, Ordering::Release);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn store_without_reservation_fails() {
        let monitor = ExclusiveMonitor::new(1);
        assert!(!monitor.do_exclusive_operation(0, 0x1000, |_| {}));
    }

    #[test]
    fn mark_then_store_succeeds_once() {
        let monitor = ExclusiveMonitor::new(1);
        let v: u32 = monitor.read_and_mark(0, 0x1000, || 7u32);
        assert_eq!(v, 7);
        assert!(monitor.do_exclusive_operation(0, 0x1000, |expected| {
            assert_eq!(expected, 7);
        }));
        // Reservation is consumed.
        assert!(!monitor.do_exclusive_operation(0, 0x1000, |_| {}));
    }

    #[test]
    fn intervening_store_clears_reservation() {
        let monitor = ExclusiveMonitor::new(2);
        let _: u32 = monitor.read_and_mark(0, 0x2000, || 1u32);
        // Processor 1 writes into the same granule.
        monitor.clear_exclusive_address(0x2004);
        assert!(!monitor.do_exclusive_operation(0, 0x2000, |_| {}));
    }

    #[test]
    fn granule_covers_adjacent_words() {
        let monitor = ExclusiveMonitor::new(1);
        let _: u32 = monitor.read_and_mark(0, 0x3000, || 0u32);
        // A write 8 bytes away is still inside the 16-byte granule.
        monitor.clear_exclusive_address(0x3008);
        assert!(!monitor.do_exclusive_operation(0, 0x3000, |_| {}));
    }

    #[test]
    fn successful_store_clears_other_processors() {
        let monitor = ExclusiveMonitor::new(2);
        let _: u32 = monitor.read_and_mark(0, 0x4000, || 0u32);
        let _: u32 = monitor.read_and_mark(1, 0x4000, || 0u32);
        assert!(monitor.do_exclusive_operation(0, 0x4000, |_| {}));
        assert!(!monitor.do_exclusive_operation(1, 0x4000, |_| {}));
    }

    #[test]
    fn concurrent_pairs_grant_one_winner() {
        let monitor = Arc::new(ExclusiveMonitor::new(4));
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|id| {
                let monitor = Arc::clone(&monitor);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    let mut wins = 0u32;
                    for _ in 0..1000 {
                        let seen: u32 =
                            monitor.read_and_mark(id, 0x8000, || counter.load(Ordering::SeqCst));
                        let ok = monitor.do_exclusive_operation(id, 0x8000, |expected| {
                            assert_eq!(expected as u32, seen);
                            counter.store(seen + 1, Ordering::SeqCst);
                        });
                        if ok {
                            wins += 1;
                        }
                    }
                    wins
                })
            })
            .collect();

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(counter.load(Ordering::SeqCst), total);
    }
}
