//! Wait-free SPSC triple-buffer mailbox.
//!
//! Three equal byte slots rotate through the roles *active* (what the
//! reader saw last), *mailbox* (the handoff slot, full or empty) and
//! *free* (where the writer works). The complete role assignment plus
//! the mailbox-full flag is packed into a single `AtomicU8`, so both
//! sides synchronize on one word: commit and read are single
//! `compare_exchange` loops over precomputed 12-entry transition
//! tables. No operation blocks, allocates, or spins unboundedly.
//!
//! Caller contract, deliberately not enforced by the type: at most one
//! outstanding free-slot borrow at a time. Taking the free slot again
//! before committing silently abandons the previous uncommitted write.
//!
//! Accepted trade-off: the reader may observe a value that is stale by
//! one commit; a committed value that is overwritten before the next
//! read is never observed at all. Both are inherent to latest-value
//! semantics.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Role permutations, indexed by `state / 2`. Each entry is
/// `[active, mailbox, free]` slot indices.
const ROLES: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// `commit`: swap mailbox and free, set the full flag.
/// Indexed by state (`perm * 2 + full`).
const COMMIT: [u8; 12] = [3, 3, 1, 1, 7, 7, 5, 5, 11, 11, 9, 9];

/// `read`: if full, swap active and mailbox and clear the flag;
/// otherwise the state is unchanged. Indexed by state.
const READ: [u8; 12] = [0, 4, 2, 8, 4, 0, 6, 10, 8, 2, 10, 6];

#[inline]
const fn is_full(state: u8) -> bool {
    state & 1 == 1
}

#[inline]
const fn active_index(state: u8) -> usize {
    ROLES[(state / 2) as usize][0]
}

#[inline]
const fn free_index(state: u8) -> usize {
    ROLES[(state / 2) as usize][2]
}

// ─── Shared Core ────────────────────────────────────────────────────

struct Slot {
    bytes: UnsafeCell<Box<[u8]>>,
    /// Committed payload length, `<= capacity`.
    len: UnsafeCell<usize>,
}

struct Shared {
    /// Packed role permutation and mailbox-full flag.
    state: AtomicU8,
    /// Set once the first value has been committed; the reader's
    /// `latest` is meaningless before that.
    ever_committed: AtomicU8,
    slots: [Slot; 3],
    capacity: usize,
}

// SAFETY: slot contents are only touched through Writer (free slot) and
// Reader (active slot); the role permutation keeps those indices
// disjoint. Both sides exchange `state` with AcqRel: the writer's
// release publishes the payload to the reader, and the reader's release
// orders its last reads of a swapped-out slot before the writer reuses
// it as the free slot.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// Create a triple-buffer channel with three slots of `capacity` bytes
/// each. The two handles are the only writer and the only reader; the
/// single-producer/single-consumer discipline is enforced by ownership.
pub fn channel(capacity: usize) -> (Writer, Reader) {
    let slot = || Slot {
        bytes: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        len: UnsafeCell::new(0),
    };
    let shared = Arc::new(Shared {
        state: AtomicU8::new(0),
        ever_committed: AtomicU8::new(0),
        slots: [slot(), slot(), slot()],
        capacity,
    });
    (
        Writer {
            shared: Arc::clone(&shared),
        },
        Reader { shared },
    )
}

// ─── Writer ─────────────────────────────────────────────────────────

/// The producing half. Wait-free, allocation-free after construction.
pub struct Writer {
    shared: Arc<Shared>,
}

impl Writer {
    /// Slot capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Exclusive access to the free slot's full capacity. Calling this
    /// again before [`Writer::commit`] abandons whatever the previous
    /// borrow wrote.
    pub fn free_slot(&mut self) -> &mut [u8] {
        // Acquire pairs with the reader's release exchange: once a slot
        // the reader swapped out comes back to the free role, its reads
        // happen-before our writes into it.
        let state = self.shared.state.load(Ordering::Acquire);
        // SAFETY: only `commit` reassigns the free role and only this
        // writer commits, so the free slot is exclusively ours; the
        // &mut self receiver forbids a second live borrow.
        unsafe { &mut *self.shared.slots[free_index(state)].bytes.get() }
    }

    /// Publish the first `len` bytes of the free slot: atomically swap
    /// it with the mailbox slot and mark the mailbox full.
    ///
    /// # Panics
    /// In debug builds, if `len` exceeds the slot capacity.
    pub fn commit(&mut self, len: usize) {
        debug_assert!(len <= self.shared.capacity);
        let mut state = self.shared.state.load(Ordering::Acquire);
        // SAFETY: free slot is exclusively ours until the exchange below.
        unsafe { *self.shared.slots[free_index(state)].len.get() = len };
        loop {
            // AcqRel: the release half publishes the payload; the
            // acquire half (and the Acquire failure reload) orders the
            // reader's last reads of a recycled slot before our next
            // write into it.
            match self.shared.state.compare_exchange_weak(
                state,
                COMMIT[state as usize],
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                // The reader moved the flag or permutation; the free
                // index is unaffected, retry with the fresh state.
                Err(actual) => state = actual,
            }
        }
        self.shared.ever_committed.store(1, Ordering::Release);
    }

    /// Copy `bytes` into the free slot and commit in one step.
    ///
    /// Returns `false` without writing anything if `bytes` exceeds the
    /// slot capacity.
    pub fn write(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.shared.capacity {
            return false;
        }
        self.free_slot()[..bytes.len()].copy_from_slice(bytes);
        self.commit(bytes.len());
        true
    }
}

// ─── Reader ─────────────────────────────────────────────────────────

/// The consuming half. Wait-free, allocation-free.
pub struct Reader {
    shared: Arc<Shared>,
}

impl Reader {
    /// Take the latest committed value if one arrived since the last
    /// call; `None` means "no update". The returned slice stays valid
    /// until the next call on this reader.
    pub fn read_fresh(&mut self) -> Option<&[u8]> {
        let mut state = self.shared.state.load(Ordering::Acquire);
        loop {
            if !is_full(state) {
                return None;
            }
            match self.shared.state.compare_exchange_weak(
                state,
                READ[state as usize],
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let active = active_index(READ[state as usize]);
                    // SAFETY: the exchange moved the committed slot to
                    // the active role, which only this reader touches.
                    let (bytes, len) = unsafe {
                        (
                            &*self.shared.slots[active].bytes.get(),
                            *self.shared.slots[active].len.get(),
                        )
                    };
                    return Some(&bytes[..len]);
                }
                Err(actual) => state = actual,
            }
        }
    }

    /// The latest committed value, fresh or not. `None` until the first
    /// commit. Repeated calls without an intervening commit return the
    /// same slot (idempotent).
    pub fn latest(&mut self) -> Option<&[u8]> {
        if self.shared.ever_committed.load(Ordering::Acquire) == 0 {
            return None;
        }
        // Fold a pending mailbox value into the active role first.
        // Borrow-wise the fresh slice cannot be returned directly
        // alongside the fallback path, so re-derive the active slot.
        let _ = self.read_fresh();
        let state = self.shared.state.load(Ordering::Acquire);
        let active = active_index(state);
        // SAFETY: the active role is only touched by this reader.
        let (bytes, len) = unsafe {
            (
                &*self.shared.slots[active].bytes.get(),
                *self.shared.slots[active].len.get(),
            )
        };
        Some(&bytes[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Transition-table sanity: every state keeps the three roles a
    /// permutation of {0,1,2}, commit always sets the flag, read always
    /// clears it.
    #[test]
    fn transition_tables_exhaustive() {
        for state in 0u8..12 {
            let mut roles = ROLES[(state / 2) as usize];
            roles.sort_unstable();
            assert_eq!(roles, [0, 1, 2]);

            let committed = COMMIT[state as usize];
            assert!(is_full(committed));
            // Commit swaps mailbox and free, leaves active alone.
            assert_eq!(active_index(committed), active_index(state));
            assert_eq!(free_index(committed), ROLES[(state / 2) as usize][1]);

            let read = READ[state as usize];
            if is_full(state) {
                assert!(!is_full(read));
                // Read swaps active and mailbox, leaves free alone.
                assert_eq!(active_index(read), ROLES[(state / 2) as usize][1]);
                assert_eq!(free_index(read), free_index(state));
            } else {
                assert_eq!(read, state);
            }
        }
    }

    #[test]
    fn empty_mailbox_reports_no_update() {
        let (_w, mut r) = channel(8);
        assert!(r.read_fresh().is_none());
        assert!(r.latest().is_none());
    }

    #[test]
    fn committed_value_observed_once() {
        let (mut w, mut r) = channel(8);
        assert!(w.write(&1.5f64.to_le_bytes()));
        assert_eq!(r.read_fresh(), Some(&1.5f64.to_le_bytes()[..]));
        // Same value again is not "fresh".
        assert!(r.read_fresh().is_none());
    }

    #[test]
    fn latest_is_idempotent() {
        let (mut w, mut r) = channel(8);
        assert!(w.write(b"abc"));
        assert_eq!(r.latest(), Some(&b"abc"[..]));
        assert_eq!(r.latest(), Some(&b"abc"[..]));
        assert_eq!(r.latest(), Some(&b"abc"[..]));
    }

    #[test]
    fn overwrite_skips_intermediate_value() {
        let (mut w, mut r) = channel(8);
        assert!(w.write(b"first"));
        assert!(w.write(b"second"));
        // "first" was overwritten before the read and is gone.
        assert_eq!(r.read_fresh(), Some(&b"second"[..]));
        assert!(r.read_fresh().is_none());
    }

    #[test]
    fn uncommitted_write_is_abandoned() {
        let (mut w, mut r) = channel(8);
        w.free_slot()[..4].copy_from_slice(b"lost");
        // Taking the free slot again abandons the previous write.
        let slot = w.free_slot();
        slot[..4].copy_from_slice(b"kept");
        w.commit(4);
        assert_eq!(r.read_fresh(), Some(&b"kept"[..]));
    }

    #[test]
    fn oversized_write_rejected() {
        let (mut w, mut r) = channel(4);
        assert!(!w.write(b"too long"));
        assert!(r.read_fresh().is_none());
    }

    #[test]
    fn variable_lengths_preserved() {
        let (mut w, mut r) = channel(16);
        assert!(w.write(b"x"));
        assert_eq!(r.read_fresh(), Some(&b"x"[..]));
        assert!(w.write(b"longer payload!!"));
        assert_eq!(r.read_fresh(), Some(&b"longer payload!!"[..]));
    }

    /// A slot the reader swapped into the active role migrates back to
    /// the free role after two commits and gets rewritten. Interleaved
    /// reads across that full rotation must keep returning the exact
    /// committed image, never a stale or half-reused slot.
    #[test]
    fn recycled_read_slot_serves_later_writes() {
        let (mut w, mut r) = channel(8);

        // With three slots, four commits guarantee every physical slot
        // has been handed from reader back to writer at least once.
        for round in 0u64..16 {
            assert!(w.write(&round.to_le_bytes()));
            assert_eq!(r.read_fresh(), Some(&round.to_le_bytes()[..]));
            assert_eq!(r.latest(), Some(&round.to_le_bytes()[..]));
        }

        // Reader lags: two commits rotate its former active slot all
        // the way back into the free role before the next read.
        assert!(w.write(b"stale"));
        assert!(w.write(b"newer"));
        assert!(w.write(b"final"));
        assert_eq!(r.read_fresh(), Some(&b"final"[..]));
        assert!(r.read_fresh().is_none());
    }

    /// Two real threads hammer the channel; the reader must only ever
    /// observe complete committed images, in nondecreasing order.
    #[test]
    fn spsc_stress_no_torn_reads() {
        const WRITES: u64 = 100_000;
        let (mut w, mut r) = channel(core::mem::size_of::<u64>() * 2);

        let writer = std::thread::spawn(move || {
            for i in 0..WRITES {
                let mut image = [0u8; 16];
                image[..8].copy_from_slice(&i.to_le_bytes());
                // Mirror copy lets the reader detect a torn slot.
                image[8..].copy_from_slice(&i.to_le_bytes());
                assert!(w.write(&image));
            }
        });

        let mut last = 0u64;
        let mut observed = 0u64;
        while last != WRITES - 1 {
            if let Some(bytes) = r.read_fresh() {
                assert_eq!(bytes.len(), 16);
                let a = u64::from_le_bytes(bytes[..8].try_into().unwrap());
                let b = u64::from_le_bytes(bytes[8..].try_into().unwrap());
                assert_eq!(a, b, "torn read");
                assert!(a >= last, "went backwards: {a} < {last}");
                last = a;
                observed += 1;
            }
        }
        writer.join().unwrap();
        assert!(observed <= WRITES);
    }
}
