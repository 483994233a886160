use crate::invariants::{
    debug_assert_index_range, debug_assert_population, debug_assert_threshold,
};
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This is a bounded MPMC index allocator built on the scalable circular queue
// scheme: for a usable capacity of N indices the buffer owns 2N atomic cells,
// each packing a generation counter ("cycle") and a slot value into one u64.
//
// ## Cell encoding
//
// A cell holds `cycle ^ (index ^ (N2 - 1))` where `N2` is the cell count and
// `cycle = (position << 1) | (2 * N2 - 1)`. The all-ones value (`u64::MAX`)
// is the empty marker: under the wrapping signed comparison used throughout,
// it reads as a cycle from the infinite past, so any producer may claim it.
// A consumed cell keeps its cycle with the low index bits forced to ones.
//
// ## ABA prevention
//
// `head` and `tail` are unbounded u64 positions; the cycle embedded in each
// cell disambiguates which lap a value belongs to. All position comparisons
// go through a wrapping signed difference, so the scheme survives the (in
// practice unreachable) wrap of the position counters.
//
// ## Memory ordering protocol
//
// Every load of `head`, `tail`, `threshold`, or a cell is `Acquire`; every
// store is `Release`; every RMW is `AcqRel`. No relaxed operations appear on
// the operational paths: an index dequeued here hands out exclusive ownership
// of an external slot, and the Acquire/Release pairing on the cell CAS is
// what carries that ownership between threads.
//
// ## Cache-line permutation
//
// Logical positions are scattered over the cell array through a fixed bit
// permutation so that consecutive positions land on distinct cache lines.
// The permutation changes throughput, never correctness.
//
// =============================================================================

/// Empty-dequeue marker. Never a valid index.
pub const INVALID_INDEX: u64 = u64::MAX;

/// Returned by a `nonempty` dequeue that found no element; signals
/// queue-full to the caller that reserved the slot.
pub const OVERFLOW_INDEX: u64 = u64::MAX - 1;

/// Cache line size the cell permutation is derived from.
pub const CACHE_LINE_SIZE: u64 = 64;

const ATTEMPT_MASK: u32 = (1 << 8) - 1;
const ATTEMPT_MAX: u32 = 1 << 12;

/// MPMC lock-free ring of `u64` indices.
///
/// The buffer is an allocator as much as a queue: `full()` preloads it with
/// every usable index so that `dequeue(true)` acts as "allocate an index"
/// and `enqueue(i, true)` as "return it". Paired empty/full buffers build
/// [`BoundedQueue`](crate::BoundedQueue); standalone full buffers feed the
/// node-id pools of [`SearchTree`](crate::SearchTree).
pub struct RingIndexBuffer {
    /// Consumer position (shared, contended).
    head: CachePadded<AtomicU64>,
    /// Emptiness hint: negative means certainly empty.
    threshold: CachePadded<AtomicI64>,
    /// Producer position (shared, contended).
    tail: CachePadded<AtomicU64>,
    /// `2N` cells; the live state is fully described by the atomics.
    cells: Box<[AtomicU64]>,
}

impl RingIndexBuffer {
    /// Creates an empty buffer with no cells; call [`set_size`](Self::set_size)
    /// before use.
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            threshold: CachePadded::new(AtomicI64::new(-1)),
            tail: CachePadded::new(AtomicU64::new(0)),
            cells: Box::new([]),
        }
    }

    /// Creates a buffer with `cells` atomic cells, initially empty.
    pub fn with_cells(cells: usize) -> Self {
        let mut buffer = Self::new();
        buffer.set_size(cells);
        buffer
    }

    // ---------------------------------------------------------------------
    // CAPACITY & STATUS
    // ---------------------------------------------------------------------

    /// The largest supported cell count.
    #[inline]
    pub const fn capacity_max() -> usize {
        1 << 62
    }

    /// Number of atomic cells (twice the usable capacity).
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Number of usable indices, i.e. half the cell count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cells.len() >> 1
    }

    /// Current live population: enqueued indices not yet dequeued.
    pub fn len(&self) -> usize {
        let h = self.head.load(Ordering::Acquire);
        let t = self.tail.load(Ordering::Acquire);
        if h < t {
            (t - h) as usize
        } else {
            0
        }
    }

    /// Returns `true` if no index is currently enqueued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reallocates the cell array. `cells` must be zero or a power of two
    /// below [`capacity_max`](Self::capacity_max). Not concurrency-safe.
    pub fn set_size(&mut self, cells: usize) {
        debug_assert!(
            cells == 0 || cells.is_power_of_two(),
            "cell count {cells} is not a power of two"
        );
        debug_assert!(cells < Self::capacity_max());
        let mut buffer = Vec::with_capacity(cells);
        buffer.resize_with(cells, || AtomicU64::new(INVALID_INDEX));
        self.cells = buffer.into_boxed_slice();
        self.clear();
    }

    // ---------------------------------------------------------------------
    // STATE PRELOADS
    // ---------------------------------------------------------------------

    /// Resets to the empty state.
    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(INVALID_INDEX, Ordering::Release);
        }
        self.head.store(0, Ordering::Release);
        self.threshold.store(-1, Ordering::Release);
        self.tail.store(0, Ordering::Release);
    }

    /// Preloads logical positions `[s, e)` with the indices `s..e`.
    /// Positions before `s` read as already consumed.
    pub fn fill(&self, s: u64, e: u64) {
        let n = self.cells.len() as u64;
        debug_assert!(e <= n, "fill end {e} exceeds the cell count {n}");
        debug_assert!(s <= e, "fill start {s} is past the end {e}");
        let half = n >> 1;
        debug_assert_population!((e - s) as usize, self.capacity());

        for i in 0..n {
            let index = self.permute_index(i);
            let v = if i < s {
                2 * n - 1
            } else if i < e {
                n + i
            } else {
                INVALID_INDEX
            };
            self.cell(index).store(v, Ordering::Release);
        }

        self.head.store(s, Ordering::Release);
        self.threshold
            .store(Self::threshold3(half), Ordering::Release);
        self.tail.store(e, Ordering::Release);
    }

    /// Preloads every usable index `0..capacity()`, in permuted order.
    /// This is the id-pool initial state.
    pub fn full(&self) {
        let n = self.cells.len() as u64;
        let half = n >> 1;

        for i in 0..n {
            let index = self.permute_index(i);
            let v = if i < half {
                Self::permute_impl(n + i, self.order(), half)
            } else {
                INVALID_INDEX
            };
            self.cell(index).store(v, Ordering::Release);
        }

        self.head.store(0, Ordering::Release);
        self.threshold
            .store(Self::threshold3(half), Ordering::Release);
        self.tail.store(half, Ordering::Release);
    }

    // ---------------------------------------------------------------------
    // OPERATIONS
    // ---------------------------------------------------------------------

    /// Publishes `index` at the tail. Spins until it wins a cell CAS; the
    /// caller guarantees fewer than `capacity()` live entries, which is what
    /// bounds the spin. `nonempty` marks an enqueue that immediately follows
    /// a reserved slot (the queue's free-list return path); it skips the
    /// threshold refresh that would otherwise republish non-emptiness.
    pub fn enqueue(&self, index: u64, nonempty: bool) -> bool {
        debug_assert_index_range!(index, self.capacity());
        let mut tailp = 0u64;
        let mut tail_cycle = 0u64;
        let mut tail_index = 0u64;
        let mut entry = 0u64;
        let mut retry = false;
        loop {
            let n = self.cells.len() as u64;
            if !retry {
                tailp = self.tail.fetch_add(1, Ordering::AcqRel);
                tail_cycle = (tailp << 1) | (2 * n - 1);
                tail_index = self.permute_index(tailp);
                entry = self.cell(tail_index).load(Ordering::Acquire);
            }
            retry = false;
            let entry_cycle = entry | (2 * n - 1);
            // A cell is claimable when its cycle is behind ours and it is
            // either consumed-at-its-cycle or still unsafe-but-unreachable
            // (no consumer can be parked on it once head trails our tail).
            if wrapping_lt(entry_cycle, tail_cycle)
                && ((entry == entry_cycle)
                    || (entry == (entry_cycle ^ n)
                        && wrapping_le(self.head.load(Ordering::Acquire), tailp)))
            {
                let entry_index = index ^ (n - 1);
                match self.cell(tail_index).compare_exchange_weak(
                    entry,
                    tail_cycle ^ entry_index,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Err(current) => {
                        entry = current;
                        retry = true;
                    }
                    Ok(_) => {
                        let half = n >> 1;
                        let threshold3 = Self::threshold3(half);
                        if !nonempty && self.threshold.load(Ordering::Acquire) != threshold3 {
                            self.threshold.store(threshold3, Ordering::Release);
                        }
                        return true;
                    }
                }
            }
        }
    }

    /// Removes and returns the head index.
    ///
    /// With `nonempty == false` this is the queue-consumer path: it returns
    /// [`INVALID_INDEX`] when the buffer was observed empty and never blocks.
    /// With `nonempty == true` it is the allocator path: the caller believes
    /// an index must exist, so the operation keeps claiming positions until
    /// one yields — except that a tail at or behind head is reported as
    /// [`OVERFLOW_INDEX`] without touching `head`, which is how "queue full"
    /// surfaces to the slot-reserving caller.
    pub fn dequeue(&self, nonempty: bool) -> u64 {
        let mut index = INVALID_INDEX;
        let mut headp = 0u64;
        let mut tailp = 0u64;
        let mut head_cycle = 0u64;
        let mut head_index = 0u64;
        let mut attempt = 0u32;
        let mut flag = nonempty || self.threshold.load(Ordering::Acquire) >= 0;
        let mut again = false;

        // Cautious dequeue: never let an allocator caller drive head past
        // tail chasing an index that is not there.
        if nonempty {
            let h = self.head.load(Ordering::Acquire);
            let t = self.tail.load(Ordering::Acquire);
            if wrapping_le(t, h) {
                flag = false;
                index = OVERFLOW_INDEX;
            }
        }

        while flag {
            let n = self.cells.len() as u64;
            if !again {
                headp = self.head.fetch_add(1, Ordering::AcqRel);
                head_cycle = (headp << 1) | (2 * n - 1);
                head_index = self.permute_index(headp);
                attempt = 0;
            }
            again = false;
            let mut entry = self.cell(head_index).load(Ordering::Acquire);
            loop {
                let entry_cycle = entry | (2 * n - 1);
                flag = entry_cycle != head_cycle;
                if !flag {
                    // Cycle matches: consume by forcing the index bits on.
                    self.cell(head_index).fetch_or(n - 1, Ordering::AcqRel);
                    index = entry & (n - 1);
                    break;
                }
                let entry_new = if (entry | n) != entry_cycle {
                    // Stale occupied cell: strip the unsafe bit so a lapped
                    // producer can reclaim it.
                    let stripped = entry & !n;
                    if entry == stripped {
                        break;
                    }
                    stripped
                } else {
                    // Empty at an old cycle. Bounded retry: re-read tail
                    // every 256 attempts, give up after 4096 and mark the
                    // position consumed-empty instead.
                    if attempt & ATTEMPT_MASK == 0 {
                        tailp = self.tail.load(Ordering::Acquire);
                    }
                    attempt += 1;
                    again = attempt <= ATTEMPT_MAX && wrapping_ge(tailp, headp.wrapping_add(1));
                    if again {
                        break;
                    }
                    head_cycle ^ (!entry & n)
                };
                if !wrapping_lt(entry_cycle, head_cycle) {
                    break;
                }
                match self.cell(head_index).compare_exchange_weak(
                    entry,
                    entry_new,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break,
                    Err(current) => entry = current,
                }
            }
            if flag && !again && !nonempty {
                tailp = self.tail.load(Ordering::Acquire);
                flag = wrapping_gt(tailp, headp.wrapping_add(1));
                if flag {
                    flag = self.threshold.fetch_sub(1, Ordering::AcqRel) > 0;
                    if !flag {
                        index = INVALID_INDEX;
                    }
                } else {
                    self.catch_up(tailp, headp.wrapping_add(1));
                    self.threshold.fetch_sub(1, Ordering::AcqRel);
                    index = INVALID_INDEX;
                }
            }
        }
        index
    }

    // ---------------------------------------------------------------------
    // INTERNALS
    // ---------------------------------------------------------------------

    #[inline]
    fn cell(&self, index: u64) -> &AtomicU64 {
        &self.cells[index as usize]
    }

    /// log2 of the usable capacity.
    fn order(&self) -> u64 {
        let o = u64::BITS - ((self.cells.len() as u64) >> 1).leading_zeros();
        u64::from(o.saturating_sub(1))
    }

    #[inline]
    fn threshold3(half: u64) -> i64 {
        debug_assert_threshold!(3 * half as i64 - 1, half);
        3 * half as i64 - 1
    }

    /// Restores tail monotonicity after a consumer observed `tail <= head`.
    fn catch_up(&self, mut tailp: u64, mut headp: u64) {
        while let Err(_current) = self.tail.compare_exchange_weak(
            tailp,
            headp,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            headp = self.head.load(Ordering::Acquire);
            tailp = self.tail.load(Ordering::Acquire);
            if wrapping_ge(tailp, headp) {
                break;
            }
        }
    }

    #[inline]
    fn permute_index(&self, index: u64) -> u64 {
        Self::permute_impl(index, self.order() + 1, self.cells.len() as u64)
    }

    /// Spreads consecutive logical positions across cache lines: the low
    /// `shift` bits select the slot within a line, the rest select the line.
    fn permute_impl(index: u64, o: u64, n: u64) -> u64 {
        debug_assert!(n.is_power_of_two(), "cell count {n} is not a power of two");
        const DATA_SIZE: u64 = std::mem::size_of::<AtomicU64>() as u64;
        const SHIFT: u64 = if DATA_SIZE < CACHE_LINE_SIZE {
            (CACHE_LINE_SIZE.ilog2() - DATA_SIZE.ilog2()) as u64
        } else {
            0
        };

        let mut i = index;
        if SHIFT < o {
            let upper = index << SHIFT;
            let lower = (index & (n - 1)) >> (o - SHIFT);
            i = upper | lower;
        }
        i & (n - 1)
    }
}

impl Default for RingIndexBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn wrapping_lt(lhs: u64, rhs: u64) -> bool {
    (lhs.wrapping_sub(rhs) as i64) < 0
}

#[inline]
fn wrapping_le(lhs: u64, rhs: u64) -> bool {
    (lhs.wrapping_sub(rhs) as i64) <= 0
}

#[inline]
fn wrapping_gt(lhs: u64, rhs: u64) -> bool {
    (lhs.wrapping_sub(rhs) as i64) > 0
}

#[inline]
fn wrapping_ge(lhs: u64, rhs: u64) -> bool {
    (lhs.wrapping_sub(rhs) as i64) >= 0
}
