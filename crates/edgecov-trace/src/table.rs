//! The trace table: a fixed array of saturating edge-hit counters.
//!
//! Mirrors AFL's trace-bits scheme. Every instrumented basic block calls
//! `add_count(src, dst)` on entry; the driver later pulls a classified
//! snapshot through the endpoint and the table is zeroed for the next
//! execution.

use std::sync::OnceLock;

use parking_lot::RwLock;

/// Identifier of an instrumented basic block.
///
/// Generated pseudo-randomly at instrumentation time; collisions are
/// tolerated, the same way AFL tolerates bucket hash collisions.
pub type BlockId = u16;

/// Number of counters: one byte per possible edge key.
pub const TRACE_BITS_SIZE: usize = 1 << 16;

/// Saturating edge-hit counters behind a shared-exclusive lock.
///
/// The lock is coarse on purpose: the fuzz driver serializes workloads on
/// the instrumented process (one SQL statement at a time), so correctness
/// wins over contention. Writers (increment, classify, clean) take the
/// exclusive side; snapshot readers share.
pub struct TraceTable {
    bits: RwLock<Box<[u8; TRACE_BITS_SIZE]>>,
}

impl TraceTable {
    fn new() -> Self {
        Self {
            bits: RwLock::new(Box::new([0u8; TRACE_BITS_SIZE])),
        }
    }

    /// Record one traversal of the edge `src -> dst`.
    ///
    /// The key is `(src << 1) ^ dst`; the shift breaks the symmetry a
    /// plain XOR would create (`A->B` vs `B->A`, and self-edges hashing
    /// to zero). The counter saturates at 255 instead of wrapping.
    pub fn add_count(&self, src: BlockId, dst: BlockId) {
        let key = ((src << 1) ^ dst) as usize;
        let mut bits = self.bits.write();
        bits[key] = bits[key].saturating_add(1);
    }

    /// Raw counter value for the edge `src -> dst`.
    pub fn get_count(&self, src: BlockId, dst: BlockId) -> u8 {
        let key = ((src << 1) ^ dst) as usize;
        self.bits.read()[key]
    }

    /// Bucket every counter into {0, 1, 2, 4, 8, 16, 32, 64, 128} in place.
    ///
    /// Bucketing stabilizes the coverage fingerprint across runs: the
    /// driver compares snapshots byte-for-byte, and "hit 37 times" vs
    /// "hit 41 times" should not read as new coverage. Idempotent.
    pub fn classify_counts(&self) {
        let mut bits = self.bits.write();
        for b in bits.iter_mut() {
            *b = classify(*b);
        }
    }

    /// Snapshot (copy) of the whole counter array.
    pub fn get_bits(&self) -> Box<[u8; TRACE_BITS_SIZE]> {
        let bits = self.bits.read();
        Box::new(**bits)
    }

    /// Zero the whole counter array.
    pub fn clean(&self) {
        let mut bits = self.bits.write();
        bits.fill(0);
    }

    /// Classify, snapshot, and zero under a single exclusive acquisition.
    ///
    /// Used by the endpoint so a response never interleaves with in-flight
    /// increments: counts arriving while this runs land in the next epoch.
    pub fn classify_snapshot_reset(&self) -> Box<[u8; TRACE_BITS_SIZE]> {
        let mut bits = self.bits.write();
        for b in bits.iter_mut() {
            *b = classify(*b);
        }
        let snapshot = Box::new(**bits);
        bits.fill(0);
        snapshot
    }
}

/// Bucket a raw hit count.
///
/// Bucket values are fixed points, so classifying an already-classified
/// table changes nothing.
pub(crate) const fn classify(val: u8) -> u8 {
    match val {
        0..=2 => val,
        3..=4 => 4,
        5..=8 => 8,
        9..=16 => 16,
        17..=32 => 32,
        33..=127 => 64,
        _ => 128,
    }
}

static TRACE_TABLE: OnceLock<TraceTable> = OnceLock::new();

/// Process-wide trace table singleton, created lazily on first access.
///
/// Every operation goes through this accessor (including the C ABI used
/// by the cgo shim), so an uninitialized table is unrepresentable.
pub fn get_trace_table() -> &'static TraceTable {
    TRACE_TABLE.get_or_init(TraceTable::new)
}
