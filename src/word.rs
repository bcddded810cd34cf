//! Packed layouts for the single atomic word that carries lock ownership.
//!
//! Both spin based lock variants keep their entire shared state in one
//! lock-free `u64`, so that claiming a free lock is a single compare and
//! exchange and releasing it is a single store. The two variants pack the
//! word differently; both reserve owner id `0` for the unowned state.

/// Owner id in the high half, recursion depth in the low half.
///
/// A non-zero depth doubles as the lock bit. Fusing the depth into the
/// shared word makes the reentrant path a plain load plus a plain store,
/// at the price of contenders spinning on the same cache line the owner
/// keeps writing to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Fused {
    pub(crate) owner: u32,
    pub(crate) depth: u32,
}

impl Fused {
    /// Bit pattern of a free lock.
    pub(crate) const UNLOCKED: u64 = 0;

    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self { owner: (bits >> 32) as u32, depth: bits as u32 }
    }

    pub(crate) const fn into_bits(self) -> u64 {
        ((self.owner as u64) << 32) | self.depth as u64
    }
}

const LOCK_BIT: u64 = 1 << 31;
const METRIC_MASK: u64 = LOCK_BIT - 1;

/// Owner id in the high half, lock bit at bit 31, reentrancy metric below.
///
/// The recursion depth itself lives outside the word (owned by the current
/// holder), which frees the low bits for a saturating hint that estimates
/// the typical reentrancy depth seen on this lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Padded {
    pub(crate) owner: u32,
    pub(crate) locked: bool,
    pub(crate) metric: u32,
}

impl Padded {
    pub(crate) const fn from_bits(bits: u64) -> Self {
        Self {
            owner: (bits >> 32) as u32,
            locked: bits & LOCK_BIT != 0,
            metric: (bits & METRIC_MASK) as u32,
        }
    }

    pub(crate) const fn into_bits(self) -> u64 {
        let lock = if self.locked { LOCK_BIT } else { 0 };
        let metric = self.metric as u64 & METRIC_MASK;
        ((self.owner as u64) << 32) | lock | metric
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Fused, Padded};

    #[test]
    fn fused_free_word_is_zero() {
        let free = Fused { owner: 0, depth: 0 };
        assert_eq!(free.into_bits(), Fused::UNLOCKED);
        assert_eq!(Fused::from_bits(Fused::UNLOCKED), free);
    }

    #[test]
    fn fused_owner_and_depth_do_not_overlap() {
        let held = Fused { owner: u32::MAX, depth: 3 };
        assert_eq!(Fused::from_bits(held.into_bits()), held);
    }

    #[test]
    fn padded_metric_is_masked_to_31_bits() {
        let word = Padded { owner: 7, locked: true, metric: u32::MAX };
        let read = Padded::from_bits(word.into_bits());
        assert_eq!(read.owner, 7);
        assert!(read.locked);
        assert_eq!(read.metric, (1 << 31) - 1);
    }

    #[test]
    fn padded_lock_bit_is_independent_of_metric() {
        let word = Padded { owner: 1, locked: false, metric: 42 };
        let read = Padded::from_bits(word.into_bits());
        assert!(!read.locked);
        assert_eq!(read.metric, 42);
    }
}
