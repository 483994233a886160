use std::sync::atomic::{AtomicU64, Ordering};

/// Id that refers to no node.
pub const INVALID_ID: u64 = u64::MAX;

/// Splice-marker key: a node keyed `MIN0` re-routes descent past an
/// in-progress structural change.
pub const MIN0_KEY: f64 = f64::NEG_INFINITY;

/// Debug-only release marker written into a node when its id returns to
/// the pool; one ulp above [`MIN0_KEY`].
pub const MIN1_KEY: f64 = f64::from_bits(f64::NEG_INFINITY.to_bits() - 1);

/// Protected-root key.
pub const MAX0_KEY: f64 = f64::MAX;

/// Contended-root key; one ulp below [`MAX0_KEY`].
pub const MAX1_KEY: f64 = f64::from_bits(f64::MAX.to_bits() - 1);

/// Upper bound scaffold key; user keys are strictly below this by contract.
pub const MAX2_KEY: f64 = f64::from_bits(f64::MAX.to_bits() - 2);

/// Key of a node whose arena slot is unoccupied.
pub const INVALID_KEY: f64 = f64::INFINITY;

/// One tree node: a key and three id links.
///
/// Node kinds are discriminated by key and link state alone, never by a tag,
/// so a single CAS on one link both performs and announces a structural
/// change:
/// - leaf: `left == INVALID_ID`
/// - splice: `key == MIN0_KEY`
/// - dead: `right == own id`
///
/// The key is stored as its bit pattern in an atomic because arena slots are
/// recycled while stale readers may still probe them; the publishing CAS in
/// the tree is what orders key writes before visibility.
#[repr(align(32))]
pub struct TreeNode {
    key: AtomicU64,
    left: AtomicU64,
    right: AtomicU64,
    backtrack: AtomicU64,
}

impl TreeNode {
    pub fn new() -> Self {
        Self {
            key: AtomicU64::new(INVALID_KEY.to_bits()),
            left: AtomicU64::new(INVALID_ID),
            right: AtomicU64::new(INVALID_ID),
            backtrack: AtomicU64::new(INVALID_ID),
        }
    }

    #[inline]
    pub fn key(&self) -> f64 {
        f64::from_bits(self.key.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_key(&self, key: f64) {
        self.key.store(key.to_bits(), Ordering::Release);
    }

    #[inline]
    pub fn left(&self) -> &AtomicU64 {
        &self.left
    }

    #[inline]
    pub fn right(&self) -> &AtomicU64 {
        &self.right
    }

    /// Child link selected by descent direction.
    #[inline]
    pub fn child(&self, is_left: bool) -> &AtomicU64 {
        if is_left {
            &self.left
        } else {
            &self.right
        }
    }

    #[inline]
    pub fn backtrack(&self) -> &AtomicU64 {
        &self.backtrack
    }

    #[inline]
    pub fn is_splice(&self) -> bool {
        self.key() == MIN0_KEY
    }
}

impl Default for TreeNode {
    fn default() -> Self {
        Self::new()
    }
}
