use crate::invariants::{debug_assert_arena_id, debug_assert_release_depth};
use crate::node::{
    TreeNode, INVALID_ID, MAX0_KEY, MAX1_KEY, MAX2_KEY, MIN0_KEY, MIN1_KEY,
};
use crate::ring_buffer::RingIndexBuffer;
use crate::CapacityError;
use std::sync::atomic::Ordering;

// =============================================================================
// HELP-OPTIMAL LOCK-FREE SEARCH TREE
// =============================================================================
//
// An external (leaf-oriented) BST over f64 keys. All values live in leaves;
// internal nodes are routing-only. Writers never lock and never retry a
// competitor's work: a structural change is a single CAS on one child link,
// and the two transient node shapes — "dead" (right child points to itself)
// and "splice" (key is MIN0, right child points at the node being bypassed)
// — let concurrent descents route *around* in-progress changes instead of
// helping them finish. The backtrack link on a dead or splice node names the
// ancestor at which a failed operation resumes its descent.
//
// ## Descent state
//
// Every mutating operation carries a 4-tuple of ids while descending:
//   ancestor  — deepest non-splice ancestor whose subtree was entered
//   successor — the child of that ancestor taken on descent
//   parent    — the leaf's immediate parent
//   child     — the leaf (or dead/splice node standing in for it)
// The fast path CASes `parent`'s link; the fallback re-routes at `ancestor`.
//
// ## Node ids and reclamation
//
// Nodes live in two arenas (leaf data nodes / routing nodes); ids carry the
// arena in their top bit and are recycled through two ring-index pools. The
// single-CAS discrimination plus the pools' cycle encoding make stale probes
// of a recycled node harmless: they fail their CAS and restart via backtrack.
//
// ## Ordering
//
// Child and backtrack reads are Acquire, node publications are Release
// stores followed by an AcqRel CAS that makes the node reachable; the key is
// written (Release) strictly before the publishing CAS.
//
// =============================================================================

/// Arena discriminator: set for data-node (leaf) ids.
const FLAG_BIT: u64 = 1 << 63;

/// Fixed depth of the release DFS; local rewrites never discard deeper
/// subtrees.
const RELEASE_STACK_DEPTH: usize = 8;

/// Key types accepted by the tree. Conversions must be order-preserving on
/// the caller's value range.
pub trait TreeKey: Copy {
    fn into_key(self) -> f64;
}

impl TreeKey for f64 {
    #[inline]
    fn into_key(self) -> f64 {
        self
    }
}

macro_rules! impl_tree_key {
    ($($ty:ty),*) => {
        $(impl TreeKey for $ty {
            #[inline]
            fn into_key(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_tree_key!(f32, i8, i16, i32, i64, u8, u16, u32, u64, usize);

/// Descent snapshot threaded through search, CAS, and backtrack.
#[derive(Clone, Copy)]
struct SearchIds {
    ancestor: u64,
    successor: u64,
    parent: u64,
    child: u64,
}

/// MPMC lock-free ordered set of `f64`-convertible keys.
///
/// `add` returns a stable per-key handle (the leaf's arena index) that stays
/// valid until the key is removed; callers use it as a dense scratch index.
/// User keys must be greater than the splice marker and strictly less than
/// the root scaffold keys, i.e. inside `(MIN1_KEY, MAX2_KEY)`.
pub struct SearchTree {
    free_data_nodes: RingIndexBuffer,
    free_non_data_nodes: RingIndexBuffer,
    data_nodes: Box<[TreeNode]>,
    non_data_nodes: Box<[TreeNode]>,
    c_root_id: u64,
    p_root_id: u64,
}

impl SearchTree {
    /// Creates a tree with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::default_capacity())
    }

    /// Creates a tree for at least `capacity` keys.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds [`capacity_max`](Self::capacity_max).
    pub fn with_capacity(capacity: usize) -> Self {
        let mut tree = Self {
            free_data_nodes: RingIndexBuffer::new(),
            free_non_data_nodes: RingIndexBuffer::new(),
            data_nodes: Box::new([]),
            non_data_nodes: Box::new([]),
            c_root_id: INVALID_ID,
            p_root_id: INVALID_ID,
        };
        assert!(
            capacity <= Self::capacity_max(),
            "capacity {capacity} exceeds the supported maximum"
        );
        tree.resize(capacity);
        tree
    }

    /// Default key capacity.
    #[inline]
    pub const fn default_capacity() -> usize {
        1024
    }

    /// The largest supported capacity.
    #[inline]
    pub const fn capacity_max() -> usize {
        1 << 60
    }

    /// Number of keys the tree can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data_nodes.len()
    }

    /// Number of keys present. Exact only on a quiescent tree.
    pub fn len(&self) -> usize {
        self.capacity() - self.free_data_nodes.len()
    }

    /// Returns `true` if no key is present. Exact only on a quiescent tree.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows the arenas to hold at least `capacity` keys and clears the
    /// tree. Not concurrency-safe.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), CapacityError> {
        if capacity > Self::capacity_max() {
            return Err(CapacityError {
                requested: capacity,
                max: Self::capacity_max(),
            });
        }
        self.resize(capacity);
        Ok(())
    }

    /// Removes every key. Not concurrency-safe.
    pub fn clear(&mut self) {
        self.free_data_nodes.full();
        self.free_non_data_nodes.full();
        self.initialize();
    }

    // ---------------------------------------------------------------------
    // OPERATIONS
    // ---------------------------------------------------------------------

    /// Checks key membership. Lock-free, never blocks, never restarts.
    pub fn contains<K: TreeKey>(&self, value: K) -> bool {
        let key = value.into_key();
        let mut node_id = self.c_root_id;
        while !self.is_leaf_node(node_id) {
            let node = self.node(node_id);
            let is_left = key < node.key();
            node_id = node.child(is_left).load(Ordering::Acquire);
        }

        let node = self.node(node_id);
        key == node.key() && !self.is_dead_node(node_id)
    }

    /// Returns the least present key, or `None` on an empty tree.
    pub fn find_min(&self) -> Option<f64> {
        let mut ids = self.initial_ids();
        self.search_leaf(MIN0_KEY, &mut ids);
        let key = self.node(ids.child).key();
        (key < MAX2_KEY).then_some(key)
    }

    /// Inserts `value`. Returns `(true, handle)` on insertion or
    /// `(false, existing_handle)` when the key was already present; the
    /// handle is the leaf's arena index and is stable until removal.
    pub fn add<K: TreeKey>(&self, value: K) -> (bool, u64) {
        let key = value.into_key();
        debug_assert!(
            MIN1_KEY < key && key < MAX2_KEY,
            "key {key} collides with a reserved key"
        );

        let mut ids = self.initial_ids();
        let mut node_id = INVALID_ID;
        let mut node_id_tmp = INVALID_ID;
        let mut inner_id = INVALID_ID;
        let mut splice_id = INVALID_ID;
        let mut sibling_id = INVALID_ID;
        let mut found_id = INVALID_ID;
        let mut is_added = false;
        while !is_added {
            self.search_leaf(key, &mut ids);
            if !self.is_dead_node(ids.child) {
                let next_id = self.ref_node_id(ids.child);
                let next = self.node(next_id);
                if key == next.key() {
                    found_id = next_id;
                    break;
                }

                // Build leaf + routing node, then try the parent link first
                // (unhelped fast path) and the ancestor re-route second.
                self.make_leaf_node(key, &mut node_id);
                let inner_key = inner_node_key(next.key(), key);
                let is_node_left = key < next.key();
                self.make_inner_node(inner_key, node_id, next_id, is_node_left, &mut inner_id);
                node_id_tmp = inner_id;
                let child_is_splice = self.node(ids.child).is_splice();
                if !child_is_splice
                    && self.cas_child(ids.parent, key, ids.child, &mut node_id_tmp, true)
                {
                    is_added = true;
                    node_id_tmp = INVALID_ID;
                } else if self.cas_child(ids.ancestor, key, ids.successor, &mut node_id_tmp, true)
                {
                    is_added = true;
                    sibling_id = next_id;
                }
                if is_added {
                    inner_id = INVALID_ID;
                }
            } else {
                self.make_leaf_node(key, &mut node_id);
                if !self.has_backtrack(ids.child, None) {
                    node_id_tmp = node_id;
                    is_added = self.cas_child(ids.parent, key, ids.child, &mut node_id_tmp, true);
                } else {
                    // The leaf position is being torn down: finish the
                    // detachment with a splice, then route around it.
                    sibling_id =
                        self.append_splice_node(ids.parent, key, ids.ancestor, &mut splice_id);
                    sibling_id = self.ref_node_id(sibling_id);
                    if self.is_dead_node(sibling_id) {
                        node_id_tmp = node_id;
                        is_added =
                            self.cas_child(ids.ancestor, key, ids.successor, &mut node_id_tmp, true);
                        if splice_id == sibling_id {
                            self.release_nodes(splice_id, INVALID_ID);
                        }
                    } else {
                        let parent_key = self.node(ids.parent).key();
                        let inner_key = inner_node_key(parent_key, key);
                        let is_node_left = key < self.node(sibling_id).key();
                        self.make_inner_node(
                            inner_key,
                            node_id,
                            sibling_id,
                            is_node_left,
                            &mut inner_id,
                        );
                        node_id_tmp = inner_id;
                        is_added =
                            self.cas_child(ids.ancestor, key, ids.successor, &mut node_id_tmp, true);
                        if is_added {
                            inner_id = INVALID_ID;
                        }
                    }
                    if splice_id == sibling_id {
                        splice_id = INVALID_ID;
                    }
                }
            }
            if !is_added {
                self.backtrack(key, &mut ids);
                node_id_tmp = INVALID_ID;
                sibling_id = INVALID_ID;
            }
        }
        if found_id != INVALID_ID {
            // Key already present: recycle the tentative leaf (it was never
            // published) and hand back the live leaf's index.
            self.release_node(node_id);
            node_id = found_id;
        }
        self.release_nodes(node_id_tmp, sibling_id);
        self.release_node(inner_id);
        self.release_node(splice_id);
        (is_added, node_index(node_id))
    }

    /// Removes `value`. Returns whether a removal actually occurred.
    pub fn remove<K: TreeKey>(&self, value: K) -> bool {
        let key = value.into_key();
        debug_assert!(
            MIN1_KEY < key && key < MAX2_KEY,
            "key {key} collides with a reserved key"
        );

        let mut ids = self.initial_ids();
        let mut marked_id = INVALID_ID;
        let mut marked_id_tmp = INVALID_ID;
        let mut dead_id = INVALID_ID;
        let mut sibling_id = INVALID_ID;
        let mut sibling_id_tmp = INVALID_ID;
        let mut splice_id = INVALID_ID;
        let mut mode = true;
        let mut is_removed = false;
        while !is_removed {
            self.search_leaf(key, &mut ids);
            if mode {
                // Phase 1: mark the leaf dead and detach its parent level.
                let next_id = self.ref_node_id(ids.child);
                if key != self.node(next_id).key() || self.is_dead_node(ids.child) {
                    break;
                }

                let child = self.node(ids.child);
                if child.right().load(Ordering::Acquire) == INVALID_ID
                    && ids.parent != ids.ancestor
                {
                    self.make_dead_node(key, &mut marked_id, ids.ancestor);
                    marked_id_tmp = marked_id;
                    if self.cas_child(ids.parent, key, ids.child, &mut marked_id_tmp, true) {
                        mode = false;
                        sibling_id =
                            self.append_splice_node(ids.parent, key, ids.ancestor, &mut splice_id);
                        if self.is_dead_node(sibling_id) {
                            self.make_dead_node(key, &mut dead_id, INVALID_ID);
                            self.cas_child(ids.ancestor, key, ids.successor, &mut dead_id, true);
                            is_removed = true;
                            if splice_id == sibling_id {
                                self.release_nodes(splice_id, INVALID_ID);
                            }
                        } else if self.node(sibling_id).is_splice() {
                            is_removed = true;
                        } else {
                            sibling_id_tmp = sibling_id;
                            is_removed = self.cas_child(
                                ids.ancestor,
                                key,
                                ids.successor,
                                &mut sibling_id_tmp,
                                true,
                            );
                        }
                        if splice_id == sibling_id {
                            splice_id = INVALID_ID;
                        }
                    }
                } else {
                    self.make_dead_node(key, &mut dead_id, INVALID_ID);
                    is_removed = self.cas_child(ids.ancestor, key, ids.successor, &mut dead_id, true);
                }
            } else {
                // Phase 2: the leaf is marked; verify the structural CAS
                // still needs finishing (a helper may have beaten us).
                is_removed = ids.child != marked_id || ids.parent == ids.ancestor;
                if !is_removed {
                    sibling_id_tmp = sibling_id;
                    is_removed =
                        self.cas_child(ids.ancestor, key, ids.successor, &mut sibling_id_tmp, true);
                }
            }
            if !is_removed {
                self.backtrack(key, &mut ids);
                sibling_id_tmp = INVALID_ID;
            }
        }
        self.release_nodes(marked_id_tmp, INVALID_ID);
        self.release_nodes(dead_id, INVALID_ID);
        self.release_nodes(sibling_id_tmp, sibling_id);
        self.release_node(splice_id);
        is_removed
    }

    // ---------------------------------------------------------------------
    // DESCENT
    // ---------------------------------------------------------------------

    /// Starting ids below the two-level root scaffold.
    fn initial_ids(&self) -> SearchIds {
        let parent = self.c_root_id;
        let child = self.node(parent).left().load(Ordering::Acquire);
        SearchIds {
            ancestor: self.p_root_id,
            successor: self.c_root_id,
            parent,
            child,
        }
    }

    /// Descends to the leaf position for `key`, maintaining the 4-tuple.
    /// A splice node swaps in its bypass target as the parent without
    /// consuming an ancestor level.
    fn search_leaf(&self, key: f64, ids: &mut SearchIds) {
        while !self.is_leaf_node(ids.child) {
            let child = self.node(ids.child);
            if child.is_splice() {
                ids.parent = child.right().load(Ordering::Acquire);
            } else {
                ids.ancestor = ids.parent;
                ids.successor = ids.child;
                ids.parent = ids.child;
            }
            let parent = self.node(ids.parent);
            let is_left = key < parent.key();
            ids.child = parent.child(is_left).load(Ordering::Acquire);
        }
    }

    /// Climbs from the recorded ancestor until a link without a backtrack
    /// marker is found, refreshing the 4-tuple for a restart.
    fn backtrack(&self, key: f64, ids: &mut SearchIds) {
        loop {
            let ancestor = self.node(ids.ancestor);
            let is_left = key < ancestor.key();
            ids.successor = ancestor.child(is_left).load(Ordering::Acquire);
            if !self.has_backtrack(ids.successor, Some(&mut ids.ancestor)) {
                break;
            }
        }
        ids.parent = ids.ancestor;
        ids.child = ids.successor;
    }

    /// CAS one child link of `node_id` from `cmp_id` to `*new_id`. On
    /// success `*new_id` is replaced with the displaced id so the caller
    /// can recycle the detached subtree. With `left_on_less` the link is
    /// chosen by descent direction; otherwise the sibling side is taken.
    fn cas_child(
        &self,
        node_id: u64,
        key: f64,
        cmp_id: u64,
        new_id: &mut u64,
        left_on_less: bool,
    ) -> bool {
        let node = self.node(node_id);
        let is_left = if left_on_less {
            key < node.key()
        } else {
            !(key < node.key())
        };
        let child = node.child(is_left);
        if child.load(Ordering::Acquire) != cmp_id {
            return false;
        }
        let swapped = child
            .compare_exchange(cmp_id, *new_id, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            *new_id = cmp_id;
        }
        swapped
    }

    /// Installs a splice over the sibling link of `node_id`, or returns the
    /// sibling directly when it already carries a backtrack marker. `*splice_id`
    /// is the reusable scratch allocation; after a successful install it holds
    /// the displaced sibling id.
    fn append_splice_node(
        &self,
        node_id: u64,
        key: f64,
        backtrack_id: u64,
        splice_id: &mut u64,
    ) -> u64 {
        let node = self.node(node_id);
        let is_left = !(key < node.key());

        let mut sibling_id = INVALID_ID;
        while sibling_id == INVALID_ID {
            let sib_id = node.child(is_left).load(Ordering::Acquire);
            if self.has_backtrack(sib_id, None) {
                sibling_id = sib_id;
            } else {
                let sibling_key = self.node(sib_id).key();
                self.make_splice_node(sibling_key, sib_id, backtrack_id, splice_id);
                if self.cas_child(node_id, key, sib_id, splice_id, false) {
                    sibling_id = sib_id;
                }
            }
        }
        sibling_id
    }

    // ---------------------------------------------------------------------
    // NODE CONSTRUCTION
    // ---------------------------------------------------------------------

    fn make_leaf_node(&self, key: f64, id: &mut u64) {
        if *id == INVALID_ID {
            let node_id = self.issue_data_node_id();
            let node = self.node(node_id);
            node.left().store(INVALID_ID, Ordering::Release);
            node.right().store(INVALID_ID, Ordering::Release);
            node.backtrack().store(INVALID_ID, Ordering::Release);
            *id = node_id;
        }
        self.node(*id).set_key(key);
    }

    fn make_inner_node(
        &self,
        key: f64,
        node1_id: u64,
        node2_id: u64,
        is_node1_left: bool,
        id: &mut u64,
    ) {
        if *id == INVALID_ID {
            let node_id = self.issue_non_data_node_id();
            self.node(node_id)
                .backtrack()
                .store(INVALID_ID, Ordering::Release);
            *id = node_id;
        }
        let node = self.node(*id);
        node.set_key(key);
        node.child(is_node1_left).store(node1_id, Ordering::Release);
        node.child(!is_node1_left).store(node2_id, Ordering::Release);
    }

    /// A dead node is its own right child; `backtrack_id` names the
    /// ancestor the marking operation resumes from.
    fn make_dead_node(&self, key: f64, id: &mut u64, backtrack_id: u64) {
        if *id == INVALID_ID {
            let node_id = self.issue_non_data_node_id();
            self.node(node_id)
                .left()
                .store(INVALID_ID, Ordering::Release);
            *id = node_id;
        }
        let node = self.node(*id);
        node.set_key(key);
        node.right().store(*id, Ordering::Release);
        node.backtrack().store(backtrack_id, Ordering::Release);
    }

    /// A splice node bypasses `node_id`: descent through it re-routes to
    /// `node_id` without consuming a level. Splicing a dead node degrades
    /// to a dead marker.
    fn make_splice_node(&self, key: f64, node_id: u64, backtrack_id: u64, id: &mut u64) {
        if self.is_dead_node(node_id) {
            self.make_dead_node(key, id, backtrack_id);
            return;
        }

        if *id == INVALID_ID {
            *id = self.issue_non_data_node_id();
        }
        let node = self.node(*id);
        node.set_key(MIN0_KEY);
        let child_id = self.node(node_id).left().load(Ordering::Acquire);
        node.left().store(child_id, Ordering::Release);
        node.right().store(node_id, Ordering::Release);
        node.backtrack().store(backtrack_id, Ordering::Release);
    }

    /// Root-scaffold leaf holding a reserved key.
    fn make_special_node(&self, key: f64, id: &mut u64) {
        if *id == INVALID_ID {
            let node_id = self.issue_non_data_node_id();
            let node = self.node(node_id);
            node.left().store(INVALID_ID, Ordering::Release);
            node.right().store(INVALID_ID, Ordering::Release);
            node.backtrack().store(INVALID_ID, Ordering::Release);
            *id = node_id;
        }
        self.node(*id).set_key(key);
    }

    // ---------------------------------------------------------------------
    // ID MANAGEMENT
    // ---------------------------------------------------------------------

    fn issue_data_node_id(&self) -> u64 {
        let index = self.free_data_nodes.dequeue(true);
        debug_assert_arena_id!(index, self.data_nodes.len());
        index | FLAG_BIT
    }

    fn issue_non_data_node_id(&self) -> u64 {
        let index = self.free_non_data_nodes.dequeue(true);
        debug_assert_arena_id!(index, self.non_data_nodes.len());
        index
    }

    fn release_node(&self, id: u64) {
        if id == INVALID_ID {
            return;
        }

        // Release marker: a recycled node read through a stale id shows a
        // key no live node can carry.
        #[cfg(debug_assertions)]
        self.node(id).set_key(MIN1_KEY);

        let index = node_index(id);
        if is_data_node(id) {
            self.free_data_nodes.enqueue(index, true);
        } else {
            self.free_non_data_nodes.enqueue(index, true);
        }
    }

    /// Recycles a detached subtree, skipping `excluded_id` (a node that was
    /// re-linked elsewhere). Bounded DFS: local rewrites never discard
    /// deeper structures.
    fn release_nodes(&self, id: u64, excluded_id: u64) {
        let mut stack = [INVALID_ID; RELEASE_STACK_DEPTH];
        let mut n = 0usize;
        if id != INVALID_ID && id != excluded_id {
            stack[n] = id;
            n += 1;
        }
        while n > 0 {
            n -= 1;
            let node_id = stack[n];
            let node = self.node(node_id);
            {
                let r_child_id = node.right().load(Ordering::Acquire);
                let is_dead = node_id == r_child_id;
                if !is_dead && r_child_id != INVALID_ID && r_child_id != excluded_id {
                    stack[n] = r_child_id;
                    n += 1;
                }
            }
            if !node.is_splice() {
                let l_child_id = node.left().load(Ordering::Acquire);
                if l_child_id != INVALID_ID && l_child_id != excluded_id {
                    stack[n] = l_child_id;
                    n += 1;
                }
            }
            debug_assert_release_depth!(n, RELEASE_STACK_DEPTH);
            self.release_node(node_id);
        }
    }

    // ---------------------------------------------------------------------
    // NODE ACCESS & PREDICATES
    // ---------------------------------------------------------------------

    fn node(&self, id: u64) -> &TreeNode {
        let index = node_index(id) as usize;
        if is_data_node(id) {
            &self.data_nodes[index]
        } else {
            &self.non_data_nodes[index]
        }
    }

    /// A splice stands in for the node it bypasses.
    fn ref_node_id(&self, id: u64) -> u64 {
        let node = self.node(id);
        if node.is_splice() {
            node.right().load(Ordering::Acquire)
        } else {
            id
        }
    }

    fn has_backtrack(&self, id: u64, backtrack_id: Option<&mut u64>) -> bool {
        let bt_id = self.node(id).backtrack().load(Ordering::Acquire);
        let result = bt_id != INVALID_ID;
        if result {
            if let Some(out) = backtrack_id {
                *out = bt_id;
            }
        }
        result
    }

    fn is_dead_node(&self, id: u64) -> bool {
        id == self.node(id).right().load(Ordering::Acquire)
    }

    fn is_leaf_node(&self, id: u64) -> bool {
        self.node(id).left().load(Ordering::Acquire) == INVALID_ID
    }

    // ---------------------------------------------------------------------
    // SETUP
    // ---------------------------------------------------------------------

    fn resize(&mut self, capacity: usize) {
        const MIN_CAPACITY: usize = 3;
        let cap_pow2 = capacity.max(MIN_CAPACITY).next_power_of_two();
        if self.capacity() < cap_pow2 && cap_pow2 <= Self::capacity_max() {
            self.data_nodes = new_arena(cap_pow2);
            self.non_data_nodes = new_arena(cap_pow2 << 2);
            self.free_data_nodes.set_size(cap_pow2 << 1);
            self.free_non_data_nodes.set_size(cap_pow2 << 3);
        }
        self.free_data_nodes.full();
        self.free_non_data_nodes.full();
        self.initialize();
    }

    /// Builds the two-level root scaffold: `p_root -> c_root -> (MAX2, MAX1)`
    /// with a `MAX0` leaf on the protected side. User keys all route into
    /// the `MAX2` position.
    fn initialize(&mut self) {
        // Contended root
        {
            let mut node1_id = INVALID_ID;
            self.make_special_node(MAX2_KEY, &mut node1_id);

            let mut node2_id = INVALID_ID;
            self.make_special_node(MAX1_KEY, &mut node2_id);

            let mut c_root_id = INVALID_ID;
            self.make_inner_node(MAX1_KEY, node1_id, node2_id, true, &mut c_root_id);
            self.c_root_id = c_root_id;
        }

        // Protected root
        {
            let mut node2_id = INVALID_ID;
            self.make_special_node(MAX0_KEY, &mut node2_id);

            let mut p_root_id = INVALID_ID;
            self.make_inner_node(MAX0_KEY, self.c_root_id, node2_id, true, &mut p_root_id);
            self.p_root_id = p_root_id;
        }
    }
}

impl Default for SearchTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Routing key of a fresh internal node: the midpoint of the two leaves it
/// separates. Used only for descent direction, never compared for equality.
#[inline]
fn inner_node_key(key1: f64, key2: f64) -> f64 {
    0.5 * key1 + 0.5 * key2
}

fn new_arena(len: usize) -> Box<[TreeNode]> {
    let mut arena = Vec::with_capacity(len);
    arena.resize_with(len, TreeNode::new);
    arena.into_boxed_slice()
}

#[inline]
fn is_data_node(id: u64) -> bool {
    id & FLAG_BIT == FLAG_BIT
}

#[inline]
fn node_index(id: u64) -> u64 {
    id & !FLAG_BIT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree() {
        let tree = SearchTree::new();
        assert_eq!(tree.capacity(), 1024);
        assert!(tree.is_empty());
        assert!(!tree.contains(1.0));
        assert_eq!(tree.find_min(), None);
        assert!(!tree.remove(1.0));
    }

    #[test]
    fn test_add_contains_remove() {
        let tree = SearchTree::new();
        let (inserted, _) = tree.add(10.0);
        assert!(inserted);
        assert!(tree.contains(10.0));
        assert!(!tree.contains(11.0));
        assert!(tree.remove(10.0));
        assert!(!tree.contains(10.0));
        assert!(!tree.remove(10.0));
    }

    #[test]
    fn test_duplicate_add_returns_same_handle() {
        let tree = SearchTree::new();
        let (inserted, handle) = tree.add(5.0);
        assert!(inserted);
        let (inserted_again, handle_again) = tree.add(5.0);
        assert!(!inserted_again);
        assert_eq!(handle, handle_again);

        // The handle becomes reusable after a remove.
        assert!(tree.remove(5.0));
        let (inserted, _) = tree.add(5.0);
        assert!(inserted);
    }

    #[test]
    fn test_find_min_tracks_least_key() {
        let tree = SearchTree::new();
        for key in [7.0, 3.0, 9.0, 5.0] {
            tree.add(key);
        }
        assert_eq!(tree.find_min(), Some(3.0));
        assert!(tree.remove(3.0));
        assert_eq!(tree.find_min(), Some(5.0));
        assert!(tree.remove(5.0));
        assert!(tree.remove(7.0));
        assert_eq!(tree.find_min(), Some(9.0));
        assert!(tree.remove(9.0));
        assert_eq!(tree.find_min(), None);
    }

    #[test]
    fn test_integer_keys() {
        let tree = SearchTree::new();
        for id in 0..100i64 {
            let (inserted, _) = tree.add(id);
            assert!(inserted);
        }
        assert_eq!(tree.find_min(), Some(0.0));
        for id in 0..50i64 {
            assert!(tree.remove(id));
        }
        assert_eq!(tree.find_min(), Some(50.0));
        assert_eq!(tree.len(), 50);
    }

    #[test]
    fn test_clear_makes_tree_reusable() {
        let mut tree = SearchTree::new();
        for key in [1.0, 2.0, 3.0] {
            tree.add(key);
        }
        tree.clear();
        assert!(tree.is_empty());
        assert!(!tree.contains(1.0));
        let (inserted, _) = tree.add(2.0);
        assert!(inserted);
    }

    #[test]
    fn test_set_capacity_limit() {
        let mut tree = SearchTree::new();
        assert!(tree.set_capacity(SearchTree::capacity_max() + 1).is_err());
        assert!(tree.set_capacity(2048).is_ok());
        assert_eq!(tree.capacity(), 2048);
    }

    #[test]
    fn test_id_reuse_over_many_cycles() {
        let tree = SearchTree::with_capacity(4);
        for round in 0..10_000 {
            let key = f64::from(round % 7);
            let (inserted, _) = tree.add(key);
            assert!(inserted, "round {round}");
            assert!(tree.remove(key), "round {round}");
        }
        assert!(tree.is_empty());
    }
}
