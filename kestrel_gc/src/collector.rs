//! Trial-deletion cycle collector.
//!
//! Reference counting frees everything except cycles. The collector keeps a
//! weak registry of container objects and, on demand, finds the groups of
//! tracked objects that are kept alive only by each other.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  COLLECTION                                                         │
//! │                                                                     │
//! │  1. snapshot   gc_refs = strong_count - 1 (minus the snapshot ref)  │
//! │  2. subtract   for each tracked edge a -> b:  gc_refs[b] -= 1       │
//! │  3. mark       gc_refs > 0 is externally held; flood reachability   │
//! │  4. clear      unmarked objects drop their references               │
//! │  5. release    snapshot handles drop, freeing the cycle             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! References held by untracked objects look external, so anything they
//! reach survives. Tracking is therefore an optimization knob, never a
//! correctness requirement for the objects left out.

use kestrel_core::{Trace, Tracer, address_of};
use log::debug;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::hash_map::Entry;
use std::rc::{Rc, Weak};

/// Result of a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    /// Live tracked objects examined.
    pub examined: usize,
    /// Objects found unreachable and cleared.
    pub unreachable: usize,
    /// Registry entries whose object had already been freed.
    pub pruned: usize,
}

/// Weak registry of traceable objects plus the cycle search over it.
#[derive(Default)]
pub struct CycleCollector {
    tracked: FxHashMap<usize, Weak<dyn Trace>>,
    collections: u64,
}

/// Edge sink that records only edges into the tracked set.
struct EdgeCollector<'a> {
    index: &'a FxHashMap<usize, usize>,
    edges: SmallVec<[usize; 16]>,
}

impl Tracer for EdgeCollector<'_> {
    #[inline]
    fn trace_address(&mut self, address: usize) {
        if let Some(&i) = self.index.get(&address) {
            self.edges.push(i);
        }
    }
}

impl CycleCollector {
    /// Create an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `obj`. Tracking twice is a no-op.
    pub fn track<T: Trace + 'static>(&mut self, obj: &Rc<T>) {
        let weak = Rc::downgrade(obj);
        let weak: Weak<dyn Trace> = weak;
        // A dead entry at this address belonged to a freed allocation.
        match self.tracked.entry(address_of(obj)) {
            Entry::Occupied(mut slot) => {
                if slot.get().strong_count() == 0 {
                    slot.insert(weak);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(weak);
            }
        }
    }

    /// Stop tracking `obj`.
    pub fn untrack<T: ?Sized>(&mut self, obj: &Rc<T>) {
        self.tracked.remove(&address_of(obj));
    }

    /// Whether `obj` is tracked.
    #[must_use]
    pub fn is_tracked<T: ?Sized>(&self, obj: &Rc<T>) -> bool {
        self.tracked.contains_key(&address_of(obj))
    }

    /// Registry size, including entries not yet pruned.
    #[inline]
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Number of collections run so far.
    #[inline]
    #[must_use]
    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// Find and break unreachable cycles among tracked objects.
    pub fn collect(&mut self) -> CollectStats {
        let mut stats = CollectStats::default();
        self.collections += 1;

        // Snapshot: one strong handle per live tracked object.
        let mut live: Vec<Rc<dyn Trace>> = Vec::with_capacity(self.tracked.len());
        let mut index: FxHashMap<usize, usize> = FxHashMap::default();
        self.tracked.retain(|&addr, weak| match weak.upgrade() {
            Some(strong) => {
                index.insert(addr, live.len());
                live.push(strong);
                true
            }
            None => {
                stats.pruned += 1;
                false
            }
        });
        stats.examined = live.len();

        let mut gc_refs: Vec<isize> = live
            .iter()
            .map(|obj| Rc::strong_count(obj) as isize - 1)
            .collect();

        let mut edges: Vec<SmallVec<[usize; 16]>> = Vec::with_capacity(live.len());
        for obj in &live {
            let mut sink = EdgeCollector {
                index: &index,
                edges: SmallVec::new(),
            };
            obj.trace(&mut sink);
            for &target in &sink.edges {
                gc_refs[target] -= 1;
            }
            edges.push(sink.edges);
        }

        let mut reachable = vec![false; live.len()];
        let mut worklist: SmallVec<[usize; 32]> = SmallVec::new();
        for (i, &refs) in gc_refs.iter().enumerate() {
            debug_assert!(refs >= 0, "object traced more edges than it owns");
            if refs > 0 {
                reachable[i] = true;
                worklist.push(i);
            }
        }
        while let Some(i) = worklist.pop() {
            for &j in &edges[i] {
                if !reachable[j] {
                    reachable[j] = true;
                    worklist.push(j);
                }
            }
        }

        for (i, obj) in live.iter().enumerate() {
            if !reachable[i] {
                stats.unreachable += 1;
                obj.clear_refs();
            }
        }
        drop(live);

        if stats.unreachable > 0 {
            self.tracked.retain(|_, weak| weak.strong_count() > 0);
        }

        debug!(
            "cycle collection #{}: examined={} unreachable={} pruned={}",
            self.collections, stats.examined, stats.unreachable, stats.pruned
        );
        stats
    }
}

impl std::fmt::Debug for CycleCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CycleCollector")
            .field("tracked", &self.tracked.len())
            .field("collections", &self.collections)
            .finish()
    }
}
