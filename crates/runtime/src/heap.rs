//! The object pool and its collector.
//!
//! Strings, arrays, and dictionaries live in slots of a pool indexed by
//! [`Handle`]. Values only ever carry handles, so the collector is a plain
//! mark-and-sweep: mark everything reachable from the roots (live frames,
//! the global symbol table, host pins), sweep the rest. Collection runs on
//! an allocation-count threshold and only between instructions, never while
//! an operator is mid-mutation.
//!
//! Host code that holds a `Value` across calls pins its handle with
//! [`Heap::retain`]; pinned slots survive sweeps until released. Cycles
//! between arrays and dictionaries are collected like everything else.

use crate::value::{Handle, Value};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// Collection is considered once this many allocations have happened since
/// the previous sweep.
pub const GC_ALLOC_THRESHOLD: usize = 1024;

/// An insertion-ordered string-keyed map.
///
/// Lookup is O(1) expected through the side index; iteration follows
/// insertion order through the entry list. Removal is O(n) to keep the
/// order dense, which matches how small these tables are in practice.
#[derive(Debug, Default, Clone)]
pub struct Dict {
    entries: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.index.get(key).map(|&i| self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or update, preserving the original position on update.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].1 = value;
        } else {
            let key: Rc<str> = Rc::from(key);
            self.index.insert(key.clone(), self.entries.len());
            self.entries.push((key, value));
        }
    }

    /// Remove a key, shifting later entries down one position.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let i = self.index.remove(key)?;
        let (_, value) = self.entries.remove(i);
        for (k, _) in &self.entries[i..] {
            if let Some(slot) = self.index.get_mut(k) {
                *slot -= 1;
            }
        }
        Some(value)
    }

    pub fn key_at(&self, i: usize) -> Option<&str> {
        self.entries.get(i).map(|(k, _)| k.as_ref())
    }

    pub fn val_at(&self, i: usize) -> Option<Value> {
        self.entries.get(i).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), *v))
    }

    fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.iter().map(|(_, v)| *v)
    }
}

/// A pooled object.
#[derive(Debug)]
pub enum HeapObject {
    Str(Box<str>),
    Array(Vec<Value>),
    Dict(Dict),
}

#[derive(Debug)]
struct Slot {
    obj: HeapObject,
    marked: bool,
    /// Host pin count; a pinned slot is a GC root.
    pins: u32,
}

/// Pool statistics the host can read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects currently alive.
    pub live: usize,
    /// Total allocations over the pool's lifetime.
    pub allocated_total: u64,
    /// Completed collections.
    pub collections: u64,
    /// Objects freed by the most recent sweep.
    pub last_sweep_freed: usize,
}

#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
    allocs_since_gc: usize,
    stats: HeapStats,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    pub fn alloc_str(&mut self, s: impl Into<Box<str>>) -> Value {
        Value::Str(self.insert(HeapObject::Str(s.into())))
    }

    pub fn alloc_array(&mut self) -> Value {
        Value::Array(self.insert(HeapObject::Array(Vec::new())))
    }

    pub fn alloc_array_from(&mut self, items: Vec<Value>) -> Value {
        Value::Array(self.insert(HeapObject::Array(items)))
    }

    pub fn alloc_dict(&mut self) -> Value {
        Value::Dict(self.insert(HeapObject::Dict(Dict::default())))
    }

    fn insert(&mut self, obj: HeapObject) -> Handle {
        self.allocs_since_gc += 1;
        self.stats.allocated_total += 1;
        self.stats.live += 1;
        let slot = Slot { obj, marked: false, pins: 0 };
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(slot);
                Handle(i)
            }
            None => {
                self.slots.push(Some(slot));
                Handle((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, h: Handle) -> &HeapObject {
        &self.slots[h.index()].as_ref().expect("live handle").obj
    }

    pub fn get_mut(&mut self, h: Handle) -> &mut HeapObject {
        &mut self.slots[h.index()].as_mut().expect("live handle").obj
    }

    pub fn str_at(&self, h: Handle) -> &str {
        match self.get(h) {
            HeapObject::Str(s) => s,
            other => panic!("string handle points at {other:?}"),
        }
    }

    /// Pin a value's heap object so it survives collections while the host
    /// holds it. Primitives are ignored.
    pub fn retain(&mut self, value: Value) {
        if let Some(h) = value.handle() {
            if let Some(slot) = self.slots[h.index()].as_mut() {
                slot.pins += 1;
            }
        }
    }

    /// Drop one pin. Releasing an unpinned value is a host bug and ignored.
    pub fn release(&mut self, value: Value) {
        if let Some(h) = value.handle() {
            if let Some(slot) = self.slots[h.index()].as_mut() {
                slot.pins = slot.pins.saturating_sub(1);
            }
        }
    }

    /// Whether enough allocations have happened to justify a collection.
    pub fn wants_collection(&self) -> bool {
        self.allocs_since_gc >= GC_ALLOC_THRESHOLD
    }

    /// Mark-and-sweep over the pool. `roots` must cover every value the
    /// mutator can still reach: frame registers and the global symbol
    /// table. Pinned slots are roots implicitly.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) {
        let mut worklist: Vec<Handle> = Vec::new();
        for value in roots {
            if let Some(h) = value.handle() {
                worklist.push(h);
            }
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                if slot.pins > 0 {
                    worklist.push(Handle(i as u32));
                }
            }
        }

        while let Some(h) = worklist.pop() {
            let Some(slot) = self.slots[h.index()].as_mut() else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            match &slot.obj {
                HeapObject::Str(_) => {}
                HeapObject::Array(items) => {
                    worklist.extend(items.iter().filter_map(Value::handle));
                }
                HeapObject::Dict(dict) => {
                    worklist.extend(dict.values().filter_map(|v| v.handle()));
                }
            }
        }

        let mut freed = 0;
        for (i, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => slot.marked = false,
                Some(_) => {
                    *entry = None;
                    self.free.push(i as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        self.stats.live -= freed;
        self.stats.collections += 1;
        self.stats.last_sweep_freed = freed;
        self.allocs_since_gc = 0;
        debug!(freed, live = self.stats.live, "swept heap");
    }

    /// Number of live objects (test support; `stats().live` for hosts).
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dict_preserves_insertion_order() {
        let mut d = Dict::default();
        d.set("b", Value::Int(1));
        d.set("a", Value::Int(2));
        d.set("c", Value::Int(3));
        d.set("a", Value::Int(9)); // update keeps position
        let keys: Vec<&str> = (0..d.len()).filter_map(|i| d.key_at(i)).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(d.get("a"), Some(Value::Int(9)));
    }

    #[test]
    fn dict_remove_keeps_index_consistent() {
        let mut d = Dict::default();
        for (i, k) in ["w", "x", "y", "z"].iter().enumerate() {
            d.set(k, Value::Int(i as i32));
        }
        assert_eq!(d.remove("x"), Some(Value::Int(1)));
        assert_eq!(d.remove("x"), None);
        assert_eq!(d.len(), 3);
        assert_eq!(d.get("y"), Some(Value::Int(2)));
        assert_eq!(d.get("z"), Some(Value::Int(3)));
        assert_eq!(d.key_at(1), Some("y"));
    }

    #[test]
    fn collect_frees_unreachable_objects() {
        let mut heap = Heap::new();
        let kept = heap.alloc_str("kept");
        let _dropped = heap.alloc_str("dropped");
        assert_eq!(heap.live_count(), 2);
        heap.collect([kept]);
        assert_eq!(heap.live_count(), 1);
        assert_eq!(heap.str_at(kept.handle().unwrap()), "kept");
    }

    #[test]
    fn collect_traces_through_containers() {
        let mut heap = Heap::new();
        let inner = heap.alloc_str("inner");
        let arr = heap.alloc_array();
        if let HeapObject::Array(items) = heap.get_mut(arr.handle().unwrap()) {
            items.push(inner);
        }
        let dict = heap.alloc_dict();
        if let HeapObject::Dict(d) = heap.get_mut(dict.handle().unwrap()) {
            d.set("a", arr);
        }
        heap.collect([dict]);
        assert_eq!(heap.live_count(), 3);
        heap.collect([]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn collect_reclaims_cycles() {
        let mut heap = Heap::new();
        let a = heap.alloc_array();
        let d = heap.alloc_dict();
        if let HeapObject::Array(items) = heap.get_mut(a.handle().unwrap()) {
            items.push(d);
        }
        if let HeapObject::Dict(dict) = heap.get_mut(d.handle().unwrap()) {
            dict.set("back", a);
        }
        assert_eq!(heap.live_count(), 2);
        heap.collect([a]);
        assert_eq!(heap.live_count(), 2);
        heap.collect([]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn pinned_objects_survive_and_release() {
        let mut heap = Heap::new();
        let v = heap.alloc_str("pinned");
        heap.retain(v);
        heap.collect([]);
        assert_eq!(heap.live_count(), 1);
        heap.release(v);
        heap.collect([]);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn pinned_containers_keep_children_alive() {
        let mut heap = Heap::new();
        let s = heap.alloc_str("child");
        let arr = heap.alloc_array_from(vec![s]);
        heap.retain(arr);
        heap.collect([]);
        assert_eq!(heap.live_count(), 2);
    }

    #[test]
    fn slots_are_reused_after_sweep() {
        let mut heap = Heap::new();
        let first = heap.alloc_str("one");
        let h = first.handle().unwrap();
        heap.collect([]);
        let second = heap.alloc_str("two");
        assert_eq!(second.handle().unwrap(), h);
    }

    #[test]
    fn stats_track_allocations_and_sweeps() {
        let mut heap = Heap::new();
        let keep = heap.alloc_str("keep");
        heap.alloc_str("waste");
        heap.collect([keep]);
        let stats = heap.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.allocated_total, 2);
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.last_sweep_freed, 1);
    }
}
