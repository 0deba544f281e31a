//! The collector-managed heap: arenas for `Array` and `Map` bodies, each
//! slot carrying the tri-color mark bit the collector needs (§4.6).
//!
//! `String` bodies are plain `Rc<str>` (no cycle through a string is
//! possible, since a string holds no `Value`s) and `Closure` bodies are
//! plain `Rc<ClosureObj>` — see DESIGN.md for why ordinary refcounting is
//! sufficient there and only `Array`/`Map` need real mark-sweep tracing.

use std::rc::{Rc, Weak};

use crate::valuemap::ValueMap;
use crate::value::{ClosureObj, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Color {
    White,
    Gray,
    Black,
}

enum Slot<T> {
    Live { color: Color, data: T },
    Free,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena { slots: Vec::new(), free: Vec::new() }
    }
}

impl<T> Arena<T> {
    pub fn alloc(&mut self, data: T) -> usize {
        let slot = Slot::Live { color: Color::White, data };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    pub fn get(&self, idx: usize) -> &T {
        match &self.slots[idx] {
            Slot::Live { data, .. } => data,
            Slot::Free => panic!("corvus_vm: use of freed heap slot {idx}"),
        }
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut T {
        match &mut self.slots[idx] {
            Slot::Live { data, .. } => data,
            Slot::Free => panic!("corvus_vm: use of freed heap slot {idx}"),
        }
    }

    pub fn color(&self, idx: usize) -> Color {
        match &self.slots[idx] {
            Slot::Live { color, .. } => *color,
            Slot::Free => Color::White,
        }
    }

    pub fn set_color(&mut self, idx: usize, color: Color) {
        if let Slot::Live { color: c, .. } = &mut self.slots[idx] {
            *c = color;
        }
    }

    pub fn is_live(&self, idx: usize) -> bool {
        matches!(self.slots[idx], Slot::Live { .. })
    }

    pub fn free(&mut self, idx: usize) {
        self.slots[idx] = Slot::Free;
        self.free.push(idx);
    }

    pub fn live_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.slots.len()).filter(move |&i| self.is_live(i))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Default)]
pub struct Heap {
    pub arrays: Arena<Vec<Value>>,
    pub maps: Arena<ValueMap>,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    pub fn alloc_array(&mut self, values: Vec<Value>) -> usize {
        self.arrays.alloc(values)
    }

    pub fn alloc_map(&mut self, map: ValueMap) -> usize {
        self.maps.alloc(map)
    }

    pub fn object_count(&self) -> usize {
        self.arrays.live_indices().count() + self.maps.live_indices().count()
    }

    /// Marks `v` gray if it is a white heap reference, pushing it onto the
    /// gray worklist for `drain_gray` to trace later (§4.6 steps 1-2).
    /// Closures become black the moment they're seen and are never traced
    /// into directly — their promoted upvalue arrays are kept alive via
    /// `Strays` instead (step 4), since `Closure` bodies live outside this
    /// arena (see the module doc comment for why).
    pub fn mark_root(&mut self, v: &Value, gray: &mut Vec<GrayItem>) {
        match v {
            Value::Array(a) => self.mark_array(a.0, gray),
            Value::Map(m) => self.mark_map(m.0, gray),
            _ => {}
        }
    }

    fn mark_array(&mut self, idx: usize, gray: &mut Vec<GrayItem>) {
        if self.arrays.color(idx) == Color::White {
            self.arrays.set_color(idx, Color::Gray);
            gray.push(GrayItem::Arr(idx));
        }
    }

    fn mark_map(&mut self, idx: usize, gray: &mut Vec<GrayItem>) {
        if self.maps.color(idx) == Color::White {
            self.maps.set_color(idx, Color::Gray);
            gray.push(GrayItem::Map(idx));
        }
    }

    /// Drains the gray worklist, blackening each object after tracing the
    /// values it holds (§4.6 step 3).
    pub fn drain_gray(&mut self, gray: &mut Vec<GrayItem>) {
        while let Some(item) = gray.pop() {
            match item {
                GrayItem::Arr(idx) => {
                    let elems = self.arrays.get(idx).clone();
                    for v in &elems {
                        self.mark_root(v, gray);
                    }
                    self.arrays.set_color(idx, Color::Black);
                }
                GrayItem::Map(idx) => {
                    let entries: Vec<(Value, Value)> = self.maps.get(idx).iter().cloned().collect();
                    for (k, v) in &entries {
                        self.mark_root(k, gray);
                        self.mark_root(v, gray);
                    }
                    self.maps.set_color(idx, Color::Black);
                }
            }
        }
    }

    /// Frees every still-white slot, then resets the survivors back to
    /// white for the next cycle (§4.6 step 5).
    pub fn sweep(&mut self) {
        let dead: Vec<usize> = self.arrays.live_indices().filter(|&i| self.arrays.color(i) == Color::White).collect();
        for i in dead {
            self.arrays.free(i);
        }
        let survivors: Vec<usize> = self.arrays.live_indices().collect();
        for i in survivors {
            self.arrays.set_color(i, Color::White);
        }

        let dead: Vec<usize> = self.maps.live_indices().filter(|&i| self.maps.color(i) == Color::White).collect();
        for i in dead {
            self.maps.free(i);
        }
        let survivors: Vec<usize> = self.maps.live_indices().collect();
        for i in survivors {
            self.maps.set_color(i, Color::White);
        }
    }
}

pub enum GrayItem {
    Arr(usize),
    Map(usize),
}

/// Keeps a promoted upvalue array (§4.5 "Return and escape") alive for
/// exactly as long as some closure that actually captured it is reachable.
///
/// The spec frames this bookkeeping as a `ValueMap` keyed by the closure.
/// Closures here are plain `Rc`, not arena slots with a mark bit (see the
/// module doc comment), so "is the key still white" doesn't have a literal
/// answer — a `Weak` handle plays the same role: `upgrade()` fails exactly
/// when the last strong `Rc` to the closure is gone, which is the same
/// liveness question the spec's wording is after. See DESIGN.md.
///
/// Ownership is recorded at capture time (`Op::Cl`, against the actual
/// upvalue cell each new closure receives), not guessed later from whatever
/// happens to be on the stack when the cell is promoted — a cell's owners
/// are exactly the closures that `Op::Cl` built around it.
#[derive(Default)]
pub struct Strays {
    entries: Vec<StrayEntry>,
}

struct StrayEntry {
    /// Identity of the upvalue cell this entry tracks (`Rc::as_ptr` of the
    /// `UpvalueCell`), stable for the cell's whole lifetime regardless of
    /// how many closures come to hold a clone of the `Rc`.
    cell_key: usize,
    owners: Vec<Weak<ClosureObj>>,
    /// Set once the cell is promoted (`Op::Cls`/`Op::Ret`); `None` while
    /// the cell is still open and aliasing a live stack slot.
    array_idx: Option<ArrayRefLike>,
}

/// A plain index into `Heap::arrays`, duplicated here to avoid a cyclic
/// dependency between `heap` and `value`.
pub type ArrayRefLike = usize;

impl Strays {
    pub fn new() -> Self {
        Strays::default()
    }

    /// Registers `closure` as an owner of `cell`, at the moment the closure
    /// captures it (`Op::Cl`). Sibling closures capturing the same open
    /// local each call this against the same cell and are recorded as
    /// independent owners.
    pub fn register_owner(&mut self, cell: &crate::value::UpvalueCell, closure: &Rc<ClosureObj>) {
        let key = Rc::as_ptr(cell) as usize;
        let owner = Rc::downgrade(closure);
        if let Some(entry) = self.entries.iter_mut().find(|e| e.cell_key == key) {
            entry.owners.push(owner);
        } else {
            self.entries.push(StrayEntry { cell_key: key, owners: vec![owner], array_idx: None });
        }
    }

    /// Attaches the heap array `cell` was just promoted to. No-op if `cell`
    /// was never registered (it had no owning closures, so nothing needs to
    /// keep the array alive beyond the promotion that just happened).
    pub fn record_promotion(&mut self, cell: &crate::value::UpvalueCell, array_idx: usize) {
        let key = Rc::as_ptr(cell) as usize;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.cell_key == key) {
            entry.array_idx = Some(array_idx);
        }
    }

    /// Drops entries with no surviving owner, and marks the arrays of
    /// entries that still have one gray (§4.6 step 4).
    pub fn sweep_and_mark(&mut self, heap: &mut Heap, gray: &mut Vec<GrayItem>) {
        self.entries.retain(|e| e.owners.iter().any(|w| w.strong_count() > 0));
        for e in &self.entries {
            if let Some(idx) = e.array_idx {
                heap.mark_array(idx, gray);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
