//! Two-generation mark-and-sweep heap.
//!
//! Objects are born in the nursery; surviving one nursery collection moves
//! them, unmarked, to the retirement home, which is itself collected only
//! when full. The collector is the sole owner of every object: values hold
//! arena indices ([`ObjRef`]), never pointers, so cyclic object graphs are
//! representable without ownership gymnastics.

use crate::object::{Closure, Function, HeapObject};
use crate::value::{ObjRef, Value};
use indexmap::IndexMap;
use std::rc::Rc;

/// Accounted-byte cap of the nursery.
pub const NURSERY_MAX_BYTES: u64 = 8 * 1024 * 1024;

/// Accounted-byte cap of the retirement home.
pub const RETIREMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;

/// The generation an object currently resides in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Generation {
    Nursery,
    Retirement,
}

/// The collection root set: the live value stack plus the global table.
///
/// Borrowed fresh at every allocation site; the GC holds no references
/// between calls.
#[derive(Clone, Copy)]
pub struct Roots<'a> {
    pub stack: &'a [Value],
    pub globals: &'a IndexMap<String, Value>,
}

impl<'a> Roots<'a> {
    fn values(&self) -> impl Iterator<Item = Value> + 'a {
        self.stack
            .iter()
            .copied()
            .chain(self.globals.values().copied())
    }
}

/// An arena slot: the mark flag plus the object itself.
#[derive(Debug)]
struct GcBox {
    marked: bool,
    object: HeapObject,
}

/// The generational heap.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Option<GcBox>>,
    free: Vec<u32>,
    nursery: Vec<ObjRef>,
    retirement: Vec<ObjRef>,
    nursery_bytes: u64,
    retirement_bytes: u64,
    nursery_max: u64,
    retirement_max: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_thresholds(NURSERY_MAX_BYTES, RETIREMENT_MAX_BYTES)
    }

    /// A heap with custom collection thresholds. Tests use small caps to
    /// force collections without megabytes of allocation.
    pub fn with_thresholds(nursery_max: u64, retirement_max: u64) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            nursery: Vec::new(),
            retirement: Vec::new(),
            nursery_bytes: 0,
            retirement_bytes: 0,
            nursery_max,
            retirement_max,
        }
    }

    // ---- Access ----

    pub fn get(&self, r: ObjRef) -> &HeapObject {
        &self.slots[r.0 as usize]
            .as_ref()
            .expect("heap object was freed")
            .object
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        &mut self.slots[r.0 as usize]
            .as_mut()
            .expect("heap object was freed")
            .object
    }

    // ---- Allocation ----
    //
    // Every create call runs the threshold check, allocates into the
    // nursery, and returns an object value. The caller must push the result
    // onto the stack (or otherwise root it) before the next allocation that
    // could trigger a collection.

    pub fn create_string(&mut self, roots: Roots, text: String) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Str(text)))
    }

    pub fn create_atom(&mut self, roots: Roots, text: String) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Atom(text)))
    }

    pub fn create_list(&mut self, roots: Roots, elems: Vec<Value>) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::List(elems)))
    }

    pub fn create_table(&mut self, roots: Roots, map: IndexMap<String, Value>) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Table(map)))
    }

    pub fn create_tuple(&mut self, roots: Roots, vals: Box<[Value]>) -> Value {
        debug_assert!(vals.len() <= crate::object::TUPLE_MAX_LEN);
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Tuple(vals)))
    }

    pub fn create_function(
        &mut self,
        roots: Roots,
        name: Option<Rc<str>>,
        arity: u16,
        code: Rc<[u8]>,
    ) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Function(Function { name, arity, code })))
    }

    pub fn create_upvalue(&mut self, roots: Roots, cell: Value) -> Value {
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Upvalue(cell)))
    }

    pub fn create_closure(
        &mut self,
        roots: Roots,
        function: ObjRef,
        upvalues: Vec<ObjRef>,
    ) -> Value {
        debug_assert!(upvalues.len() <= crate::object::UPVALUES_MAX);
        self.collect_if_needed(roots);
        Value::Obj(self.register(HeapObject::Closure(Closure { function, upvalues })))
    }

    fn register(&mut self, object: HeapObject) -> ObjRef {
        let bytes = object.byte_size();
        let boxed = GcBox {
            marked: false,
            object,
        };
        let idx = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(boxed);
                i
            }
            None => {
                self.slots.push(Some(boxed));
                (self.slots.len() - 1) as u32
            }
        };
        let r = ObjRef(idx);
        self.nursery.push(r);
        self.nursery_bytes += bytes;
        r
    }

    // ---- Collection ----

    /// The allocation-time trigger: a full nursery forces a nursery
    /// collection, and if promotion then overflows the retirement home, a
    /// retirement collection follows.
    pub fn collect_if_needed(&mut self, roots: Roots) {
        if self.nursery_bytes >= self.nursery_max {
            self.collect_nursery(roots);
            if self.retirement_bytes >= self.retirement_max {
                self.collect_retirement(roots);
            }
        }
    }

    /// Mark from the roots, then sweep the nursery: unmarked objects are
    /// destroyed, survivors move unmarked to the retirement home.
    pub fn collect_nursery(&mut self, roots: Roots) {
        self.mark_from(roots);

        let nursery = std::mem::take(&mut self.nursery);
        for r in nursery {
            let slot = self.slots[r.0 as usize]
                .as_mut()
                .expect("nursery entry was freed");
            let bytes = slot.object.byte_size();
            self.nursery_bytes -= bytes;
            if slot.marked {
                slot.marked = false;
                self.retirement.push(r);
                self.retirement_bytes += bytes;
            } else {
                self.slots[r.0 as usize] = None;
                self.free.push(r.0);
            }
        }

        // Marks must not outlive the pass; retirement residents were marked
        // too even if no retirement sweep follows.
        self.clear_marks(Generation::Retirement);
    }

    /// Re-mark from the roots (promotion may have added live objects), then
    /// sweep the retirement home in place.
    pub fn collect_retirement(&mut self, roots: Roots) {
        self.mark_from(roots);

        let retirement = std::mem::take(&mut self.retirement);
        for r in retirement {
            let slot = self.slots[r.0 as usize]
                .as_mut()
                .expect("retirement entry was freed");
            if slot.marked {
                slot.marked = false;
                self.retirement.push(r);
            } else {
                self.retirement_bytes -= slot.object.byte_size();
                self.slots[r.0 as usize] = None;
                self.free.push(r.0);
            }
        }
    }

    fn mark_from(&mut self, roots: Roots) {
        for v in roots.values() {
            if let Value::Obj(r) = v {
                self.mark_object(r);
            }
        }
    }

    /// Idempotent mark: the early return on an already-marked object makes
    /// cyclic graphs terminate.
    fn mark_object(&mut self, r: ObjRef) {
        let slot = self.slots[r.0 as usize]
            .as_mut()
            .expect("marked a freed object");
        if slot.marked {
            return;
        }
        slot.marked = true;

        let mut children = Vec::new();
        slot.object.trace(&mut children);
        for child in children {
            self.mark_object(child);
        }
    }

    fn clear_marks(&mut self, generation: Generation) {
        let list = match generation {
            Generation::Nursery => &self.nursery,
            Generation::Retirement => &self.retirement,
        };
        for &r in list {
            if let Some(slot) = &mut self.slots[r.0 as usize] {
                slot.marked = false;
            }
        }
    }

    // ---- Observability ----

    pub fn nursery_bytes(&self) -> u64 {
        self.nursery_bytes
    }

    pub fn retirement_bytes(&self) -> u64 {
        self.retirement_bytes
    }

    pub fn live_objects(&self) -> usize {
        self.nursery.len() + self.retirement.len()
    }

    pub fn generation_of(&self, r: ObjRef) -> Option<Generation> {
        if self.nursery.contains(&r) {
            Some(Generation::Nursery)
        } else if self.retirement.contains(&r) {
            Some(Generation::Retirement)
        } else {
            None
        }
    }

    /// True while `r` names a live object.
    pub fn is_live(&self, r: ObjRef) -> bool {
        self.slots
            .get(r.0 as usize)
            .map_or(false, Option::is_some)
    }

    #[cfg(test)]
    fn live_byte_sum(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(|slot| slot.object.byte_size())
            .sum()
    }

    #[cfg(test)]
    fn any_marked(&self) -> bool {
        self.slots.iter().flatten().any(|slot| slot.marked)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
