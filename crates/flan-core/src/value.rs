//! Flan runtime values.
//!
//! A `Value` is small and trivially copyable; anything bigger than a machine
//! word lives in the GC heap and is reached through an [`ObjRef`] handle.

use crate::gc::Heap;
use crate::object::{Closure, Function, HeapObject};
use std::fmt;

/// A typed handle to a heap object owned by the GC arena.
///
/// Handles are non-owning and only meaningful against the heap that issued
/// them; the GC is the single owner of every object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

impl ObjRef {
    /// The raw arena index, used for the `@0x..` rendering of unnamed
    /// functions.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj(#{})", self.0)
    }
}

/// A Flan value: one of five disjoint variants.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    /// The unit/placeholder sentinel, printed as `_`. Truthy, and a wildcard
    /// in comparisons.
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Non-owning reference to a heap-resident object.
    Obj(ObjRef),
}

impl Value {
    /// Falsey values are `Int(0)`, `Float(0.0)` and `Bool(false)`; everything
    /// else, including `Empty` and every object, is truthy.
    #[inline]
    pub fn truthy(self) -> bool {
        match self {
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            Value::Bool(b) => b,
            Value::Empty | Value::Obj(_) => true,
        }
    }

    /// Human-readable rendering. Strings and atoms render as their bytes,
    /// collections recurse, functions render as `<function NAME>` (or
    /// `<function @0xIDX>` when unnamed).
    pub fn display(self, heap: &Heap) -> String {
        self.render(heap, false)
    }

    /// Like [`display`](Self::display), but String values are wrapped in
    /// single quotes, including strings nested inside collections.
    pub fn display_debug(self, heap: &Heap) -> String {
        self.render(heap, true)
    }

    fn render(self, heap: &Heap, debug: bool) -> String {
        match self {
            Value::Empty => "_".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(f),
            Value::Bool(b) => b.to_string(),
            Value::Obj(r) => match heap.get(r) {
                HeapObject::Str(s) => {
                    if debug {
                        format!("'{s}'")
                    } else {
                        s.clone()
                    }
                }
                HeapObject::Atom(s) => s.clone(),
                HeapObject::List(elems) => {
                    let parts: Vec<String> =
                        elems.iter().map(|e| e.render(heap, debug)).collect();
                    format!("[{}]", parts.join(", "))
                }
                HeapObject::Table(map) => {
                    let parts: Vec<String> = map
                        .iter()
                        .map(|(k, v)| format!("{}: {}", k, v.render(heap, debug)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                HeapObject::Tuple(vals) => {
                    let parts: Vec<String> =
                        vals.iter().map(|e| e.render(heap, debug)).collect();
                    format!("<{}>", parts.join(", "))
                }
                HeapObject::Function(f) => render_function(f, r),
                HeapObject::Closure(Closure { function, .. }) => {
                    match heap.get(*function) {
                        HeapObject::Function(f) => render_function(f, *function),
                        _ => "<function>".to_string(),
                    }
                }
                HeapObject::Upvalue(v) => v.render(heap, debug),
            },
        }
    }
}

fn render_function(f: &Function, r: ObjRef) -> String {
    match &f.name {
        Some(name) => format!("<function {name}>"),
        None => format!("<function @0x{:x}>", r.index()),
    }
}

fn format_float(f: f64) -> String {
    if f.fract() == 0.0 && f.is_finite() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}
