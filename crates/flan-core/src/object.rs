//! Heap object variants.
//!
//! The variant set is closed: `mark` dispatch and `byte_size` are plain
//! matches over the tag rather than dynamic dispatch.

use crate::value::{ObjRef, Value};
use indexmap::IndexMap;
use std::mem;
use std::rc::Rc;

/// Tuples are fixed-length with at most this many elements.
pub const TUPLE_MAX_LEN: usize = 255;

/// A closure captures at most this many upvalues.
pub const UPVALUES_MAX: usize = 255;

/// A compiled function: a name, an arity, and its instruction bytes.
///
/// The body is reference-counted so the dispatch loop can execute it without
/// borrowing the heap; the one Function object remains the body's only owner
/// among heap objects.
#[derive(Debug)]
pub struct Function {
    pub name: Option<Rc<str>>,
    pub arity: u16,
    pub code: Rc<[u8]>,
}

/// A function bundled with its captured upvalue cells.
#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A heap-resident object. Every variant is owned by exactly one of the GC's
/// two generation lists at any instant.
#[derive(Debug)]
pub enum HeapObject {
    Str(String),
    /// Interned-like symbolic identifier; equality is by byte sequence.
    Atom(String),
    List(Vec<Value>),
    Table(IndexMap<String, Value>),
    Tuple(Box<[Value]>),
    Function(Function),
    /// A single captured-variable cell.
    Upvalue(Value),
    Closure(Closure),
}

impl HeapObject {
    /// Accounted header footprint in bytes. A stable property of the tag:
    /// payload lengths are deliberately not measured.
    pub fn byte_size(&self) -> u64 {
        let payload = match self {
            HeapObject::Str(_) | HeapObject::Atom(_) => mem::size_of::<String>(),
            HeapObject::List(_) => mem::size_of::<Vec<Value>>(),
            HeapObject::Table(_) => mem::size_of::<IndexMap<String, Value>>(),
            HeapObject::Tuple(_) => mem::size_of::<Box<[Value]>>(),
            HeapObject::Function(_) => mem::size_of::<Function>(),
            HeapObject::Upvalue(_) => mem::size_of::<Value>(),
            HeapObject::Closure(_) => mem::size_of::<Closure>(),
        };
        (mem::size_of::<Self>() + payload) as u64
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "string",
            HeapObject::Atom(_) => "atom",
            HeapObject::List(_) => "list",
            HeapObject::Table(_) => "table",
            HeapObject::Tuple(_) => "tuple",
            HeapObject::Function(_) => "function",
            HeapObject::Upvalue(_) => "upvalue",
            HeapObject::Closure(_) => "function",
        }
    }

    /// Append every outgoing object reference to `out`.
    ///
    /// Strings, atoms and functions are leaves; code bytes are not values.
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        match self {
            HeapObject::Str(_) | HeapObject::Atom(_) | HeapObject::Function(_) => {}
            HeapObject::List(elems) => {
                out.extend(elems.iter().filter_map(Value::as_obj));
            }
            HeapObject::Table(map) => {
                out.extend(map.values().filter_map(|v| v.as_obj()));
            }
            HeapObject::Tuple(vals) => {
                out.extend(vals.iter().filter_map(Value::as_obj));
            }
            HeapObject::Upvalue(v) => {
                if let Some(r) = v.as_obj() {
                    out.push(r);
                }
            }
            HeapObject::Closure(c) => {
                out.push(c.function);
                out.extend(c.upvalues.iter().copied());
            }
        }
    }
}

impl Value {
    /// The object handle, if this is an object value.
    #[inline]
    pub fn as_obj(&self) -> Option<ObjRef> {
        match self {
            Value::Obj(r) => Some(*r),
            _ => None,
        }
    }
}
