//! Equality and ordering.
//!
//! An `Empty` on the left always matches: equality yields true and every
//! ordering yields true. This is how the language's match construct
//! expresses "don't care" arms, so it must not be "fixed". Incompatible
//! pairs are fatal; there is no silent false.

use crate::error::RuntimeError;
use flan_core::gc::Heap;
use flan_core::object::HeapObject;
use flan_core::value::Value;

/// Ordering operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Equality over compatible pairs: numbers (mixed Int/Float promoted),
/// booleans, strings and atoms by byte content.
pub fn equals(
    heap: &Heap,
    left: Value,
    right: Value,
    err_info: u16,
) -> Result<bool, RuntimeError> {
    match (left, right) {
        (Value::Empty, _) => Ok(true),
        (Value::Int(l), Value::Int(r)) => Ok(l == r),
        (Value::Float(l), Value::Float(r)) => Ok(l == r),
        (Value::Int(l), Value::Float(r)) => Ok(l as f64 == r),
        (Value::Float(l), Value::Int(r)) => Ok(l == r as f64),
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        (Value::Obj(l), Value::Obj(r)) => match (heap.get(l), heap.get(r)) {
            (HeapObject::Str(a), HeapObject::Str(b)) => Ok(a == b),
            (HeapObject::Atom(a), HeapObject::Atom(b)) => Ok(a == b),
            _ => Err(mismatch(heap, left, right, err_info)),
        },
        _ => Err(mismatch(heap, left, right, err_info)),
    }
}

/// Ordering over the equality pairs minus booleans. Strings and atoms order
/// by lexicographic byte comparison.
pub fn order(
    heap: &Heap,
    op: CmpOp,
    left: Value,
    right: Value,
    err_info: u16,
) -> Result<bool, RuntimeError> {
    match (left, right) {
        (Value::Empty, _) => Ok(true),
        (Value::Int(l), Value::Int(r)) => Ok(apply(op, l.cmp(&r))),
        (Value::Float(l), Value::Float(r)) => Ok(float_order(op, l, r)),
        (Value::Int(l), Value::Float(r)) => Ok(float_order(op, l as f64, r)),
        (Value::Float(l), Value::Int(r)) => Ok(float_order(op, l, r as f64)),
        (Value::Obj(l), Value::Obj(r)) => match (heap.get(l), heap.get(r)) {
            (HeapObject::Str(a), HeapObject::Str(b)) => Ok(apply(op, a.cmp(b))),
            (HeapObject::Atom(a), HeapObject::Atom(b)) => Ok(apply(op, a.cmp(b))),
            _ => Err(mismatch(heap, left, right, err_info)),
        },
        _ => Err(mismatch(heap, left, right, err_info)),
    }
}

fn apply(op: CmpOp, ordering: std::cmp::Ordering) -> bool {
    match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Lte => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Gte => ordering.is_ge(),
    }
}

fn float_order(op: CmpOp, l: f64, r: f64) -> bool {
    match op {
        CmpOp::Lt => l < r,
        CmpOp::Lte => l <= r,
        CmpOp::Gt => l > r,
        CmpOp::Gte => l >= r,
    }
}

fn mismatch(heap: &Heap, left: Value, right: Value, err_info: u16) -> RuntimeError {
    RuntimeError::type_error(
        err_info,
        format!(
            "Cannot compare {} and {}",
            left.display_debug(heap),
            right.display_debug(heap)
        ),
    )
}
