//! Arithmetic with integer/float promotion.
//!
//! Int ⊕ Int stays integral (wrapping on overflow); any mix with Float
//! promotes to Float. `Add` additionally concatenates strings. Division and
//! modulo by zero, integer or float, are fatal.

use crate::error::RuntimeError;
use crate::vm::Vm;
use flan_core::object::HeapObject;
use flan_core::value::Value;

/// Binary arithmetic operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Apply a binary arithmetic operation to two popped operands.
pub fn binary(
    vm: &mut Vm,
    op: ArithOp,
    left: Value,
    right: Value,
    err_info: u16,
) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(l), Value::Int(r)) => int_arith(op, l, r, err_info),
        (Value::Int(l), Value::Float(r)) => float_arith(op, l as f64, r, err_info),
        (Value::Float(l), Value::Int(r)) => float_arith(op, l, r as f64, err_info),
        (Value::Float(l), Value::Float(r)) => float_arith(op, l, r, err_info),
        (Value::Obj(l), Value::Obj(r)) if op == ArithOp::Add => {
            match (vm.gc.get(l), vm.gc.get(r)) {
                (HeapObject::Str(a), HeapObject::Str(b)) => {
                    // The concatenation is materialized before the
                    // allocation's collection point, so the unrooted
                    // operands are no longer needed by then.
                    let joined = format!("{a}{b}");
                    Ok(vm.alloc_string(joined))
                }
                _ => Err(mismatch(vm, op, left, right, err_info)),
            }
        }
        _ => Err(mismatch(vm, op, left, right, err_info)),
    }
}

/// Negate the operand: integers and floats only.
pub fn negate(vm: &Vm, value: Value, err_info: u16) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(i) => Ok(Value::Int(i.wrapping_neg())),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(RuntimeError::type_error(
            err_info,
            format!("Cannot negate {}", other.display_debug(&vm.gc)),
        )),
    }
}

fn int_arith(op: ArithOp, l: i64, r: i64, err_info: u16) -> Result<Value, RuntimeError> {
    let result = match op {
        ArithOp::Add => l.wrapping_add(r),
        ArithOp::Sub => l.wrapping_sub(r),
        ArithOp::Mul => l.wrapping_mul(r),
        ArithOp::Div => {
            if r == 0 {
                return Err(RuntimeError::domain(err_info, "Cannot divide by zero"));
            }
            l.wrapping_div(r)
        }
        ArithOp::Mod => {
            if r == 0 {
                return Err(RuntimeError::domain(err_info, "Cannot mod by 0"));
            }
            l.wrapping_rem(r)
        }
    };
    Ok(Value::Int(result))
}

fn float_arith(op: ArithOp, l: f64, r: f64, err_info: u16) -> Result<Value, RuntimeError> {
    let result = match op {
        ArithOp::Add => l + r,
        ArithOp::Sub => l - r,
        ArithOp::Mul => l * r,
        ArithOp::Div => {
            if r == 0.0 {
                return Err(RuntimeError::domain(err_info, "Cannot divide by zero"));
            }
            l / r
        }
        ArithOp::Mod => {
            if r == 0.0 {
                return Err(RuntimeError::domain(err_info, "Cannot mod by 0"));
            }
            l % r
        }
    };
    Ok(Value::Float(result))
}

fn mismatch(vm: &Vm, op: ArithOp, left: Value, right: Value, err_info: u16) -> RuntimeError {
    let l = left.display_debug(&vm.gc);
    let r = right.display_debug(&vm.gc);
    let message = match op {
        ArithOp::Add => format!("Cannot add {l} and {r}"),
        ArithOp::Sub => format!("Cannot subtract {r} from {l}"),
        ArithOp::Mul => format!("Cannot multiply {l} by {r}"),
        ArithOp::Div => format!("Cannot divide {l} by {r}"),
        ArithOp::Mod => format!("Cannot mod with {l} and {r}"),
    };
    RuntimeError::type_error(err_info, message)
}
