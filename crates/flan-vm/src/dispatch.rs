//! Fetch-decode-execute loop.
//!
//! Each iteration reads one opcode byte, decodes its inline operands with a
//! short-lived [`ImageReader`] positioned after the opcode, applies the
//! transition, and advances the program counter past the operands. Arms
//! that transfer control (`Jmp`, calls, returns) set the counter themselves
//! and skip the default advance.

use crate::arith::{self, ArithOp};
use crate::compare::{self, CmpOp};
use crate::error::RuntimeError;
use crate::frame::{CallFrame, CALL_FRAMES_MAX};
use crate::image::ImageReader;
use crate::opcode::Op;
use crate::vm::Vm;
use flan_core::object::{HeapObject, TUPLE_MAX_LEN, UPVALUES_MAX};
use flan_core::value::{ObjRef, Value};
use indexmap::IndexMap;
use std::rc::Rc;

/// Run until `Halt` or a fatal error.
pub fn run(vm: &mut Vm) -> Result<(), RuntimeError> {
    loop {
        let code = Rc::clone(&vm.code);
        let byte = *code
            .get(vm.pc)
            .ok_or_else(|| RuntimeError::decode("Execution ran past the end of the code"))?;
        let op = Op::from_u8(byte)
            .ok_or_else(|| RuntimeError::decode(format!("Invalid instruction 0x{byte:02x}")))?;
        let mut r = ImageReader::at(&code, vm.pc + 1);

        match op {
            Op::LoadNeg1 => vm.stack.push(Value::Int(-1)),
            Op::Load0 => vm.stack.push(Value::Int(0)),
            Op::Load1 => vm.stack.push(Value::Int(1)),
            Op::Load2 => vm.stack.push(Value::Int(2)),
            Op::Load3 => vm.stack.push(Value::Int(3)),
            Op::Load4 => vm.stack.push(Value::Int(4)),
            Op::Load5 => vm.stack.push(Value::Int(5)),

            Op::Load => {
                let value = vm.read_value(&mut r)?;
                vm.stack.push(value);
            }
            Op::Push => {
                let count = r.read_u8()?;
                for _ in 0..count {
                    let value = vm.read_value(&mut r)?;
                    vm.stack.push(value);
                }
            }

            Op::Pop => {
                vm.stack.pop()?;
            }
            Op::PopN => {
                let count = r.read_u8()?;
                for _ in 0..count {
                    vm.stack.pop()?;
                }
            }
            Op::Nip => vm.stack.nip(1)?,
            Op::NipN => {
                let count = r.read_u8()?;
                vm.stack.nip(count as usize)?;
            }
            Op::Dup => {
                let top = *vm.stack.last()?;
                vm.stack.push(top);
            }

            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                let err_info = r.read_u16()?;
                let right = vm.stack.pop()?;
                let left = vm.stack.pop()?;
                let aop = match op {
                    Op::Add => ArithOp::Add,
                    Op::Sub => ArithOp::Sub,
                    Op::Mul => ArithOp::Mul,
                    Op::Div => ArithOp::Div,
                    _ => ArithOp::Mod,
                };
                let result = arith::binary(vm, aop, left, right, err_info)?;
                vm.stack.push(result);
            }

            Op::Eq | Op::NEq => {
                let err_info = r.read_u16()?;
                let right = vm.stack.pop()?;
                let left = vm.stack.pop()?;
                let eq = compare::equals(&vm.gc, left, right, err_info)?;
                vm.stack
                    .push(Value::Bool(if op == Op::Eq { eq } else { !eq }));
            }
            Op::Lt | Op::Lte | Op::Gt | Op::Gte => {
                let err_info = r.read_u16()?;
                let right = vm.stack.pop()?;
                let left = vm.stack.pop()?;
                let cop = match op {
                    Op::Lt => CmpOp::Lt,
                    Op::Lte => CmpOp::Lte,
                    Op::Gt => CmpOp::Gt,
                    _ => CmpOp::Gte,
                };
                let result = compare::order(&vm.gc, cop, left, right, err_info)?;
                vm.stack.push(Value::Bool(result));
            }

            Op::And => {
                let right = vm.stack.pop()?;
                let left = vm.stack.pop()?;
                vm.stack.push(Value::Bool(left.truthy() && right.truthy()));
            }
            Op::Or => {
                let right = vm.stack.pop()?;
                let left = vm.stack.pop()?;
                vm.stack.push(Value::Bool(left.truthy() || right.truthy()));
            }
            Op::Not => {
                let value = vm.stack.pop()?;
                vm.stack.push(Value::Bool(!value.truthy()));
            }
            Op::Negate => {
                let err_info = r.read_u16()?;
                let value = vm.stack.pop()?;
                let result = arith::negate(vm, value, err_info)?;
                vm.stack.push(result);
            }

            Op::Jmp => {
                let offset = r.read_u32()?;
                vm.pc = r.pos() + offset as usize;
                continue;
            }
            Op::Jz => {
                let offset = r.read_u32()?;
                if !vm.stack.pop()?.truthy() {
                    vm.pc = r.pos() + offset as usize;
                    continue;
                }
            }
            Op::Jnz => {
                let offset = r.read_u32()?;
                if vm.stack.pop()?.truthy() {
                    vm.pc = r.pos() + offset as usize;
                    continue;
                }
            }

            Op::InitList => {
                let count = r.read_u32()? as usize;
                // The constituents stay on the stack until the container
                // exists, so a collection inside the allocation cannot free
                // them.
                let elems = vm.stack.top_slice(count)?.to_vec();
                let list = vm.alloc_list(elems);
                vm.stack.drop_top(count)?;
                vm.stack.push(list);
            }
            Op::InitTable => {
                let count = r.read_u32()? as usize;
                let mut map = IndexMap::with_capacity(count);
                for i in 0..count {
                    let key = r.read_short_string()?;
                    let value = vm.stack.from_top(i)?;
                    map.insert(key, value);
                }
                let table = vm.alloc_table(map);
                vm.stack.drop_top(count)?;
                vm.stack.push(table);
            }
            Op::InitTup => {
                let count = r.read_u32()? as usize;
                if count > TUPLE_MAX_LEN {
                    return Err(RuntimeError::decode(format!(
                        "Tuple length {count} exceeds {TUPLE_MAX_LEN}"
                    )));
                }
                let vals = vm.stack.top_slice(count)?.to_vec().into_boxed_slice();
                let tuple = vm.alloc_tuple(vals);
                vm.stack.drop_top(count)?;
                vm.stack.push(tuple);
            }

            Op::IdxListOrTup => {
                let err_info = r.read_u16()?;
                let idx_value = vm.read_value(&mut r)?;
                let container = vm.stack.pop()?;
                let element = index_list_or_tuple(vm, container, idx_value, err_info)?;
                vm.stack.push(element);
            }
            Op::SetList => {
                let err_info = r.read_u16()?;
                let idx_value = vm.read_value(&mut r)?;
                let value = vm.stack.pop()?;
                let container = vm.stack.pop()?;
                set_list(vm, container, idx_value, value, err_info)?;
            }

            Op::GetMember => {
                let err_info = r.read_u16()?;
                let key = r.read_short_string()?;
                let container = vm.stack.pop()?;
                let table = as_table(vm, container, err_info)?;
                let value = match table.get(&key) {
                    Some(&v) => v,
                    None => {
                        return Err(RuntimeError::domain(
                            err_info,
                            format!("Table does not have key '{key}'"),
                        ))
                    }
                };
                vm.stack.push(value);
            }
            Op::SetMember => {
                let err_info = r.read_u16()?;
                let key = r.read_short_string()?;
                let value = vm.stack.pop()?;
                let container = vm.stack.pop()?;
                let obj = container_ref(vm, container, "a table", err_info)?;
                if !matches!(vm.gc.get(obj), HeapObject::Table(_)) {
                    return Err(RuntimeError::type_error(
                        err_info,
                        format!(
                            "Expected a table but got {}",
                            container.display_debug(&vm.gc)
                        ),
                    ));
                }
                match vm.gc.get_mut(obj) {
                    HeapObject::Table(map) => {
                        map.insert(key, value);
                    }
                    _ => unreachable!("checked above"),
                }
            }

            Op::DefGlobal => {
                let err_info = r.read_u16()?;
                let name = r.read_short_string()?;
                let value = vm.stack.pop()?;
                if vm.globals.contains_key(&name) {
                    return Err(RuntimeError::domain(
                        err_info,
                        format!("Global variable '{name}' is already defined"),
                    ));
                }
                vm.globals.insert(name, value);
            }
            Op::GetGlobal => {
                let err_info = r.read_u16()?;
                let name = r.read_short_string()?;
                let value = match vm.globals.get(&name) {
                    Some(&v) => v,
                    None => {
                        return Err(RuntimeError::domain(
                            err_info,
                            format!("Global variable '{name}' is not defined"),
                        ))
                    }
                };
                vm.stack.push(value);
            }
            Op::SetGlobal => {
                let err_info = r.read_u16()?;
                let name = r.read_short_string()?;
                let value = vm.stack.pop()?;
                match vm.globals.get_mut(&name) {
                    Some(slot) => *slot = value,
                    None => {
                        return Err(RuntimeError::domain(
                            err_info,
                            format!("Global variable '{name}' is not defined"),
                        ))
                    }
                }
            }

            Op::GetLocal => {
                let slot = r.read_u16()?;
                let value = vm.stack.at_base(slot as usize)?;
                vm.stack.push(value);
            }
            Op::SetLocal => {
                let slot = r.read_u16()?;
                let value = *vm.stack.last()?;
                vm.stack.set_at_base(slot as usize, value)?;
            }

            Op::CallFn => {
                call_function(vm, &mut r)?;
                continue;
            }
            Op::RetFn => {
                return_from_call(vm)?;
                continue;
            }
            Op::MakeClosure => {
                make_closure(vm, &mut r)?;
            }
            Op::GetUpval => {
                let slot = r.read_u8()?;
                let cell = upvalue_cell(vm, slot)?;
                let value = match vm.gc.get(cell) {
                    HeapObject::Upvalue(v) => *v,
                    _ => return Err(RuntimeError::decode("Upvalue slot holds a non-upvalue")),
                };
                vm.stack.push(value);
            }
            Op::SetUpval => {
                let slot = r.read_u8()?;
                let value = *vm.stack.last()?;
                let cell = upvalue_cell(vm, slot)?;
                match vm.gc.get_mut(cell) {
                    HeapObject::Upvalue(v) => *v = value,
                    _ => return Err(RuntimeError::decode("Upvalue slot holds a non-upvalue")),
                }
            }

            Op::EndFn => {
                return Err(RuntimeError::decode(
                    "Reached a function terminator at runtime",
                ))
            }
            Op::Halt => return Ok(()),
        }

        vm.pc = r.pos();
    }
}

/// The callable sits below the arguments; expose it as local 0, record the
/// return position, and jump into the body.
fn call_function(vm: &mut Vm, r: &mut ImageReader) -> Result<(), RuntimeError> {
    let err_info = r.read_u16()?;
    let argc = r.read_u8()? as usize;

    let callee = vm.stack.from_top(argc)?;
    let obj = match callee.as_obj() {
        Some(obj) => obj,
        None => {
            return Err(RuntimeError::type_error(
                err_info,
                format!("Cannot call {}", callee.display_debug(&vm.gc)),
            ))
        }
    };
    let function = match vm.gc.get(obj) {
        HeapObject::Function(_) => obj,
        HeapObject::Closure(c) => c.function,
        _ => {
            return Err(RuntimeError::type_error(
                err_info,
                format!("Cannot call {}", callee.display_debug(&vm.gc)),
            ))
        }
    };
    let (arity, body, name) = match vm.gc.get(function) {
        HeapObject::Function(f) => (f.arity, Rc::clone(&f.code), f.name.clone()),
        _ => {
            return Err(RuntimeError::type_error(
                err_info,
                format!("Cannot call {}", callee.display_debug(&vm.gc)),
            ))
        }
    };

    if arity as usize != argc {
        return Err(RuntimeError::type_error(
            err_info,
            format!(
                "{} expects {arity} arguments but got {argc}",
                callee.display(&vm.gc)
            ),
        ));
    }
    if vm.frames.len() >= CALL_FRAMES_MAX {
        return Err(RuntimeError::FrameOverflow);
    }

    let prev_base = vm.stack.frame_base();
    vm.stack.set_frame_base(argc)?;
    vm.frames.push(CallFrame {
        return_pc: r.pos(),
        return_code: Rc::clone(&vm.code),
        base: vm.stack.frame_base(),
        prev_base,
        name,
    });
    vm.code = body;
    vm.pc = 0;
    Ok(())
}

/// Restore the caller. Collapsing the callable and arguments is the
/// caller's job (a following `NipN`), which leaves the return value in the
/// callable's slot.
fn return_from_call(vm: &mut Vm) -> Result<(), RuntimeError> {
    let frame = vm
        .frames
        .pop()
        .ok_or_else(|| RuntimeError::decode("RetFn outside of a call"))?;
    vm.stack.restore_frame_base(frame.prev_base);
    vm.code = frame.return_code;
    vm.pc = frame.return_pc;
    Ok(())
}

/// Wrap the top-of-stack function and the `n` values beneath it into a
/// closure. Each fresh upvalue is pushed onto the stack before the next
/// allocation so an intervening collection sees it as a root.
fn make_closure(vm: &mut Vm, r: &mut ImageReader) -> Result<(), RuntimeError> {
    let count = r.read_u8()? as usize;
    if count > UPVALUES_MAX {
        return Err(RuntimeError::decode(format!(
            "Upvalue count {count} exceeds {UPVALUES_MAX}"
        )));
    }

    let func_value = *vm.stack.last()?;
    let function = match func_value.as_obj() {
        Some(obj) if matches!(vm.gc.get(obj), HeapObject::Function(_)) => obj,
        _ => {
            return Err(RuntimeError::decode(format!(
                "MakeClosure target is not a function: {}",
                func_value.display_debug(&vm.gc)
            )))
        }
    };

    // Captured values sit beneath the function: the value just below it
    // becomes upvalue 0. Absolute positions stay valid while we push.
    let len = vm.stack.len();
    if len < count + 1 {
        return Err(RuntimeError::decode("Value stack underflow"));
    }
    let mut upvalues: Vec<ObjRef> = Vec::with_capacity(count);
    for i in 0..count {
        let captured = vm.stack.values()[len - 2 - i];
        let upvalue = vm.alloc_upvalue(captured);
        vm.stack.push(upvalue);
        upvalues.push(upvalue.as_obj().expect("upvalue is an object"));
    }

    let closure = vm.alloc_closure(function, upvalues);
    // Discard the scratch upvalues, the function and the captured values.
    vm.stack.drop_top(count + 1 + count)?;
    vm.stack.push(closure);
    Ok(())
}

/// The upvalue cell at `slot` of the closure occupying local 0. Upvalue
/// opcodes carry no error-info operand, so the type error has no index.
fn upvalue_cell(vm: &Vm, slot: u8) -> Result<ObjRef, RuntimeError> {
    let local0 = vm.stack.at_base(0)?;
    let closure = match local0.as_obj() {
        Some(obj) => obj,
        None => return Err(not_a_closure()),
    };
    match vm.gc.get(closure) {
        HeapObject::Closure(c) => c
            .upvalues
            .get(slot as usize)
            .copied()
            .ok_or_else(|| RuntimeError::decode("Upvalue slot out of range")),
        _ => Err(not_a_closure()),
    }
}

fn not_a_closure() -> RuntimeError {
    RuntimeError::Type {
        message: "Upvalue access outside a closure".to_string(),
        err_info: None,
    }
}

fn index_list_or_tuple(
    vm: &Vm,
    container: Value,
    idx_value: Value,
    err_info: u16,
) -> Result<Value, RuntimeError> {
    let idx = match idx_value {
        Value::Int(i) => i,
        other => {
            return Err(RuntimeError::type_error(
                err_info,
                format!("Cannot index with {}", other.display_debug(&vm.gc)),
            ))
        }
    };
    let obj = container_ref(vm, container, "a list or tuple", err_info)?;
    let elems: &[Value] = match vm.gc.get(obj) {
        HeapObject::List(elems) => elems,
        HeapObject::Tuple(vals) => vals,
        _ => {
            return Err(RuntimeError::type_error(
                err_info,
                format!(
                    "Expected a list or tuple but got {}",
                    container.display_debug(&vm.gc)
                ),
            ))
        }
    };
    let at = resolve_index(idx, elems.len(), err_info)?;
    Ok(elems[at])
}

fn set_list(
    vm: &mut Vm,
    container: Value,
    idx_value: Value,
    value: Value,
    err_info: u16,
) -> Result<(), RuntimeError> {
    let idx = match idx_value {
        Value::Int(i) => i,
        other => {
            return Err(RuntimeError::type_error(
                err_info,
                format!("Cannot index with {}", other.display_debug(&vm.gc)),
            ))
        }
    };
    let obj = container_ref(vm, container, "a list", err_info)?;
    let len = match vm.gc.get(obj) {
        HeapObject::List(elems) => elems.len(),
        _ => {
            return Err(RuntimeError::type_error(
                err_info,
                format!(
                    "Expected a list but got {}",
                    container.display_debug(&vm.gc)
                ),
            ))
        }
    };
    let at = resolve_index(idx, len, err_info)?;
    match vm.gc.get_mut(obj) {
        HeapObject::List(elems) => elems[at] = value,
        _ => unreachable!("checked above"),
    }
    Ok(())
}

/// Negative indices count from the end; anything out of range is fatal.
fn resolve_index(idx: i64, len: usize, err_info: u16) -> Result<usize, RuntimeError> {
    let resolved = if idx < 0 { idx + len as i64 } else { idx };
    if resolved < 0 || resolved >= len as i64 {
        return Err(RuntimeError::domain(err_info, "Index out of range"));
    }
    Ok(resolved as usize)
}

fn container_ref(
    vm: &Vm,
    container: Value,
    expected: &str,
    err_info: u16,
) -> Result<ObjRef, RuntimeError> {
    container.as_obj().ok_or_else(|| {
        RuntimeError::type_error(
            err_info,
            format!(
                "Expected {expected} but got {}",
                container.display_debug(&vm.gc)
            ),
        )
    })
}

fn as_table<'a>(
    vm: &'a Vm,
    container: Value,
    err_info: u16,
) -> Result<&'a IndexMap<String, Value>, RuntimeError> {
    let obj = container_ref(vm, container, "a table", err_info)?;
    match vm.gc.get(obj) {
        HeapObject::Table(map) => Ok(map),
        _ => Err(RuntimeError::type_error(
            err_info,
            format!(
                "Expected a table but got {}",
                container.display_debug(&vm.gc)
            ),
        )),
    }
}
