//! Flan virtual machine: image decoding and bytecode execution.

pub mod arith;
pub mod compare;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod image;
pub mod opcode;
pub mod stack;
pub mod vm;

use error::RuntimeError;
use vm::Vm;

/// Load and run a compiled image, returning the finished VM so callers can
/// inspect the final stack and heap.
pub fn execute_image(image: &[u8]) -> Result<Vm, RuntimeError> {
    let mut vm = Vm::load(image)?;
    vm.run()?;
    Ok(vm)
}
