//! Call frames.

use std::rc::Rc;

/// The call stack is bounded; pushing past this is a fatal overflow.
pub const CALL_FRAMES_MAX: usize = 64;

/// One call record. `RetFn` restores the caller's code buffer, program
/// counter and frame base from here. `name` is the callee's function name,
/// captured at call time: local 0 is an ordinary mutable slot, so the error
/// reporter cannot rely on the callable still sitting there.
#[derive(Clone, Debug)]
pub struct CallFrame {
    pub return_pc: usize,
    pub return_code: Rc<[u8]>,
    pub base: usize,
    pub prev_base: usize,
    pub name: Option<Rc<str>>,
}
