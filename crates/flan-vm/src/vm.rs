//! VM state and entry points.

use crate::dispatch;
use crate::error::RuntimeError;
use crate::frame::CallFrame;
use crate::image::{self, ErrorInfo, ImageReader};
use crate::opcode::Op;
use crate::stack::Stack;
use flan_core::gc::{Heap, Roots};
use flan_core::value::Value;
use indexmap::IndexMap;
use std::rc::Rc;

/// The virtual machine: the single mutator and the single collector.
#[derive(Debug)]
pub struct Vm {
    pub stack: Stack,
    pub frames: Vec<CallFrame>,
    pub gc: Heap,
    pub globals: IndexMap<String, Value>,
    pub error_info: Vec<ErrorInfo>,
    /// The byte buffer the program counter currently indexes: the image's
    /// code region at top level, a function body inside a call.
    pub code: Rc<[u8]>,
    pub pc: usize,
}

impl Vm {
    /// An empty VM with nothing loaded.
    pub fn new() -> Self {
        Vm {
            stack: Stack::new(),
            frames: Vec::new(),
            gc: Heap::new(),
            globals: IndexMap::new(),
            error_info: Vec::new(),
            code: Rc::from(Vec::new()),
            pc: 0,
        }
    }

    /// Validate the image header, materialize the error-info table, and
    /// leave the program counter at the start of the code region.
    pub fn load(image: &[u8]) -> Result<Self, RuntimeError> {
        let mut reader = ImageReader::new(image);
        image::check_magic(&mut reader)?;
        image::check_version(&mut reader)?;
        let error_info = image::read_error_info_list(&mut reader)?;

        let mut vm = Vm::new();
        vm.error_info = error_info;
        vm.code = Rc::from(image.to_vec());
        vm.pc = reader.pos();
        Ok(vm)
    }

    /// Run the loaded program to `Halt` or a fatal error.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        dispatch::run(self)
    }

    // ---- Allocation ----
    //
    // Thin wrappers that hand the GC its root set. Field-level borrows keep
    // the stack and globals readable while the heap mutates.

    pub fn alloc_string(&mut self, text: String) -> Value {
        self.gc.create_string(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            text,
        )
    }

    pub fn alloc_atom(&mut self, text: String) -> Value {
        self.gc.create_atom(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            text,
        )
    }

    pub fn alloc_list(&mut self, elems: Vec<Value>) -> Value {
        self.gc.create_list(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            elems,
        )
    }

    pub fn alloc_table(&mut self, map: IndexMap<String, Value>) -> Value {
        self.gc.create_table(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            map,
        )
    }

    pub fn alloc_tuple(&mut self, vals: Box<[Value]>) -> Value {
        self.gc.create_tuple(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            vals,
        )
    }

    pub fn alloc_function(
        &mut self,
        name: Option<Rc<str>>,
        arity: u16,
        code: Rc<[u8]>,
    ) -> Value {
        self.gc.create_function(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            name,
            arity,
            code,
        )
    }

    pub fn alloc_upvalue(&mut self, cell: Value) -> Value {
        self.gc.create_upvalue(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            cell,
        )
    }

    pub fn alloc_closure(
        &mut self,
        function: flan_core::value::ObjRef,
        upvalues: Vec<flan_core::value::ObjRef>,
    ) -> Value {
        self.gc.create_closure(
            Roots {
                stack: self.stack.values(),
                globals: &self.globals,
            },
            function,
            upvalues,
        )
    }

    // ---- Value records ----

    /// Decode one encoded value record at the reader's cursor. String, atom
    /// and function records allocate through the GC.
    pub fn read_value(&mut self, reader: &mut ImageReader) -> Result<Value, RuntimeError> {
        let tag = reader.read_u8()?;
        match tag {
            0 => Ok(Value::Int(reader.read_int()?)),
            1 => Ok(Value::Float(reader.read_float()?)),
            2 => Ok(Value::Bool(reader.read_u8()? == 1)),
            3 => Ok(Value::Empty),
            4 => {
                let text = reader.read_long_string()?;
                Ok(self.alloc_string(text))
            }
            5 => {
                let text = reader.read_short_string()?;
                Ok(self.alloc_atom(text))
            }
            6 => self.read_function(reader),
            _ => Err(RuntimeError::decode(format!(
                "Invalid value tag 0x{tag:02x}"
            ))),
        }
    }

    /// Function record: short-string name, u16 arity, Integer-encoded body
    /// length, body bytes, then the `EndFn` terminator sentinel.
    fn read_function(&mut self, reader: &mut ImageReader) -> Result<Value, RuntimeError> {
        let name = reader.read_short_string()?;
        let name: Option<Rc<str>> = if name.is_empty() {
            None
        } else {
            Some(Rc::from(name))
        };
        let arity = reader.read_u16()?;
        let body_len = reader.read_int()?;
        if body_len < 0 {
            return Err(RuntimeError::decode("Negative function body length"));
        }
        let body = reader.read_bytes(body_len as usize)?.to_vec();
        if reader.read_u8()? != Op::EndFn as u8 {
            return Err(RuntimeError::decode(
                "Function body is missing its EndFn terminator",
            ));
        }
        Ok(self.alloc_function(name, arity, Rc::from(body)))
    }

    // ---- Diagnostics ----

    /// Render the full diagnostic for a fatal error: the stack trace from
    /// the call frames (innermost first), then the offending source line
    /// when the faulting opcode supplied an error-info index, then the
    /// message itself. Frames are named by the function name captured at
    /// call time, since local 0 may have been overwritten since.
    pub fn render_error(&self, err: &RuntimeError) -> String {
        let mut out = String::new();
        for frame in self.frames.iter().rev() {
            match &frame.name {
                Some(name) => out.push_str(&format!("  in <function {name}>\n")),
                None => out.push_str("  in <function>\n"),
            }
        }
        match err.err_info().and_then(|i| self.error_info.get(i as usize)) {
            Some(info) => {
                out.push_str(&info.text);
                out.push('\n');
                out.push_str(&format!("Error at line {}: {err}\n", info.line));
            }
            None => {
                out.push_str(&format!("Error: {err}\n"));
            }
        }
        out
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
