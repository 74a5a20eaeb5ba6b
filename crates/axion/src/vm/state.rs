//! Mutable machine state: frames, value stack, heap, jump bookkeeping.
//!
//! Invariants: `read_level <= frame_level` at stable points, both starting
//! at 0; `frames` always holds `frame_level + 1` entries; stack slots and
//! frame locals are non-owning heap ids.

use std::time::Instant;

use ahash::AHashMap;
use indexmap::IndexMap;

use super::{
    exception::{RunError, RunResult},
    heap::{GC_THRESHOLD_MIN, Heap, HeapId},
    object::{HeapObject, NativeFn, Value},
};
use crate::io::ConsoleWriter;

/// A lexical scope at runtime.
#[derive(Debug, Default)]
pub struct Frame {
    /// Named locals in declaration order; first match wins on lookup.
    pub locals: Vec<(String, HeapId)>,
    /// Result of the last evaluated condition at this level.
    pub last_cond: bool,
    /// Set when an exception was raised while this frame was current.
    pub exception_occurred: bool,
}

impl Frame {
    /// Finds a local by name within this frame only.
    #[must_use]
    pub fn get_local(&self, name: &str) -> Option<HeapId> {
        self.locals.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
    }
}

/// Everything the fetch-decode-execute loop mutates.
pub struct VmState {
    pub frame_level: i32,
    pub read_level: i32,
    pub frames: Vec<Frame>,
    pub stack: Vec<HeapId>,
    /// Return positions saved by function invocation.
    pub jump_positions: Vec<u64>,
    /// Jump targets recorded by `store_address`.
    pub block_positions: IndexMap<u32, u64>,
    pub heap: Heap,
    pub can_handle_exceptions: bool,
    /// Live-object threshold for the next suggested collection.
    pub max_objects: usize,
    /// Native functions reachable by name via `invoke_native`.
    pub native_registry: AHashMap<String, NativeFn>,
    /// Monotonic timer backing the `Clock` built-ins.
    pub clock: Option<Instant>,
    /// Open files owned by the `FileIO` built-ins.
    pub files: Vec<Option<std::fs::File>>,
}

impl Default for VmState {
    fn default() -> Self {
        Self::new()
    }
}

impl VmState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_level: 0,
            read_level: 0,
            frames: vec![Frame::default()],
            stack: Vec::with_capacity(100),
            jump_positions: Vec::new(),
            block_positions: IndexMap::new(),
            heap: Heap::new(),
            can_handle_exceptions: false,
            max_objects: GC_THRESHOLD_MIN,
            native_registry: AHashMap::new(),
            clock: None,
            files: Vec::new(),
        }
    }

    /// Side effects run only while the read level matches the frame level.
    #[must_use]
    pub fn executing(&self) -> bool {
        self.read_level == self.frame_level
    }

    pub fn current_frame(&mut self) -> &mut Frame {
        let idx = self.frame_level as usize;
        &mut self.frames[idx]
    }

    pub fn open_frame(&mut self) {
        self.frame_level += 1;
        self.frames.push(Frame::default());
    }

    /// Pops the current frame. An exception flag on the closing frame
    /// propagates outward so enclosing try blocks can observe it.
    pub fn close_frame(&mut self) {
        let closed = self.frames.pop().expect("close_frame with no open frame");
        self.frame_level -= 1;
        if closed.exception_occurred && let Some(frame) = self.frames.last_mut() {
            frame.exception_occurred = true;
        }
    }

    pub fn push(&mut self, id: HeapId) {
        self.stack.push(id);
    }

    /// Pops one stack entry without touching the heap.
    pub fn pop_ref(&mut self) -> RunResult<HeapId> {
        self.stack
            .pop()
            .ok_or_else(|| RunError::Stream("value stack underflow".to_owned()))
    }

    pub fn peek_ref(&self) -> RunResult<HeapId> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| RunError::Stream("value stack underflow".to_owned()))
    }

    /// Pops the top of the stack, deleting the object if it was a
    /// temporary.
    pub fn pop_stack(&mut self) -> RunResult<()> {
        let id = self.pop_ref()?;
        if self.heap.get(id).temporary {
            self.heap.free(id);
        }
        Ok(())
    }

    /// Allocates and pushes a temporary value; literals are const.
    pub fn push_temp_value(&mut self, value: Value, constant: bool) {
        let id = self.heap.allocate_value(value, true, constant);
        self.push(id);
    }

    /// Walks frames innermost-first for a named local.
    #[must_use]
    pub fn lookup_local(&self, name: &str) -> Option<HeapId> {
        self.frames.iter().rev().find_map(|frame| frame.get_local(name))
    }

    /// Flags the current frame and decides whether the error is
    /// recoverable. Inside a try block the read level drops below the frame
    /// level so the rest of the failing block is skipped structurally.
    pub fn raise(&mut self, error: RunError) -> RunResult<()> {
        self.current_frame().exception_occurred = true;
        if self.can_handle_exceptions {
            self.read_level = self.frame_level - 1;
            Ok(())
        } else {
            Err(error)
        }
    }

    /// Binds a native function: a global local for `invoke_object` and a
    /// registry entry for `invoke_native`.
    pub fn bind_function(&mut self, name: &str, func: NativeFn) {
        self.native_registry.insert(name.to_owned(), func);
        let id = self.heap.allocate(HeapObject::native(func));
        self.frames[0].locals.push((name.to_owned(), id));
    }

    /// Runs a full mark-and-sweep pass. Returns (collected, live).
    pub fn run_gc(&mut self) -> (usize, usize) {
        let Self {
            heap, stack, frames, ..
        } = self;

        let roots = stack
            .iter()
            .copied()
            .chain(frames.iter().flat_map(|f| f.locals.iter().map(|(_, id)| *id)));
        heap.mark_from_roots(roots);
        let collected = heap.sweep();
        (collected, heap.num_objects())
    }

    /// Stores an open file, returning its handle index.
    pub fn store_file(&mut self, file: std::fs::File) -> usize {
        if let Some(idx) = self.files.iter().position(Option::is_none) {
            self.files[idx] = Some(file);
            return idx;
        }
        self.files.push(Some(file));
        self.files.len() - 1
    }

    /// Diagnostic dump written on unhandled exceptions: stack, heap, and
    /// frame locals.
    #[must_use]
    pub fn dump(&self) -> String {
        use std::fmt::Write as _;

        let mut out = String::from("Stack:\n");
        for id in &self.stack {
            let _ = writeln!(out, "\t{}", self.heap.object_to_string(*id));
        }

        out.push_str("\nHeap:\n");
        out.push_str(&self.heap.dump());

        out.push_str("\nFrames:\n");
        for (i, frame) in self.frames.iter().enumerate() {
            let _ = writeln!(out, "#{i} {{");
            for (j, (name, _)) in frame.locals.iter().enumerate() {
                let _ = writeln!(out, "\t#{j}\t{name}");
            }
            out.push_str("}\n");
        }
        out
    }
}

/// What a native function gets to work with: the machine state plus the
/// console, and a slot to request a follow-up invocation (used by
/// `Runtime.invoke` to call script functions).
pub struct NativeCtx<'a> {
    pub state: &'a mut VmState,
    pub writer: &'a mut dyn ConsoleWriter,
    /// `(callee, nargs)` to invoke once the native returns; the arguments
    /// must already be on the stack.
    pub pending_invoke: Option<(HeapId, u32)>,
}
