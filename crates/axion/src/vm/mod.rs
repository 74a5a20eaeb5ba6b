//! The virtual machine: a single-threaded fetch-decode-execute loop over a
//! byte stream.
//!
//! Two counters shape execution: `frame_level` tracks lexical depth
//! (`ifl`/`dfl`), and `read_level` gates side effects. Most instructions
//! only act while `read_level == frame_level`; otherwise they still consume
//! their operand bytes, which is how conditional bodies and function bodies
//! are skipped without separate skip logic. Every operand width is
//! statically known for exactly this reason.

mod byte_stream;
mod exception;
mod heap;
mod object;
mod state;

pub use byte_stream::{ByteStream, BytecodeError, FileByteStream, MemoryByteStream};
pub use exception::{RunError, RunResult};
pub use heap::{GC_THRESHOLD_MAX, GC_THRESHOLD_MIN, GC_THRESHOLD_STEP, Heap, HeapId};
pub use object::{Function, HeapObject, NativeFn, NativeHandle, ObjectKind, Value, format_float};
pub use state::{Frame, NativeCtx, VmState};

use smallvec::SmallVec;

use crate::{bytecode::Opcode, io::ConsoleWriter, tracer::VmTracer};

/// A virtual machine bound to one byte stream, console, and tracer.
pub struct Vm<'a, W: ConsoleWriter, T: VmTracer> {
    pub state: VmState,
    stream: &'a mut dyn ByteStream,
    writer: &'a mut W,
    tracer: T,
}

impl<'a, W: ConsoleWriter, T: VmTracer> Vm<'a, W, T> {
    pub fn new(stream: &'a mut dyn ByteStream, writer: &'a mut W, tracer: T) -> Self {
        Self {
            state: VmState::new(),
            stream,
            writer,
            tracer,
        }
    }

    /// Makes a native function callable from scripts under its mangled
    /// name.
    pub fn bind_function(&mut self, name: &str, func: NativeFn) {
        self.state.bind_function(name, func);
    }

    /// Runs instructions until the end of the stream.
    pub fn execute(&mut self) -> RunResult<()> {
        while !self.stream.eof() {
            self.step()?;
        }
        Ok(())
    }

    /// Fetches, decodes, traces, and executes one instruction.
    fn step(&mut self) -> RunResult<Opcode> {
        let position = self.stream.position();
        let byte = self.stream.read_u8()?;
        let opcode = Opcode::from_byte(byte).ok_or(RunError::UnrecognizedInstruction {
            opcode: byte,
            position,
        })?;

        self.tracer
            .on_instruction(position, opcode, self.state.frame_level, self.state.read_level);
        self.handle_instruction(opcode)?;
        Ok(opcode)
    }

    fn handle_instruction(&mut self, opcode: Opcode) -> RunResult<()> {
        match opcode {
            Opcode::Nop => Ok(()),

            Opcode::Ifl => {
                self.state.open_frame();
                Ok(())
            }

            Opcode::Dfl => {
                if self.state.frames.len() <= 1 {
                    return Err(RunError::Stream("unbalanced frame close".to_owned()));
                }
                let matched = self.state.executing();
                if matched {
                    self.state.read_level -= 1;
                }
                self.state.close_frame();
                if matched {
                    // frees locals the closed frame was keeping alive
                    self.suggest_gc();
                }
                Ok(())
            }

            Opcode::Irl => {
                if self.state.executing() {
                    self.state.read_level += 1;
                }
                Ok(())
            }

            Opcode::Drl => {
                let count = self.stream.read_u8()?;
                if self.state.executing() {
                    self.state.read_level -= i32::from(count);
                }
                Ok(())
            }

            Opcode::IrlIfTrue => {
                if !self.state.executing() {
                    return Ok(());
                }
                let top = self.state.peek_ref()?;
                let condition = match self.truthiness(top) {
                    Ok(value) => value,
                    Err(error) => return self.state.raise(error),
                };
                self.state.pop_stack()?;
                self.state.current_frame().last_cond = condition;
                if condition {
                    self.state.read_level += 1;
                }
                Ok(())
            }

            Opcode::IrlIfFalse => {
                if self.state.executing() && !self.state.current_frame().last_cond {
                    self.state.read_level += 1;
                }
                Ok(())
            }

            Opcode::StoreAddress => {
                let id = self.stream.read_u32()?;
                let address = self.stream.read_u64()?;
                self.state.block_positions.insert(id, address);
                Ok(())
            }

            Opcode::Jump => {
                let id = self.stream.read_u32()?;
                if self.state.executing() {
                    let target = self.block_position(id)?;
                    self.stream.seek(target);
                }
                Ok(())
            }

            Opcode::JumpIfTrue => self.conditional_jump(true),
            Opcode::JumpIfFalse => self.conditional_jump(false),

            Opcode::TryCatchBlock => {
                if self.state.executing() {
                    self.run_try_catch()?;
                }
                Ok(())
            }

            Opcode::StoreAsLocal => {
                let name = self.stream.read_string()?;
                if self.state.executing() {
                    self.store_as_local(&name)?;
                }
                Ok(())
            }

            Opcode::NewVariable => {
                let name = self.stream.read_string()?;
                if self.state.executing() {
                    let id = self.state.heap.allocate_value(Value::Null, false, false);
                    self.state.current_frame().locals.push((name, id));
                }
                Ok(())
            }

            Opcode::NewNativeObject => {
                let _name = self.stream.read_string()?;
                if self.state.executing() {
                    self.tracer.on_unimplemented(Opcode::NewNativeObject);
                }
                Ok(())
            }

            Opcode::ArrayIndex => {
                if self.state.executing() {
                    self.array_index()?;
                }
                Ok(())
            }

            Opcode::NewMember => {
                let name = self.stream.read_string()?;
                if self.state.executing() {
                    let object = self.state.peek_ref()?;
                    let member = self.state.heap.allocate_value(Value::Null, false, false);
                    if let Err(error) = self.state.heap.get_mut(object).add_field(&name, member) {
                        return self.state.raise(error);
                    }
                }
                Ok(())
            }

            Opcode::LoadMember => {
                let name = self.stream.read_string()?;
                if self.state.executing() {
                    let object = self.state.peek_ref()?;
                    match self.state.heap.get(object).field_by_name(&name) {
                        Some(member) => self.state.push(member),
                        None => return self.state.raise(RunError::MemberNotFound { name }),
                    }
                }
                Ok(())
            }

            Opcode::NewFunction => {
                let is_global = self.stream.read_u8()? != 0;
                let nargs = self.stream.read_u32()?;
                let is_variadic = self.stream.read_u8()? != 0;
                let address = self.stream.read_u64()?;
                if self.state.executing() {
                    let address = if is_global { address } else { self.stream.position() };
                    let mut object = HeapObject::function(Function {
                        address,
                        nargs,
                        is_variadic,
                    });
                    object.temporary = true;
                    let id = self.state.heap.allocate(object);
                    self.state.push(id);
                }
                Ok(())
            }

            Opcode::InvokeObject => {
                let nargs = self.stream.read_u32()?;
                if self.state.executing() {
                    let callee = self.state.pop_ref()?;
                    self.dispatch_invoke(callee, nargs)?;
                }
                Ok(())
            }

            Opcode::InvokeNative => {
                let name = self.stream.read_string()?;
                let nargs = self.stream.read_i32()?;
                if self.state.executing() {
                    match self.state.native_registry.get(&name).copied() {
                        Some(func) => self.invoke_native_fn(func, nargs.max(0) as u32)?,
                        None => return self.state.raise(RunError::NativeNotBound { name }),
                    }
                }
                Ok(())
            }

            // recognized by the invocation loop; nothing to do here
            Opcode::Return => Ok(()),

            Opcode::Leave => {
                if self.state.executing() {
                    if self.state.frames.len() <= 1 {
                        return Err(RunError::Stream("unbalanced frame close".to_owned()));
                    }
                    self.state.close_frame();
                    self.state.read_level -= 1;
                }
                Ok(())
            }

            Opcode::Break => self.loop_escape(false),
            Opcode::Continue => self.loop_escape(true),

            Opcode::Print => {
                let count = self.stream.read_u32()?;
                if self.state.executing() {
                    for _ in 0..count {
                        let id = self.state.pop_ref()?;
                        let text = self.state.heap.object_to_string(id);
                        self.writer.stdout_write(&text);
                        if self.state.heap.get(id).temporary {
                            self.state.heap.free(id);
                        }
                    }
                    self.writer.stdout_push('\n');
                }
                Ok(())
            }

            Opcode::LoadLocal => {
                let name = self.stream.read_string()?;
                if self.state.executing() {
                    match self.state.lookup_local(&name) {
                        Some(id) => self.state.push(id),
                        None => {
                            return self
                                .state
                                .raise(RunError::Custom(format!("could not find object '{name}'")));
                        }
                    }
                }
                Ok(())
            }

            Opcode::LoadInteger => {
                let value = self.stream.read_i64()?;
                if self.state.executing() {
                    self.state.push_temp_value(Value::Int(value), true);
                }
                Ok(())
            }

            Opcode::LoadFloat => {
                let value = self.stream.read_f64()?;
                if self.state.executing() {
                    self.state.push_temp_value(Value::Float(value), true);
                }
                Ok(())
            }

            Opcode::LoadString => {
                let text = self.stream.read_string()?;
                if self.state.executing() {
                    self.state.push_temp_value(Value::Str(text), true);
                }
                Ok(())
            }

            Opcode::LoadNull => {
                if self.state.executing() {
                    self.state.push_temp_value(Value::Null, false);
                }
                Ok(())
            }

            Opcode::Pop => {
                if self.state.executing() {
                    self.state.pop_stack()?;
                }
                Ok(())
            }

            Opcode::UnaryMinus => self.unary_operation(Value::negate),
            Opcode::UnaryNot => self.unary_operation(Value::logical_not),

            Opcode::Assign => {
                if self.state.executing() {
                    self.plain_assignment()?;
                }
                Ok(())
            }

            Opcode::AddAssign | Opcode::SubAssign | Opcode::MulAssign | Opcode::DivAssign => {
                if self.state.executing() {
                    self.compound_assignment(opcode)?;
                }
                Ok(())
            }

            _ => {
                if self.state.executing() {
                    self.binary_operation(opcode)?;
                }
                Ok(())
            }
        }
    }

    fn block_position(&mut self, id: u32) -> RunResult<u64> {
        self.state
            .block_positions
            .get(&id)
            .copied()
            .ok_or_else(|| RunError::Stream(format!("jump to unregistered block {id}")))
    }

    /// Conditional jumps peek the condition (it stays on the stack for the
    /// trailing pop) and remember it in the frame's `last_cond`.
    fn conditional_jump(&mut self, jump_when: bool) -> RunResult<()> {
        let id = self.stream.read_u32()?;
        if !self.state.executing() {
            return Ok(());
        }

        let top = self.state.peek_ref()?;
        let condition = match self.truthiness(top) {
            Ok(value) => value,
            Err(error) => return self.state.raise(error),
        };
        self.state.current_frame().last_cond = condition;

        if condition == jump_when {
            let target = self.block_position(id)?;
            self.stream.seek(target);
        }
        Ok(())
    }

    fn truthiness(&self, id: HeapId) -> RunResult<bool> {
        self.state.heap.get(id).value()?.as_bool()
    }

    fn loop_escape(&mut self, cond: bool) -> RunResult<()> {
        let levels = self.stream.read_i32()?;
        if self.state.executing() {
            let target = self.state.frame_level - levels;
            let Ok(index) = usize::try_from(target) else {
                return Err(RunError::Stream("break/continue past the global frame".to_owned()));
            };
            self.state.frames[index].last_cond = cond;
            self.state.read_level -= levels;
        }
        Ok(())
    }

    /// Pops the top of the stack into a named frame local. Temporaries are
    /// cloned so the local owns a stable object; everything else is stored
    /// by reference.
    fn store_as_local(&mut self, name: &str) -> RunResult<()> {
        let top = self.state.pop_ref()?;
        let id = if self.state.heap.get(top).temporary {
            let cloned = self.state.heap.clone_object(top);
            self.state.heap.free(top);
            cloned
        } else {
            top
        };
        self.state.current_frame().locals.push((name.to_owned(), id));
        Ok(())
    }

    fn array_index(&mut self) -> RunResult<()> {
        let index = self.state.pop_ref()?;
        let object = self.state.pop_ref()?;

        let selected = match self.state.heap.get(index).value() {
            Ok(Value::Int(i)) => {
                let i = *i;
                match usize::try_from(i).ok().and_then(|i| self.state.heap.get(object).field_by_index(i)) {
                    Some(member) => Ok(member),
                    None => Err(RunError::Custom(format!("index {i} out of range"))),
                }
            }
            Ok(Value::Str(name)) => {
                let name = name.clone();
                self.state
                    .heap
                    .get(object)
                    .field_by_name(&name)
                    .ok_or(RunError::MemberNotFound { name })
            }
            Ok(other) => Err(RunError::InvalidType {
                type_string: other.type_string(),
            }),
            Err(error) => Err(error),
        };

        let result = match selected {
            Ok(member) => {
                self.state.push(member);
                Ok(())
            }
            Err(error) => self.state.raise(error),
        };

        if self.state.heap.get(index).temporary {
            self.state.heap.free(index);
        }
        if self.state.heap.get(object).temporary {
            self.state.heap.free(object);
        }
        result
    }

    /// Pops the callee and dispatches on its kind. The callee's identity is
    /// consumed here, so a temporary function object is freed before its
    /// body runs (the copied address survives).
    fn dispatch_invoke(&mut self, callee: HeapId, nargs: u32) -> RunResult<()> {
        let kind = self.state.heap.get(callee).kind.clone();
        if self.state.heap.get(callee).temporary {
            self.state.heap.free(callee);
        }

        match kind {
            ObjectKind::Function(function) => self.invoke_function(function, nargs),
            ObjectKind::Native(func) => self.invoke_native_fn(func, nargs),
            ObjectKind::Variable(value) => self.state.raise(RunError::BadInvoke {
                type_string: value.type_string(),
            }),
        }
    }

    /// The call protocol: save the return position, raise the read level,
    /// seek to the body, and run until its `return` executes one read level
    /// below the entry level. The operand stack is trimmed back to its
    /// entry height around the returned value, so values the body left
    /// behind (loop conditions, partial expressions) cannot leak into the
    /// caller's expression.
    fn invoke_function(&mut self, function: Function, callargs: u32) -> RunResult<()> {
        let arity_matches = if function.is_variadic {
            callargs >= function.nargs
        } else {
            callargs == function.nargs
        };
        if !arity_matches {
            for _ in 0..callargs {
                self.state.pop_stack()?;
            }
            return self.state.raise(RunError::InvalidArgs {
                expected: function.nargs as usize,
                provided: callargs as usize,
            });
        }

        self.tracer.on_invoke(function.address, callargs);

        if self.state.stack.len() < callargs as usize {
            return Err(RunError::Stream("value stack underflow".to_owned()));
        }
        let base = self.state.stack.len() - callargs as usize;
        self.state.jump_positions.push(self.stream.position());
        self.state.read_level += 1;
        self.stream.seek(function.address);

        let origin_read_level = self.state.read_level;

        while !self.stream.eof() {
            let opcode = self.step()?;
            if opcode == Opcode::Return && origin_read_level - 1 == self.state.read_level {
                let position = self
                    .state
                    .jump_positions
                    .pop()
                    .ok_or_else(|| RunError::Stream("return with no saved position".to_owned()))?;
                self.stream.seek(position);
                break;
            }
        }

        let result = if self.state.stack.len() > base {
            self.state.pop_ref()?
        } else {
            self.state.heap.allocate_value(Value::Null, true, false)
        };
        while self.state.stack.len() > base {
            self.state.pop_stack()?;
        }
        self.state.push(result);
        Ok(())
    }

    /// Native calls receive their arguments popped and restored to source
    /// order. The callee pushes its own result; on error the VM pushes null
    /// to keep the stack shape before raising.
    fn invoke_native_fn(&mut self, func: NativeFn, callargs: u32) -> RunResult<()> {
        let mut args: SmallVec<[HeapId; 8]> = SmallVec::new();
        for _ in 0..callargs {
            args.push(self.state.pop_ref()?);
        }
        args.reverse();

        let mut ctx = NativeCtx {
            state: &mut self.state,
            writer: self.writer,
            pending_invoke: None,
        };
        let result = func(&mut ctx, &args);
        let pending = ctx.pending_invoke;

        match result {
            Ok(()) => {
                if let Some((callee, nargs)) = pending {
                    self.dispatch_invoke(callee, nargs)?;
                }
                Ok(())
            }
            Err(error) => {
                self.state.push_temp_value(Value::Null, false);
                self.state.raise(error)
            }
        }
    }

    /// Runs the try body with handling enabled; when the frame flag trips,
    /// the read level is restored to its pre-try value and the catch body
    /// runs under the outer frame.
    fn run_try_catch(&mut self) -> RunResult<()> {
        let old_frame_level = self.state.frame_level;
        let old_read_level = self.state.read_level;
        let mut exception_occurred = false;

        self.state.read_level += 1;
        let previous_handling = self.state.can_handle_exceptions;
        self.state.can_handle_exceptions = true;

        loop {
            self.step()?;

            let frame = self.state.current_frame();
            if frame.exception_occurred {
                exception_occurred = true;
                frame.exception_occurred = false;
                self.state.read_level = old_read_level;
            }
            if self.state.frame_level == old_frame_level {
                break;
            }
            if self.stream.eof() {
                return Err(RunError::Stream("unterminated try block".to_owned()));
            }
        }

        self.state.can_handle_exceptions = previous_handling;

        if exception_occurred {
            self.state.read_level += 1;
        }
        loop {
            self.step()?;
            if self.state.frame_level == old_frame_level {
                break;
            }
            if self.stream.eof() {
                return Err(RunError::Stream("unterminated catch block".to_owned()));
            }
        }

        Ok(())
    }

    fn plain_assignment(&mut self) -> RunResult<()> {
        let right = self.state.pop_ref()?;
        let left = self.state.peek_ref()?;

        if self.state.heap.get(left).constant {
            self.free_if_temporary(right);
            return self.state.raise(RunError::ConstModified);
        }

        // the left slot takes a deep copy of the right's contents, so every
        // reference to the slot observes the new value
        let cloned = self.state.heap.clone_object(right);
        let (kind, fields) = {
            let object = self.state.heap.get(cloned);
            (object.kind.clone(), object.fields.clone())
        };
        self.state.heap.free(cloned);
        self.state.heap.replace_object(left, kind, fields);

        self.free_if_temporary(right);
        Ok(())
    }

    fn compound_assignment(&mut self, opcode: Opcode) -> RunResult<()> {
        let right = self.state.pop_ref()?;
        let left = self.state.peek_ref()?;

        if self.state.heap.get(left).constant {
            self.free_if_temporary(right);
            return self.state.raise(RunError::ConstModified);
        }

        let right_value = match self.state.heap.get(right).value() {
            Ok(value) => value.clone(),
            Err(error) => {
                self.free_if_temporary(right);
                return self.state.raise(error);
            }
        };

        // += on a string target appends the right operand's textual form
        let append = if opcode == Opcode::AddAssign
            && matches!(self.state.heap.get(left).value(), Ok(Value::Str(_)))
        {
            Some(self.state.heap.object_to_string(right))
        } else {
            None
        };

        let result = match self.state.heap.get_mut(left).value_mut() {
            Ok(value) => {
                if let Some(text) = append {
                    if let Value::Str(s) = value {
                        s.push_str(&text);
                    }
                    Ok(())
                } else {
                    match opcode {
                        Opcode::AddAssign => value.add(&right_value),
                        Opcode::SubAssign => value.subtract(&right_value),
                        Opcode::MulAssign => value.multiply(&right_value),
                        Opcode::DivAssign => value.divide(&right_value),
                        _ => Ok(()),
                    }
                }
            }
            Err(_) => Err(RunError::NullReference),
        };

        self.free_if_temporary(right);
        match result {
            Ok(()) => Ok(()),
            Err(error) => self.state.raise(error),
        }
    }

    fn binary_operation(&mut self, opcode: Opcode) -> RunResult<()> {
        let right = self.state.pop_ref()?;
        let left = self.state.pop_ref()?;

        // + with a string on either side concatenates
        if opcode == Opcode::Add {
            let left_is_str = matches!(self.state.heap.get(left).value(), Ok(Value::Str(_)));
            let right_is_str = matches!(self.state.heap.get(right).value(), Ok(Value::Str(_)));
            if left_is_str || right_is_str {
                let text = format!(
                    "{}{}",
                    self.state.heap.object_to_string(left),
                    self.state.heap.object_to_string(right)
                );
                self.free_if_temporary(left);
                self.free_if_temporary(right);
                self.state.push_temp_value(Value::Str(text), false);
                return Ok(());
            }
        }

        let right_value = match self.state.heap.get(right).value() {
            Ok(value) => value.clone(),
            Err(error) => {
                self.free_if_temporary(left);
                self.free_if_temporary(right);
                return self.state.raise(error);
            }
        };

        let result = self.state.heap.clone_object(left);
        let outcome = match self.state.heap.get_mut(result).value_mut() {
            Ok(value) => match opcode {
                Opcode::Pow => value.power(&right_value),
                Opcode::Add => value.add(&right_value),
                Opcode::Sub => value.subtract(&right_value),
                Opcode::Mul => value.multiply(&right_value),
                Opcode::Div => value.divide(&right_value),
                Opcode::Mod => value.modulus(&right_value),
                Opcode::And => value.logical_and(&right_value),
                Opcode::Or => value.logical_or(&right_value),
                Opcode::Eql => value.equals(&right_value),
                Opcode::Neql => value.not_equals(&right_value),
                Opcode::Less => value.less(&right_value),
                Opcode::Greater => value.greater(&right_value),
                Opcode::LessEql => value.less_equal(&right_value),
                Opcode::GreaterEql => value.greater_equal(&right_value),
                Opcode::BitAnd => value.bit_and(&right_value),
                Opcode::BitOr => value.bit_or(&right_value),
                Opcode::BitXor => value.bit_xor(&right_value),
                Opcode::LeftShift => value.shift_left(&right_value),
                Opcode::RightShift => value.shift_right(&right_value),
                _ => Err(RunError::Stream(format!("opcode {opcode} is not a binary operator"))),
            },
            Err(error) => Err(error),
        };

        self.free_if_temporary(left);
        self.free_if_temporary(right);

        match outcome {
            Ok(()) => {
                self.state.heap.get_mut(result).temporary = true;
                self.state.push(result);
                Ok(())
            }
            Err(error) => {
                self.state.heap.free(result);
                self.state.raise(error)
            }
        }
    }

    fn unary_operation(&mut self, op: fn(&mut Value) -> RunResult<()>) -> RunResult<()> {
        if !self.state.executing() {
            return Ok(());
        }

        let top = self.state.pop_ref()?;
        let result = self.state.heap.clone_object(top);
        self.free_if_temporary(top);

        let outcome = match self.state.heap.get_mut(result).value_mut() {
            Ok(value) => op(value),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {
                self.state.heap.get_mut(result).temporary = true;
                self.state.push(result);
                Ok(())
            }
            Err(error) => {
                self.state.heap.free(result);
                self.state.raise(error)
            }
        }
    }

    fn free_if_temporary(&mut self, id: HeapId) {
        if self.state.heap.get(id).temporary {
            self.state.heap.free(id);
        }
    }

    /// Collects when the live count reaches the current threshold, then
    /// raises the threshold one step toward its maximum.
    fn suggest_gc(&mut self) {
        if self.state.heap.num_objects() >= self.state.max_objects {
            let (collected, live) = self.state.run_gc();
            self.tracer.on_gc(collected, live);
            self.state.max_objects = (self.state.max_objects + GC_THRESHOLD_STEP).min(GC_THRESHOLD_MAX);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{BytecodeEmitter, CodeBuilder},
        io::CaptureWriter,
        tracer::NoopTracer,
    };

    fn run_image(builder: CodeBuilder) -> (CaptureWriter, VmState) {
        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();
        let mut stream = MemoryByteStream::new(image).expect("valid image");
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);
        vm.execute().expect("execution failed");
        let state = vm.state;
        (writer, state)
    }

    #[test]
    fn test_print_integer_literal() {
        let mut builder = CodeBuilder::new();
        builder.emit_load_integer(14);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, state) = run_image(builder);
        assert_eq!(writer.output, "14\n");
        // the temporary was freed by print
        assert_eq!(state.heap.num_objects(), 0);
    }

    #[test]
    fn test_store_and_load_local() {
        let mut builder = CodeBuilder::new();
        builder.emit_load_integer(42);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_x");
        builder.emit_with_string(Opcode::LoadLocal, "M_x");
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, state) = run_image(builder);
        assert_eq!(writer.output, "42\n");
        // the stored local survives (non-temporary)
        assert_eq!(state.heap.num_objects(), 1);
    }

    #[test]
    fn test_binary_add_pops_operands() {
        let mut builder = CodeBuilder::new();
        builder.emit_load_integer(2);
        builder.emit_load_integer(3);
        builder.emit(Opcode::Add);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, state) = run_image(builder);
        assert_eq!(writer.output, "5\n");
        assert_eq!(state.heap.num_objects(), 0);
        assert!(state.stack.is_empty());
    }

    #[test]
    fn test_string_concatenation_coerces() {
        let mut builder = CodeBuilder::new();
        builder.emit_with_string(Opcode::LoadString, "n=");
        builder.emit_load_integer(7);
        builder.emit(Opcode::Add);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, _) = run_image(builder);
        assert_eq!(writer.output, "n=7\n");
    }

    #[test]
    fn test_skipped_instructions_consume_operands() {
        // open a frame without raising the read level: the body is decoded
        // but not executed
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::Ifl);
        builder.emit_load_integer(99);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_ghost");
        builder.emit(Opcode::Dfl);
        builder.emit_load_integer(1);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, state) = run_image(builder);
        assert_eq!(writer.output, "1\n");
        assert!(state.lookup_local("M_ghost").is_none());
    }

    #[test]
    fn test_jump_skips_forward() {
        let mut builder = CodeBuilder::new();
        builder.emit_with_u32(Opcode::Jump, 1);
        builder.emit_load_integer(111);
        builder.emit_with_u32(Opcode::Print, 1);
        builder.mark_label(1);
        builder.emit_load_integer(222);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, _) = run_image(builder);
        assert_eq!(writer.output, "222\n");
    }

    #[test]
    fn test_function_invocation_round_trip() {
        // func identity(a) { return a; } print identity(5)
        let mut builder = CodeBuilder::new();
        builder.emit_new_function(true, 1, false, 1);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_identity");
        builder.mark_label(1);
        builder.emit_with_u32(Opcode::Jump, 2);
        builder.emit(Opcode::Ifl);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_a");
        builder.emit_with_string(Opcode::LoadLocal, "M_a");
        builder.emit(Opcode::Drl);
        builder.push_u8(1);
        builder.emit(Opcode::Dfl);
        builder.emit(Opcode::Return);
        builder.mark_label(2);

        builder.emit_load_integer(5);
        builder.emit_with_string(Opcode::LoadLocal, "M_identity");
        builder.emit_with_u32(Opcode::InvokeObject, 1);
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, state) = run_image(builder);
        assert_eq!(writer.output, "5\n");
        assert!(state.stack.is_empty());
    }

    #[test]
    fn test_invoke_arity_mismatch_is_error() {
        let mut builder = CodeBuilder::new();
        builder.emit_new_function(true, 2, false, 1);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_f");
        builder.mark_label(1);
        builder.emit_with_u32(Opcode::Jump, 2);
        builder.emit(Opcode::Ifl);
        builder.emit(Opcode::LoadNull);
        builder.emit(Opcode::Drl);
        builder.push_u8(1);
        builder.emit(Opcode::Dfl);
        builder.emit(Opcode::Return);
        builder.mark_label(2);

        builder.emit_load_integer(1);
        builder.emit_with_string(Opcode::LoadLocal, "M_f");
        builder.emit_with_u32(Opcode::InvokeObject, 1);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();
        let mut stream = MemoryByteStream::new(image).unwrap();
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);

        let result = vm.execute();
        assert_eq!(
            result,
            Err(RunError::InvalidArgs {
                expected: 2,
                provided: 1
            })
        );
    }

    #[test]
    fn test_invoke_non_function_is_error() {
        let mut builder = CodeBuilder::new();
        builder.emit_load_integer(3);
        builder.emit_with_u32(Opcode::InvokeObject, 0);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();
        let mut stream = MemoryByteStream::new(image).unwrap();
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);

        assert!(matches!(vm.execute(), Err(RunError::BadInvoke { .. })));
    }

    #[test]
    fn test_const_assignment_raises() {
        // literals are const: `1 = 2` must fail
        let mut builder = CodeBuilder::new();
        builder.emit_load_integer(1);
        builder.emit_load_integer(2);
        builder.emit(Opcode::Assign);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();
        let mut stream = MemoryByteStream::new(image).unwrap();
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);

        assert_eq!(vm.execute(), Err(RunError::ConstModified));
    }

    #[test]
    fn test_assignment_writes_through_reference() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::LoadNull);
        builder.emit_with_string(Opcode::StoreAsLocal, "M_x");
        builder.emit_with_string(Opcode::LoadLocal, "M_x");
        builder.emit_load_integer(9);
        builder.emit(Opcode::Assign);
        builder.emit(Opcode::Pop);
        builder.emit_with_string(Opcode::LoadLocal, "M_x");
        builder.emit_with_u32(Opcode::Print, 1);

        let (writer, _) = run_image(builder);
        assert_eq!(writer.output, "9\n");
    }

    #[test]
    fn test_native_function_binding() {
        fn push_seven(ctx: &mut NativeCtx<'_>, _args: &[HeapId]) -> RunResult<()> {
            ctx.state.push_temp_value(Value::Int(7), true);
            Ok(())
        }

        let mut builder = CodeBuilder::new();
        builder.emit_with_string(Opcode::LoadLocal, "Test_seven");
        builder.emit_with_u32(Opcode::InvokeObject, 0);
        builder.emit_with_u32(Opcode::Print, 1);

        let (bytes, labels, fixups) = builder.into_parts();
        let image = BytecodeEmitter::new(bytes, labels, fixups).emit();
        let mut stream = MemoryByteStream::new(image).unwrap();
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);
        vm.bind_function("Test_seven", push_seven);
        vm.execute().unwrap();

        assert_eq!(writer.output, "7\n");
    }

    #[test]
    fn test_unrecognized_opcode() {
        let mut image = Vec::new();
        image.extend_from_slice(crate::bytecode::MAGIC);
        image.extend_from_slice(crate::bytecode::VERSION);
        image.push(200);

        let mut stream = MemoryByteStream::new(image).unwrap();
        let mut writer = CaptureWriter::new();
        let mut vm = Vm::new(&mut stream, &mut writer, NoopTracer);
        assert!(matches!(
            vm.execute(),
            Err(RunError::UnrecognizedInstruction { opcode: 200, .. })
        ));
    }
}
