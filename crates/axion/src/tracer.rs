//! VM execution tracing.
//!
//! The VM is parameterized over a [`VmTracer`]; with [`NoopTracer`] every
//! hook is an empty inlined body, so production execution pays nothing.
//! [`StderrTracer`] prints a line per dispatched instruction, which is the
//! quickest way to see the read/frame level discipline at work.

use crate::bytecode::Opcode;

/// Hook points for observing VM execution.
pub trait VmTracer {
    /// Called before each dispatched instruction.
    fn on_instruction(&mut self, _position: u64, _opcode: Opcode, _frame_level: i32, _read_level: i32) {}

    /// Called when a function object is invoked.
    fn on_invoke(&mut self, _address: u64, _nargs: u32) {}

    /// Called after a garbage collection pass.
    fn on_gc(&mut self, _collected: usize, _live: usize) {}

    /// Called for decoded-but-unimplemented instructions.
    fn on_unimplemented(&mut self, _opcode: Opcode) {}
}

/// Does nothing; the default tracer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Logs every hook to stderr.
#[derive(Debug, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, position: u64, opcode: Opcode, frame_level: i32, read_level: i32) {
        eprintln!("[vm] {position:>6} {opcode:<16} fl={frame_level} rl={read_level}");
    }

    fn on_invoke(&mut self, address: u64, nargs: u32) {
        eprintln!("[vm] invoke @{address} nargs={nargs}");
    }

    fn on_gc(&mut self, collected: usize, live: usize) {
        eprintln!("[vm] gc collected={collected} live={live}");
    }

    fn on_unimplemented(&mut self, opcode: Opcode) {
        eprintln!("[vm] unimplemented instruction {opcode}");
    }
}
