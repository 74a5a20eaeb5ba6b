//! Axion: a small scripting language compiled to compact bytecode and
//! executed by a stack machine with a mark-and-sweep heap.
//!
//! The pipeline runs lexer, parser, semantic analyzer, code generator, and
//! bytecode emitter, then hands the image to the VM; [`Script`] ties the
//! stages together and [`Script::compile_and_run`] is the one-call entry
//! point the CLI uses.

mod ast;
mod bytecode;
mod compiler;
mod error;
mod io;
mod lexer;
mod location;
mod parser;
mod rtlib;
mod script;
mod semantic;
mod state;
mod syntax;
mod token;
mod tracer;
mod vm;

pub use crate::{
    ast::{Ast, AstKind, FunctionCallNode, NodeId, VariableNode},
    bytecode::{AddressFixup, BytecodeEmitter, CodeBuilder, HEADER_LEN, MAGIC, Opcode, STORE_ADDRESS_RECORD_LEN, VERSION},
    compiler::{CompileOptions, Compiler},
    error::{BuildMessage, ErrorLevel, ErrorType, format_messages},
    io::{CaptureWriter, ConsoleWriter, StdoutWriter},
    lexer::Lexer,
    location::SourceLocation,
    parser::Parser,
    rtlib::{runtime_bindings, runtime_module_defines},
    script::{BuildOutput, ExecutionFailure, Script, run_source, run_stream},
    semantic::SemanticAnalyzer,
    state::{CompilerState, ExternalFunction, Label, LevelInfo, LevelType, ModuleDefine, Symbol, make_variable_name},
    syntax::{BinaryOp, Keyword, UnaryOp},
    token::{Token, TokenKind},
    tracer::{NoopTracer, StderrTracer, VmTracer},
    vm::{
        ByteStream, BytecodeError, FileByteStream, Frame, Function, GC_THRESHOLD_MAX, GC_THRESHOLD_MIN,
        GC_THRESHOLD_STEP, Heap, HeapId, HeapObject, MemoryByteStream, NativeCtx, NativeFn, NativeHandle, ObjectKind,
        RunError, RunResult, Value, Vm, VmState, format_float,
    },
};
