//! The build-and-run pipeline.
//!
//! Build steps: lex, parse, analyze (scope and identifier rules, imports,
//! literal propagation), generate instructions, emit bytecode. Any fatal
//! diagnostic stops the pipeline before code generation; warnings and info
//! messages ride along in the result either way.
//!
//! Running binds the runtime library into a fresh VM and executes either
//! from memory or from an emitted `.ac` file.

use std::path::Path;

use crate::{
    bytecode::BytecodeEmitter,
    compiler::Compiler,
    error::{BuildMessage, format_messages},
    io::ConsoleWriter,
    lexer::Lexer,
    parser::Parser,
    rtlib::{runtime_bindings, runtime_module_defines},
    semantic::SemanticAnalyzer,
    state::CompilerState,
    tracer::NoopTracer,
    vm::{ByteStream, FileByteStream, MemoryByteStream, RunError, Vm},
};

/// An unhandled runtime exception, with the VM's diagnostic dump (stack,
/// heap, frames) captured at the point of failure.
#[derive(Debug)]
pub struct ExecutionFailure {
    pub error: RunError,
    pub dump: String,
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unhandled exception: {}", self.error)
    }
}

/// Outcome of building a script: bytecode (when no fatal diagnostics) plus
/// every accumulated message.
#[derive(Debug)]
pub struct BuildOutput {
    pub bytecode: Option<Vec<u8>>,
    pub messages: Vec<BuildMessage>,
}

impl BuildOutput {
    /// Formats the diagnostics grouped per file, for display.
    #[must_use]
    pub fn report(&self) -> String {
        format_messages(&self.messages)
    }
}

/// A script source plus the path it came from (used for import resolution
/// and diagnostics).
pub struct Script {
    code: String,
    source_path: String,
}

impl Script {
    #[must_use]
    pub fn new(code: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source_path: source_path.into(),
        }
    }

    /// Compiles the source to a bytecode image.
    #[must_use]
    pub fn compile(&self) -> BuildOutput {
        let (tokens, lex_errors) = Lexer::new(&self.code, &self.source_path).scan_tokens();
        let mut parser = Parser::new(tokens, lex_errors, &self.source_path);
        let unit = parser.parse();

        let mut state = CompilerState::new(parser.next_node_id());
        state.errors.append(&mut parser.errors);

        let Some(mut unit) = unit else {
            return BuildOutput {
                bytecode: None,
                messages: state.errors,
            };
        };

        {
            let mut analyzer = SemanticAnalyzer::new(&mut state);
            for def in runtime_module_defines() {
                analyzer.add_module(&def);
            }
            analyzer.analyze(&mut unit);
        }

        let bytecode = Compiler::new(&mut state).compile(&mut unit).map(|builder| {
            let (bytes, labels, fixups) = builder.into_parts();
            BytecodeEmitter::new(bytes, labels, fixups).emit()
        });

        BuildOutput {
            bytecode,
            messages: state.errors,
        }
    }

    /// Compiles and runs; when `output_path` is given the bytecode is
    /// written there and executed from the file, otherwise it runs from
    /// memory. Returns the build output so the caller can report
    /// diagnostics; runtime failure comes back as the `Err` side.
    pub fn compile_and_run<W: ConsoleWriter>(
        &self,
        output_path: Option<&Path>,
        writer: &mut W,
    ) -> (BuildOutput, Result<(), ExecutionFailure>) {
        let output = self.compile();
        let Some(bytecode) = output.bytecode.clone() else {
            return (output, Ok(()));
        };

        let stream_failure = |error: RunError| ExecutionFailure {
            error,
            dump: String::new(),
        };

        let result = match output_path {
            Some(path) => {
                if let Err(err) = std::fs::write(path, &bytecode) {
                    Err(stream_failure(RunError::Stream(format!(
                        "could not write bytecode to '{}': {err}",
                        path.display()
                    ))))
                } else {
                    match FileByteStream::open(path) {
                        Ok(mut stream) => run_stream(&mut stream, writer),
                        Err(err) => Err(stream_failure(RunError::Stream(err.to_string()))),
                    }
                }
            }
            None => match MemoryByteStream::new(bytecode) {
                Ok(mut stream) => run_stream(&mut stream, writer),
                Err(err) => Err(stream_failure(RunError::Stream(err.to_string()))),
            },
        };

        (output, result)
    }
}

/// Executes a bytecode stream in a fresh VM with the runtime library
/// bound. An unhandled exception carries the machine's state dump.
pub fn run_stream<W: ConsoleWriter>(stream: &mut dyn ByteStream, writer: &mut W) -> Result<(), ExecutionFailure> {
    let mut vm = Vm::new(stream, writer, NoopTracer);
    for (name, func) in runtime_bindings() {
        vm.bind_function(name, func);
    }
    vm.execute().map_err(|error| ExecutionFailure {
        dump: vm.state.dump(),
        error,
    })
}

/// Compiles and runs entirely in memory, capturing output. The seam most
/// tests go through.
pub fn run_source<W: ConsoleWriter>(
    code: &str,
    source_path: &str,
    writer: &mut W,
) -> (BuildOutput, Result<(), ExecutionFailure>) {
    Script::new(code, source_path).compile_and_run(None, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorLevel, io::CaptureWriter};

    #[test]
    fn test_compile_produces_bytecode() {
        let output = Script::new("module M; print 1;", "m.ax").compile();
        assert!(output.bytecode.is_some());
    }

    #[test]
    fn test_fatal_errors_block_emission() {
        let output = Script::new("module M; print missing;", "m.ax").compile();
        assert!(output.bytecode.is_none());
        assert!(output.messages.iter().any(|m| m.level == ErrorLevel::Fatal));
    }

    #[test]
    fn test_run_from_memory() {
        let mut writer = CaptureWriter::new();
        let (output, result) = run_source("module M; print 'hello';", "m.ax", &mut writer);
        assert!(output.bytecode.is_some());
        result.unwrap();
        assert_eq!(writer.output, "hello\n");
    }

    #[test]
    fn test_run_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("m.ac");

        let mut writer = CaptureWriter::new();
        let script = Script::new("module M; print 2 + 2;", "m.ax");
        let (output, result) = script.compile_and_run(Some(out.as_path()), &mut writer);

        assert!(output.bytecode.is_some());
        result.unwrap();
        assert_eq!(writer.output, "4\n");
        assert_eq!(std::fs::read(&out).unwrap(), output.bytecode.unwrap());
    }

    #[test]
    fn test_compile_twice_identical() {
        let source = "module M; var x = 3; func f(a) { return a * x; } print f(4);";
        let a = Script::new(source, "m.ax").compile().bytecode.unwrap();
        let b = Script::new(source, "m.ax").compile().bytecode.unwrap();
        assert_eq!(a, b);
    }
}
