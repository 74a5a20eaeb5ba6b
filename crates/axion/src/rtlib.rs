//! The runtime library: native functions exposed to scripts as the
//! `Clock`, `FileIO`, `Runtime`, `Reflection`, `Convert`, and `Console`
//! modules.
//!
//! Each function receives its arguments already popped from the stack and
//! pushes exactly one result. Arity is checked here (the compiler records
//! native arities for tooling but does not enforce them).

use std::{
    io::{Read as _, Write as _},
    time::Instant,
};

use crate::{
    state::ModuleDefine,
    vm::{HeapId, NativeCtx, NativeHandle, RunError, RunResult, Value},
};

/// The native modules visible to the semantic analyzer.
#[must_use]
pub fn runtime_module_defines() -> Vec<ModuleDefine> {
    vec![
        ModuleDefine::new("Clock").define("start", 0).define("stop", 0),
        ModuleDefine::new("FileIO")
            .define("open", 2)
            .define("write", 2)
            .define("read", 2)
            .define("close", 1),
        ModuleDefine::new("Runtime")
            .define("loadlib", 1)
            .define("loadfunc", 2)
            .define("invoke", 1),
        ModuleDefine::new("Reflection").define("typeof", 1),
        ModuleDefine::new("Convert")
            .define("toString", 1)
            .define("toInt", 1)
            .define("toFloat", 1)
            .define("toBool", 1),
        ModuleDefine::new("Console")
            .define("system", 1)
            .define("println", 1)
            .define("readln", 0),
    ]
}

/// All mangled-name/function pairs to bind before execution.
#[must_use]
pub fn runtime_bindings() -> Vec<(&'static str, crate::vm::NativeFn)> {
    vec![
        ("Clock_start", clock_start),
        ("Clock_stop", clock_stop),
        ("FileIO_open", fileio_open),
        ("FileIO_write", fileio_write),
        ("FileIO_read", fileio_read),
        ("FileIO_close", fileio_close),
        ("Runtime_loadlib", runtime_loadlib),
        ("Runtime_loadfunc", runtime_loadfunc),
        ("Runtime_invoke", runtime_invoke),
        ("Reflection_typeof", reflection_typeof),
        ("Convert_toString", convert_to_string),
        ("Convert_toInt", convert_to_int),
        ("Convert_toFloat", convert_to_float),
        ("Convert_toBool", convert_to_bool),
        ("Console_system", console_system),
        ("Console_println", console_println),
        ("Console_readln", console_readln),
    ]
}

fn check_args(expected: usize, args: &[HeapId]) -> RunResult<()> {
    if args.len() != expected {
        return Err(RunError::InvalidArgs {
            expected,
            provided: args.len(),
        });
    }
    Ok(())
}

fn arg_value<'h>(ctx: &'h NativeCtx<'_>, id: HeapId) -> RunResult<&'h Value> {
    ctx.state.heap.get(id).value()
}

fn arg_string(ctx: &NativeCtx<'_>, id: HeapId) -> RunResult<String> {
    match arg_value(ctx, id)? {
        Value::Str(s) => Ok(s.clone()),
        other => Err(RunError::Conversion {
            from: other.type_string(),
            to: "string",
        }),
    }
}

// --- Clock ---

fn clock_start(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(0, args)?;
    ctx.state.clock = Some(Instant::now());
    ctx.state.push_temp_value(Value::Null, false);
    Ok(())
}

fn clock_stop(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(0, args)?;
    let started = ctx
        .state
        .clock
        .ok_or_else(|| RunError::Custom("the clock has not been started".to_owned()))?;
    let elapsed = started.elapsed().as_secs_f64();
    ctx.state.push_temp_value(Value::Float(elapsed), true);
    Ok(())
}

// --- FileIO ---

fn fileio_open(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(2, args)?;
    let path = arg_string(ctx, args[0])?;
    let mode = arg_string(ctx, args[1])?;

    let mut options = std::fs::OpenOptions::new();
    match mode.as_str() {
        "r" | "rb" => options.read(true),
        "w" | "wb" => options.write(true).create(true).truncate(true),
        "a" | "ab" => options.append(true).create(true),
        _ => {
            return Err(RunError::Custom(format!("unknown file mode '{mode}'")));
        }
    };

    let file = options
        .open(&path)
        .map_err(|_| RunError::Custom("file could not be opened".to_owned()))?;
    let handle = ctx.state.store_file(file);

    ctx.state
        .push_temp_value(Value::Native(NativeHandle { tag: "file", handle }), true);
    Ok(())
}

fn file_handle(ctx: &NativeCtx<'_>, id: HeapId) -> RunResult<usize> {
    match arg_value(ctx, id)? {
        Value::Native(handle) if handle.tag == "file" => Ok(handle.handle),
        other => Err(RunError::Conversion {
            from: other.type_string(),
            to: "file",
        }),
    }
}

fn fileio_write(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(2, args)?;
    let handle = file_handle(ctx, args[0])?;
    let content = ctx.state.heap.object_to_string(args[1]);

    let file = ctx
        .state
        .files
        .get_mut(handle)
        .and_then(Option::as_mut)
        .ok_or_else(|| RunError::Custom("file is not open".to_owned()))?;
    file.write_all(content.as_bytes())
        .map_err(|_| RunError::Custom("file could not be written to".to_owned()))?;

    let written = i64::try_from(content.len()).unwrap_or(i64::MAX);
    ctx.state.push_temp_value(Value::Int(written), true);
    Ok(())
}

/// Reads up to `size - 1` bytes, stopping at a newline (which is kept).
fn fileio_read(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(2, args)?;
    let handle = file_handle(ctx, args[0])?;
    let size = match arg_value(ctx, args[1])? {
        Value::Int(v) => *v,
        other => {
            return Err(RunError::Conversion {
                from: other.type_string(),
                to: "int",
            });
        }
    };

    let file = ctx
        .state
        .files
        .get_mut(handle)
        .and_then(Option::as_mut)
        .ok_or_else(|| RunError::Custom("file is not open".to_owned()))?;

    let mut bytes = Vec::new();
    let limit = size.max(1) as usize - 1;
    let mut one = [0u8; 1];
    while bytes.len() < limit {
        match file.read(&mut one) {
            Ok(0) => break,
            Ok(_) => {
                bytes.push(one[0]);
                if one[0] == b'\n' {
                    break;
                }
            }
            Err(_) => {
                return Err(RunError::Custom("file could not be read from".to_owned()));
            }
        }
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    ctx.state.push_temp_value(Value::Str(text), true);
    Ok(())
}

fn fileio_close(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let handle = file_handle(ctx, args[0])?;
    let closed = ctx.state.files.get_mut(handle).and_then(Option::take);
    if closed.is_none() {
        return Err(RunError::Custom("file could not be closed".to_owned()));
    }
    ctx.state.push_temp_value(Value::Int(0), true);
    Ok(())
}

// --- Runtime ---

/// Dynamic-library loading lives in a platform layer this build does not
/// carry; the bindings exist so arity and error behavior stay stable.
fn runtime_loadlib(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let name = arg_string(ctx, args[0]).unwrap_or_default();
    Err(RunError::LibraryLoad { name })
}

fn runtime_loadfunc(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(2, args)?;
    let name = arg_string(ctx, args[1]).unwrap_or_default();
    Err(RunError::LibraryLoad { name })
}

/// `Runtime.invoke(callee, args...)`: re-pushes the arguments and asks the
/// VM to invoke the callee once this native returns.
fn runtime_invoke(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    if args.is_empty() {
        return Err(RunError::Custom("invoke() requires at least 1 parameter".to_owned()));
    }

    for arg in &args[1..] {
        ctx.state.push(*arg);
    }
    let nargs = u32::try_from(args.len() - 1).unwrap_or(u32::MAX);
    ctx.pending_invoke = Some((args[0], nargs));
    Ok(())
}

// --- Reflection ---

fn reflection_typeof(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let type_string = ctx.state.heap.get(args[0]).type_string();
    ctx.state.push_temp_value(Value::Str(type_string), true);
    Ok(())
}

// --- Convert ---

fn convert_to_string(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let text = ctx.state.heap.object_to_string(args[0]);
    ctx.state.push_temp_value(Value::Str(text), true);
    Ok(())
}

fn convert_to_int(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let result = match arg_value(ctx, args[0])? {
        Value::Int(v) => *v,
        Value::Float(v) => *v as i64,
        Value::Str(s) => {
            let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).ok()
            } else {
                s.trim().parse().ok()
            };
            parsed.ok_or_else(|| RunError::Custom(format!("string '{s}' could not be parsed to int")))?
        }
        other => {
            return Err(RunError::Conversion {
                from: other.type_string(),
                to: "int",
            });
        }
    };
    ctx.state.push_temp_value(Value::Int(result), true);
    Ok(())
}

fn convert_to_float(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let result = match arg_value(ctx, args[0])? {
        Value::Int(v) => *v as f64,
        Value::Float(v) => *v,
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| RunError::Custom(format!("string '{s}' could not be parsed to float")))?,
        other => {
            return Err(RunError::Conversion {
                from: other.type_string(),
                to: "float",
            });
        }
    };
    ctx.state.push_temp_value(Value::Float(result), true);
    Ok(())
}

fn convert_to_bool(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let result = match arg_value(ctx, args[0])? {
        Value::Int(v) => *v != 0,
        Value::Float(v) => *v != 0.0,
        Value::Str(s) => match s.as_str() {
            "true" => true,
            "false" => false,
            _ => {
                return Err(RunError::Conversion {
                    from: "string".to_owned(),
                    to: "bool",
                });
            }
        },
        other => {
            return Err(RunError::Conversion {
                from: other.type_string(),
                to: "bool",
            });
        }
    };
    ctx.state.push_temp_value(Value::Int(i64::from(result)), true);
    Ok(())
}

// --- Console ---

fn console_system(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(1, args)?;
    let command = arg_string(ctx, args[0])?;

    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .status()
        .map_err(|_| RunError::Custom("command could not be executed".to_owned()))?;

    let code = i64::from(status.code().unwrap_or(-1));
    ctx.state.push_temp_value(Value::Int(code), true);
    Ok(())
}

fn console_println(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    // variadic: no arity check
    for arg in args {
        let text = ctx.state.heap.object_to_string(*arg);
        ctx.writer.stdout_write(&text);
    }
    ctx.writer.stdout_push('\n');
    ctx.state.push_temp_value(Value::Null, false);
    Ok(())
}

fn console_readln(ctx: &mut NativeCtx<'_>, args: &[HeapId]) -> RunResult<()> {
    check_args(0, args)?;
    let line = ctx.writer.read_line();
    ctx.state.push_temp_value(Value::Str(line), true);
    Ok(())
}
