//! The `axion` command: compile a script to bytecode and run it.
//!
//! Usage: `axion <input.ax> [-o <output.ac>] [-code <literal>]`. Without
//! `-o`, the output path is derived from the input file by replacing its
//! extension with `.ac`; with `-code` and no input file the program runs
//! from memory.

use std::{env, fs, path::PathBuf, process::ExitCode};

use axion::{Script, StdoutWriter};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage(&args[0]);
        return ExitCode::FAILURE;
    }

    let mut code: Option<String> = None;
    let mut input_file: Option<String> = None;
    let mut output_file: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-o" => {
                if i + 1 >= args.len() {
                    eprintln!("error: -o requires a path");
                    return ExitCode::FAILURE;
                }
                output_file = Some(args[i + 1].clone());
                i += 2;
            }
            "-code" => {
                if i + 1 >= args.len() {
                    eprintln!("error: -code requires a code string");
                    return ExitCode::FAILURE;
                }
                code = Some(args[i + 1].clone());
                i += 2;
            }
            arg => {
                input_file = Some(arg.to_owned());
                i += 1;
            }
        }
    }

    let (code, source_path) = if let Some(code) = code {
        (code, "<code>".to_owned())
    } else if let Some(path) = &input_file {
        match fs::read_to_string(path) {
            Ok(code) => (code, path.clone()),
            Err(_) => {
                eprintln!("File not found: {path}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        usage(&args[0]);
        return ExitCode::FAILURE;
    };

    // derive foo.ac from foo.ax when no explicit output was given
    let output_path = output_file.map(PathBuf::from).or_else(|| {
        input_file.as_ref().map(|input| {
            let mut path = PathBuf::from(input);
            path.set_extension("ac");
            path
        })
    });

    let script = Script::new(code, source_path);
    let mut writer = StdoutWriter;
    let (output, result) = script.compile_and_run(output_path.as_deref(), &mut writer);

    let report = output.report();
    if !report.is_empty() {
        eprint!("{report}");
    }

    if output.bytecode.is_none() {
        eprintln!("Compilation failed.");
        return ExitCode::FAILURE;
    }

    if let Err(failure) = result {
        eprintln!("{failure}");
        if !failure.dump.is_empty() {
            eprintln!("{}", failure.dump);
        }
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn usage(program: &str) {
    let name = program.rsplit(['/', '\\']).next().unwrap_or(program);
    eprintln!("Usage: {name} <filepath>");
    eprintln!("\t-o <filepath>: Output bytecode to a specified file.");
    eprintln!("\t-code <code string>: Execute code from a string, rather than from a file.");
}
