use std::env;
use std::fs;
use std::io::{self, Write};

use rilox::prelude::*;

/// The conventional exit code in BSD Unixes.
/// See: man 3 sysexits
mod ex {
    /// The conventional exit code for usage error.
    pub const USAGE: i32 = 64;
    /// When the input data is incorrect -- for example, a compile-time error.
    pub const DATAERR: i32 = 65;
    /// An internal software error occured.
    pub const SOFTWARE: i32 = 70;
    /// An error occured while doing I/O on a file.
    pub const IOERR: i32 = 74;
}

fn main() {
    let args: Vec<_> = env::args().collect();

    if args.len() <= 1 {
        repl();
    } else if args.len() == 2 {
        run_file(&args[1]);
    } else {
        eprintln!("Usage: rilox [path]");
        std::process::exit(ex::USAGE);
    }
}

/// Use Lox interactively using the read-execute-print loop.
///
/// One VM lives for the whole session, so globals defined on one line are
/// visible on the next. Errors are reported and the session continues.
fn repl() {
    let mut vm = VM::default();
    let mut line = String::with_capacity(1024);

    let stdin = io::stdin();

    loop {
        line.clear();

        print!("> ");
        let _ = io::stdout().flush();

        match stdin.read_line(&mut line) {
            // 0 bytes read means end-of-file (e.g., ^D).
            Ok(0) | Err(_) => {
                println!();
                break;
            }
            Ok(_) => {
                // Any error has already been reported on stderr.
                let _ = vm.interpret(&line);
            }
        }
    }
}

fn run_file(filename: &str) {
    let source = match fs::read_to_string(filename) {
        Ok(s) => s,
        Err(_) => {
            eprintln!("Could not read file: {filename}");
            std::process::exit(ex::IOERR);
        }
    };
    let mut vm = VM::default();

    use InterpretationError::*;
    let status = match vm.interpret(&source) {
        Ok(_) => 0,
        Err(CompileError) => ex::DATAERR,
        Err(RuntimeError) => ex::SOFTWARE,
    };

    std::process::exit(status)
}
