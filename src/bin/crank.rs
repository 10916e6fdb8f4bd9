//! Command-line front end for the `crank_ir` object model: parse a
//! textual module, verify it, optionally run mem2reg, then either print
//! it back out or interpret `@main`.

use std::process::ExitCode;

use crank_ir::common::source::SourceManager;
use crank_ir::context::Context;
use crank_ir::interp::interpreter::Interpreter;
use crank_ir::interp::value::RuntimeValue;
use crank_ir::text::{parse_module, print_module};
use crank_ir::transform::mem2reg::promote_allocas;
use crank_ir::verify::verify_module;

enum Mode {
    Print,
    Run,
}

struct Options {
    mode: Mode,
    mem2reg: bool,
    verbose: bool,
    input: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let mut opts = Options { mode: Mode::Run, mem2reg: false, verbose: false, input: None };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "print" => opts.mode = Mode::Print,
            "run" => opts.mode = Mode::Run,
            "--mem2reg" => opts.mem2reg = true,
            "-v" | "--verbose" => opts.verbose = true,
            "-h" | "--help" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') => {
                eprintln!("error: unknown flag: {arg}");
                return ExitCode::FAILURE;
            }
            _ => opts.input = Some(args[i].clone()),
        }
        i += 1;
    }

    let Some(path) = opts.input else {
        print_usage();
        return ExitCode::FAILURE;
    };

    let source = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut sources = SourceManager::new();
    let file_id = sources.add_file(path.clone(), source.clone());

    let mut ctx = Context::new();
    let module = match parse_module(&mut ctx, &source, file_id) {
        Ok(m) => m,
        Err(e) => {
            let loc = sources.resolve_span(e.span);
            eprintln!("error: {}:{}:{}: {}", loc.file, loc.line, loc.column, e.message);
            return ExitCode::FAILURE;
        }
    };

    if let Err(errors) = verify_module(&ctx, module) {
        for e in &errors {
            eprintln!("verify error: {e}");
        }
        return ExitCode::FAILURE;
    }
    if opts.verbose {
        eprintln!("parsed and verified {path}");
    }

    if opts.mem2reg {
        let funcs = ctx.module(module).functions.clone();
        for f in funcs {
            if ctx.func(f).is_declaration {
                continue;
            }
            let changed = promote_allocas(&mut ctx, f);
            if opts.verbose && changed {
                eprintln!("mem2reg: promoted allocas in {}", ctx.resolve(ctx.func(f).name));
            }
        }
    }

    match opts.mode {
        Mode::Print => {
            print!("{}", print_module(&ctx, module));
            ExitCode::SUCCESS
        }
        Mode::Run => run_main(&ctx, module),
    }
}

fn run_main(ctx: &Context, module: crank_ir::ids::ModuleId) -> ExitCode {
    let main_sym = ctx
        .module(module)
        .functions
        .iter()
        .find(|&&f| !ctx.func(f).is_declaration && ctx.resolve(ctx.func(f).name) == "main");

    let Some(&main_func) = main_sym else {
        eprintln!("error: no `@main` function defined");
        return ExitCode::FAILURE;
    };

    let mut interp = Interpreter::new(ctx);
    match interp.call_function(main_func, &[]) {
        Ok(RuntimeValue::I32(code)) => ExitCode::from((code & 0xff) as u8),
        Ok(RuntimeValue::I64(code)) => ExitCode::from((code & 0xff) as u8),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("runtime error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    eprintln!("usage: crank [print|run] [--mem2reg] [-v] <file.ir>");
}
