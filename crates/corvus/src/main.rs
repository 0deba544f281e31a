// Entry point for the `corvus` interpreter: reads a source file, compiles
// and runs it against a fresh VM state, and reports any failure on stderr
// per §6 "External interfaces" (`FILE:LINE:COL:` diagnostics, exit 0/1).

use std::fs;
use std::process::ExitCode;

use clap::Parser;
use corvus_vm::State;
use log::LevelFilter;

#[derive(Parser)]
#[command(name = "corvus", version, about = "Run a corvus script", long_about = None)]
struct Cli {
    /// Path to the source file to run.
    path: String,

    /// Raise log verbosity (-v debug, -vv trace dispatch, repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the VM's stack slot limit.
    #[arg(long, value_name = "N")]
    max_stack: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let source = match fs::read_to_string(&cli.path) {
        Ok(s) => s,
        Err(e) => {
            log::error!("cannot read '{}': {e}", cli.path);
            eprintln!("{}: cannot read source file: {e}", cli.path);
            return ExitCode::FAILURE;
        }
    };

    let mut state = State::new();
    corvus_vm::stdlib::register_builtins(&mut state);
    if let Some(max_stack) = cli.max_stack {
        state.max_stack = max_stack;
    }

    match corvus_vm::run_with_state(&mut state, &source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            let traceback = state.take_traceback();
            eprintln!("{}", corvus_vm::diagnostics::render(&cli.path, &source, &e, &traceback));
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins if set; otherwise `-v` raises the default level, as the
/// `rufflang`-style example wires up `env_logger` for its own CLI (warn ->
/// info -> debug -> trace, one step per repetition, capped at trace).
fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level.as_str())).init();
}
