//! slangc — compile ScriptLang sources, disassemble compiled programs.

use clap::{Parser, Subcommand};
use scriptlang_vm::{NativeDb, Program};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "slangc")]
#[command(about = "ScriptLang compiler and disassembler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script to a program container
    Compile {
        /// Entry source file
        input: PathBuf,

        /// Output path (defaults to the input with .scprog)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Native database for existence checks
        #[arg(long)]
        natives: Option<PathBuf>,
    },
    /// Disassemble a compiled program
    Disasm {
        /// Compiled program container
        input: PathBuf,

        /// Native database for symbolic native names
        #[arg(long)]
        natives: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slangc=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Compile {
            input,
            output,
            natives,
        } => compile(input, output, natives),
        Command::Disasm { input, natives } => disasm(input, natives),
    }
}

fn compile(input: PathBuf, output: Option<PathBuf>, natives: Option<PathBuf>) -> ExitCode {
    let db = match natives.map(|path| NativeDb::load(&path)) {
        Some(Ok(db)) => Some(db),
        Some(Err(err)) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let result = scriptlang_compiler::compile_file(&input, db.as_ref());
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // Diagnostics go to stdout in the host toolchain format, errors and
    // warnings alike.
    if !outcome.diagnostics.is_empty() {
        println!("{}", outcome.diagnostics.render(&outcome.sources));
    }

    let Some(program) = outcome.program else {
        return ExitCode::FAILURE;
    };

    let output = output.unwrap_or_else(|| input.with_extension("scprog"));
    let bytes = match program.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = std::fs::write(&output, bytes) {
        error!("cannot write {}: {err}", output.display());
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn disasm(input: PathBuf, natives: Option<PathBuf>) -> ExitCode {
    let db = match natives.map(|path| NativeDb::load(&path)) {
        Some(Ok(db)) => Some(db),
        Some(Err(err)) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
        None => None,
    };

    let bytes = match std::fs::read(&input) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("cannot read {}: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };
    let program = match Program::from_bytes(&bytes) {
        Ok(program) => program,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match scriptlang_disasm::disassemble(&program, db.as_ref()) {
        Ok(listing) => {
            print!("{listing}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
