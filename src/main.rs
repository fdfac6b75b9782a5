//! Minigo CLI
//!
//! Thin host around the evaluator: deserializes a JSON AST produced by an
//! external frontend, wires stdout-backed capabilities, and runs main().

use clap::{Parser, Subcommand};
use minigo::interp::{self, Interpreter, Value};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "minigo", version, about = "Minigo - sandboxed Go-subset interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a program from a JSON-serialized AST file
    Run {
        /// AST file to execute
        file: PathBuf,
        /// Abort the main task after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { file, timeout_ms } => run_program(&file, timeout_ms),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Wire the stdout/stderr capabilities every CLI run gets
fn register_host_natives(vm: &Interpreter) {
    vm.register_native("ConsoleLog", |args| {
        if let Some(v) = args.first() {
            println!("{}", interp::to_string(v));
        }
        Ok(Value::Null)
    });
    vm.register_native("ConsoleWarn", |args| {
        if let Some(v) = args.first() {
            eprintln!("warning: {}", interp::to_string(v));
        }
        Ok(Value::Null)
    });
    vm.register_native("ConsoleError", |args| {
        if let Some(v) = args.first() {
            eprintln!("error: {}", interp::to_string(v));
        }
        Ok(Value::Null)
    });
    vm.register_native("__hostSprintf", |args| {
        let format = args
            .first()
            .map(interp::to_string)
            .unwrap_or_default();
        Ok(Value::Str(interp::sprintf(&format, &args[1.min(args.len())..])))
    });
    vm.register_native("__goroutinePanic", |args| {
        if let Some(v) = args.first() {
            eprintln!("goroutine error: {}", interp::to_string(v));
        }
        Ok(Value::Null)
    });
    // Whitelisted file read: plain relative paths under the working directory
    vm.register_native("HostReadFile", |args| {
        let path = args.first().map(interp::to_string).unwrap_or_default();
        let p = Path::new(&path);
        if p.is_absolute() || path.contains("..") {
            return Ok(Value::Str(String::new()));
        }
        Ok(Value::Str(std::fs::read_to_string(p).unwrap_or_default()))
    });
}

fn run_program(path: &Path, timeout_ms: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let file: minigo::ast::File = serde_json::from_str(&text)?;

    let vm = Interpreter::new();
    register_host_natives(&vm);
    interp::register_builtin_packages(&vm);

    match timeout_ms {
        None => vm.run_file(&file)?,
        Some(ms) => {
            // The evaluator has no clock; the host runs main on a worker
            // thread and abandons it on timeout
            let (tx, rx) = mpsc::channel();
            let worker_vm = vm.clone();
            std::thread::spawn(move || {
                let _ = tx.send(worker_vm.run_file(&file));
            });
            match rx.recv_timeout(Duration::from_millis(ms)) {
                Ok(result) => result?,
                Err(_) => return Err("execution timed out".into()),
            }
        }
    }
    Ok(())
}
