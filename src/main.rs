use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use kiln::loader::read_assembly;
use kiln::{RuntimeConfig, VirtualMachine};

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "A managed-code VM with a verifying x86-64 JIT", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, compile and run an assembly, printing the value of main
    Run {
        /// The assembly to run (.toml or .json)
        file: PathBuf,

        /// Config file with a [runtime] table
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Maximum depth of managed calls
        #[arg(long)]
        call_stack_size: Option<u32>,

        /// Print the generated code after linking
        #[arg(long)]
        disassemble: bool,

        /// Trace JIT compilation events
        #[arg(long)]
        trace_jit: bool,
    },
    /// Load and verify an assembly without running it
    Check {
        /// The assembly to check (.toml or .json)
        file: PathBuf,
    },
}

fn init_tracing(trace_jit: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let filter = if trace_jit {
        match "kiln=debug".parse::<Directive>() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    } else {
        filter
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, String> {
    match path {
        Some(path) => RuntimeConfig::load(path),
        None => {
            let default = Path::new("kiln.toml");
            if default.exists() {
                RuntimeConfig::load(default)
            } else {
                Ok(RuntimeConfig::default())
            }
        }
    }
}

fn run(file: &Path, config: RuntimeConfig) -> Result<i32, String> {
    let print_disassembly = config.print_disassembly;
    let mut vm = VirtualMachine::new(config).map_err(|e| e.to_string())?;
    vm.load_file(file).map_err(|e| e.to_string())?;

    if print_disassembly {
        eprintln!("{}", vm.disassembly());
    }
    vm.run_main().map_err(|e| e.to_string())
}

fn check(file: &Path) -> Result<usize, String> {
    let assembly = read_assembly(file).map_err(|e| e.to_string())?;
    let mut vm = VirtualMachine::new(RuntimeConfig::default()).map_err(|e| e.to_string())?;
    vm.check_assembly(&assembly).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            config,
            call_stack_size,
            disassemble,
            trace_jit,
        } => {
            let mut config = match load_config(config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if let Some(size) = call_stack_size {
                config.call_stack_size = size;
            }
            config.print_disassembly |= disassemble;
            config.trace_jit |= trace_jit;
            init_tracing(config.trace_jit);

            match run(&file, config) {
                Ok(value) => println!("{}", value),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Check { file } => {
            init_tracing(false);
            match check(&file) {
                Ok(count) => println!("Verified {} function(s).", count),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}
