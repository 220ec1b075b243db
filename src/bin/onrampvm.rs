use std::panic::{self, AssertUnwindSafe};
use std::process::ExitCode;

use clap::Parser;
use onrampvm::fault::VmFault;
use onrampvm::vm::Vm;

/// Interpreter for the Onramp bootstrapping toolchain's 32-bit bytecode.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
struct Args {
    /// Path to the Onramp bytecode program to run
    program: String,

    /// Arguments passed through to the guest program as argv[1..]
    args: Vec<String>,

    /// Log each decoded instruction at TRACE level (debugging the VM
    /// itself; has no effect on guest-visible behavior)
    #[arg(short, long)]
    trace: bool,
}

/// Exit code mandated for every VM-fatal condition: a bad opcode, a
/// loader failure, or an out-of-range memory access that surfaced as a
/// Rust panic on the flat image.
const EXIT_FATAL: u8 = 125;

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.trace {
        "onrampvm=trace"
    } else {
        "onrampvm=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut vm = Vm::new();
    if let Err(e) = vm.load_program(&args.program, &args.args) {
        tracing::error!(error = %e, "failed to load program");
        return ExitCode::from(EXIT_FATAL);
    }

    let trace = args.trace;
    let result = panic::catch_unwind(AssertUnwindSafe(|| vm.run(trace)));

    match result {
        Ok(Ok(status)) => ExitCode::from(status),
        Ok(Err(fault)) => {
            report_fault(&vm, &fault);
            ExitCode::from(EXIT_FATAL)
        }
        Err(panic) => {
            let rip = vm.regs.get(onrampvm::registers::RIP);
            let message = panic_message(&panic);
            tracing::error!(rip = format!("0x{rip:08x}"), %message, "out-of-range memory access");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn report_fault(vm: &Vm, fault: &VmFault) {
    let rip = vm.regs.get(onrampvm::registers::RIP);
    tracing::error!(rip = format!("0x{rip:08x}"), error = %fault, "VM halted on a fatal error");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
