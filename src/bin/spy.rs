use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;

use proto_spy::capture::{Spy, Transport};
use proto_spy::Device;

#[derive(Debug, Parser)]
#[command(name = "spy", about = "Print decoded TCP or UDP packets from a network interface")]
struct Args {
    /// Transport protocol to inspect
    #[arg(long, value_enum)]
    protocol: Transport,
    /// Interface to capture on, defaults to the first usable device
    #[arg(long)]
    interface: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let device = args.interface.as_deref().map(Device::from);

    let spy = match Spy::open(args.protocol, device) {
        Ok(spy) => spy,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // The flag is shared so a signal handler or embedding thread can request shutdown.
    let stop = Arc::new(AtomicBool::new(false));
    if let Err(e) = spy.run(Arc::clone(&stop)) {
        eprintln!("Capture failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
