use slicestore::{cli, logger};
use std::env::args;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli::DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let (mut stdout, mut stderr) = (io::stdout(), io::stderr());
    let mut logger = logger::Logger::new(&mut stdout, &mut stderr);

    let behavior = cli::parse(args().skip(1));
    cli::execute(behavior, &mut logger)
}
