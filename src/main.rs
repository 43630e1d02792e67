use clap::Parser;
use papertrade::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    papertrade::logging::init();
    run(Cli::parse())
}
