//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    lineage_cli::init_logging();
    if let Err(err) = lineage_cli::run() {
        eprintln!("lineage: {err}");
        std::process::exit(1);
    }
}
