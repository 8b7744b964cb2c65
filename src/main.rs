//! `tamarin-dap`: Debug Adapter Protocol server for tamarin programs.
//!
//! Speaks DAP over stdin/stdout; one process serves one debug session.
//! Diagnostics go to stderr via `env_logger` (`RUST_LOG=debug` to enable),
//! never to stdout, which carries protocol frames.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional log file for adapter diagnostics (stderr by default).
    #[clap(long)]
    log_file: Option<std::path::PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if let Some(path) = &args.log_file {
        let file = std::fs::File::create(path)?;
        logger.target(env_logger::Target::Pipe(Box::new(file)));
    }
    logger.init();

    log::info!(target: "dap", "tamarin-dap session starting on stdio");
    tamarin::ui::dap::run_stdio()
}
