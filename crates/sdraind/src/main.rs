use clap::Parser;
use log::{info, LevelFilter};

mod app;
mod cli;

use cli::{Args, CliError};

fn main() {
    match sdraind() {
        Ok(()) => {}
        Err(cli_error) => cli_error.exit(),
    }
}

fn sdraind() -> Result<(), CliError> {
    let args = Args::try_parse()?;
    log_setup(&args);

    info!("SDRainer Version {}", env!("CARGO_PKG_VERSION"));

    app::run(args)?;
    Ok(())
}

fn log_setup(args: &Args) {
    if std::env::var_os("RUST_LOG").is_none() {
        // parameter controls
        let log_filter = if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };

        pretty_env_logger::formatted_builder()
            .filter_module("sdrain", log_filter)
            .filter_module("sdraind", log_filter)
            .init();
    } else {
        // environment controls
        pretty_env_logger::init();
    }
}
