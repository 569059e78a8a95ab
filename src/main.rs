//! Stencil CLI: transform matched files into an output tree (or stdout).

use anyhow::Result;
use clap::Parser;
use stencil::engine::arg_parser::Cli;
use stencil::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
