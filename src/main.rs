//! ox CLI
//!
//! Experiment tracking from the command line. Entry points are loaded from
//! YAML manifests; embed [`ox_lab::cli::main_with`] in your own binary to
//! register in-process entry points instead.

#![forbid(unsafe_code)]

use std::process::ExitCode;

use ox_lab::EntryRegistry;

fn main() -> ExitCode {
    ox_lab::cli::main_with(&EntryRegistry::new())
}
