use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod completion;
mod device_locator;
mod dispatch;
mod logging;
mod render;

use completion::CliCompletionShell;

#[derive(Parser, Debug)]
#[command(name = "modsync")]
#[command(about = "Keep the libraries on a CircuitPython device up to date", long_about = None)]
struct Cli {
    /// Device root; located automatically when omitted.
    #[arg(long, global = true)]
    path: Option<PathBuf>,
    /// Where bundle configuration and cached releases live.
    #[arg(long, global = true)]
    state_root: Option<PathBuf>,
    /// Use cached bundles only.
    #[arg(long, global = true)]
    offline: bool,
    /// Runtime version to assume instead of reading boot_out.txt.
    #[arg(long, global = true)]
    cpy_version: Option<String>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the device's libraries as a requirements list.
    Freeze {
        /// Write requirements.txt in the current directory.
        #[arg(short = 'r', long = "requirement")]
        requirement: bool,
        #[arg(long)]
        force: bool,
    },
    /// Show libraries that are out of date or need review.
    List,
    Update {
        /// Only these libraries.
        modules: Vec<String>,
        /// Apply every pending update, corrupt replacements included.
        #[arg(long)]
        all: bool,
        /// Apply updates that cross a major version.
        #[arg(long)]
        allow_major: bool,
        #[arg(long)]
        dry_run: bool,
    },
    Install {
        modules: Vec<String>,
        /// Install source files even when compiled ones fit the device.
        #[arg(long)]
        py: bool,
        #[arg(short = 'r', long = "requirement")]
        requirement: Option<PathBuf>,
        /// Install whatever code.py imports.
        #[arg(long)]
        auto: bool,
        /// Like --auto, for another program file.
        #[arg(long)]
        auto_file: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    Uninstall {
        #[arg(required = true)]
        modules: Vec<String>,
    },
    /// List catalog libraries, optionally filtered.
    Show { pattern: Option<String> },
    /// Copy bundle examples onto the device.
    Example {
        #[arg(long)]
        list: bool,
        /// Save the example as code.py.
        #[arg(long)]
        rename: bool,
        #[arg(long)]
        overwrite: bool,
        names: Vec<String>,
    },
    BundleShow {
        #[arg(long)]
        modules: bool,
    },
    BundleAdd {
        #[arg(required = true)]
        repos: Vec<String>,
    },
    BundleRemove {
        /// Drop every user bundle and restore the defaults.
        #[arg(long)]
        reset: bool,
        repos: Vec<String>,
    },
    Completions { shell: CliCompletionShell },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    dispatch::run_cli(cli)
}
