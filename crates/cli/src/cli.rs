use std::path::PathBuf;

use clap::{Parser, Subcommand};
use passage_prep_core::DEFAULT_CAPACITY;

#[derive(Parser, Debug)]
#[command(
    name = "passage-prep",
    version,
    about = "Passage ranking dataset preparation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load every input named by the run file and report counts.
    Stats {
        #[arg(long, default_value = "prep.toml")]
        config: PathBuf,
    },
    /// Stream collated batches as JSON lines.
    Batches {
        #[arg(long, default_value = "prep.toml")]
        config: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = 0)]
        epoch: u64,
    },
    /// Print one assembled example.
    Example {
        #[arg(long, default_value = "prep.toml")]
        config: PathBuf,
        #[arg(long)]
        index: usize,
    },
    /// Convert a tokenized JSON-lines collection into a fixed-width store.
    BuildCollection {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
    },
    /// Print the stored tokens of one passage.
    Lookup {
        #[arg(long)]
        collection: PathBuf,
        #[arg(long)]
        id: u32,
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: usize,
    },
}
