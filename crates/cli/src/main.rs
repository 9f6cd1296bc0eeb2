mod cli;
mod collection;
mod config;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use passage_prep_core::BatchLoader;
use passage_prep_index::JsonlWriter;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::config::RunConfig;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Stats { config } => stats(&config),
        Command::Batches {
            config,
            limit,
            out,
            epoch,
        } => batches(&config, limit, out.as_deref(), epoch),
        Command::Example { config, index } => example(&config, index),
        Command::BuildCollection {
            input,
            out,
            capacity,
        } => build_collection(&input, &out, capacity),
        Command::Lookup {
            collection,
            id,
            capacity,
        } => lookup(&collection, id, capacity),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn stats(config: &Path) -> Result<()> {
    let cfg = RunConfig::from_path(config)?;
    let dataset = cfg.load_dataset()?;
    let loader = BatchLoader::new(&dataset, cfg.loader)?;
    let pairs = dataset.pairs();
    let summary = json!({
        "mode": dataset.mode(),
        "examples": dataset.len(),
        "queries_referenced": pairs.distinct_queries(),
        "queries_loaded": dataset.assembler().queries().len(),
        "passages": dataset.assembler().store().len(),
        "cls_id": dataset.assembler().special_ids().cls,
        "sep_id": dataset.assembler().special_ids().sep,
        "qrels_queries": pairs.qrels().map(|q| q.len()),
        "qrels_judgments": pairs.qrels().map(|q| q.judgments()),
        "batch_size": cfg.loader.batch_size,
        "batches": loader.num_batches(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn batches(config: &Path, limit: Option<usize>, out: Option<&Path>, epoch: u64) -> Result<()> {
    let cfg = RunConfig::from_path(config)?;
    let dataset = cfg.load_dataset()?;
    let mut loader = BatchLoader::new(&dataset, cfg.loader)?;
    loader.set_epoch(epoch);

    let sink: Box<dyn Write> = match out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = JsonlWriter::new(BufWriter::new(sink));
    let mut written = 0usize;
    for (batch_index, batch) in loader.take(limit.unwrap_or(usize::MAX)).enumerate() {
        let batch = batch.with_context(|| format!("failed to build batch {batch_index}"))?;
        writer.write_record(&batch.to_record(batch_index))?;
        written += 1;
    }
    writer.flush()?;
    info!(batches = written, epoch, "wrote batches");
    Ok(())
}

fn example(config: &Path, index: usize) -> Result<()> {
    let cfg = RunConfig::from_path(config)?;
    let dataset = cfg.load_dataset()?;
    let example = dataset
        .example(index, 0)
        .with_context(|| format!("failed to assemble example {index}"))?;
    let descriptor = dataset.pairs().descriptor(index).copied();
    let mut rel_docs: Option<Vec<u32>> = example
        .rel_docs
        .as_ref()
        .map(|docs| docs.iter().copied().collect());
    if let Some(docs) = rel_docs.as_mut() {
        docs.sort_unstable();
    }
    let view = json!({
        "index": index,
        "qid": example.qid,
        "docid": example.doc_id,
        "label": descriptor.and_then(|d| d.label),
        "query_input_ids": example.query_input_ids,
        "doc_input_ids": example.doc_input_ids,
        "rel_docs": rel_docs,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

fn build_collection(input: &Path, out: &Path, capacity: usize) -> Result<()> {
    let rows = collection::build_collection(input, out, capacity)?;
    println!("wrote {rows} passages to {}", out.display());
    Ok(())
}

fn lookup(dir: &Path, id: u32, capacity: usize) -> Result<()> {
    let tokens = collection::lookup(dir, id, capacity)?;
    println!(
        "{}",
        json!({ "id": id, "length": tokens.len(), "token_ids": tokens })
    );
    Ok(())
}
