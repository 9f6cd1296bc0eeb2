use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use passage_prep_core::{
    AssemblerConfig, LoaderConfig, Mode, PairSet, QueryFormat, QueryPerturber, QueryTable,
    RankingDataset, RecordStore, TokenizerKind, TypoPerturber, DEFAULT_CAPACITY,
};
use serde::Deserialize;
use tracing::info;

pub const WORKERS_ENV: &str = "PASSAGE_PREP_WORKERS";

/// TOML run file. Relative paths resolve against the file's directory.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub mode: Mode,
    pub collection_dir: PathBuf,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    pub queries: PathBuf,
    #[serde(default)]
    pub query_format: Option<QueryFormat>,
    #[serde(default)]
    pub triples: Option<PathBuf>,
    #[serde(default)]
    pub qrels: Option<PathBuf>,
    #[serde(default)]
    pub candidates: Option<PathBuf>,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub tokenizer: TokenizerKind,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

impl RunConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: RunConfig =
            toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.resolve_paths(base);
        cfg.apply_workers_override(env::var(WORKERS_ENV).ok().as_deref())?;
        Ok(cfg)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.collection_dir);
        resolve(&mut self.queries);
        for path in [&mut self.triples, &mut self.qrels, &mut self.candidates]
            .into_iter()
            .flatten()
        {
            resolve(path);
        }
        if let TokenizerKind::WordPiece(path) = &mut self.tokenizer {
            resolve(path);
        }
    }

    /// `raw` is the value of `PASSAGE_PREP_WORKERS`, if set.
    fn apply_workers_override(&mut self, raw: Option<&str>) -> Result<()> {
        if let Some(raw) = raw {
            let workers: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{WORKERS_ENV}={raw} is not a worker count"))?;
            if workers == 0 {
                return Err(anyhow!("{WORKERS_ENV} must be at least 1"));
            }
            self.loader.workers = workers;
        }
        Ok(())
    }

    pub fn load_pairs(&self) -> Result<PairSet> {
        let pairs = match self.mode {
            Mode::Train => {
                let triples = self
                    .triples
                    .as_deref()
                    .ok_or_else(|| anyhow!("train mode needs `triples`"))?;
                let qrels = self
                    .qrels
                    .as_deref()
                    .ok_or_else(|| anyhow!("train mode needs `qrels`"))?;
                PairSet::load_training(triples, qrels)?
            }
            Mode::Eval => {
                let candidates = self
                    .candidates
                    .as_deref()
                    .ok_or_else(|| anyhow!("eval mode needs `candidates`"))?;
                PairSet::load_eval(candidates)?
            }
        };
        Ok(pairs)
    }

    pub fn load_dataset(&self) -> Result<RankingDataset> {
        let store = RecordStore::open_with_capacity(&self.collection_dir, self.capacity)
            .with_context(|| format!("failed to open collection {}", self.collection_dir.display()))?;
        let format = self
            .query_format
            .unwrap_or_else(|| QueryFormat::from_path(&self.queries));
        let queries = QueryTable::load_as(&self.queries, format)
            .with_context(|| format!("failed to load queries {}", self.queries.display()))?;
        let pairs = self.load_pairs()?;
        let tokenizer = self
            .tokenizer
            .build()
            .context("failed to build query tokenizer")?;
        let perturber: Option<Arc<dyn QueryPerturber>> =
            if self.assembler.perturb_probability > 0.0 {
                info!(
                    probability = self.assembler.perturb_probability,
                    "typo-aware query perturbation enabled"
                );
                Some(Arc::new(TypoPerturber::default()))
            } else {
                None
            };
        let dataset = RankingDataset::new(
            pairs,
            self.assembler,
            Arc::new(store),
            Arc::new(queries),
            tokenizer,
            perturber,
        )?;
        Ok(dataset)
    }
}
