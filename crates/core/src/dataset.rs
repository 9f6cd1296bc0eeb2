use std::sync::Arc;

use tracing::info;

use crate::assemble::{AssembledExample, AssemblerConfig, ExampleAssembler};
use crate::error::{PrepError, Result};
use crate::pairs::{Mode, PairSet};
use crate::perturb::QueryPerturber;
use crate::queries::QueryTable;
use crate::store::RecordStore;
use crate::tokenizer::QueryTokenizer;

/// Random-access view over one split: descriptor `i` assembled on demand.
pub struct RankingDataset {
    pairs: PairSet,
    assembler: ExampleAssembler,
}

impl RankingDataset {
    pub fn new(
        pairs: PairSet,
        config: AssemblerConfig,
        store: Arc<RecordStore>,
        queries: Arc<QueryTable>,
        tokenizer: Arc<dyn QueryTokenizer>,
        perturber: Option<Arc<dyn QueryPerturber>>,
    ) -> Result<Self> {
        config.validate()?;
        let mut assembler = ExampleAssembler::new(config, store, queries, tokenizer)?;
        if let Some(qrels) = pairs.qrels() {
            assembler = assembler.with_qrels(qrels.clone());
        } else if pairs.mode().is_train() {
            return Err(PrepError::Config("training pairs loaded without qrels".into()));
        }
        if let Some(perturber) = perturber {
            assembler = assembler.with_perturber(perturber);
        }
        info!(
            mode = ?pairs.mode(),
            examples = pairs.len(),
            passages = assembler.store().len(),
            queries = assembler.queries().len(),
            perturb_probability = config.perturb_probability,
            "ranking dataset ready"
        );
        Ok(Self { pairs, assembler })
    }

    pub fn mode(&self) -> Mode {
        self.pairs.mode()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &PairSet {
        &self.pairs
    }

    pub fn assembler(&self) -> &ExampleAssembler {
        &self.assembler
    }

    pub fn example(&self, index: usize, epoch: u64) -> Result<AssembledExample> {
        let descriptor = self
            .pairs
            .descriptor(index)
            .ok_or_else(|| PrepError::missing("example", index as u64))?;
        self.assembler.assemble(descriptor, index, epoch)
    }
}
