use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{PrepError, Result};
use crate::pairs::{ExampleDescriptor, Qrels};
use crate::perturb::QueryPerturber;
use crate::queries::{Query, QueryId, QueryTable};
use crate::store::{DocId, RecordStore};
use crate::tokenizer::{QueryTokenizer, SpecialIds};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssemblerConfig {
    pub max_query_length: usize,
    pub max_doc_length: usize,
    /// `[CLS]`/`[SEP]` ids. When unset they come from the tokenizer's
    /// vocabulary; when set they must agree with it.
    pub cls_id: Option<i32>,
    pub sep_id: Option<i32>,
    /// Chance that a text query is replaced by a perturbed variant.
    pub perturb_probability: f64,
    pub seed: u64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            max_query_length: 20,
            max_doc_length: 256,
            cls_id: None,
            sep_id: None,
            perturb_probability: 0.0,
            seed: 42,
        }
    }
}

impl AssemblerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.perturb_probability) {
            return Err(PrepError::Config(format!(
                "perturb_probability {} outside [0, 1]",
                self.perturb_probability
            )));
        }
        Ok(())
    }

    pub fn special_ids(&self, tokenizer: &dyn QueryTokenizer) -> Result<SpecialIds> {
        let vocab = tokenizer.special_ids();
        let cls = self.cls_id.or(vocab.map(|ids| ids.cls));
        let sep = self.sep_id.or(vocab.map(|ids| ids.sep));
        let (Some(cls), Some(sep)) = (cls, sep) else {
            return Err(PrepError::Config(
                "tokenizer vocabulary has no [CLS]/[SEP]; set cls_id and sep_id".into(),
            ));
        };
        let resolved = SpecialIds { cls, sep };
        if let Some(vocab) = vocab {
            if vocab != resolved {
                return Err(PrepError::Config(format!(
                    "cls_id/sep_id {cls}/{sep} disagree with the tokenizer vocabulary ({}/{})",
                    vocab.cls, vocab.sep
                )));
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledExample {
    /// `[CLS] query [SEP]`
    pub query_input_ids: Vec<i32>,
    /// `[CLS] passage [SEP]`
    pub doc_input_ids: Vec<i32>,
    pub qid: QueryId,
    pub doc_id: DocId,
    /// Relevant passages of `qid`; present for training examples only.
    pub rel_docs: Option<Arc<FxHashSet<DocId>>>,
}

/// Resolves descriptors against the collection and query table and turns
/// them into wrapped, truncated token sequences.
pub struct ExampleAssembler {
    config: AssemblerConfig,
    special: SpecialIds,
    store: Arc<RecordStore>,
    queries: Arc<QueryTable>,
    qrels: Option<Arc<Qrels>>,
    tokenizer: Arc<dyn QueryTokenizer>,
    perturber: Option<Arc<dyn QueryPerturber>>,
}

impl ExampleAssembler {
    pub fn new(
        config: AssemblerConfig,
        store: Arc<RecordStore>,
        queries: Arc<QueryTable>,
        tokenizer: Arc<dyn QueryTokenizer>,
    ) -> Result<Self> {
        let special = config.special_ids(tokenizer.as_ref())?;
        Ok(Self {
            config,
            special,
            store,
            queries,
            qrels: None,
            tokenizer,
            perturber: None,
        })
    }

    /// Attaching qrels switches the assembler to training output.
    pub fn with_qrels(mut self, qrels: Arc<Qrels>) -> Self {
        self.qrels = Some(qrels);
        self
    }

    pub fn with_perturber(mut self, perturber: Arc<dyn QueryPerturber>) -> Self {
        self.perturber = Some(perturber);
        self
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    pub fn special_ids(&self) -> SpecialIds {
        self.special
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn queries(&self) -> &QueryTable {
        &self.queries
    }

    /// `index` and `epoch` only feed the perturbation stream.
    pub fn assemble(
        &self,
        descriptor: &ExampleDescriptor,
        index: usize,
        epoch: u64,
    ) -> Result<AssembledExample> {
        let doc_tokens = self.store.get(descriptor.doc_id)?;
        let query_tokens = match self.queries.get(descriptor.qid)? {
            Query::Tokens(ids) => ids.clone(),
            Query::Text(text) => {
                let text = self.maybe_perturb(text, index, epoch);
                self.tokenizer.encode(&text)?
            }
        };

        let rel_docs = match &self.qrels {
            Some(qrels) => Some(
                qrels
                    .get(descriptor.qid)
                    .cloned()
                    .ok_or_else(|| PrepError::missing("qrels query", descriptor.qid))?,
            ),
            None => None,
        };

        Ok(AssembledExample {
            query_input_ids: self.wrap(&query_tokens, self.config.max_query_length),
            doc_input_ids: self.wrap(doc_tokens, self.config.max_doc_length),
            qid: descriptor.qid,
            doc_id: descriptor.doc_id,
            rel_docs,
        })
    }

    fn maybe_perturb(&self, text: &str, index: usize, epoch: u64) -> String {
        let Some(perturber) = &self.perturber else {
            return text.to_string();
        };
        if self.config.perturb_probability <= 0.0 {
            return text.to_string();
        }
        let mut rng = StdRng::seed_from_u64(example_seed(self.config.seed, epoch, index));
        if rng.gen::<f64>() >= self.config.perturb_probability {
            return text.to_string();
        }
        let noisy = perturber.perturb(text, &mut rng);
        trace!(index, original = text, perturbed = %noisy, "perturbed query");
        noisy
    }

    fn wrap(&self, tokens: &[i32], max_len: usize) -> Vec<i32> {
        let kept = &tokens[..tokens.len().min(max_len)];
        let mut out = Vec::with_capacity(kept.len() + 2);
        out.push(self.special.cls);
        out.extend_from_slice(kept);
        out.push(self.special.sep);
        out
    }
}

/// Mixes the run seed, epoch and example index into an independent stream
/// per example (splitmix64 finaliser).
fn example_seed(seed: u64, epoch: u64, index: usize) -> u64 {
    let mut z = seed
        ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (index as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
