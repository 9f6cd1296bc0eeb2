mod assemble;
mod collate;
mod dataset;
mod error;
mod loader;
mod pairs;
mod perturb;
mod queries;
mod store;
mod tokenizer;

pub use assemble::{AssembledExample, AssemblerConfig, ExampleAssembler};
pub use collate::{Batch, Collator, Matrix, NO_LABEL};
pub use dataset::RankingDataset;
pub use error::{PrepError, Result};
pub use loader::{BatchLoader, LoaderConfig};
pub use pairs::{read_candidates, read_triples, ExampleDescriptor, Mode, PairSet, Qrels};
pub use perturb::{QueryPerturber, TypoKind, TypoPerturber};
pub use queries::{Query, QueryFormat, QueryId, QueryTable};
pub use store::{
    CollectionWriter, DocId, RecordStore, DEFAULT_CAPACITY, LENGTHS_FILE, PIDS_FILE,
    TOKEN_IDS_FILE,
};
pub use tokenizer::{
    BpeTokenizer, QueryTokenizer, SpecialIds, TokenizerKind, WordPieceTokenizer, DEFAULT_VOCAB_FILE,
};
