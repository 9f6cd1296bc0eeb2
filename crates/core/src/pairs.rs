use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PrepError, Result};
use crate::queries::QueryId;
use crate::store::DocId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Train,
    #[serde(alias = "dev")]
    Eval,
}

impl Mode {
    pub fn is_train(self) -> bool {
        matches!(self, Mode::Train)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExampleDescriptor {
    pub qid: QueryId,
    pub doc_id: DocId,
    /// `Some(1)` for the sampled positive of a triple, `Some(0)` for its
    /// negative, `None` for ranked candidates.
    pub label: Option<u8>,
}

/// Authoritative query to relevant-passage judgments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Qrels {
    relevant: FxHashMap<QueryId, Arc<FxHashSet<DocId>>>,
}

impl Qrels {
    pub fn from_reader<R: BufRead>(reader: R, source: &Path) -> Result<Self> {
        let mut folded: FxHashMap<QueryId, FxHashSet<DocId>> = FxHashMap::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(PrepError::format(
                    source,
                    line_no + 1,
                    format!("expected 4 qrels fields, found {}", fields.len()),
                ));
            }
            let qid: QueryId = parse_field(fields[0], "qid", source, line_no + 1)?;
            let pid: DocId = parse_field(fields[2], "pid", source, line_no + 1)?;
            folded.entry(qid).or_default().insert(pid);
        }
        Ok(Self {
            relevant: folded
                .into_iter()
                .map(|(qid, docs)| (qid, Arc::new(docs)))
                .collect(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let qrels = Self::from_reader(reader, path)?;
        info!(
            path = %path.display(),
            queries = qrels.len(),
            judgments = qrels.judgments(),
            "loaded qrels"
        );
        Ok(qrels)
    }

    pub fn get(&self, qid: QueryId) -> Option<&Arc<FxHashSet<DocId>>> {
        self.relevant.get(&qid)
    }

    pub fn is_relevant(&self, qid: QueryId, doc_id: DocId) -> bool {
        self.relevant
            .get(&qid)
            .map(|docs| docs.contains(&doc_id))
            .unwrap_or(false)
    }

    /// Number of queries with at least one judgment.
    pub fn len(&self) -> usize {
        self.relevant.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relevant.is_empty()
    }

    pub fn judgments(&self) -> usize {
        self.relevant.values().map(|docs| docs.len()).sum()
    }
}

/// The ordered example descriptors of one split, plus qrels when training.
#[derive(Debug, Clone)]
pub struct PairSet {
    mode: Mode,
    descriptors: Vec<ExampleDescriptor>,
    qrels: Option<Arc<Qrels>>,
}

impl PairSet {
    /// Reads `qid\tpos_pid\tneg_pid` triples and the qrels that back them.
    pub fn load_training(triples: &Path, qrels: &Path) -> Result<Self> {
        let descriptors = read_triples(BufReader::new(File::open(triples)?), triples)?;
        let qrels = Qrels::from_path(qrels)?;
        let set = Self::training(descriptors, qrels);
        info!(
            path = %triples.display(),
            examples = set.len(),
            queries = set.distinct_queries(),
            "loaded training triples"
        );
        Ok(set)
    }

    /// Reads a ranked candidate list of `qid\tpid[\t...]` lines.
    pub fn load_eval(candidates: &Path) -> Result<Self> {
        let descriptors = read_candidates(BufReader::new(File::open(candidates)?), candidates)?;
        let set = Self::eval(descriptors);
        info!(
            path = %candidates.display(),
            examples = set.len(),
            queries = set.distinct_queries(),
            "loaded evaluation candidates"
        );
        Ok(set)
    }

    pub fn training(descriptors: Vec<ExampleDescriptor>, qrels: Qrels) -> Self {
        Self {
            mode: Mode::Train,
            descriptors,
            qrels: Some(Arc::new(qrels)),
        }
    }

    pub fn eval(descriptors: Vec<ExampleDescriptor>) -> Self {
        Self {
            mode: Mode::Eval,
            descriptors,
            qrels: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptor(&self, index: usize) -> Option<&ExampleDescriptor> {
        self.descriptors.get(index)
    }

    pub fn descriptors(&self) -> &[ExampleDescriptor] {
        &self.descriptors
    }

    pub fn qrels(&self) -> Option<&Arc<Qrels>> {
        self.qrels.as_ref()
    }

    pub fn distinct_queries(&self) -> usize {
        self.descriptors
            .iter()
            .map(|d| d.qid)
            .collect::<FxHashSet<_>>()
            .len()
    }
}

/// Each triple yields its positive then its negative.
pub fn read_triples<R: BufRead>(reader: R, source: &Path) -> Result<Vec<ExampleDescriptor>> {
    let mut descriptors = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 3 {
            return Err(PrepError::format(
                source,
                line_no + 1,
                format!("expected 3 tab-separated fields, found {}", fields.len()),
            ));
        }
        let qid = parse_field(fields[0], "qid", source, line_no + 1)?;
        let pos = parse_field(fields[1], "positive pid", source, line_no + 1)?;
        let neg = parse_field(fields[2], "negative pid", source, line_no + 1)?;
        descriptors.push(ExampleDescriptor {
            qid,
            doc_id: pos,
            label: Some(1),
        });
        descriptors.push(ExampleDescriptor {
            qid,
            doc_id: neg,
            label: Some(0),
        });
    }
    Ok(descriptors)
}

/// Trailing rank and score columns are ignored.
pub fn read_candidates<R: BufRead>(reader: R, source: &Path) -> Result<Vec<ExampleDescriptor>> {
    let mut descriptors = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let (Some(qid), Some(pid)) = (fields.next(), fields.next()) else {
            return Err(PrepError::format(
                source,
                line_no + 1,
                "expected at least qid and pid",
            ));
        };
        descriptors.push(ExampleDescriptor {
            qid: parse_field(qid, "qid", source, line_no + 1)?,
            doc_id: parse_field(pid, "pid", source, line_no + 1)?,
            label: None,
        });
    }
    Ok(descriptors)
}

pub(crate) fn parse_field<T: FromStr>(
    raw: &str,
    name: &str,
    source: &Path,
    line: usize,
) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PrepError::format(source, line, format!("{name} {raw:?} is not an integer id")))
}
