use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use passage_prep_index::TokenizedRecord;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PrepError, Result};
use crate::pairs::parse_field;

pub type QueryId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Text(String),
    Tokens(Vec<i32>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryFormat {
    /// `id<TAB>text`
    Tsv,
    /// `{"id": .., "ids": [..]}` or `{"id": .., "text": ".."}`
    Jsonl,
}

impl QueryFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") || ext.eq_ignore_ascii_case("jsonl") => {
                QueryFormat::Jsonl
            }
            _ => QueryFormat::Tsv,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryTable {
    entries: FxHashMap<QueryId, Query>,
}

impl QueryTable {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_as(path, QueryFormat::from_path(path))
    }

    pub fn load_as(path: &Path, format: QueryFormat) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let table = Self::from_reader(reader, format, path)?;
        info!(
            path = %path.display(),
            queries = table.len(),
            format = ?format,
            "loaded queries"
        );
        Ok(table)
    }

    pub fn from_reader<R: BufRead>(reader: R, format: QueryFormat, source: &Path) -> Result<Self> {
        let mut entries = FxHashMap::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let (qid, query) = match format {
                QueryFormat::Tsv => parse_tsv(&line, source, line_no + 1)?,
                QueryFormat::Jsonl => parse_jsonl(&line, source, line_no + 1)?,
            };
            entries.insert(qid, query);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, qid: QueryId) -> Result<&Query> {
        self.entries
            .get(&qid)
            .ok_or_else(|| PrepError::missing("query", qid))
    }

    pub fn insert(&mut self, qid: QueryId, query: Query) {
        self.entries.insert(qid, query);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_tsv(line: &str, source: &Path, line_no: usize) -> Result<(QueryId, Query)> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 2 {
        return Err(PrepError::format(
            source,
            line_no,
            format!("expected id and text, found {} fields", fields.len()),
        ));
    }
    let qid = parse_field(fields[0], "qid", source, line_no)?;
    Ok((qid, Query::Text(fields[1].trim().to_string())))
}

fn parse_jsonl(line: &str, source: &Path, line_no: usize) -> Result<(QueryId, Query)> {
    let record: TokenizedRecord = serde_json::from_str(line)
        .map_err(|err| PrepError::format(source, line_no, err.to_string()))?;
    let qid = record
        .id
        .as_u64()
        .ok_or_else(|| PrepError::format(source, line_no, format!("id {:?} is not an integer", record.id)))?;
    let query = match (record.ids, record.text) {
        (Some(ids), _) => Query::Tokens(ids),
        (None, Some(text)) => Query::Text(text),
        (None, None) => {
            return Err(PrepError::format(
                source,
                line_no,
                "query record has neither ids nor text",
            ))
        }
    };
    Ok((qid, query))
}
