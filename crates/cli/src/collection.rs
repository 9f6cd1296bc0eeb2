use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use passage_prep_core::{CollectionWriter, DocId, RecordStore};
use passage_prep_index::TokenizedRecord;

/// Converts `{"id": .., "ids": [..]}` lines, in passage-id order, into a
/// fixed-width store under `out`. Returns the number of rows written.
pub fn build_collection(input: &Path, out: &Path, capacity: usize) -> Result<usize> {
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("failed to open {}", input.display()))?,
    );
    let mut writer = CollectionWriter::create(out, capacity)?;
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: TokenizedRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid record on line {} of {}", idx + 1, input.display()))?;
        let pid = record
            .id
            .as_u64()
            .and_then(|id| DocId::try_from(id).ok())
            .ok_or_else(|| anyhow!("line {}: id {:?} is not a passage id", idx + 1, record.id))?;
        let ids = record
            .ids
            .ok_or_else(|| anyhow!("line {}: passage {pid} has no `ids`", idx + 1))?;
        writer.push(pid, &ids)?;
    }
    Ok(writer.finish()?)
}

pub fn lookup(collection: &Path, id: DocId, capacity: usize) -> Result<Vec<i32>> {
    let store = RecordStore::open_with_capacity(collection, capacity)
        .with_context(|| format!("failed to open collection {}", collection.display()))?;
    Ok(store.get(id)?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn built_collection_reads_back() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("collection.jsonl");
        fs::write(
            &input,
            "{\"id\": 0, \"ids\": [7592, 2088]}\n\n{\"id\": \"1\", \"ids\": [1, 2, 3, 4, 5]}\n{\"id\": 2, \"ids\": []}\n",
        )
        .unwrap();
        let out = dir.path().join("store");
        assert_eq!(build_collection(&input, &out, 4).unwrap(), 3);

        assert_eq!(lookup(&out, 0, 4).unwrap(), vec![7592, 2088]);
        assert_eq!(lookup(&out, 1, 4).unwrap(), vec![1, 2, 3, 4]);
        assert!(lookup(&out, 2, 4).unwrap().is_empty());
        assert!(lookup(&out, 3, 4).is_err());
        assert!(lookup(&out, 0, 8).is_err());
    }

    #[test]
    fn records_without_ids_or_out_of_order_fail() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("text.jsonl");
        fs::write(&input, "{\"id\": 0, \"text\": \"untokenized\"}\n").unwrap();
        let err = build_collection(&input, &dir.path().join("a"), 4).unwrap_err();
        assert!(err.to_string().contains("has no `ids`"), "{err}");

        fs::write(&input, "{\"id\": 1, \"ids\": [3]}\n").unwrap();
        assert!(build_collection(&input, &dir.path().join("b"), 4).is_err());
    }
}
