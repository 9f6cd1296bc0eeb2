use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Identifier as it appears in tokenized JSON-lines files: either a bare
/// number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Number(u64),
    Text(String),
}

impl RecordId {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RecordId::Number(value) => Some(*value),
            RecordId::Text(raw) => raw.trim().parse().ok(),
        }
    }
}

/// One line of a tokenized queries or collection file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizedRecord {
    pub id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Serialized form of a collated batch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BatchRecord {
    pub batch_index: usize,
    pub input_ids: Vec<Vec<i64>>,
    pub token_type_ids: Vec<Vec<i64>>,
    pub valid_mask: Vec<Vec<i64>>,
    pub position_ids: Vec<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Vec<i64>>>,
    pub qid_list: Vec<u64>,
    pub docid_list: Vec<u32>,
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_accepts_numbers_and_numeric_strings() {
        let numeric: TokenizedRecord = serde_json::from_str(r#"{"id": 7, "ids": [1, 2]}"#).unwrap();
        assert_eq!(numeric.id.as_u64(), Some(7));
        assert_eq!(numeric.ids.unwrap(), vec![1, 2]);

        let quoted: TokenizedRecord =
            serde_json::from_str(r#"{"id": "1048585", "text": "what is rust"}"#).unwrap();
        assert_eq!(quoted.id.as_u64(), Some(1048585));
        assert_eq!(quoted.text.as_deref(), Some("what is rust"));

        let bad: TokenizedRecord = serde_json::from_str(r#"{"id": "q-1"}"#).unwrap();
        assert_eq!(bad.id.as_u64(), None);
    }

    #[test]
    fn jsonl_writer_writes_one_batch_per_line() {
        let record = BatchRecord {
            batch_index: 3,
            input_ids: vec![vec![101, 7, 102, 101, 9, 102]],
            token_type_ids: vec![vec![0, 0, 0, 1, 1, 1]],
            valid_mask: vec![vec![1; 6]],
            position_ids: vec![vec![0, 1, 2, 0, 1, 2]],
            labels: None,
            qid_list: vec![10],
            docid_list: vec![100],
        };
        let mut writer = JsonlWriter::new(Vec::new());
        writer.write_record(&record).unwrap();
        writer.write_record(&record).unwrap();
        let buf = writer.into_inner();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(!lines[0].contains("labels"));
        let parsed: BatchRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.batch_index, 3);
        assert_eq!(parsed.docid_list, vec![100]);
    }
}
