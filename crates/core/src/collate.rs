use passage_prep_index::BatchRecord;
use serde::{Deserialize, Serialize};

use crate::assemble::AssembledExample;
use crate::error::{PrepError, Result};
use crate::pairs::Mode;
use crate::queries::QueryId;
use crate::store::DocId;

/// Fill value of the label matrix; means "no relevant document here".
pub const NO_LABEL: i64 = -1;

/// Dense row-major `i64` matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<i64>,
}

impl Matrix {
    pub fn filled(rows: usize, cols: usize, fill: i64) -> Self {
        Self {
            rows,
            cols,
            data: vec![fill; rows * cols],
        }
    }

    /// Right-pads each row to `width` (default: the longest row) with `fill`.
    pub fn pack(rows: &[Vec<i64>], fill: i64, width: Option<usize>) -> Self {
        let cols = width.unwrap_or_else(|| rows.iter().map(Vec::len).max().unwrap_or(0));
        let mut matrix = Self::filled(rows.len(), cols, fill);
        for (i, row) in rows.iter().enumerate() {
            let len = row.len().min(cols);
            matrix.row_mut(i)[..len].copy_from_slice(&row[..len]);
        }
        matrix
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn row(&self, i: usize) -> &[i64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    fn row_mut(&mut self, i: usize) -> &mut [i64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn get(&self, i: usize, j: usize) -> Option<i64> {
        if i < self.rows && j < self.cols {
            Some(self.data[i * self.cols + j])
        } else {
            None
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<i64>> {
        (0..self.rows).map(|i| self.row(i).to_vec()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Matrix,
    pub token_type_ids: Matrix,
    pub valid_mask: Matrix,
    pub position_ids: Matrix,
    /// `batch × batch`; row `j` lists the in-batch columns holding passages
    /// relevant to query `j`, padded with [`NO_LABEL`]. Training only.
    pub labels: Option<Matrix>,
    pub qid_list: Vec<QueryId>,
    pub docid_list: Vec<DocId>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.qid_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qid_list.is_empty()
    }

    pub fn to_record(&self, batch_index: usize) -> BatchRecord {
        BatchRecord {
            batch_index,
            input_ids: self.input_ids.to_rows(),
            token_type_ids: self.token_type_ids.to_rows(),
            valid_mask: self.valid_mask.to_rows(),
            position_ids: self.position_ids.to_rows(),
            labels: self.labels.as_ref().map(Matrix::to_rows),
            qid_list: self.qid_list.clone(),
            docid_list: self.docid_list.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Collator {
    mode: Mode,
}

impl Collator {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn collate(&self, examples: &[AssembledExample]) -> Result<Batch> {
        if examples.is_empty() {
            return Err(PrepError::EmptyBatch);
        }
        let batch_size = examples.len();
        let mut input_ids = Vec::with_capacity(batch_size);
        let mut token_type_ids = Vec::with_capacity(batch_size);
        let mut valid_mask = Vec::with_capacity(batch_size);
        let mut position_ids = Vec::with_capacity(batch_size);

        for example in examples {
            let q_len = example.query_input_ids.len();
            let d_len = example.doc_input_ids.len();
            let ids: Vec<i64> = example
                .query_input_ids
                .iter()
                .chain(&example.doc_input_ids)
                .map(|id| i64::from(*id))
                .collect();
            let mut types = vec![0i64; q_len];
            types.resize(q_len + d_len, 1);
            let positions: Vec<i64> = (0..q_len as i64).chain(0..d_len as i64).collect();
            valid_mask.push(vec![1i64; ids.len()]);
            input_ids.push(ids);
            token_type_ids.push(types);
            position_ids.push(positions);
        }

        let qid_list: Vec<QueryId> = examples.iter().map(|e| e.qid).collect();
        let docid_list: Vec<DocId> = examples.iter().map(|e| e.doc_id).collect();

        let labels = if self.mode.is_train() {
            Some(in_batch_labels(examples, &docid_list)?)
        } else {
            None
        };

        Ok(Batch {
            input_ids: Matrix::pack(&input_ids, 0, None),
            token_type_ids: Matrix::pack(&token_type_ids, 0, None),
            valid_mask: Matrix::pack(&valid_mask, 0, None),
            position_ids: Matrix::pack(&position_ids, 0, None),
            labels,
            qid_list,
            docid_list,
        })
    }
}

/// Recomputed for every batch: which columns of this batch hold passages
/// relevant to each row's query.
fn in_batch_labels(examples: &[AssembledExample], docid_list: &[DocId]) -> Result<Matrix> {
    let mut rows = Vec::with_capacity(examples.len());
    for example in examples {
        let rel_docs = example
            .rel_docs
            .as_ref()
            .ok_or_else(|| PrepError::missing("qrels query", example.qid))?;
        let mut row = Vec::new();
        for (k, doc_id) in docid_list.iter().enumerate() {
            if rel_docs.contains(doc_id) {
                row.push(k as i64);
            }
        }
        if row.is_empty() {
            row.push(NO_LABEL);
        }
        rows.push(row);
    }
    Ok(Matrix::pack(&rows, NO_LABEL, Some(examples.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;
    use std::sync::Arc;

    fn example(qid: QueryId, doc_id: DocId, q: &[i32], d: &[i32], rel: &[DocId]) -> AssembledExample {
        AssembledExample {
            query_input_ids: q.to_vec(),
            doc_input_ids: d.to_vec(),
            qid,
            doc_id,
            rel_docs: Some(Arc::new(rel.iter().copied().collect::<FxHashSet<_>>())),
        }
    }

    #[test]
    fn triple_batch_labels_point_at_relevant_columns() {
        let batch = vec![
            example(10, 100, &[101, 7, 102], &[101, 1, 2, 102], &[100, 150]),
            example(10, 200, &[101, 7, 102], &[101, 3, 102], &[100, 150]),
        ];
        let out = Collator::new(Mode::Train).collate(&batch).unwrap();
        let labels = out.labels.unwrap();
        assert_eq!(labels.shape(), (2, 2));
        assert_eq!(labels.row(0), &[0, -1]);
        assert_eq!(labels.row(1), &[0, -1]);
        assert_eq!(out.qid_list, vec![10, 10]);
        assert_eq!(out.docid_list, vec![100, 200]);
    }

    #[test]
    fn rows_without_relevant_documents_are_all_sentinel() {
        let batch = vec![
            example(10, 100, &[1], &[2], &[100]),
            example(11, 200, &[1], &[2], &[999]),
            example(12, 100, &[1], &[2], &[100, 200]),
        ];
        let labels = Collator::new(Mode::Train)
            .collate(&batch)
            .unwrap()
            .labels
            .unwrap();
        assert_eq!(labels.row(0), &[0, 2, -1]);
        assert_eq!(labels.row(1), &[-1, -1, -1]);
        assert_eq!(labels.row(2), &[0, 1, 2]);
    }

    #[test]
    fn segments_restart_positions_and_pad_with_zero() {
        let batch = vec![
            example(1, 5, &[101, 9, 102], &[101, 4, 4, 102], &[]),
            example(2, 6, &[101, 102], &[101, 102], &[]),
        ];
        let out = Collator::new(Mode::Eval).collate(&batch).unwrap();
        assert!(out.labels.is_none());
        assert_eq!(out.input_ids.shape(), (2, 7));
        assert_eq!(out.input_ids.row(0), &[101, 9, 102, 101, 4, 4, 102]);
        assert_eq!(out.input_ids.row(1), &[101, 102, 101, 102, 0, 0, 0]);
        assert_eq!(out.token_type_ids.row(0), &[0, 0, 0, 1, 1, 1, 1]);
        assert_eq!(out.token_type_ids.row(1), &[0, 0, 1, 1, 0, 0, 0]);
        assert_eq!(out.position_ids.row(0), &[0, 1, 2, 0, 1, 2, 3]);
        assert_eq!(out.position_ids.row(1), &[0, 1, 0, 1, 0, 0, 0]);
        assert_eq!(out.valid_mask.row(1), &[1, 1, 1, 1, 0, 0, 0]);
        for m in [&out.token_type_ids, &out.valid_mask, &out.position_ids] {
            assert_eq!(m.shape(), out.input_ids.shape());
        }
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(matches!(
            Collator::new(Mode::Eval).collate(&[]),
            Err(PrepError::EmptyBatch)
        ));
    }

    #[test]
    fn training_requires_relevance_sets() {
        let mut bare = example(3, 1, &[1], &[2], &[]);
        bare.rel_docs = None;
        assert!(matches!(
            Collator::new(Mode::Train).collate(&[bare.clone()]),
            Err(PrepError::KeyNotFound { .. })
        ));
        assert!(Collator::new(Mode::Eval).collate(&[bare]).is_ok());
    }

    #[test]
    fn matrix_pack_and_record_export() {
        let m = Matrix::pack(&[vec![1, 2, 3], vec![4]], -1, Some(2));
        assert_eq!(m.to_rows(), vec![vec![1, 2], vec![4, -1]]);
        assert_eq!(m.get(1, 1), Some(-1));
        assert_eq!(m.get(2, 0), None);

        let batch = vec![example(10, 100, &[1], &[2], &[100])];
        let out = Collator::new(Mode::Train).collate(&batch).unwrap();
        let record = out.to_record(4);
        assert_eq!(record.batch_index, 4);
        assert_eq!(record.labels, Some(vec![vec![0]]));
        assert_eq!(record.input_ids, vec![vec![1, 2]]);
    }
}
