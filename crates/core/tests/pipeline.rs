use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use passage_prep_core::{
    AssemblerConfig, BatchLoader, CollectionWriter, LoaderConfig, Mode, PairSet, PrepError,
    QueryTable, QueryTokenizer, RankingDataset, RecordStore, Result, SpecialIds, TypoPerturber,
};
use tempfile::{tempdir, TempDir};

struct ByteTokenizer;

impl QueryTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i32>> {
        Ok(text.bytes().map(i32::from).collect())
    }

    fn special_ids(&self) -> Option<SpecialIds> {
        Some(SpecialIds {
            cls: 101,
            sep: 102,
        })
    }
}

/// Passage `p` holds `p % 7 + 1` tokens, all equal to `1000 + p`.
fn write_corpus(root: &Path, passages: u32) {
    let mut writer = CollectionWriter::create(&root.join("collection"), 16).unwrap();
    for pid in 0..passages {
        let len = (pid % 7 + 1) as usize;
        writer.push(pid, &vec![1000 + pid as i32; len]).unwrap();
    }
    writer.finish().unwrap();
    fs::write(
        root.join("queries.tsv"),
        "10\tmemory mapped passages\n11\twhat is qrels\n12\tbatch labels\n",
    )
    .unwrap();
    fs::write(
        root.join("triples.tsv"),
        "10\t100\t200\n11\t101\t201\n12\t102\t100\n",
    )
    .unwrap();
    fs::write(
        root.join("qrels.tsv"),
        "10 0 100 1\n10 0 150 1\n11 0 101 1\n12 0 102 1\n",
    )
    .unwrap();
    fs::write(
        root.join("top1000.dev"),
        "10\t100\tmemory\tpassage\n10\t200\n11\t150\t1\t0.3\n",
    )
    .unwrap();
}

fn training_dataset(root: &Path, config: AssemblerConfig) -> RankingDataset {
    let pairs = PairSet::load_training(&root.join("triples.tsv"), &root.join("qrels.tsv")).unwrap();
    let store = RecordStore::open_with_capacity(&root.join("collection"), 16).unwrap();
    let queries = QueryTable::load(&root.join("queries.tsv")).unwrap();
    RankingDataset::new(
        pairs,
        config,
        Arc::new(store),
        Arc::new(queries),
        Arc::new(ByteTokenizer),
        Some(Arc::new(TypoPerturber::default())),
    )
    .unwrap()
}

fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    write_corpus(dir.path(), 300);
    dir
}

#[test]
fn single_triple_batch_matches_relevance() {
    let dir = fixture();
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    let loader = BatchLoader::new(
        &dataset,
        LoaderConfig {
            batch_size: 2,
            ..LoaderConfig::default()
        },
    )
    .unwrap();
    let batches: Vec<_> = loader.collect::<Result<_>>().unwrap();
    assert_eq!(batches.len(), 3);

    let first = &batches[0];
    assert_eq!(first.qid_list, vec![10, 10]);
    assert_eq!(first.docid_list, vec![100, 200]);
    let labels = first.labels.as_ref().unwrap();
    assert_eq!(labels.shape(), (2, 2));
    assert_eq!(labels.row(0), &[0, -1]);
    assert_eq!(labels.row(1), &[0, -1]);

    // qid 12 lists 102 as relevant; its negative is passage 100.
    let last = &batches[2];
    assert_eq!(last.docid_list, vec![102, 100]);
    assert_eq!(last.labels.as_ref().unwrap().row(1), &[0, -1]);
}

#[test]
fn collated_rows_respect_segment_layout() {
    let dir = fixture();
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    let store = dataset.assembler().store();
    let batch = BatchLoader::new(&dataset, LoaderConfig::default())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(batch.len(), 6);
    let (rows, width) = batch.input_ids.shape();
    for j in 0..rows {
        let q_len = "memory mapped passages".len().min(20) + 2;
        let q_len = match batch.qid_list[j] {
            10 => q_len,
            11 => "what is qrels".len() + 2,
            _ => "batch labels".len() + 2,
        };
        let d_len = store.get(batch.docid_list[j]).unwrap().len() + 2;
        for i in 0..width {
            let valid = batch.valid_mask.row(j)[i];
            assert_eq!(valid == 1, i < q_len + d_len);
            let expected_type = if i >= q_len && i < q_len + d_len { 1 } else { 0 };
            assert_eq!(batch.token_type_ids.row(j)[i], expected_type);
        }
        assert_eq!(batch.position_ids.row(j)[q_len], 0);
        assert_eq!(batch.position_ids.row(j)[q_len - 1], q_len as i64 - 1);
        assert_eq!(batch.input_ids.row(j)[q_len + 1], 1000 + batch.docid_list[j] as i64);
    }
}

#[test]
fn eval_split_has_no_labels() {
    let dir = fixture();
    let pairs = PairSet::load_eval(&dir.path().join("top1000.dev")).unwrap();
    assert_eq!(pairs.mode(), Mode::Eval);
    assert!(pairs.qrels().is_none());
    let dataset = RankingDataset::new(
        pairs,
        AssemblerConfig::default(),
        Arc::new(RecordStore::open_with_capacity(&dir.path().join("collection"), 16).unwrap()),
        Arc::new(QueryTable::load(&dir.path().join("queries.tsv")).unwrap()),
        Arc::new(ByteTokenizer),
        None,
    )
    .unwrap();
    let batch = BatchLoader::new(&dataset, LoaderConfig::default())
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert!(batch.labels.is_none());
    assert_eq!(batch.docid_list, vec![100, 200, 150]);
}

#[test]
fn loading_is_idempotent() {
    let dir = fixture();
    let a = PairSet::load_training(&dir.path().join("triples.tsv"), &dir.path().join("qrels.tsv"))
        .unwrap();
    let b = PairSet::load_training(&dir.path().join("triples.tsv"), &dir.path().join("qrels.tsv"))
        .unwrap();
    assert_eq!(a.descriptors(), b.descriptors());
    assert_eq!(**a.qrels().unwrap(), **b.qrels().unwrap());
    assert_eq!(a.len(), 6);
    assert_eq!(a.distinct_queries(), 3);
}

#[test]
fn perturbed_batches_repeat_for_same_seed_and_workers_agree() {
    let dir = fixture();
    let config = AssemblerConfig {
        perturb_probability: 0.5,
        seed: 7,
        ..AssemblerConfig::default()
    };
    let dataset = training_dataset(dir.path(), config);
    let run = |workers| {
        BatchLoader::new(
            &dataset,
            LoaderConfig {
                batch_size: 4,
                workers,
                ..LoaderConfig::default()
            },
        )
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
    };
    let sequential = run(1);
    assert_eq!(sequential, run(1));
    assert_eq!(sequential, run(3));
}

#[test]
fn shuffled_epoch_visits_every_index_once() {
    let dir = fixture();
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    let mut loader = BatchLoader::new(
        &dataset,
        LoaderConfig {
            batch_size: 4,
            shuffle: true,
            ..LoaderConfig::default()
        },
    )
    .unwrap();
    assert_eq!(loader.num_batches(), 2);
    let mut seen = Vec::new();
    for batch in loader.by_ref() {
        let batch = batch.unwrap();
        seen.extend(batch.qid_list.iter().zip(&batch.docid_list).map(|(q, d)| (*q, *d)));
    }
    assert_eq!(seen.len(), 6);
    let unique: BTreeSet<_> = seen.iter().copied().collect();
    assert_eq!(unique.len(), 6);

    loader.set_epoch(1);
    assert_eq!(loader.epoch(), 1);
    assert_eq!(loader.count(), 2);
}

#[test]
fn drop_last_skips_short_tail() {
    let dir = fixture();
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    let loader = BatchLoader::new(
        &dataset,
        LoaderConfig {
            batch_size: 4,
            drop_last: true,
            ..LoaderConfig::default()
        },
    )
    .unwrap();
    assert_eq!(loader.num_batches(), 1);
    let batches: Vec<_> = loader.collect::<Result<_>>().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 4);
}

#[test]
fn dangling_passage_aborts_the_run() {
    let dir = tempdir().unwrap();
    write_corpus(dir.path(), 150);
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    let mut loader = BatchLoader::new(&dataset, LoaderConfig::default()).unwrap();
    match loader.next() {
        Some(Err(PrepError::KeyNotFound { kind, id })) => {
            assert_eq!(kind, "document");
            assert_eq!(id, 200);
        }
        other => panic!("unexpected batch: {other:?}"),
    }
    assert!(loader.next().is_none());
}

#[test]
fn zero_batch_size_is_rejected() {
    let dir = fixture();
    let dataset = training_dataset(dir.path(), AssemblerConfig::default());
    assert!(matches!(
        BatchLoader::new(
            &dataset,
            LoaderConfig {
                batch_size: 0,
                ..LoaderConfig::default()
            }
        ),
        Err(PrepError::Config(_))
    ));
}
