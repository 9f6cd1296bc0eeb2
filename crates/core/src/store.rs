//! Fixed-width, identity-indexed passage store.
//!
//! A collection directory holds three aligned arrays of native-endian `i32`:
//!
//! ```text
//! pids.memmap       [rows]             row id, must equal the row index
//! lengths.memmap    [rows]             number of valid tokens in the row
//! token_ids.memmap  [rows * capacity]  row-major token ids, zero padded
//! ```
//!
//! The arrays are memory mapped; only the pages touched by lookups are read.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info};

use crate::error::{PrepError, Result};

/// Passage identifier. Doubles as the storage row index.
pub type DocId = u32;

pub const DEFAULT_CAPACITY: usize = 512;
pub const PIDS_FILE: &str = "pids.memmap";
pub const LENGTHS_FILE: &str = "lengths.memmap";
pub const TOKEN_IDS_FILE: &str = "token_ids.memmap";

const WORD: usize = std::mem::size_of::<i32>();

/// Read-only view over a collection directory.
pub struct RecordStore {
    pids: Mmap,
    lengths: Mmap,
    token_ids: Mmap,
    rows: usize,
    capacity: usize,
}

impl RecordStore {
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with_capacity(dir, DEFAULT_CAPACITY)
    }

    pub fn open_with_capacity(dir: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PrepError::Config("record capacity must be positive".into()));
        }
        let pids = map_file(&dir.join(PIDS_FILE))?;
        let lengths = map_file(&dir.join(LENGTHS_FILE))?;
        let token_ids = map_file(&dir.join(TOKEN_IDS_FILE))?;

        if pids.len() % WORD != 0 {
            return Err(PrepError::Integrity(format!(
                "{PIDS_FILE} has {} bytes, not a whole number of i32 rows",
                pids.len()
            )));
        }
        let rows = pids.len() / WORD;
        if lengths.len() != rows * WORD {
            return Err(PrepError::Integrity(format!(
                "{LENGTHS_FILE} holds {} bytes, expected {} for {rows} rows",
                lengths.len(),
                rows * WORD
            )));
        }
        let expected_tokens = rows
            .checked_mul(capacity)
            .and_then(|cells| cells.checked_mul(WORD))
            .ok_or_else(|| {
                PrepError::Config(format!(
                    "capacity {capacity} is too large for a collection of {rows} rows"
                ))
            })?;
        if token_ids.len() != expected_tokens {
            return Err(PrepError::Integrity(format!(
                "{TOKEN_IDS_FILE} holds {} bytes, expected {expected_tokens} for {rows} rows of {capacity}",
                token_ids.len()
            )));
        }
        for (name, map) in [
            (PIDS_FILE, &pids),
            (LENGTHS_FILE, &lengths),
            (TOKEN_IDS_FILE, &token_ids),
        ] {
            if !map.is_empty() {
                bytemuck::try_cast_slice::<u8, i32>(&map[..]).map_err(|err| {
                    PrepError::Integrity(format!("{name} cannot be read as i32: {err:?}"))
                })?;
            }
        }

        info!(
            dir = %dir.display(),
            rows,
            capacity,
            "opened passage collection"
        );
        Ok(Self {
            pids,
            lengths,
            token_ids,
            rows,
            capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Token ids of passage `id`, without the trailing pad.
    pub fn get(&self, id: DocId) -> Result<&[i32]> {
        let row = id as usize;
        if row >= self.rows {
            return Err(PrepError::missing("document", id));
        }
        let stored = words(&self.pids)[row];
        if stored < 0 || stored as usize != row {
            return Err(PrepError::Integrity(format!(
                "row {row} holds pid {stored}; collection is not identity indexed"
            )));
        }
        let length = self.checked_length(row)?;
        let start = row * self.capacity;
        Ok(&words(&self.token_ids)[start..start + length])
    }

    fn checked_length(&self, row: usize) -> Result<usize> {
        let length = words(&self.lengths)[row];
        if length < 0 || length as usize > self.capacity {
            return Err(PrepError::Integrity(format!(
                "row {row} has length {length}, capacity is {}",
                self.capacity
            )));
        }
        Ok(length as usize)
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the collection is read-only for the lifetime of the store; no
    // writer touches these files while they are mapped.
    let map = unsafe { Mmap::map(&file)? };
    debug!(path = %path.display(), bytes = map.len(), "mapped collection file");
    Ok(map)
}

fn words(map: &Mmap) -> &[i32] {
    if map.is_empty() {
        return &[];
    }
    // Size and alignment were validated in `open_with_capacity`.
    bytemuck::cast_slice(&map[..])
}

/// Offline builder for a collection directory. Rows must be pushed in pid
/// order starting at 0.
pub struct CollectionWriter {
    dir: PathBuf,
    capacity: usize,
    pids: BufWriter<File>,
    lengths: BufWriter<File>,
    token_ids: BufWriter<File>,
    padding: Vec<i32>,
    rows: usize,
    truncated: usize,
}

impl CollectionWriter {
    pub fn create(dir: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(PrepError::Config("record capacity must be positive".into()));
        }
        fs::create_dir_all(dir)?;
        let open = |name: &str| -> Result<BufWriter<File>> {
            Ok(BufWriter::new(File::create(dir.join(name))?))
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            capacity,
            pids: open(PIDS_FILE)?,
            lengths: open(LENGTHS_FILE)?,
            token_ids: open(TOKEN_IDS_FILE)?,
            padding: vec![0; capacity],
            rows: 0,
            truncated: 0,
        })
    }

    pub fn push(&mut self, pid: DocId, tokens: &[i32]) -> Result<()> {
        if pid as usize != self.rows {
            return Err(PrepError::Integrity(format!(
                "pid {pid} pushed at row {}; pids must be dense and ordered",
                self.rows
            )));
        }
        let length = tokens.len().min(self.capacity);
        if length < tokens.len() {
            self.truncated += 1;
        }
        self.pids.write_all(&(pid as i32).to_ne_bytes())?;
        self.lengths.write_all(&(length as i32).to_ne_bytes())?;
        self.token_ids
            .write_all(bytemuck::cast_slice(&tokens[..length]))?;
        self.token_ids
            .write_all(bytemuck::cast_slice(&self.padding[length..]))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flushes all three arrays and returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.pids.flush()?;
        self.lengths.flush()?;
        self.token_ids.flush()?;
        info!(
            dir = %self.dir.display(),
            rows = self.rows,
            truncated = self.truncated,
            "wrote passage collection"
        );
        Ok(self.rows)
    }
}
