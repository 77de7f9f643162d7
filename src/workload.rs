//! Workload files: the initial key set plus a transaction stream.
//!
//! Layout, little-endian throughout:
//!
//! ```text
//! u64 n | u64 m | n x u64 key | m x record
//! record (24 bytes) = u8 type | 7 x u8 padding | u64 arg0 | u64 arg1
//! ```
//!
//! Type 0 is a query over `[arg0, arg1]` (a point lookup when equal), 1 an
//! insert of `arg0`, 2 a delete of `arg0`. Updates write `arg1 = arg0`.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::Engine;
use crate::error::{EngineError, WorkloadError};

/// Size of one transaction record on disk.
pub const RECORD_SIZE: usize = 24;

const TAG_QUERY: u8 = 0;
const TAG_INSERT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// Upper bound on what a header may make us preallocate.
const PREALLOCATE_LIMIT: u64 = 1 << 20;

/// One operation of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transaction {
    /// Point lookup (`lo == hi`) or range aggregate over `[lo, hi]`.
    Query {
        /// Lower bound, inclusive.
        lo: u64,
        /// Upper bound, inclusive.
        hi: u64,
    },
    /// Add one occurrence of the key.
    Insert(u64),
    /// Remove one occurrence of the key.
    Delete(u64),
}

impl Transaction {
    fn encode(self) -> [u8; RECORD_SIZE] {
        let (tag, arg0, arg1) = match self {
            Self::Query { lo, hi } => (TAG_QUERY, lo, hi),
            Self::Insert(key) => (TAG_INSERT, key, key),
            Self::Delete(key) => (TAG_DELETE, key, key),
        };
        let mut record = [0u8; RECORD_SIZE];
        record[0] = tag;
        record[8..16].copy_from_slice(&arg0.to_le_bytes());
        record[16..24].copy_from_slice(&arg1.to_le_bytes());
        record
    }

    fn decode(index: usize, record: &[u8; RECORD_SIZE]) -> Result<Self, WorkloadError> {
        let word = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&record[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        let (arg0, arg1) = (word(8), word(16));
        match record[0] {
            TAG_QUERY => Ok(Self::Query { lo: arg0, hi: arg1 }),
            TAG_INSERT => Ok(Self::Insert(arg0)),
            TAG_DELETE => Ok(Self::Delete(arg0)),
            tag => Err(WorkloadError::UnknownTransaction { index, tag }),
        }
    }

    /// Submit to `engine`.
    ///
    /// # Errors
    ///
    /// Whatever the engine rejects the operation with.
    pub fn apply(self, engine: &mut dyn Engine) -> Result<(), EngineError> {
        match self {
            Self::Query { lo, hi } => engine.query(lo, hi).map(drop),
            Self::Insert(key) => engine.insert(key),
            Self::Delete(key) => engine.delete(key),
        }
    }
}

/// Initial keys and the transaction stream run on top of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    /// Keys of version 0, duplicates counted.
    pub keys: Vec<u64>,
    /// Operations in submission order.
    pub transactions: Vec<Transaction>,
}

impl Workload {
    /// Decode a workload from `reader`.
    ///
    /// # Errors
    ///
    /// [`WorkloadError::Truncated`] if the stream ends early,
    /// [`WorkloadError::UnknownTransaction`] on a bad type byte.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, WorkloadError> {
        let n = read_count(&mut reader, "header words", 0)?;
        let m = read_count(&mut reader, "header words", 1)?;

        let mut keys = Vec::with_capacity(preallocation(n));
        for found in 0..n {
            let mut word = [0u8; 8];
            read_or_truncated(&mut reader, &mut word, "keys", n, found)?;
            keys.push(u64::from_le_bytes(word));
        }

        let mut transactions = Vec::with_capacity(preallocation(m));
        for found in 0..m {
            let mut record = [0u8; RECORD_SIZE];
            read_or_truncated(&mut reader, &mut record, "transactions", m, found)?;
            transactions.push(Transaction::decode(transactions.len(), &record)?);
        }
        Ok(Self { keys, transactions })
    }

    /// Read a workload file.
    ///
    /// # Errors
    ///
    /// See [`read_from`](Self::read_from); also fails if the file cannot be
    /// opened.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WorkloadError> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    /// Encode to `writer`.
    ///
    /// # Errors
    ///
    /// I/O failure.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), WorkloadError> {
        writer.write_all(&(self.keys.len() as u64).to_le_bytes())?;
        writer.write_all(&(self.transactions.len() as u64).to_le_bytes())?;
        for key in &self.keys {
            writer.write_all(&key.to_le_bytes())?;
        }
        for transaction in &self.transactions {
            writer.write_all(&transaction.encode())?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write a workload file, replacing any existing one.
    ///
    /// # Errors
    ///
    /// I/O failure.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WorkloadError> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Number of updates in the stream.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| !matches!(t, Transaction::Query { .. }))
            .count()
    }

    /// Generate a synthetic workload.
    #[must_use]
    pub fn generate(options: &GenerateOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let span = options.key_space.max(1);
        let keys = (0..options.records).map(|_| rng.random_range(0..span)).collect();
        let transactions = (0..options.transactions)
            .map(|_| {
                let key = rng.random_range(0..span);
                let roll: f64 = rng.random();
                if roll < options.query_ratio {
                    let width = rng.random_range(0..=options.max_range);
                    Transaction::Query {
                        lo: key,
                        hi: key.saturating_add(width),
                    }
                } else if roll < options.query_ratio + options.insert_ratio {
                    Transaction::Insert(key)
                } else {
                    Transaction::Delete(key)
                }
            })
            .collect();
        Self { keys, transactions }
    }
}

/// Parameters of [`Workload::generate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerateOptions {
    /// Number of initial keys.
    pub records: usize,
    /// Number of transactions.
    pub transactions: usize,
    /// Keys are drawn uniformly from `[0, key_space)`.
    pub key_space: u64,
    /// Fraction of transactions that are queries.
    pub query_ratio: f64,
    /// Fraction that are inserts; the rest are deletes.
    pub insert_ratio: f64,
    /// Queries cover `[k, k + w]` with `w` uniform in `[0, max_range]`.
    /// Zero makes every query a point lookup.
    pub max_range: u64,
    /// RNG seed; equal options generate equal workloads.
    pub seed: u64,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            records: 100_000,
            transactions: 100_000,
            key_space: 1 << 32,
            query_ratio: 0.5,
            insert_ratio: 0.25,
            max_range: 1_000,
            seed: 0,
        }
    }
}

fn preallocation(declared: u64) -> usize {
    usize::try_from(declared.min(PREALLOCATE_LIMIT)).unwrap_or(0)
}

fn read_count<R: Read>(reader: &mut R, what: &'static str, found: u64) -> Result<u64, WorkloadError> {
    let mut word = [0u8; 8];
    read_or_truncated(reader, &mut word, what, 2, found)?;
    Ok(u64::from_le_bytes(word))
}

fn read_or_truncated<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
    expected: u64,
    found: u64,
) -> Result<(), WorkloadError> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => WorkloadError::Truncated {
            what,
            expected,
            found,
        },
        _ => WorkloadError::Io(err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Workload {
        Workload {
            keys: vec![5, 10, 15],
            transactions: vec![
                Transaction::Insert(10),
                Transaction::Delete(5),
                Transaction::Query { lo: 6, hi: 20 },
                Transaction::Query { lo: 10, hi: 10 },
            ],
        }
    }

    #[test]
    fn record_layout_matches_file_format() {
        let record = Transaction::Query { lo: 1, hi: 0x0102 }.encode();
        assert_eq!(record[0], 0);
        assert_eq!(&record[1..8], &[0; 7]);
        assert_eq!(&record[8..16], &1u64.to_le_bytes());
        assert_eq!(&record[16..24], &0x0102u64.to_le_bytes());
        let insert = Transaction::Insert(9).encode();
        assert_eq!(insert[0], 1);
        assert_eq!(&insert[16..24], &9u64.to_le_bytes());
    }

    #[test]
    fn encoded_size() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 16 + 3 * 8 + 4 * RECORD_SIZE);
        assert_eq!(Workload::read_from(bytes.as_slice()).unwrap(), sample());
    }

    #[test]
    fn unknown_type_rejects_the_load() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes[16 + 3 * 8 + RECORD_SIZE] = 7;
        assert!(matches!(
            Workload::read_from(bytes.as_slice()),
            Err(WorkloadError::UnknownTransaction { index: 1, tag: 7 })
        ));
    }

    #[test]
    fn truncation_reports_what_is_missing() {
        let mut bytes = Vec::new();
        sample().write_to(&mut bytes).unwrap();
        bytes.truncate(16 + 3 * 8 + 2 * RECORD_SIZE + 5);
        assert!(matches!(
            Workload::read_from(bytes.as_slice()),
            Err(WorkloadError::Truncated {
                what: "transactions",
                expected: 4,
                found: 2
            })
        ));
        assert!(matches!(
            Workload::read_from(&bytes[..12]),
            Err(WorkloadError::Truncated { found: 1, .. })
        ));
    }

    #[test]
    fn generation_is_seeded_and_respects_the_mix() {
        let options = GenerateOptions {
            records: 50,
            transactions: 2_000,
            key_space: 1_000,
            query_ratio: 0.5,
            insert_ratio: 0.5,
            max_range: 0,
            seed: 7,
        };
        let workload = Workload::generate(&options);
        assert_eq!(workload, Workload::generate(&options));
        assert_eq!(workload.keys.len(), 50);
        assert!(workload.keys.iter().all(|&k| k < 1_000));
        for transaction in &workload.transactions {
            match *transaction {
                Transaction::Query { lo, hi } => assert_eq!(lo, hi),
                Transaction::Insert(key) => assert!(key < 1_000),
                Transaction::Delete(_) => panic!("delete generated with zero delete ratio"),
            }
        }
        let queries = workload.transactions.len() - workload.updates();
        assert!((800..1_200).contains(&queries));
    }
}
