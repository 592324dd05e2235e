// Copyright 2021 Gnosis Ltd.
// SPDX-License-Identifier: Apache-2.0

//! Append-only, rotatable journal of local transactions, for crash-consistent replay
//! on restart.
//!
//! File format: a flat concatenation of RLP-encoded transactions, each prefixed with a
//! 4-byte little-endian length. Rotation writes a full snapshot to `<path>.new` and
//! atomically renames it over `<path>` — a crash before the rename leaves the old
//! journal intact, a crash after is idempotent on the next `load`.

use crate::config::JOURNAL_BATCH_SIZE;
use crate::error::{Error, Result};
use crate::types::TxRef;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of a `TxJournal::load` replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JournalStats {
    pub parsed: usize,
    pub failed: usize,
}

/// The journal's writer, explicit about the replay state rather than swapping in a
/// discard-everything sink: `insert` calls the pool issues while `load` is replaying
/// must not be re-journaled, and `Replaying` makes that a type-level fact instead of a
/// runtime flag.
enum JournalWriter {
    Closed,
    Replaying,
    Open(BufWriter<File>),
}

pub struct TxJournal {
    path: PathBuf,
    writer: JournalWriter,
}

impl TxJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: JournalWriter::Closed,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay the journal, handing decoded transactions to `add` in batches of at most
    /// [`JOURNAL_BATCH_SIZE`]. `add` returns one error per failed transaction in the
    /// batch it was given (in the same order); those are tallied into
    /// `JournalStats::failed`. Returns success immediately if the file does not exist.
    pub fn load<F>(&mut self, mut add: F) -> Result<JournalStats>
    where
        F: FnMut(&[TxRef]) -> Vec<Error>,
    {
        if !self.path.exists() {
            return Ok(JournalStats::default());
        }

        self.writer = JournalWriter::Replaying;

        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut batch: Vec<TxRef> = Vec::new();
        let mut stats = JournalStats::default();

        loop {
            match read_record(&mut reader) {
                Ok(Some(tx)) => {
                    stats.parsed += 1;
                    batch.push(Arc::new(tx));
                    if batch.len() > JOURNAL_BATCH_SIZE {
                        stats.failed += add(&batch).len();
                        batch.clear();
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    if !batch.is_empty() {
                        stats.failed += add(&batch).len();
                    }
                    self.open_for_append()?;
                    return Err(err);
                }
            }
        }
        if !batch.is_empty() {
            stats.failed += add(&batch).len();
        }

        self.open_for_append()?;
        Ok(stats)
    }

    /// Append one transaction. Fails with [`Error::NoActiveJournal`] if no writer is
    /// open (the common case being mid-replay, where this is expected and ignored).
    pub fn insert(&mut self, tx: &TxRef) -> Result<()> {
        match &mut self.writer {
            JournalWriter::Open(writer) => {
                write_record(writer, tx.as_ref())?;
                Ok(())
            }
            JournalWriter::Closed | JournalWriter::Replaying => Err(Error::NoActiveJournal),
        }
    }

    /// Rewrite the journal from the pool's current live set: close the writer, write
    /// every transaction in `all` to a staging file, atomically rename it over the
    /// live journal, then reopen for append.
    pub fn rotate<'a>(&mut self, all: impl Iterator<Item = &'a TxRef>) -> Result<()> {
        self.writer = JournalWriter::Closed;

        let staging_path = staging_path(&self.path);
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&staging_path)?;
            let mut writer = BufWriter::new(file);
            for tx in all {
                write_record(&mut writer, tx.as_ref())?;
            }
            writer.flush()?;
        }
        fs::rename(&staging_path, &self.path)?;

        self.open_for_append()
    }

    /// Close the writer, if any.
    pub fn close(&mut self) -> Result<()> {
        if let JournalWriter::Open(writer) = &mut self.writer {
            writer.flush()?;
        }
        self.writer = JournalWriter::Closed;
        Ok(())
    }

    fn open_for_append(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = JournalWriter::Open(BufWriter::new(file));
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".new");
    PathBuf::from(staging)
}

fn write_record(writer: &mut impl Write, tx: &crate::types::PooledTransaction) -> Result<()> {
    let encoded = rlp::encode(tx);
    let len = encoded.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&encoded)?;
    Ok(())
}

/// Read one length-prefixed record. `Ok(None)` means a clean end-of-stream (EOF
/// exactly on a record boundary); an EOF mid-record is a decode error.
fn read_record(reader: &mut impl Read) -> Result<Option<crate::types::PooledTransaction>> {
    let mut len_bytes = [0u8; 4];
    match read_exact_or_eof(reader, &mut len_bytes)? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::JournalDecode(format!("truncated record: {}", e)))?;

    rlp::decode(&buf)
        .map_err(|e| Error::JournalDecode(format!("malformed transaction record: {}", e)))
}

/// Like `Read::read_exact`, but a zero-byte read before any byte lands is reported as
/// `Ok(false)` (clean EOF) instead of an error; a partial read is still truncation.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(Error::JournalDecode(
                    "truncated record length prefix".to_string(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) => return Err(Error::JournalIo(e)),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PooledTransaction;
    use ethereum_types::{H256, U256};
    use tempfile::TempDir;

    fn tx(nonce: u64) -> TxRef {
        Arc::new(PooledTransaction::new(
            H256::from_low_u64_be(nonce),
            nonce,
            U256::from(nonce + 1),
            21_000,
            U256::from(nonce + 1) * 21_000,
            Default::default(),
        ))
    }

    #[test]
    fn insert_without_active_writer_fails() {
        let dir = TempDir::new().unwrap();
        let mut journal = TxJournal::new(dir.path().join("journal.rlp"));
        let err = journal.insert(&tx(1)).unwrap_err();
        assert!(matches!(err, Error::NoActiveJournal));
    }

    #[test]
    fn load_on_missing_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut journal = TxJournal::new(dir.path().join("does-not-exist.rlp"));
        let stats = journal.load(|_| Vec::new()).unwrap();
        assert_eq!(stats, JournalStats::default());
    }

    /// Property 9 / S-journal: rotate then load round-trips exactly.
    #[test]
    fn journal_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        let mut journal = TxJournal::new(&path);

        let txs: Vec<TxRef> = (1..=5).map(tx).collect();
        journal.rotate(txs.iter()).unwrap();

        let mut replayed = Vec::new();
        let stats = journal
            .load(|batch| {
                replayed.extend_from_slice(batch);
                Vec::new()
            })
            .unwrap();

        assert_eq!(stats.parsed, 5);
        assert_eq!(stats.failed, 0);
        let mut replayed_nonces: Vec<u64> = replayed.iter().map(|t| t.nonce).collect();
        replayed_nonces.sort_unstable();
        assert_eq!(replayed_nonces, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn insert_after_load_appends_and_is_visible_on_next_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        let mut journal = TxJournal::new(&path);

        journal.load(|_| Vec::new()).unwrap();
        journal.insert(&tx(1)).unwrap();
        journal.insert(&tx(2)).unwrap();
        journal.close().unwrap();

        let mut journal2 = TxJournal::new(&path);
        let mut replayed = Vec::new();
        journal2
            .load(|batch| {
                replayed.extend_from_slice(batch);
                Vec::new()
            })
            .unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[test]
    fn load_reports_add_failures() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        let mut journal = TxJournal::new(&path);
        journal.rotate([tx(1), tx(2), tx(3)].iter()).unwrap();

        // Stand in for the kind of rejection replay actually produces: the account's
        // on-chain nonce has since moved past what the journal recorded.
        let stats = journal
            .load(|batch| {
                batch
                    .iter()
                    .map(|tx| Error::NonceTooLow {
                        tx_nonce: tx.nonce,
                        account_nonce: tx.nonce + 1,
                    })
                    .collect()
            })
            .unwrap();
        assert_eq!(stats.parsed, 3);
        assert_eq!(stats.failed, 3);
    }

    #[test]
    fn truncated_record_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.rlp");
        std::fs::write(&path, [1u8, 0, 0, 0]).unwrap(); // length prefix claims 1 byte, body absent
        let mut journal = TxJournal::new(&path);
        let err = journal.load(|_| Vec::new()).unwrap_err();
        assert!(matches!(err, Error::JournalDecode(_)));
    }
}
