//! A minimal row store on top of JSON lines files: one document, result,
//! point or vocabulary entry per line. Readers return the whole slice of rows
//! and leave partitioning to `ExecutionStrategy`. Writers never overwrite an
//! existing file.

use crate::{
    lda::{vocab::VocabularyEntry, Vocabulary},
    AssignedDocument, Document, Error, Result,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

/// Reads every non-blank line of `path` as a `T`. Parse errors carry the
/// 1-based line number.
pub fn read_jsonl<T, P>(path: P) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;

        if line.trim().is_empty() {
            continue;
        }

        let row = serde_json::from_str(&line).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            line: index + 1,
            source,
        })?;

        rows.push(row);
    }

    log::debug!("Read {} rows from {:?}", rows.len(), path);

    Ok(rows)
}

pub fn read_documents<P: AsRef<Path>>(path: P) -> Result<Vec<Document>> {
    read_jsonl(path)
}

pub fn read_results<P: AsRef<Path>>(path: P) -> Result<Vec<AssignedDocument>> {
    read_jsonl(path)
}

pub fn read_points<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f64>>> {
    read_jsonl(path)
}

/// Reads `{"word_id": .., "word": ..}` rows. Ids must be contiguous from 0.
pub fn read_vocabulary<P: AsRef<Path>>(path: P) -> Result<Vocabulary> {
    Vocabulary::from_entries(read_jsonl::<VocabularyEntry, _>(path)?)
}

/// Reads a single JSON value such as a persisted model.
pub fn read_json<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Creates `path` for writing. Fails with `OutputExists` if it is already
/// there.
pub fn create_output<P: AsRef<Path>>(path: P) -> Result<File> {
    let path = path.as_ref();

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => Error::OutputExists(path.to_path_buf()),
            _ => Error::Io(e),
        })
}

/// Fails with `OutputExists` if `path` is already there. Used to validate
/// every output before a long computation starts.
pub fn check_output<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        return Err(Error::OutputExists(path.to_path_buf()));
    }

    Ok(())
}

pub fn write_json<T, P>(path: P, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    P: AsRef<Path>,
{
    let mut writer = BufWriter::new(create_output(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

pub fn write_jsonl<T, P>(path: P, rows: &[T]) -> Result<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let mut writer = BufWriter::new(create_output(path)?);

    for row in rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;

    log::debug!("Wrote {} rows to {:?}", rows.len(), path);

    Ok(())
}
