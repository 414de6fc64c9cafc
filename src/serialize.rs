//! Serialization of the generated artifacts.
//!
//! Two self-contained little-endian files: the tokenizer table and the
//! syntax-analysis table. Each starts with a four-byte magic and a `u32`
//! version, followed by a bincode body; loaders reject foreign or
//! wrong-version files before touching the body.
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::dfa::DfaTable;
use crate::table::SyntaxTable;

const LEXICON_MAGIC: [u8; 4] = *b"PGDF";
const SYNTAX_MAGIC: [u8; 4] = *b"PGST";
const VERSION: u32 = 1;

/// Which artifact a file claims (or fails) to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, displaydoc::Display)]
pub enum TableKind {
    /// tokenizer table
    Lexicon,
    /// syntax-analysis table
    Syntax,
}

/// The error type for artifact writing and loading.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// An underlying I/O failure.
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A bincode encoding or decoding failure.
    #[error("artifact encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    /// The file does not carry the expected magic.
    #[error("not a {0} file")]
    BadMagic(TableKind),
    /// The file's version does not match this build.
    #[error("{kind} version {found} is not the supported version {expected}")]
    VersionMismatch {
        /// Which artifact was being loaded.
        kind: TableKind,
        /// The version found in the file.
        found: u32,
        /// The version this build writes.
        expected: u32,
    },
}

fn save<T: Serialize>(
    mut writer: impl Write,
    magic: [u8; 4],
    value: &T,
) -> Result<(), ArtifactError> {
    writer.write_all(&magic)?;
    writer.write_all(&VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn load<T: DeserializeOwned>(
    mut reader: impl Read,
    magic: [u8; 4],
    kind: TableKind,
) -> Result<T, ArtifactError> {
    let mut found_magic = [0u8; 4];
    reader.read_exact(&mut found_magic)?;
    if found_magic != magic {
        return Err(ArtifactError::BadMagic(kind));
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version)?;
    let found = u32::from_le_bytes(version);
    if found != VERSION {
        return Err(ArtifactError::VersionMismatch {
            kind,
            found,
            expected: VERSION,
        });
    }
    Ok(bincode::deserialize_from(&mut reader)?)
}

/// Write a tokenizer table.
pub fn save_lexicon(writer: impl Write, table: &DfaTable) -> Result<(), ArtifactError> {
    save(writer, LEXICON_MAGIC, table)
}

/// Read a tokenizer table back.
pub fn load_lexicon(reader: impl Read) -> Result<DfaTable, ArtifactError> {
    load(reader, LEXICON_MAGIC, TableKind::Lexicon)
}

/// Write a syntax-analysis table.
pub fn save_syntax(writer: impl Write, table: &SyntaxTable) -> Result<(), ArtifactError> {
    save(writer, SYNTAX_MAGIC, table)
}

/// Read a syntax-analysis table back.
pub fn load_syntax(reader: impl Read) -> Result<SyntaxTable, ArtifactError> {
    load(reader, SYNTAX_MAGIC, TableKind::Syntax)
}

/// Write a tokenizer table to a file path.
pub fn write_lexicon_file(path: impl AsRef<Path>, table: &DfaTable) -> Result<(), ArtifactError> {
    save_lexicon(BufWriter::new(File::create(path)?), table)
}

/// Read a tokenizer table from a file path.
pub fn read_lexicon_file(path: impl AsRef<Path>) -> Result<DfaTable, ArtifactError> {
    load_lexicon(BufReader::new(File::open(path)?))
}

/// Write a syntax-analysis table to a file path.
pub fn write_syntax_file(path: impl AsRef<Path>, table: &SyntaxTable) -> Result<(), ArtifactError> {
    save_syntax(BufWriter::new(File::create(path)?), table)
}

/// Read a syntax-analysis table from a file path.
pub fn read_syntax_file(path: impl AsRef<Path>) -> Result<SyntaxTable, ArtifactError> {
    load_syntax(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{ProductionId, RowId, TokenData};

    fn tiny_lexicon() -> DfaTable {
        let row = crate::dfa::DfaRow {
            next: {
                let mut next = vec![None; crate::dfa::BYTE_SPAN];
                next[b'a' as usize] = RowId::new(0);
                next
            },
            accept: Some(TokenData::terminal(ProductionId(1))),
        };
        DfaTable {
            start: RowId::new(0).unwrap(),
            rows: vec![row],
            file_end: TokenData::end(ProductionId(0)),
        }
    }

    #[test]
    fn lexicon_round_trips() {
        let table = tiny_lexicon();
        let mut buffer = Vec::new();
        save_lexicon(&mut buffer, &table).unwrap();
        let reloaded = load_lexicon(buffer.as_slice()).unwrap();
        assert_eq!(table, reloaded);
    }

    #[test]
    fn foreign_magic_and_versions_are_rejected() {
        let table = tiny_lexicon();
        let mut buffer = Vec::new();
        save_lexicon(&mut buffer, &table).unwrap();
        assert!(matches!(
            load_syntax(buffer.as_slice()),
            Err(ArtifactError::BadMagic(TableKind::Syntax))
        ));
        buffer[4] = 0xEE;
        assert!(matches!(
            load_lexicon(buffer.as_slice()),
            Err(ArtifactError::VersionMismatch { found: 0xEE, .. })
        ));
    }
}
