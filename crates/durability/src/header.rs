//! Restartable data header format
//!
//! Every stream starts with a preamble and carries a header block in front of
//! the body block. The header is a self-contained index: it names every
//! entry and records its body size, so a reader can parse the whole index
//! and then skip or load individual bodies without decoding the others.
//!
//! ## Preamble Format
//!
//! ```text
//! +------------------+
//! | Magic (2)        |  "RD"
//! +------------------+
//! | Version (4)      |  Format version (1)
//! +------------------+
//! | RefHash (8)      |  Hash of a fixed reference type
//! +------------------+
//! | NProcs (4)       |  Ranks at write time
//! +------------------+
//! | NThreads (4)     |  Maps in the stream
//! +------------------+
//! ```
//!
//! ## Header Entry Format
//!
//! ```text
//! name (u64 len + utf8) | size (u64) | type hash (u64)
//!     | type name (u64 len + utf8) | has_context (u8)
//! ```
//!
//! All integers are little-endian.

use std::collections::HashMap;
use std::io::{Read, Write};

use restartable_core::store::{
    read_string, read_u32, read_u64, read_u8, write_str, write_u32, write_u64, write_u8,
};
use serde::Serialize;

use crate::error::{RestartError, RestartResult};

/// Magic bytes at the start of every restartable data stream
pub const MAGIC: [u8; 2] = *b"RD";

/// Current format version
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size stream preamble, following the magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preamble {
    /// Format version
    pub version: u32,
    /// Reference type hash of the writing build
    pub reference_hash: u64,
    /// Number of ranks at write time
    pub n_procs: u32,
    /// Number of maps in the stream
    pub n_threads: u32,
}

impl Preamble {
    /// Size of magic plus preamble in bytes
    pub const SIZE: usize = 22;

    /// Preamble for the current format version
    pub fn new(reference_hash: u64, n_procs: u32, n_threads: u32) -> Self {
        Preamble {
            version: FORMAT_VERSION,
            reference_hash,
            n_procs,
            n_threads,
        }
    }

    /// Write magic and preamble
    pub fn write(&self, w: &mut dyn Write) -> RestartResult<()> {
        w.write_all(&MAGIC)?;
        write_u32(w, self.version)?;
        write_u64(w, self.reference_hash)?;
        write_u32(w, self.n_procs)?;
        write_u32(w, self.n_threads)?;
        Ok(())
    }

    /// Read magic and preamble
    ///
    /// Rejects streams with the wrong magic or an unknown version. The
    /// remaining fields are checked by the caller against its own run.
    pub fn read(r: &mut dyn Read) -> RestartResult<Self> {
        let mut magic = [0u8; 2];
        let filled = read_up_to(r, &mut magic)?;
        if filled < MAGIC.len() || magic != MAGIC {
            return Err(RestartError::InvalidMagic {
                expected: MAGIC,
                found: magic[..filled].to_vec(),
            });
        }

        let version = read_u32(r, "format version")?;
        if version != FORMAT_VERSION {
            return Err(RestartError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        Ok(Preamble {
            version,
            reference_hash: read_u64(r, "reference type hash")?,
            n_procs: read_u32(r, "number of processors")?,
            n_threads: read_u32(r, "number of threads")?,
        })
    }
}

fn read_up_to(r: &mut dyn Read, buf: &mut [u8]) -> RestartResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Index entry for one stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderEntry {
    /// Full name of the value
    pub name: String,
    /// Body size in bytes
    pub size: u64,
    /// Type hash of the stored value
    pub type_hash: u64,
    /// Type name of the stored value
    pub type_name: String,
    /// Whether the value was stored with a codec context
    pub has_context: bool,
    /// Offset of the body within its map's body block
    pub offset: u64,
}

impl HeaderEntry {
    fn write(&self, w: &mut dyn Write) -> RestartResult<()> {
        write_str(w, &self.name)?;
        write_u64(w, self.size)?;
        write_u64(w, self.type_hash)?;
        write_str(w, &self.type_name)?;
        write_u8(w, self.has_context as u8)?;
        Ok(())
    }

    fn read(r: &mut dyn Read, offset: u64) -> RestartResult<Self> {
        let name = read_string(r, "entry name")?;
        let size = read_u64(r, "entry size")?;
        let type_hash = read_u64(r, "entry type hash")?;
        let type_name = read_string(r, "entry type name")?;
        let has_context = match read_u8(r, "entry context flag")? {
            0 => false,
            1 => true,
            other => {
                return Err(RestartError::Corruption(format!(
                    "invalid context flag {} for '{}'",
                    other, name
                )))
            }
        };
        Ok(HeaderEntry {
            name,
            size,
            type_hash,
            type_name,
            has_context,
            offset,
        })
    }

    /// Byte range of the body within its map's body block
    pub fn body_range(&self) -> std::ops::Range<u64> {
        self.offset..self.offset + self.size
    }
}

/// Header entries of one map, in written order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapHeader {
    entries: Vec<HeaderEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl MapHeader {
    /// Create an empty header
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; its offset is placed right after the previous body
    ///
    /// A repeated name is a corrupt header.
    pub fn push(
        &mut self,
        name: String,
        size: u64,
        type_hash: u64,
        type_name: String,
        has_context: bool,
    ) -> RestartResult<()> {
        let offset = self.body_size();
        self.push_entry(HeaderEntry {
            name,
            size,
            type_hash,
            type_name,
            has_context,
            offset,
        })
    }

    fn push_entry(&mut self, entry: HeaderEntry) -> RestartResult<()> {
        if self.index.contains_key(&entry.name) {
            return Err(RestartError::Corruption(format!(
                "duplicate header entry '{}'",
                entry.name
            )));
        }
        self.index.insert(entry.name.clone(), self.entries.len());
        self.entries.push(entry);
        Ok(())
    }

    /// Entries in written order
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Entry for `name`, if present
    pub fn find(&self, name: &str) -> Option<&HeaderEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the header has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of the body block described by this header
    pub fn body_size(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.offset + e.size)
    }

    /// Write every entry
    pub fn write_entries(&self, w: &mut dyn Write) -> RestartResult<()> {
        for entry in &self.entries {
            entry.write(w)?;
        }
        Ok(())
    }

    /// Read `count` entries
    pub fn read_entries(r: &mut dyn Read, count: u64) -> RestartResult<Self> {
        let mut header = MapHeader::new();
        for _ in 0..count {
            let offset = header.body_size();
            let entry = HeaderEntry::read(r, offset)?;
            if entry.offset.checked_add(entry.size).is_none() {
                return Err(RestartError::Corruption(format!(
                    "body size of '{}' overflows",
                    entry.name
                )));
            }
            header.push_entry(entry)?;
        }
        Ok(header)
    }

    /// Body bytes of `entry` within `body`
    pub fn body_of<'b>(&self, entry: &HeaderEntry, body: &'b [u8]) -> RestartResult<&'b [u8]> {
        let range = entry.body_range();
        let start = usize::try_from(range.start).ok();
        let end = usize::try_from(range.end).ok();
        match (start, end) {
            (Some(start), Some(end)) if end <= body.len() => Ok(&body[start..end]),
            _ => Err(RestartError::Corruption(format!(
                "body of '{}' ({} bytes at offset {}) runs past the end of the stream",
                entry.name, entry.size, entry.offset
            ))),
        }
    }
}

/// Parsed header of a standalone restartable data file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataHeader {
    /// Stream preamble
    pub preamble: Preamble,
    /// Per-thread headers, indexed by thread id
    pub threads: Vec<MapHeader>,
}

impl DataHeader {
    /// Write preamble, per-thread counts and header block
    pub fn write(&self, w: &mut dyn Write) -> RestartResult<()> {
        self.preamble.write(w)?;
        for thread in &self.threads {
            write_u64(w, thread.len() as u64)?;
        }
        for thread in &self.threads {
            thread.write_entries(w)?;
        }
        Ok(())
    }

    /// Read preamble, per-thread counts and header block
    ///
    /// Stops at the start of the body block.
    pub fn read(r: &mut dyn Read) -> RestartResult<Self> {
        let preamble = Preamble::read(r)?;
        Self::read_after_preamble(preamble, r)
    }

    /// Read per-thread counts and header block following an already read
    /// `preamble`
    pub fn read_after_preamble(preamble: Preamble, r: &mut dyn Read) -> RestartResult<Self> {
        let mut counts = Vec::new();
        for _ in 0..preamble.n_threads {
            counts.push(read_u64(r, "thread item count")?);
        }
        let mut threads = Vec::with_capacity(counts.len());
        for count in counts {
            threads.push(MapHeader::read_entries(r, count)?);
        }
        Ok(DataHeader { preamble, threads })
    }

    /// Number of thread maps in the file
    pub fn n_threads(&self) -> usize {
        self.threads.len()
    }

    /// Header of thread `tid`
    pub fn thread(&self, tid: usize) -> Option<&MapHeader> {
        self.threads.get(tid)
    }

    /// All entries, thread by thread
    pub fn entries(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.threads.iter().flat_map(|t| t.entries().iter())
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.threads.iter().map(MapHeader::len).sum()
    }

    /// Whether the file holds no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of the body block
    pub fn body_size(&self) -> u64 {
        self.threads.iter().map(MapHeader::body_size).sum()
    }

    /// Render the header as pretty-printed JSON
    pub fn to_json(&self) -> RestartResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RestartError::Corruption(format!("cannot render header: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> MapHeader {
        let mut header = MapHeader::new();
        header.push("a/b/x".into(), 8, 11, "u64".into(), false).unwrap();
        header.push("a/b/y".into(), 3, 22, "alloc::string::String".into(), true).unwrap();
        header
    }

    #[test]
    fn test_preamble_size() {
        let mut buf = Vec::new();
        Preamble::new(1, 2, 3).write(&mut buf).unwrap();
        assert_eq!(buf.len(), Preamble::SIZE);
        assert_eq!(&buf[..2], b"RD");
    }

    #[test]
    fn test_preamble_roundtrip() {
        let preamble = Preamble::new(0xDEAD_BEEF, 4, 2);
        let mut buf = Vec::new();
        preamble.write(&mut buf).unwrap();
        assert_eq!(Preamble::read(&mut buf.as_slice()).unwrap(), preamble);
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = Vec::new();
        Preamble::new(1, 1, 1).write(&mut buf).unwrap();
        buf[0] = b'X';
        assert!(matches!(
            Preamble::read(&mut buf.as_slice()),
            Err(RestartError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_empty_stream_is_invalid_magic() {
        let err = Preamble::read(&mut [].as_slice()).unwrap_err();
        match err {
            RestartError::InvalidMagic { found, .. } => assert!(found.is_empty()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_version() {
        let mut buf = Vec::new();
        Preamble {
            version: FORMAT_VERSION + 1,
            reference_hash: 0,
            n_procs: 1,
            n_threads: 1,
        }
        .write(&mut buf)
        .unwrap();
        assert!(matches!(
            Preamble::read(&mut buf.as_slice()),
            Err(RestartError::UnsupportedVersion { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let header = sample_header();
        assert_eq!(header.entries()[0].offset, 0);
        assert_eq!(header.entries()[1].offset, 8);
        assert_eq!(header.body_size(), 11);
        assert_eq!(header.find("a/b/y").unwrap().body_range(), 8..11);
        assert!(header.find("a/b/z").is_none());
    }

    #[test]
    fn test_duplicate_entry_is_corruption() {
        let mut header = sample_header();
        let err = header.push("a/b/x".into(), 1, 1, "u8".into(), false).unwrap_err();
        assert!(matches!(err, RestartError::Corruption(_)));
    }

    #[test]
    fn test_entries_roundtrip() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_entries(&mut buf).unwrap();

        let parsed = MapHeader::read_entries(&mut buf.as_slice(), 2).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_truncated_entries_fail() {
        let header = sample_header();
        let mut buf = Vec::new();
        header.write_entries(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(MapHeader::read_entries(&mut buf.as_slice(), 2).is_err());
    }

    #[test]
    fn test_body_of_checks_bounds() {
        let header = sample_header();
        let body = [0u8; 11];
        let y = header.find("a/b/y").unwrap();
        assert_eq!(header.body_of(y, &body).unwrap().len(), 3);
        assert!(matches!(
            header.body_of(y, &body[..10]),
            Err(RestartError::Corruption(_))
        ));
    }

    #[test]
    fn test_data_header_roundtrip_with_empty_thread() {
        let header = DataHeader {
            preamble: Preamble::new(7, 1, 2),
            threads: vec![sample_header(), MapHeader::new()],
        };
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();

        let parsed = DataHeader::read(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed.body_size(), 11);
        let names: Vec<&str> = parsed.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/b/x", "a/b/y"]);
    }

    #[test]
    fn test_to_json_lists_entries() {
        let header = DataHeader {
            preamble: Preamble::new(7, 1, 1),
            threads: vec![sample_header()],
        };
        let json = header.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["preamble"]["n_threads"], 1);
        assert_eq!(value["threads"][0]["entries"][1]["name"], "a/b/y");
        assert_eq!(value["threads"][0]["entries"][1]["has_context"], true);
    }
}
