//! Zip-backed archive sources.
//!
//! `.p4k` packs and the nested archives inside them are zip containers, so
//! one source type serves both the archive root and expanded containers.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use zip::ZipArchive;

use crate::error::{AppError, Result};
use crate::tree::{
    accessor, ArchiveEntry, ArchiveSource, ContainerFactory, ContentAccessor, ContentHandle,
    Node, ReadSeek, SubStream, SubStreamSource,
};

type SharedArchive = Arc<Mutex<Option<ZipArchive<Box<dyn ReadSeek>>>>>;

/// Zip marks directories by a trailing separator; some packers write `\`.
fn is_directory_record(name: &str) -> bool {
    name.ends_with(['/', '\\'])
}

/// An opened zip archive.
///
/// Entry accessors share the archive handle; after [`ArchiveSource::close`]
/// they fail with "archive closed".
pub struct ZipSource {
    name: String,
    archive: SharedArchive,
    len: usize,
    file_count: usize,
}

impl ZipSource {
    /// Open the archive file at `path`, named after its file name.
    pub fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        let file = File::open(path)?;
        Self::from_reader(name, Box::new(BufReader::new(file)))
    }

    /// Open an archive held entirely in memory.
    #[allow(dead_code)]
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        Self::from_reader(name.into(), Box::new(Cursor::new(bytes)))
    }

    pub fn from_reader(name: String, reader: Box<dyn ReadSeek>) -> Result<Self> {
        let archive = ZipArchive::new(reader)?;
        let len = archive.len();
        let file_count = archive.file_names().filter(|n| !is_directory_record(n)).count();
        log::debug!("opened {name}: {len} records, {file_count} files");
        Ok(Self {
            name,
            archive: Arc::new(Mutex::new(Some(archive))),
            len,
            file_count,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<ZipArchive<Box<dyn ReadSeek>>>> {
        self.archive.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Metadata for record `index`, or `None` for directory records.
    fn entry(&self, index: usize) -> Result<Option<ArchiveEntry>> {
        let mut guard = self.lock();
        let archive = guard.as_mut().ok_or_else(archive_closed)?;
        let file = archive.by_index(index)?;
        if is_directory_record(file.name()) {
            return Ok(None);
        }
        Ok(Some(ArchiveEntry {
            full_path: file.name().to_string(),
            last_modified: zip_time_to_utc(file.last_modified()),
            size: file.size(),
            accessor: entry_accessor(Arc::clone(&self.archive), index),
        }))
    }
}

impl ArchiveSource for ZipSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry_count(&self) -> usize {
        self.file_count
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<ArchiveEntry>> + '_> {
        Box::new((0..self.len).filter_map(move |index| self.entry(index).transpose()))
    }

    fn close(&self) {
        self.lock().take();
    }
}

impl SubStreamSource for ZipSource {
    fn stream_count(&self) -> usize {
        self.file_count
    }

    fn streams(&self) -> Box<dyn Iterator<Item = Result<SubStream>> + '_> {
        Box::new(self.entries().map(|entry| {
            entry.map(|e| SubStream {
                name: e.full_path,
                size: e.size,
                accessor: e.accessor,
            })
        }))
    }
}

fn archive_closed() -> io::Error {
    io::Error::other("archive closed")
}

/// Accessor bound to record `index`. Each call decompresses the entry
/// into a fresh in-memory buffer.
fn entry_accessor(archive: SharedArchive, index: usize) -> ContentAccessor {
    accessor(move || {
        let mut guard = archive.lock().unwrap_or_else(|e| e.into_inner());
        let archive = guard.as_mut().ok_or_else(archive_closed)?;
        let mut file = archive.by_index(index).map_err(io::Error::other)?;
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        Ok(ContentHandle::seekable(Cursor::new(buf)))
    })
}

/// Zip timestamps carry no zone; they are taken as UTC. Missing or invalid
/// stamps fall back to the Unix epoch.
fn zip_time_to_utc(stamp: Option<zip::DateTime>) -> DateTime<Utc> {
    stamp
        .and_then(|t| {
            NaiveDate::from_ymd_opt(t.year().into(), t.month().into(), t.day().into())?
                .and_hms_opt(t.hour().into(), t.minute().into(), t.second().into())
        })
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

/// Expands leaves whose file extension is in `extensions` as nested zips.
pub struct NestedZipFactory {
    extensions: Vec<String>,
}

impl NestedZipFactory {
    /// Extensions are matched case-insensitively, with or without a dot.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }
}

impl ContainerFactory for NestedZipFactory {
    fn matches(&self, leaf: &Node) -> bool {
        match leaf.title().rsplit_once('.') {
            Some((_, ext)) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    fn open(&self, leaf: &Node) -> Result<Box<dyn SubStreamSource>> {
        let reader = leaf.open_content()?;
        let source = ZipSource::from_reader(leaf.title().to_string(), reader)
            .map_err(|e| AppError::construction(leaf.title(), e))?;
        Ok(Box::new(source))
    }
}
