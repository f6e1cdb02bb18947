//! Read-only Zip archive engine
//!
//! Written from scratch, based on APPNOTE 6.3.10
//!
//! # Design goals and implementation #
//!
//! The engine walks a local archive file and produces a lazy sequence of
//! entities: the archive comment (when one exists) followed by one
//! descriptor per member, in central directory order. Each descriptor
//! carries the member's metadata and can open an on-demand stream of its
//! uncompressed bytes.
//!
//! All file access goes through a single 64 KiB window: the trailing end
//! record is found by scanning that window backward, the central directory
//! is consumed in window-sized batches, and each entry is confirmed
//! against its local header before its payload offset is settled. Legacy
//! 32-bit archives and the Zip64 extension are both read; sentinel fields
//! are reconciled against the Zip64 end record and the per-header Zip64
//! extra fields.
//!
//! # Supported Zip features #
//!
//! Decodable methods:
//! - Store
//! - Deflate
//!
//! Other methods, and encrypted entries, are surfaced as metadata; asking
//! for their content fails with a per-entry error that leaves iteration
//! untouched. Multi-disk archives are rejected outright.
//!
//! # Examples #
//! ```no_run
//! use zipview::{Archive, ZipEntity};
//!
//! let mut archive = Archive::open("archive.zip")?;
//! for entity in archive.entities() {
//!     match entity? {
//!         ZipEntity::Comment(text) => println!("comment: {text}"),
//!         ZipEntity::Entry(entry) => {
//!             let mut content = entry.content()?;
//!             std::io::copy(&mut content, &mut std::io::sink())?;
//!         }
//!     }
//! }
//! # Ok::<(), zipview::ZipError>(())
//! ```

mod codec;
mod crc32;
mod directory;
mod error;
mod io;
mod locator;
mod records;
mod window;

pub use codec::{CodePage, EncodeError, CP437};
pub use crc32::Crc32Reader;
pub use error::{UnsupportedEntry, ZipError};
pub use records::{
    datetime_to_dos, dos_to_datetime, CentralHeader, CompressionMethod, EndRecord, LocalHeader,
    NullObserver, RecordEvent, RecordObserver, TraceObserver, Zip64EndRecord, Zip64Locator,
};

use directory::Walker;
use flate2::read::DeflateDecoder;
use locator::Directory;
use records::GP_ENCRYPTED;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::PrimitiveDateTime;
use tracing::debug;
use window::Window;

/// Opens an archive with the default code page and no observer
///
/// Shorthand for [`Archive::open`].
pub fn read_archive<P: AsRef<Path>>(path: P) -> Result<Archive, ZipError> {
    Archive::open(path)
}

/// A parsed archive, ready for iteration
///
/// Opening parses and validates the archive tail; entries are only read
/// as the entity stream is consumed. The file handle and the read window
/// are released when the value is dropped, on any exit path.
///
/// Iteration shares the single read window, so the archive is strictly
/// single-consumer; content streams however open their own handle and
/// stay independent of iteration. Parallel consumers should each open
/// their own `Archive` over the same path.
pub struct Archive {
    path: Arc<PathBuf>,
    window: Window,
    codec: CodePage,
    observer: Box<dyn RecordObserver>,
    comment: Vec<u8>,
    directory: Directory,
    zip64: bool,
}

impl Archive {
    /// Opens an archive with the [`CP437`] code page and no observer
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ZipError> {
        Self::open_with(path, CP437, Box::new(NullObserver))
    }

    /// Opens an archive with an explicit code page and record observer
    ///
    /// The code page decodes names and comments of headers that do not
    /// carry the UTF-8 flag; the observer receives every decoded record.
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        codec: CodePage,
        observer: Box<dyn RecordObserver>,
    ) -> Result<Self, ZipError> {
        let path = Arc::new(path.as_ref().to_path_buf());
        let mut window = Window::open(&path)?;
        let tail = locator::read_tail(&mut window, observer.as_ref())?;
        let directory = locator::reconcile(&tail)?;
        debug!(
            "directory: {} entries in {} bytes at {:#x}",
            directory.entries, directory.size, directory.offset
        );
        Ok(Self {
            path,
            window,
            codec,
            observer,
            comment: tail.comment,
            directory,
            zip64: tail.zip64.is_some(),
        })
    }

    /// Streams the archive entities in directory order
    ///
    /// The comment entity comes first when the archive has a non-empty
    /// comment, then one entry per central directory record. A structural
    /// error is yielded once and ends the stream.
    pub fn entities(&mut self) -> Entities<'_> {
        let comment_pending = !self.comment.is_empty();
        Entities {
            walker: Walker::new(&self.directory),
            archive: self,
            comment_pending,
            done: false,
        }
    }

    /// The archive comment decoded through the code page
    pub fn comment(&self) -> String {
        self.codec.decode(&self.comment)
    }

    /// The raw archive comment bytes
    pub fn comment_raw(&self) -> &[u8] {
        &self.comment
    }

    /// Number of entries claimed by the directory
    pub fn entry_count(&self) -> u64 {
        self.directory.entries
    }

    /// Absolute offset of the central directory
    pub fn directory_offset(&self) -> u64 {
        self.directory.offset
    }

    /// Central directory size in bytes
    pub fn directory_size(&self) -> u64 {
        self.directory.size
    }

    /// Whether the archive carries a Zip64 end record
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }
}

/// An archive entity: the comment or one member entry
#[derive(Debug)]
pub enum ZipEntity {
    /// The archive comment, emitted first and only when non-empty
    Comment(String),
    /// One archive member
    Entry(EntryDescriptor),
}

/// Pull iterator over archive entities
///
/// Created by [`Archive::entities`].
pub struct Entities<'a> {
    archive: &'a mut Archive,
    walker: Walker,
    comment_pending: bool,
    done: bool,
}

impl Iterator for Entities<'_> {
    type Item = Result<ZipEntity, ZipError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.comment_pending {
            self.comment_pending = false;
            return Some(Ok(ZipEntity::Comment(self.archive.comment())));
        }
        let Archive {
            path,
            window,
            codec,
            observer,
            ..
        } = &mut *self.archive;
        match self
            .walker
            .next_descriptor(window, codec, observer.as_ref(), path)
        {
            Ok(Some(descriptor)) => Some(Ok(ZipEntity::Entry(descriptor))),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Metadata of one archive member, able to open its content
///
/// Descriptors are self-contained: they reference the archive path and
/// the settled payload geometry, so they outlive iteration steps and stay
/// usable for the archive's lifetime.
#[derive(Debug, Clone)]
pub struct EntryDescriptor {
    pub(crate) path: Arc<PathBuf>,
    pub(crate) name: String,
    pub(crate) comment: String,
    pub(crate) method: CompressionMethod,
    pub(crate) flags: u16,
    pub(crate) crc32: u32,
    pub(crate) compressed_size: u64,
    pub(crate) uncompressed_size: u64,
    pub(crate) modified: Option<PrimitiveDateTime>,
    pub(crate) payload_offset: u64,
    pub(crate) central_extra: Vec<u8>,
    pub(crate) local_extra: Vec<u8>,
}

impl EntryDescriptor {
    /// The entry name, decoded per its UTF-8 flag and the code page
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the entry denotes a directory
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }

    /// Whether the entry is encrypted
    pub fn is_protected(&self) -> bool {
        self.flags & GP_ENCRYPTED != 0
    }

    /// The entry's compression method
    pub fn method(&self) -> CompressionMethod {
        self.method
    }

    /// Compressed size in bytes
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Uncompressed size in bytes
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Last modification time, when the DOS encoding names a valid one
    pub fn modified(&self) -> Option<PrimitiveDateTime> {
        self.modified
    }

    /// The entry comment
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// Expected CRC-32 of the uncompressed content
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Raw extra field area of the central header
    pub fn central_extra(&self) -> &[u8] {
        &self.central_extra
    }

    /// Raw extra field area of the local header
    pub fn local_extra(&self) -> &[u8] {
        &self.local_extra
    }

    /// Absolute offset of the first compressed payload byte
    pub fn payload_offset(&self) -> u64 {
        self.payload_offset
    }

    /// Opens the entry's uncompressed content as a single-pass stream
    ///
    /// A fresh file handle is opened over the payload range, so the
    /// stream does not disturb archive iteration. Encrypted entries and
    /// methods other than Store and Deflate fail here without affecting
    /// the rest of the archive.
    pub fn content(&self) -> Result<EntryReader, ZipError> {
        if self.is_protected() {
            return Err(ZipError::UnsupportedEntry(UnsupportedEntry::Encrypted));
        }
        let mut file = File::open(self.path.as_ref())?;
        file.seek(SeekFrom::Start(self.payload_offset))?;
        let raw = file.take(self.compressed_size);
        let inner: Box<dyn Read> = match self.method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflated => Box::new(DeflateDecoder::new(raw)),
            other => {
                return Err(ZipError::UnsupportedEntry(UnsupportedEntry::Method(other)));
            }
        };
        Ok(EntryReader { inner })
    }
}

/// A `Read` over one entry's uncompressed bytes
///
/// Single-consumer and single-pass; obtain a fresh one from
/// [`EntryDescriptor::content`] to read again.
pub struct EntryReader {
    inner: Box<dyn Read>,
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, std::io::Error> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for EntryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryReader").finish_non_exhaustive()
    }
}

/// A by-name random access view over an archive
///
/// Convenience at the expense of one full directory pass and a table in
/// memory. Duplicate names are not detected; the last one prevails.
pub struct ArchiveIndex {
    comment: Option<String>,
    toc: HashMap<String, EntryDescriptor>,
}

impl ArchiveIndex {
    /// Drains the archive's entity stream into a name-keyed table
    pub fn new(archive: &mut Archive) -> Result<Self, ZipError> {
        let mut comment = None;
        let mut toc = HashMap::new();
        for entity in archive.entities() {
            match entity? {
                ZipEntity::Comment(text) => comment = Some(text),
                ZipEntity::Entry(descriptor) => {
                    toc.insert(descriptor.name.clone(), descriptor);
                }
            }
        }
        Ok(Self { comment, toc })
    }

    /// The archive comment, when non-empty
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Iterates over the entry names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.toc.keys().map(|s| s.as_str())
    }

    /// Retrieves the descriptor with the given name
    pub fn get(&self, name: &str) -> Option<&EntryDescriptor> {
        self.toc.get(name)
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.toc.len()
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.toc.is_empty()
    }
}
