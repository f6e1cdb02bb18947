//! Central directory traversal and local header correlation
//!
//! The walker consumes the directory in window-sized batches: central
//! headers are parsed while they stay resident, queued, and each one is
//! then correlated with its local header (a pointer-chase read to a
//! usually distant offset) to settle the final sizes and the exact byte
//! at which the compressed payload begins.

use crate::codec::{decode_text, CodePage};
use crate::error::ZipError;
use crate::locator::{Directory, StubShift};
use crate::records::{
    apply_zip64_extras, CentralHeader, CompressionMethod, LocalHeader, RecordEvent, RecordObserver,
    CENTRAL_HEADER_LEN, CENTRAL_SIG, ENCRYPTION_HEADER_LEN, GP_ENCRYPTED, GP_UTF8,
    LOCAL_HEADER_LEN, LOCAL_SIG,
};
use crate::window::Window;
use crate::EntryDescriptor;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// A central header parsed off the directory, waiting for correlation
struct Pending {
    offset: u64,
    header: CentralHeader,
    name: String,
    comment: String,
    extra: Vec<u8>,
}

/// Streaming cursor over the central directory
pub(crate) struct Walker {
    next_offset: u64,
    dir_end: u64,
    parsed: u64,
    total: u64,
    shift: StubShift,
    batch: VecDeque<Pending>,
}

impl Walker {
    pub fn new(directory: &Directory) -> Self {
        Self {
            next_offset: directory.offset,
            dir_end: directory.offset + directory.size,
            parsed: 0,
            total: directory.entries,
            shift: directory.shift,
            batch: VecDeque::new(),
        }
    }

    /// Produces the next entry descriptor, in directory order
    pub fn next_descriptor(
        &mut self,
        window: &mut Window,
        codec: &CodePage,
        observer: &dyn RecordObserver,
        path: &Arc<PathBuf>,
    ) -> Result<Option<EntryDescriptor>, ZipError> {
        if self.batch.is_empty() {
            self.fill_batch(window, codec, observer)?;
        }
        let Some(pending) = self.batch.pop_front() else {
            return Ok(None);
        };
        correlate(window, observer, self.shift, path, pending).map(Some)
    }

    /// Parses central headers while they stay resident in the window
    fn fill_batch(
        &mut self,
        window: &mut Window,
        codec: &CodePage,
        observer: &dyn RecordObserver,
    ) -> Result<(), ZipError> {
        while self.parsed < self.total {
            if !self.batch.is_empty() && !window.contains(self.next_offset, CENTRAL_HEADER_LEN) {
                break;
            }
            self.parse_one(window, codec, observer)?;
        }
        trace!("directory batch of {} headers", self.batch.len());
        Ok(())
    }

    /// Parses a single central header plus its name/extra/comment payload
    fn parse_one(
        &mut self,
        window: &mut Window,
        codec: &CodePage,
        observer: &dyn RecordObserver,
    ) -> Result<(), ZipError> {
        let offset = self.next_offset;
        if offset + CENTRAL_HEADER_LEN as u64 > self.dir_end {
            return Err(ZipError::MalformedArchive {
                offset,
                reason: "central header does not fit the directory",
            });
        }
        window.read(offset, CENTRAL_HEADER_LEN)?;
        if window.u32_at(offset) != CENTRAL_SIG {
            return Err(ZipError::MalformedArchive {
                offset,
                reason: "bad central header signature",
            });
        }
        let mut header = CentralHeader::parse(window.slice(offset, CENTRAL_HEADER_LEN))?;
        let payload =
            u64::from(header.name_len) + u64::from(header.extra_len) + u64::from(header.comment_len);
        let mut at = offset + CENTRAL_HEADER_LEN as u64;
        if at + payload > self.dir_end {
            return Err(ZipError::MalformedArchive {
                offset,
                reason: "central header payload overruns the directory",
            });
        }
        let utf8 = header.flags & GP_UTF8 != 0;
        let name = if header.name_len > 0 {
            let raw = window.read(at, usize::from(header.name_len))?;
            decode_text(codec, raw, utf8)
        } else {
            String::new()
        };
        at += u64::from(header.name_len);
        let extra = if header.extra_len > 0 {
            window.read(at, usize::from(header.extra_len))?.to_vec()
        } else {
            Vec::new()
        };
        at += u64::from(header.extra_len);
        let comment = if header.comment_len > 0 {
            let raw = window.read(at, usize::from(header.comment_len))?;
            decode_text(codec, raw, utf8)
        } else {
            String::new()
        };
        at += u64::from(header.comment_len);

        if !extra.is_empty() {
            apply_zip64_extras(&mut header, &extra);
        }
        if header.disk != 0 {
            return Err(ZipError::UnsupportedArchive("entry on a non-zero disk"));
        }
        observer.observe(&RecordEvent::Central {
            offset,
            record: &header,
        });
        self.batch.push_back(Pending {
            offset,
            header,
            name,
            comment,
            extra,
        });
        self.next_offset = at;
        self.parsed += 1;
        Ok(())
    }
}

/// Confirms a central header against its local header and settles the
/// payload geometry
fn correlate(
    window: &mut Window,
    observer: &dyn RecordObserver,
    shift: StubShift,
    path: &Arc<PathBuf>,
    pending: Pending,
) -> Result<EntryDescriptor, ZipError> {
    let Pending {
        offset: central_offset,
        mut header,
        name,
        comment,
        extra,
    } = pending;
    let local_offset = shift.adjust(header.local_offset);
    let header_end = local_offset
        .checked_add(LOCAL_HEADER_LEN as u64)
        .filter(|end| *end <= window.length())
        .ok_or(ZipError::MalformedArchive {
            offset: local_offset,
            reason: "local header crosses end of file",
        })?;
    window.read(local_offset, LOCAL_HEADER_LEN)?;
    if window.u32_at(local_offset) != LOCAL_SIG {
        return Err(ZipError::MalformedArchive {
            offset: local_offset,
            reason: "bad local header signature",
        });
    }
    let local = LocalHeader::parse(window.slice(local_offset, LOCAL_HEADER_LEN))?;
    observer.observe(&RecordEvent::Local {
        offset: local_offset,
        record: &local,
    });

    // The local copy redundantly names the file; only its lengths matter,
    // and its own Zip64 extra may settle fields the central one left open.
    let extra_offset = header_end + u64::from(local.name_len);
    let local_extra = if local.extra_len > 0 {
        if extra_offset + u64::from(local.extra_len) > window.length() {
            return Err(ZipError::MalformedArchive {
                offset: extra_offset,
                reason: "local extra field crosses end of file",
            });
        }
        window
            .read(extra_offset, usize::from(local.extra_len))?
            .to_vec()
    } else {
        Vec::new()
    };
    if !local_extra.is_empty() {
        apply_zip64_extras(&mut header, &local_extra);
    }

    let mut payload_offset = extra_offset + u64::from(local.extra_len);
    if header.flags & GP_ENCRYPTED != 0 {
        payload_offset += ENCRYPTION_HEADER_LEN;
    }
    let payload_end = payload_offset
        .checked_add(header.compressed_size)
        .ok_or(ZipError::MalformedArchive {
            offset: payload_offset,
            reason: "entry payload bounds overflow",
        })?;
    if payload_end > window.length() {
        return Err(ZipError::MalformedArchive {
            offset: central_offset,
            reason: "entry payload crosses end of file",
        });
    }

    Ok(EntryDescriptor {
        path: path.clone(),
        name,
        comment,
        method: CompressionMethod::from_code(header.method),
        flags: header.flags,
        crc32: header.crc32,
        compressed_size: header.compressed_size,
        uncompressed_size: header.uncompressed_size,
        modified: crate::records::dos_to_datetime(header.mod_date, header.mod_time),
        payload_offset,
        central_extra: extra,
        local_extra,
    })
}
