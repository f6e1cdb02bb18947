//! End-of-archive location and directory reconciliation
//!
//! The end of central directory record sits at most `22 + 65535` bytes
//! from the end of the file (a trailing comment can push it back that
//! far). It is found by scanning the suffix backward one window at a
//! time, then the Zip64 locator is probed right in front of it and the
//! legacy fields are reconciled against their 64-bit replacements.

use crate::error::ZipError;
use crate::records::{
    EndRecord, RecordEvent, RecordObserver, Zip64EndRecord, Zip64Locator, END_RECORD_LEN, END_SIG,
    MAGIC16, MAGIC32, MAX_COMMENT_LEN, ZIP64_END_RECORD_LEN, ZIP64_END_SIG, ZIP64_LOCATOR_LEN,
    ZIP64_LOCATOR_SIG,
};
use crate::window::{Window, BLOCK};
use memchr::memmem;
use tracing::{debug, warn};

/// The parsed tail of an archive
pub(crate) struct Tail {
    /// Absolute offset of the end record signature
    pub end_offset: u64,
    /// The legacy end record
    pub end: EndRecord,
    /// Raw archive comment bytes
    pub comment: Vec<u8>,
    /// The Zip64 tail, when the locator probe hit
    pub zip64: Option<Zip64Tail>,
}

pub(crate) struct Zip64Tail {
    /// Absolute offset of the Zip64 end record signature
    pub offset: u64,
    pub record: Zip64EndRecord,
}

/// Offset shift induced by a self-extractor stub in front of the archive
///
/// Derived from the distance between the declared and the actual central
/// directory position; applied to every local header offset.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StubShift(i64);

impl StubShift {
    pub fn adjust(&self, offset: u64) -> u64 {
        offset.checked_add_signed(self.0).unwrap_or(offset)
    }
}

/// The reconciled, authoritative directory geometry
#[derive(Debug)]
pub(crate) struct Directory {
    /// Absolute offset of the first central header
    pub offset: u64,
    /// Directory size in bytes
    pub size: u64,
    /// Number of entries
    pub entries: u64,
    /// Local header offset adjustment
    pub shift: StubShift,
}

/// Locates and reads the archive tail
pub(crate) fn read_tail(
    window: &mut Window,
    observer: &dyn RecordObserver,
) -> Result<Tail, ZipError> {
    let end_offset = find_end_record(window)?;
    debug!("end of central directory record found at {end_offset:#x}");
    if window.length() - end_offset < END_RECORD_LEN as u64 {
        return Err(ZipError::MalformedArchive {
            offset: end_offset,
            reason: "end record crosses end of file",
        });
    }
    let end = EndRecord::parse(window.read(end_offset, END_RECORD_LEN)?)?;
    observer.observe(&RecordEvent::End {
        offset: end_offset,
        record: &end,
    });
    let comment = if end.comment_len > 0 {
        let at = end_offset + END_RECORD_LEN as u64;
        if at + u64::from(end.comment_len) > window.length() {
            return Err(ZipError::MalformedArchive {
                offset: at,
                reason: "archive comment crosses end of file",
            });
        }
        window.read(at, usize::from(end.comment_len))?.to_vec()
    } else {
        Vec::new()
    };
    let zip64 = probe_zip64(window, end_offset, observer)?;
    Ok(Tail {
        end_offset,
        end,
        comment,
        zip64,
    })
}

/// Backward scan for the end record signature
///
/// Chunks overlap by one byte less than the record length so a signature
/// straddling a chunk boundary is still seen.
fn find_end_record(window: &mut Window) -> Result<u64, ZipError> {
    let length = window.length();
    if length < END_RECORD_LEN as u64 {
        return Err(ZipError::NotAnArchive);
    }
    let max_window = ((END_RECORD_LEN + MAX_COMMENT_LEN) as u64).min(length);
    let floor = length - max_window;
    let needle = END_SIG.to_le_bytes();
    let mut hi = length;
    loop {
        let lo = hi.saturating_sub(BLOCK as u64).max(floor);
        let chunk = window.read(lo, (hi - lo) as usize)?;
        if let Some(found) = memmem::rfind(chunk, &needle) {
            return Ok(lo + found as u64);
        }
        if lo == floor {
            return Err(ZipError::NotAnArchive);
        }
        hi = lo + (END_RECORD_LEN - 1) as u64;
    }
}

/// Probes for a Zip64 locator in front of the end record
///
/// The locator is considered present iff its signature sits exactly 20
/// bytes before the end record; once present it must validate.
fn probe_zip64(
    window: &mut Window,
    end_offset: u64,
    observer: &dyn RecordObserver,
) -> Result<Option<Zip64Tail>, ZipError> {
    let Some(locator_offset) = end_offset.checked_sub(ZIP64_LOCATOR_LEN as u64) else {
        return Ok(None);
    };
    let bytes = window.read(locator_offset, ZIP64_LOCATOR_LEN)?;
    if u32::from_le_bytes(bytes[0..4].try_into().unwrap()) != ZIP64_LOCATOR_SIG {
        return Ok(None);
    }
    let locator = Zip64Locator::parse(bytes)?;
    observer.observe(&RecordEvent::Zip64Locator {
        offset: locator_offset,
        record: &locator,
    });
    if locator.disk_count != 1 {
        return Err(ZipError::UnsupportedArchive(
            "archive spans more than one disk",
        ));
    }
    if locator.disk != 0 {
        return Err(ZipError::UnsupportedArchive(
            "Zip64 end record on a non-zero disk",
        ));
    }
    let record_end = locator
        .offset
        .checked_add(ZIP64_END_RECORD_LEN as u64)
        .ok_or(ZipError::MalformedArchive {
            offset: locator_offset,
            reason: "Zip64 end record offset overflows",
        })?;
    if record_end > locator_offset {
        return Err(ZipError::MalformedArchive {
            offset: locator_offset,
            reason: "Zip64 end record overlaps its locator",
        });
    }
    window.read(locator.offset, ZIP64_END_RECORD_LEN)?;
    if window.u32_at(locator.offset) != ZIP64_END_SIG {
        return Err(ZipError::MalformedArchive {
            offset: locator.offset,
            reason: "bad Zip64 end record signature",
        });
    }
    let record = Zip64EndRecord::parse(window.slice(locator.offset, ZIP64_END_RECORD_LEN))?;
    observer.observe(&RecordEvent::Zip64End {
        offset: locator.offset,
        record: &record,
    });
    if record.record_size < (ZIP64_END_RECORD_LEN - 12) as u64 {
        return Err(ZipError::MalformedArchive {
            offset: locator.offset,
            reason: "Zip64 end record too short",
        });
    }
    if record.disk != 0 || record.directory_disk != 0 {
        return Err(ZipError::UnsupportedArchive(
            "central directory on a non-zero disk",
        ));
    }
    Ok(Some(Zip64Tail {
        offset: locator.offset,
        record,
    }))
}

/// Resolves a legacy field against its Zip64 replacement
///
/// A sentinel with no Zip64 record to defer to is a hard error.
fn pick<L, W>(legacy: L, magic: L, zip64: Option<W>, end_offset: u64) -> Result<W, ZipError>
where
    L: PartialEq + Into<W>,
{
    if legacy == magic {
        zip64.ok_or(ZipError::MalformedArchive {
            offset: end_offset,
            reason: "sentinel field with no Zip64 record",
        })
    } else {
        Ok(legacy.into())
    }
}

/// Reconciles the tail records into the authoritative directory geometry
pub(crate) fn reconcile(tail: &Tail) -> Result<Directory, ZipError> {
    let end = &tail.end;
    let z = tail.zip64.as_ref().map(|z| &z.record);
    let at = tail.end_offset;
    let disk: u32 = pick(end.disk, MAGIC16, z.map(|z| z.disk), at)?;
    let directory_disk: u32 = pick(end.directory_disk, MAGIC16, z.map(|z| z.directory_disk), at)?;
    let disk_entries: u64 = pick(end.disk_entries, MAGIC16, z.map(|z| z.disk_entries), at)?;
    let entries: u64 = pick(end.entries, MAGIC16, z.map(|z| z.entries), at)?;
    let size: u64 = pick(end.directory_size, MAGIC32, z.map(|z| z.directory_size), at)?;
    let offset: u64 = pick(end.directory_offset, MAGIC32, z.map(|z| z.directory_offset), at)?;

    if disk != 0 || directory_disk != 0 {
        return Err(ZipError::UnsupportedArchive(
            "central directory on a non-zero disk",
        ));
    }
    if disk_entries != entries {
        warn!("single-disk archive claims {disk_entries} of {entries} entries on this disk");
    }

    let tail_offset = tail.zip64.as_ref().map(|z| z.offset).unwrap_or(at);
    let mut shift = StubShift::default();
    let mut offset = offset;
    if tail.zip64.is_none() {
        // A self-extractor stub in front of the archive displaces every
        // stored offset; the actual directory position gives the delta.
        if let Some(actual) = tail_offset.checked_sub(size) {
            if actual != offset {
                shift = StubShift(actual.wrapping_sub(offset) as i64);
                debug!("self-extractor stub shift: {shift:?} bytes");
                offset = actual;
            }
        }
    }
    let dir_end = offset.checked_add(size).ok_or(ZipError::MalformedArchive {
        offset: at,
        reason: "central directory bounds overflow",
    })?;
    if dir_end > tail_offset {
        return Err(ZipError::MalformedArchive {
            offset: at,
            reason: "central directory overruns the end record",
        });
    }
    Ok(Directory {
        offset,
        size,
        entries,
        shift,
    })
}
