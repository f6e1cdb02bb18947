//! On-wire record layouts and their decoders
//!
//! Everything here is pure bytes-to-struct translation per APPNOTE: the
//! decoders take the fixed-size record slice (signature included, already
//! verified by the caller) and never look at the surrounding file.
//! Validation of signatures and payload bounds belongs to the walker.

use crate::io::{rdu16le, rdu32le, rdu64le};
use time::{Date, Month, PrimitiveDateTime, Time};
use tracing::debug;

pub(crate) const END_SIG: u32 = 0x06054b50;
pub(crate) const ZIP64_LOCATOR_SIG: u32 = 0x07064b50;
pub(crate) const ZIP64_END_SIG: u32 = 0x06064b50;
pub(crate) const CENTRAL_SIG: u32 = 0x02014b50;
pub(crate) const LOCAL_SIG: u32 = 0x04034b50;

pub(crate) const END_RECORD_LEN: usize = 22;
pub(crate) const MAX_COMMENT_LEN: usize = 65535;
pub(crate) const ZIP64_LOCATOR_LEN: usize = 20;
pub(crate) const ZIP64_END_RECORD_LEN: usize = 56;
pub(crate) const CENTRAL_HEADER_LEN: usize = 46;
pub(crate) const LOCAL_HEADER_LEN: usize = 30;
pub(crate) const ENCRYPTION_HEADER_LEN: u64 = 12;
const EXTRA_HEADER_LEN: usize = 4;

/// Zip64 extended information extra field id
const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Sentinel in 16-bit fields meaning "see Zip64"
pub(crate) const MAGIC16: u16 = 0xffff;
/// Sentinel in 32-bit fields meaning "see Zip64"
pub(crate) const MAGIC32: u32 = 0xffff_ffff;

pub(crate) const GP_ENCRYPTED: u16 = 1 << 0;
pub(crate) const GP_UTF8: u16 = 1 << 11;

#[derive(Debug)]
/// End of central directory record (the legacy, 32-bit tail)
pub struct EndRecord {
    /// number of this disk
    pub disk: u16,
    /// number of the disk with the start of the central directory
    pub directory_disk: u16,
    /// total number of entries in the central directory on this disk
    pub disk_entries: u16,
    /// total number of entries in the central directory
    pub entries: u16,
    /// size of the central directory
    pub directory_size: u32,
    /// offset of start of central directory on its first disk
    pub directory_offset: u32,
    /// archive comment length
    pub comment_len: u16,
}

impl EndRecord {
    /// Decodes the fixed 22-byte record
    pub(crate) fn parse(mut b: &[u8]) -> Result<Self, std::io::Error> {
        rdu32le(&mut b)?; // signature, verified by the caller
        Ok(Self {
            disk: rdu16le(&mut b)?,
            directory_disk: rdu16le(&mut b)?,
            disk_entries: rdu16le(&mut b)?,
            entries: rdu16le(&mut b)?,
            directory_size: rdu32le(&mut b)?,
            directory_offset: rdu32le(&mut b)?,
            comment_len: rdu16le(&mut b)?,
        })
    }
}

#[derive(Debug)]
/// Zip64 end of central directory locator
pub struct Zip64Locator {
    /// number of the disk with the Zip64 end of central directory
    pub disk: u32,
    /// absolute offset of the Zip64 end of central directory record
    pub offset: u64,
    /// total number of disks
    pub disk_count: u32,
}

impl Zip64Locator {
    /// Decodes the fixed 20-byte record
    pub(crate) fn parse(mut b: &[u8]) -> Result<Self, std::io::Error> {
        rdu32le(&mut b)?; // signature, verified by the caller
        Ok(Self {
            disk: rdu32le(&mut b)?,
            offset: rdu64le(&mut b)?,
            disk_count: rdu32le(&mut b)?,
        })
    }
}

#[derive(Debug)]
/// Zip64 end of central directory record
///
/// Any extensible data sector past the fixed 56 bytes is ignored.
pub struct Zip64EndRecord {
    /// size of the remainder of the record, 44 at minimum
    pub record_size: u64,
    /// version made by
    pub version_made_by: u16,
    /// version needed to extract
    pub version_needed: u16,
    /// number of this disk
    pub disk: u32,
    /// number of the disk with the start of the central directory
    pub directory_disk: u32,
    /// total number of entries in the central directory on this disk
    pub disk_entries: u64,
    /// total number of entries in the central directory
    pub entries: u64,
    /// size of the central directory
    pub directory_size: u64,
    /// offset of start of central directory on its first disk
    pub directory_offset: u64,
}

impl Zip64EndRecord {
    /// Decodes the fixed 56-byte prefix of the record
    pub(crate) fn parse(mut b: &[u8]) -> Result<Self, std::io::Error> {
        rdu32le(&mut b)?; // signature, verified by the caller
        Ok(Self {
            record_size: rdu64le(&mut b)?,
            version_made_by: rdu16le(&mut b)?,
            version_needed: rdu16le(&mut b)?,
            disk: rdu32le(&mut b)?,
            directory_disk: rdu32le(&mut b)?,
            disk_entries: rdu64le(&mut b)?,
            entries: rdu64le(&mut b)?,
            directory_size: rdu64le(&mut b)?,
            directory_offset: rdu64le(&mut b)?,
        })
    }
}

#[derive(Debug, Clone)]
/// Central directory file header, fixed part
///
/// Size, offset and disk fields are widened at decode time; they hold the
/// raw 32/16-bit values (possibly sentinels) until a Zip64 extra field
/// overrides them.
pub struct CentralHeader {
    /// software version used to create the entry
    pub version_made_by: u16,
    /// minimal software version required for extraction
    pub version_needed: u16,
    /// general purpose bit flags
    pub flags: u16,
    /// compression method code
    pub method: u16,
    /// last modification time, DOS packed
    pub mod_time: u16,
    /// last modification date, DOS packed
    pub mod_date: u16,
    /// expected CRC-32 of the uncompressed data
    pub crc32: u32,
    /// compressed size in bytes
    pub compressed_size: u64,
    /// uncompressed size in bytes
    pub uncompressed_size: u64,
    /// file name length
    pub name_len: u16,
    /// extra field area length
    pub extra_len: u16,
    /// comment length
    pub comment_len: u16,
    /// disk on which the local header lives
    pub disk: u32,
    /// internal file attributes
    pub internal_attributes: u16,
    /// external file attributes
    pub external_attributes: u32,
    /// offset of the local header on its disk
    pub local_offset: u64,
}

impl CentralHeader {
    /// Decodes the fixed 46-byte header; name, extras and comment follow
    /// in the directory stream and are the walker's to read
    pub(crate) fn parse(mut b: &[u8]) -> Result<Self, std::io::Error> {
        rdu32le(&mut b)?; // signature, verified by the caller
        Ok(Self {
            version_made_by: rdu16le(&mut b)?,
            version_needed: rdu16le(&mut b)?,
            flags: rdu16le(&mut b)?,
            method: rdu16le(&mut b)?,
            mod_time: rdu16le(&mut b)?,
            mod_date: rdu16le(&mut b)?,
            crc32: rdu32le(&mut b)?,
            compressed_size: rdu32le(&mut b)?.into(),
            uncompressed_size: rdu32le(&mut b)?.into(),
            name_len: rdu16le(&mut b)?,
            extra_len: rdu16le(&mut b)?,
            comment_len: rdu16le(&mut b)?,
            disk: rdu16le(&mut b)?.into(),
            internal_attributes: rdu16le(&mut b)?,
            external_attributes: rdu32le(&mut b)?,
            local_offset: rdu32le(&mut b)?.into(),
        })
    }
}

#[derive(Debug)]
/// Local file header, fixed part
///
/// Only the name and extra lengths matter for payload placement; the name
/// itself is ignored in favor of the central copy.
pub struct LocalHeader {
    /// minimal software version required for extraction
    pub version_needed: u16,
    /// general purpose bit flags
    pub flags: u16,
    /// compression method code
    pub method: u16,
    /// last modification time, DOS packed
    pub mod_time: u16,
    /// last modification date, DOS packed
    pub mod_date: u16,
    /// expected CRC-32 of the uncompressed data
    pub crc32: u32,
    /// compressed size in bytes
    pub compressed_size: u64,
    /// uncompressed size in bytes
    pub uncompressed_size: u64,
    /// file name length
    pub name_len: u16,
    /// extra field area length
    pub extra_len: u16,
}

impl LocalHeader {
    /// Decodes the fixed 30-byte header
    pub(crate) fn parse(mut b: &[u8]) -> Result<Self, std::io::Error> {
        rdu32le(&mut b)?; // signature, verified by the caller
        Ok(Self {
            version_needed: rdu16le(&mut b)?,
            flags: rdu16le(&mut b)?,
            method: rdu16le(&mut b)?,
            mod_time: rdu16le(&mut b)?,
            mod_date: rdu16le(&mut b)?,
            crc32: rdu32le(&mut b)?,
            compressed_size: rdu32le(&mut b)?.into(),
            uncompressed_size: rdu32le(&mut b)?.into(),
            name_len: rdu16le(&mut b)?,
            extra_len: rdu16le(&mut b)?,
        })
    }
}

/// Retrieves the first well-formed Zip64 extra field payload
///
/// The extra area is a sequence of `(id, size, data)` tuples; a tuple whose
/// declared size overruns the area is skipped like any other non-matching
/// id.
fn zip64_extra(extra: &[u8]) -> Option<&[u8]> {
    let mut rest = extra;
    loop {
        if rest.len() < EXTRA_HEADER_LEN {
            return None;
        }
        let id = rdu16le(&mut rest).ok()?;
        let len: usize = rdu16le(&mut rest).ok()?.into();
        if id == ZIP64_EXTRA_ID && len <= rest.len() {
            return rest.get(..len);
        }
        rest = rest.get(len..)?;
    }
}

/// Applies Zip64 overrides from an extra field area to a central header
///
/// The Zip64 extra is terse: it carries a value only for the fields whose
/// 32/16-bit counterparts hold the sentinel, in the fixed order
/// uncompressed size, compressed size, local offset, disk. A payload too
/// short for the fields it owes is ignored wholesale.
///
/// Running this against the local header's extra area with the central
/// header state is deliberate: fields already resolved by a central Zip64
/// extra no longer hold sentinels, so only still-unresolved ones can be
/// overridden by the local copy.
pub(crate) fn apply_zip64_extras(header: &mut CentralHeader, extra: &[u8]) {
    let Some(mut data) = zip64_extra(extra) else {
        return;
    };
    let mut required = 0usize;
    for magic in [
        header.uncompressed_size == u64::from(MAGIC32),
        header.compressed_size == u64::from(MAGIC32),
        header.local_offset == u64::from(MAGIC32),
    ] {
        if magic {
            required += 8;
        }
    }
    if header.disk == u32::from(MAGIC16) {
        required += 4;
    }
    if data.len() < required {
        debug!(
            "Zip64 extra holds {} bytes where {required} are owed, ignoring",
            data.len()
        );
        return;
    }
    for val in [
        &mut header.uncompressed_size,
        &mut header.compressed_size,
        &mut header.local_offset,
    ] {
        if *val == u64::from(MAGIC32) {
            if let Ok(v) = rdu64le(&mut data) {
                *val = v;
            }
        }
    }
    if header.disk == u32::from(MAGIC16) {
        if let Ok(v) = rdu32le(&mut data) {
            header.disk = v;
        }
    }
}

/// Unpacks a DOS date/time pair into a civil timestamp
///
/// Returns `None` when the packed value does not name a valid date or time.
pub fn dos_to_datetime(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    let year: i32 = (((date >> 9) & 0x7f) + 1980).into();
    let month = Month::try_from(((date >> 5) & 0xf) as u8).ok()?;
    let day = (date & 0x1f) as u8;
    let hour = ((time >> 11) & 0x1f) as u8;
    let minute = ((time >> 5) & 0x3f) as u8;
    let second = ((time & 0x1f) << 1) as u8;
    Some(PrimitiveDateTime::new(
        Date::from_calendar_date(year, month, day).ok()?,
        Time::from_hms(hour, minute, second).ok()?,
    ))
}

/// Packs a civil timestamp into a DOS date/time pair
///
/// Seconds lose their low bit (2-second resolution); years are clamped to
/// the representable 1980..=2107 range.
pub fn datetime_to_dos(dt: &PrimitiveDateTime) -> (u16, u16) {
    let year = (dt.year() - 1980).clamp(0, 0x7f) as u16;
    let date = year << 9 | (dt.month() as u16) << 5 | u16::from(dt.day());
    let time =
        u16::from(dt.hour()) << 11 | u16::from(dt.minute()) << 5 | u16::from(dt.second()) / 2;
    (date, time)
}

/// Compression method of an archive member
///
/// Only [`Stored`](CompressionMethod::Stored) and
/// [`Deflated`](CompressionMethod::Deflated) entries can be opened for
/// content; the rest are carried as metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Shrunk,
    Reduced1,
    Reduced2,
    Reduced3,
    Reduced4,
    Imploded,
    Tokenized,
    Deflated,
    Deflated64,
    IbmTerseOld,
    Bzip2,
    Lzma,
    IbmTerseNew,
    Lz77,
    WavPack,
    Ppmd,
    /// Any method code outside the registered table
    Unknown(u16),
}

impl CompressionMethod {
    /// Maps a method code from a header
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => Self::Stored,
            1 => Self::Shrunk,
            2 => Self::Reduced1,
            3 => Self::Reduced2,
            4 => Self::Reduced3,
            5 => Self::Reduced4,
            6 => Self::Imploded,
            7 => Self::Tokenized,
            8 => Self::Deflated,
            9 => Self::Deflated64,
            10 => Self::IbmTerseOld,
            12 => Self::Bzip2,
            14 => Self::Lzma,
            18 => Self::IbmTerseNew,
            19 => Self::Lz77,
            97 => Self::WavPack,
            98 => Self::Ppmd,
            other => Self::Unknown(other),
        }
    }

    /// The on-wire method code
    pub fn code(&self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Shrunk => 1,
            Self::Reduced1 => 2,
            Self::Reduced2 => 3,
            Self::Reduced3 => 4,
            Self::Reduced4 => 5,
            Self::Imploded => 6,
            Self::Tokenized => 7,
            Self::Deflated => 8,
            Self::Deflated64 => 9,
            Self::IbmTerseOld => 10,
            Self::Bzip2 => 12,
            Self::Lzma => 14,
            Self::IbmTerseNew => 18,
            Self::Lz77 => 19,
            Self::WavPack => 97,
            Self::Ppmd => 98,
            Self::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stored => write!(f, "none (stored)"),
            Self::Shrunk => write!(f, "shrunk"),
            Self::Reduced1 => write!(f, "reduced (factor 1)"),
            Self::Reduced2 => write!(f, "reduced (factor 2)"),
            Self::Reduced3 => write!(f, "reduced (factor 3)"),
            Self::Reduced4 => write!(f, "reduced (factor 4)"),
            Self::Imploded => write!(f, "imploded"),
            Self::Tokenized => write!(f, "tokenized"),
            Self::Deflated => write!(f, "deflated"),
            Self::Deflated64 => write!(f, "deflated (enhanced-64k)"),
            Self::IbmTerseOld => write!(f, "IBM TERSE (old)"),
            Self::Bzip2 => write!(f, "bzipped"),
            Self::Lzma => write!(f, "LZMA-ed"),
            Self::IbmTerseNew => write!(f, "IBM TERSE (new)"),
            Self::Lz77 => write!(f, "LZ77 z Architecture"),
            Self::WavPack => write!(f, "WavPack"),
            Self::Ppmd => write!(f, "PPMd"),
            Self::Unknown(code) => write!(f, "unknown ({code})"),
        }
    }
}

/// A decoded record, handed to the observer together with its file offset
#[derive(Debug)]
pub enum RecordEvent<'a> {
    /// End of central directory record decoded
    End {
        /// Absolute offset of the record signature
        offset: u64,
        /// The decoded record
        record: &'a EndRecord,
    },
    /// Zip64 end of central directory locator decoded
    Zip64Locator {
        /// Absolute offset of the record signature
        offset: u64,
        /// The decoded record
        record: &'a Zip64Locator,
    },
    /// Zip64 end of central directory record decoded
    Zip64End {
        /// Absolute offset of the record signature
        offset: u64,
        /// The decoded record
        record: &'a Zip64EndRecord,
    },
    /// Central directory file header decoded
    Central {
        /// Absolute offset of the record signature
        offset: u64,
        /// The decoded record
        record: &'a CentralHeader,
    },
    /// Local file header decoded
    Local {
        /// Absolute offset of the record signature
        offset: u64,
        /// The decoded record
        record: &'a LocalHeader,
    },
}

/// Receiver for decoded record events
///
/// The decoding path stays free of formatting concerns; anything that
/// wants a structure dump injects an observer instead.
pub trait RecordObserver {
    /// Called once per successfully decoded record
    fn observe(&self, event: &RecordEvent<'_>);
}

/// The default observer; discards every event
#[derive(Debug, Default)]
pub struct NullObserver;

impl RecordObserver for NullObserver {
    fn observe(&self, _event: &RecordEvent<'_>) {}
}

/// An observer that logs each record through `tracing`
#[derive(Debug, Default)]
pub struct TraceObserver;

impl RecordObserver for TraceObserver {
    fn observe(&self, event: &RecordEvent<'_>) {
        debug!("{event:#x?}");
    }
}
