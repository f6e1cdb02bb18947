//! Little-endian integer readers shared by the record decoders

use std::io::Read;

/// Little endian `u16` reader
#[inline]
pub(crate) fn rdu16le<R: Read>(r: &mut R) -> Result<u16, std::io::Error> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

/// Little endian `u32` reader
#[inline]
pub(crate) fn rdu32le<R: Read>(r: &mut R) -> Result<u32, std::io::Error> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Little endian `u64` reader
#[inline]
pub(crate) fn rdu64le<R: Read>(r: &mut R) -> Result<u64, std::io::Error> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn intread() -> Result<(), std::io::Error> {
        let buf = &mut b"\
        \x50\x4b\
        \x05\x06\x07\x08\
        \xef\xbe\xfe\xca\xce\xfa\xed\xfe\
        "
        .as_slice();
        assert_eq!(rdu16le(buf)?, 0x4b50);
        assert_eq!(rdu32le(buf)?, 0x08070605);
        assert_eq!(rdu64le(buf)?, 0xfeedfacecafebeef);
        assert_eq!(buf.len(), 0);
        assert!(rdu16le(buf).is_err());
        Ok(())
    }
}
