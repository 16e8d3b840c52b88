//! 8.3 short-name codec.

use core::fmt;

use crate::error::{Error, Result};

/// A filename in the fixed 11-byte directory layout: 8 base bytes then
/// 3 extension bytes, space-padded, uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName([u8; 11]);

impl ShortName {
    /// Encode a human filename (`"data1.csv"`) into FAT form
    /// (`b"DATA1   CSV"`).
    ///
    /// The name is split at the first `.`; the base must fit in 8 bytes
    /// (`NameTooLong` otherwise), the extension is truncated to 3. An
    /// 11-byte input without a dot is taken as already encoded and only
    /// uppercased, so the transform is idempotent on its own output.
    pub fn new(name: &str) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.len() == 11 && !bytes.contains(&b'.') {
            let mut raw = [0u8; 11];
            raw.copy_from_slice(bytes);
            raw.make_ascii_uppercase();
            return Ok(ShortName(raw));
        }

        let (base, ext) = match bytes.iter().position(|&b| b == b'.') {
            Some(i) => (&bytes[..i], &bytes[i + 1..]),
            None => (bytes, &[][..]),
        };
        if base.len() > 8 {
            return Err(Error::NameTooLong);
        }

        let mut raw = [b' '; 11];
        raw[..base.len()].copy_from_slice(base);
        for (dst, &b) in raw[8..].iter_mut().zip(ext.iter().take(3)) {
            *dst = b;
        }
        raw.make_ascii_uppercase();
        Ok(ShortName(raw))
    }

    pub(crate) fn from_raw(raw: [u8; 11]) -> Self {
        ShortName(raw)
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.0
    }
}

impl fmt::Display for ShortName {
    /// Renders `b"DATA1   CSV"` back as `DATA1.CSV`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base_end = self.0[..8].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        for &b in &self.0[..base_end] {
            f.write_str(char::from(b).encode_utf8(&mut [0; 4]))?;
        }
        let ext_end = self.0[8..].iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
        if ext_end > 0 {
            f.write_str(".")?;
            for &b in &self.0[8..8 + ext_end] {
                f.write_str(char::from(b).encode_utf8(&mut [0; 4]))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_extension() {
        let n = ShortName::new("hello.txt").unwrap();
        assert_eq!(n.as_bytes(), b"HELLO   TXT");
    }

    #[test]
    fn encodes_without_extension() {
        let n = ShortName::new("makefile").unwrap();
        assert_eq!(n.as_bytes(), b"MAKEFILE   ");
    }

    #[test]
    fn uppercases_mixed_case() {
        let n = ShortName::new("Data1.Csv").unwrap();
        assert_eq!(n.as_bytes(), b"DATA1   CSV");
    }

    #[test]
    fn truncates_long_extension() {
        let n = ShortName::new("log.jsonl").unwrap();
        assert_eq!(n.as_bytes(), b"LOG     JSO");
    }

    #[test]
    fn rejects_long_base() {
        assert_eq!(ShortName::new("toolongname.txt"), Err(Error::NameTooLong));
    }

    #[test]
    fn splits_at_first_dot() {
        let n = ShortName::new("a.b.c").unwrap();
        assert_eq!(n.as_bytes(), b"A       B.C");
    }

    #[test]
    fn idempotent_on_encoded_form() {
        let once = ShortName::new("data1.csv").unwrap();
        let raw = core::str::from_utf8(once.as_bytes()).unwrap();
        let twice = ShortName::new(raw).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn renders_back_to_dotted_form() {
        let n = ShortName::new("DATA1.CSV").unwrap();
        assert_eq!(format!("{n}"), "DATA1.CSV");
        let bare = ShortName::new("MAKEFILE").unwrap();
        assert_eq!(format!("{bare}"), "MAKEFILE");
    }
}
