//! Reader for compiled `.mpy` modules.
//!
//! Only the fixed header and the string pool are decoded. Every read is
//! bounds checked and reports a typed failure instead of indexing past the
//! buffer.

use anyhow::{anyhow, Result};
use thiserror::Error;

const VERSION_KEY: &str = "__version__";
const REPO_KEY: &str = "__repo__";

const CONST_KIND_STR: u8 = 5;
const CONST_KIND_BYTES: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecompiledHeader {
    pub magic: u8,
    pub format_version: u8,
    pub feature_flags: u64,
    pub small_int_bits: u8,
    pub header_len: usize,
}

/// Inclusive range of runtime majors able to load a compiled module.
/// `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatWindow {
    pub min_major: Option<u32>,
    pub max_major: Option<u32>,
}

impl CompatWindow {
    pub fn accepts(&self, major: u32) -> bool {
        self.min_major.map_or(true, |min| major >= min)
            && self.max_major.map_or(true, |max| major <= max)
    }
}

impl PrecompiledHeader {
    pub fn compat_window(&self) -> CompatWindow {
        match self.format_version {
            3 => CompatWindow {
                min_major: None,
                max_major: Some(6),
            },
            5 => CompatWindow {
                min_major: Some(7),
                max_major: Some(8),
            },
            _ => CompatWindow {
                min_major: Some(9),
                max_major: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompiledMeta {
    pub header: PrecompiledHeader,
    pub version: Option<String>,
    pub repo: Option<String>,
    pub pool_truncated: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
enum ReadError {
    #[error("unexpected end of data at offset {offset} (wanted {wanted} byte(s))")]
    UnexpectedEnd { offset: usize, wanted: usize },
    #[error("variable-length integer overflows at offset {offset}")]
    Overflow { offset: usize },
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        let byte = *self.bytes.get(self.pos).ok_or(ReadError::UnexpectedEnd {
            offset: self.pos,
            wanted: 1,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    /// 7 bits per byte, most significant group first, high bit set on
    /// every byte except the last.
    fn vuint(&mut self) -> Result<u64, ReadError> {
        let start = self.pos;
        let mut value = 0_u64;
        loop {
            let byte = self.u8()?;
            if value > (u64::MAX >> 7) {
                return Err(ReadError::Overflow { offset: start });
            }
            value = (value << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    fn take(&mut self, len: u64) -> Result<&'a [u8], ReadError> {
        let remaining = self.bytes.len() - self.pos;
        let wanted = usize::try_from(len).unwrap_or(usize::MAX);
        if wanted > remaining {
            return Err(ReadError::UnexpectedEnd {
                offset: self.pos,
                wanted,
            });
        }
        let slice = &self.bytes[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(slice)
    }
}

pub fn parse_header(bytes: &[u8]) -> Result<PrecompiledHeader> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader
        .u8()
        .map_err(|err| anyhow!("failed reading magic: {err}"))?;
    if magic != b'M' && magic != b'C' {
        return Err(anyhow!("unrecognized magic byte 0x{magic:02x}"));
    }

    let format_version = reader
        .u8()
        .map_err(|err| anyhow!("failed reading format version: {err}"))?;
    if !matches!(format_version, 3 | 5 | 6) {
        return Err(anyhow!("unsupported format version {format_version}"));
    }

    let feature_flags = reader
        .vuint()
        .map_err(|err| anyhow!("failed reading feature flags: {err}"))?;
    let small_int_bits = reader
        .u8()
        .map_err(|err| anyhow!("failed reading small-int width: {err}"))?;

    Ok(PrecompiledHeader {
        magic,
        format_version,
        feature_flags,
        small_int_bits,
        header_len: reader.position(),
    })
}

/// Header plus best-effort metadata. Fails only when the header itself is
/// unreadable; a damaged string pool yields whatever was read before the
/// damage.
pub fn scan_precompiled(bytes: &[u8]) -> Result<PrecompiledMeta> {
    let header = parse_header(bytes)?;

    let (version, repo, pool_truncated) = if header.format_version >= 6 {
        let (pool, truncated) = read_string_pool(&bytes[header.header_len..]);
        (
            pool_value_after(&pool, VERSION_KEY, looks_like_version),
            pool_value_after(&pool, REPO_KEY, looks_like_repo),
            truncated,
        )
    } else {
        let length_halved = header.format_version == 5;
        let prefix_width = if length_halved { 2 } else { 1 };
        (
            legacy_value_before(bytes, VERSION_KEY, prefix_width, length_halved)
                .filter(|value| looks_like_version(value)),
            legacy_value_before(bytes, REPO_KEY, prefix_width, length_halved)
                .filter(|value| looks_like_repo(value)),
            false,
        )
    };

    Ok(PrecompiledMeta {
        header,
        version,
        repo,
        pool_truncated,
    })
}

fn read_string_pool(bytes: &[u8]) -> (Vec<String>, bool) {
    let mut reader = ByteReader::new(bytes);
    let mut pool = Vec::new();
    let truncated = read_pool_entries(&mut reader, &mut pool).is_err();
    (pool, truncated)
}

fn read_pool_entries(reader: &mut ByteReader<'_>, pool: &mut Vec<String>) -> Result<(), ReadError> {
    let qstr_count = reader.vuint()?;
    let const_count = reader.vuint()?;

    for _ in 0..qstr_count {
        let raw = reader.vuint()?;
        if raw & 1 == 1 {
            // index into the runtime's static table, no bytes follow
            continue;
        }
        let text = reader.take(raw >> 1)?;
        reader.u8()?;
        pool.push(String::from_utf8_lossy(text).into_owned());
    }

    for _ in 0..const_count {
        let kind = reader.u8()?;
        if kind != CONST_KIND_STR && kind != CONST_KIND_BYTES {
            break;
        }
        let len = reader.vuint()?;
        let text = reader.take(len)?;
        reader.u8()?;
        pool.push(String::from_utf8_lossy(text).into_owned());
    }

    Ok(())
}

fn pool_value_after(pool: &[String], key: &str, accept: fn(&str) -> bool) -> Option<String> {
    let anchor = pool.iter().position(|entry| entry == key)?;
    pool[anchor + 1..]
        .iter()
        .chain(pool[..anchor].iter())
        .find(|entry| accept(entry))
        .cloned()
}

/// Older formats keep qstrs inline, with the value string directly ahead
/// of the key. Walk back from the key until a byte encodes the distance
/// travelled.
fn legacy_value_before(
    bytes: &[u8],
    key: &str,
    prefix_width: usize,
    length_halved: bool,
) -> Option<String> {
    let key_at = find_subslice(bytes, key.as_bytes())?;
    let loc = key_at.checked_sub(prefix_width)?;

    let mut offset = 1_usize;
    while offset < loc {
        let mut value = usize::from(*bytes.get(loc - offset)?);
        if length_halved {
            value /= 2;
        }
        if value == offset - 1 {
            let start = loc - offset + 1;
            let slice = bytes.get(start..loc)?;
            return std::str::from_utf8(slice).ok().map(str::to_string);
        }
        offset += 1;
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn looks_like_version(value: &str) -> bool {
    let mut parts = value.split('.');
    let numeric = |part: Option<&str>| {
        part.is_some_and(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    };
    if !numeric(parts.next()) {
        return false;
    }
    let Some(second) = parts.next() else {
        return false;
    };
    let second_digits = second
        .split(|ch: char| ch == '-' || ch == '+')
        .next()
        .unwrap_or_default();
    numeric(Some(second_digits))
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '+'))
}

fn looks_like_repo(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}
