//! Reader and writer for the JaCoCo execution-data (`.ec`) format.
//!
//! An exec-data file is a sequence of blocks, each introduced by a one-byte
//! block type. All integers are big-endian.
//!
//! ```text
//! 0x01 header          u16 magic (0xC0C0), u16 format version (0x1007)
//! 0x10 session info    utf id, i64 start millis, i64 dump millis
//! 0x11 execution data  i64 class id, utf class name, bool[] probes
//! ```
//!
//! Strings use Java's modified UTF-8 with a `u16` byte-length prefix. Probe
//! arrays are a var-int length followed by the probes packed eight per byte,
//! least significant bit first.
//!
//! A file may contain several dumps back to back, each starting with its own
//! header. An empty file is a valid file without any data.

use std::io::{self, Read, Write};

use serde::Serialize;

/// Block type of the file header.
pub const BLOCK_HEADER: u8 = 0x01;

/// Block type of a session info record.
pub const BLOCK_SESSIONINFO: u8 = 0x10;

/// Block type of a per-class execution data record.
pub const BLOCK_EXECUTIONDATA: u8 = 0x11;

/// Magic number following a header block.
pub const MAGIC_NUMBER: u16 = 0xC0C0;

/// Supported format version.
pub const FORMAT_VERSION: u16 = 0x1007;

/// Errors raised while decoding or encoding exec-data.
#[derive(Debug, thiserror::Error)]
pub enum ExecFormatError {
    #[error("Invalid execution data file: data does not start with a header")]
    MissingHeader,

    #[error("Invalid execution data file: bad magic number {0:#06x}")]
    InvalidMagic(u16),

    #[error("Incompatible execution data version {0:#06x}, expected 0x1007")]
    IncompatibleVersion(u16),

    #[error("Unknown block type {0:#04x}")]
    UnknownBlock(u8),

    #[error("Invalid modified UTF-8 string")]
    InvalidString,

    #[error("String of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    #[error("Malformed var-int")]
    InvalidVarInt,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Describes one coverage recording session, typically one device dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    /// Session start, epoch milliseconds.
    pub start: i64,
    /// Time of the dump, epoch milliseconds.
    pub dump: i64,
}

/// Probe hits of one class.
///
/// The class id is a checksum of the class file, so two records with the
/// same name and id describe the same compiled class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionData {
    id: u64,
    name: String,
    probes: Vec<bool>,
}

impl ExecutionData {
    pub fn new(id: u64, name: impl Into<String>, probes: Vec<bool>) -> Self {
        Self {
            id,
            name: name.into(),
            probes,
        }
    }

    /// Class id (content checksum).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// VM name of the class, e.g. `com/example/LoginActivity`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probes(&self) -> &[bool] {
        &self.probes
    }

    /// Number of probes that were hit at least once.
    pub fn hit_count(&self) -> usize {
        self.probes.iter().filter(|hit| **hit).count()
    }

    pub fn has_hits(&self) -> bool {
        self.probes.contains(&true)
    }

    /// Whether `other` records the same compiled class.
    pub fn is_compatible(&self, other: &ExecutionData) -> bool {
        self.id == other.id && self.probes.len() == other.probes.len()
    }

    /// ORs the probes of a compatible record into this one.
    ///
    /// Callers check [`is_compatible`](Self::is_compatible) first; probes
    /// beyond the shorter array are left untouched.
    pub fn merge(&mut self, other: &ExecutionData) {
        for (hit, other_hit) in self.probes.iter_mut().zip(&other.probes) {
            *hit |= *other_hit;
        }
    }
}

/// A decoded data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecBlock {
    Session(SessionInfo),
    Execution(ExecutionData),
}

/// Streams blocks out of an exec-data source.
pub struct ExecDataReader<R> {
    inner: R,
    first_block: bool,
}

impl<R: Read> ExecDataReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            first_block: true,
        }
    }

    /// Reads the next session or execution data block.
    ///
    /// Header blocks are validated and skipped. Returns `Ok(None)` at the end
    /// of the input.
    pub fn next_block(&mut self) -> Result<Option<ExecBlock>, ExecFormatError> {
        loop {
            let Some(block_type) = self.read_block_type()? else {
                return Ok(None);
            };

            if self.first_block && block_type != BLOCK_HEADER {
                return Err(ExecFormatError::MissingHeader);
            }
            self.first_block = false;

            match block_type {
                BLOCK_HEADER => self.read_header()?,
                BLOCK_SESSIONINFO => {
                    let id = self.read_utf()?;
                    let start = self.read_i64()?;
                    let dump = self.read_i64()?;
                    return Ok(Some(ExecBlock::Session(SessionInfo { id, start, dump })));
                }
                BLOCK_EXECUTIONDATA => {
                    let id = self.read_i64()? as u64;
                    let name = self.read_utf()?;
                    let probes = self.read_bool_array()?;
                    return Ok(Some(ExecBlock::Execution(ExecutionData::new(
                        id, name, probes,
                    ))));
                }
                other => return Err(ExecFormatError::UnknownBlock(other)),
            }
        }
    }

    fn read_block_type(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn read_header(&mut self) -> Result<(), ExecFormatError> {
        let magic = self.read_u16()?;
        if magic != MAGIC_NUMBER {
            return Err(ExecFormatError::InvalidMagic(magic));
        }
        let version = self.read_u16()?;
        if version != FORMAT_VERSION {
            return Err(ExecFormatError::IncompatibleVersion(version));
        }
        Ok(())
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    fn read_utf(&mut self) -> Result<String, ExecFormatError> {
        let len = usize::from(self.read_u16()?);
        let mut bytes = vec![0u8; len];
        self.inner.read_exact(&mut bytes)?;
        decode_modified_utf8(&bytes)
    }

    fn read_var_int(&mut self) -> Result<u32, ExecFormatError> {
        let mut value = 0u32;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 28 {
                return Err(ExecFormatError::InvalidVarInt);
            }
        }
    }

    fn read_bool_array(&mut self) -> Result<Vec<bool>, ExecFormatError> {
        let len = self.read_var_int()? as usize;
        let byte_len = len.div_ceil(8);

        // read what is there before allocating, a corrupt length must not
        // allocate gigabytes
        let mut packed = Vec::new();
        (&mut self.inner)
            .take(byte_len as u64)
            .read_to_end(&mut packed)?;
        if packed.len() != byte_len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        Ok((0..len)
            .map(|i| packed[i / 8] & (1 << (i % 8)) != 0)
            .collect())
    }
}

/// Writes exec-data blocks, starting with a header.
pub struct ExecDataWriter<W: Write> {
    inner: W,
}

impl<W: Write> ExecDataWriter<W> {
    /// Creates a writer and emits the file header.
    pub fn new(mut inner: W) -> Result<Self, ExecFormatError> {
        inner.write_all(&[BLOCK_HEADER])?;
        inner.write_all(&MAGIC_NUMBER.to_be_bytes())?;
        inner.write_all(&FORMAT_VERSION.to_be_bytes())?;
        Ok(Self { inner })
    }

    pub fn write_session_info(&mut self, info: &SessionInfo) -> Result<(), ExecFormatError> {
        self.inner.write_all(&[BLOCK_SESSIONINFO])?;
        self.write_utf(&info.id)?;
        self.inner.write_all(&info.start.to_be_bytes())?;
        self.inner.write_all(&info.dump.to_be_bytes())?;
        Ok(())
    }

    /// Writes one class record. Records without any hit are skipped.
    pub fn write_execution_data(&mut self, data: &ExecutionData) -> Result<(), ExecFormatError> {
        if !data.has_hits() {
            return Ok(());
        }
        self.inner.write_all(&[BLOCK_EXECUTIONDATA])?;
        self.inner.write_all(&data.id.to_be_bytes())?;
        self.write_utf(&data.name)?;
        self.write_bool_array(&data.probes)?;
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, ExecFormatError> {
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_utf(&mut self, value: &str) -> Result<(), ExecFormatError> {
        let bytes = encode_modified_utf8(value);
        let len = u16::try_from(bytes.len())
            .map_err(|_| ExecFormatError::StringTooLong(bytes.len()))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(&bytes)?;
        Ok(())
    }

    fn write_var_int(&mut self, mut value: u32) -> io::Result<()> {
        while value & !0x7F != 0 {
            self.inner.write_all(&[0x80 | (value & 0x7F) as u8])?;
            value >>= 7;
        }
        self.inner.write_all(&[value as u8])
    }

    fn write_bool_array(&mut self, probes: &[bool]) -> Result<(), ExecFormatError> {
        let len = u32::try_from(probes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many probes"))?;
        self.write_var_int(len)?;

        let packed: Vec<u8> = probes
            .chunks(8)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .filter(|(_, hit)| **hit)
                    .fold(0u8, |byte, (bit, _)| byte | (1 << bit))
            })
            .collect();
        self.inner.write_all(&packed)?;
        Ok(())
    }
}

fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ExecFormatError> {
    let continuation = |idx: usize| -> Result<u16, ExecFormatError> {
        match bytes.get(idx) {
            Some(b) if b & 0xC0 == 0x80 => Ok(u16::from(b & 0x3F)),
            _ => Err(ExecFormatError::InvalidString),
        }
    };

    let mut units = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        let lead = bytes[idx];
        let unit = if lead & 0x80 == 0 {
            idx += 1;
            u16::from(lead)
        } else if lead & 0xE0 == 0xC0 {
            let unit = (u16::from(lead & 0x1F) << 6) | continuation(idx + 1)?;
            idx += 2;
            unit
        } else if lead & 0xF0 == 0xE0 {
            let unit = (u16::from(lead & 0x0F) << 12)
                | (continuation(idx + 1)? << 6)
                | continuation(idx + 2)?;
            idx += 3;
            unit
        } else {
            return Err(ExecFormatError::InvalidString);
        };
        units.push(unit);
    }

    String::from_utf16(&units).map_err(|_| ExecFormatError::InvalidString)
}

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(bytes: &[u8]) -> Result<Vec<ExecBlock>, ExecFormatError> {
        let mut reader = ExecDataReader::new(bytes);
        let mut blocks = Vec::new();
        while let Some(block) = reader.next_block()? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    #[test]
    fn test_writer_byte_layout() {
        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        writer
            .write_session_info(&SessionInfo {
                id: "s".to_string(),
                start: 1,
                dump: 2,
            })
            .unwrap();
        writer
            .write_execution_data(&ExecutionData::new(1, "A", vec![true, false, true]))
            .unwrap();
        let bytes = writer.finish().unwrap();

        let expected: Vec<u8> = [
            &[0x01, 0xC0, 0xC0, 0x10, 0x07][..],
            &[0x10, 0x00, 0x01, b's'],
            &[0, 0, 0, 0, 0, 0, 0, 1],
            &[0, 0, 0, 0, 0, 0, 0, 2],
            &[0x11, 0, 0, 0, 0, 0, 0, 0, 1],
            &[0x00, 0x01, b'A'],
            &[0x03, 0b101],
        ]
        .concat();
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_reads_written_blocks() {
        let data = ExecutionData::new(u64::MAX, "com/example/Ä", vec![false; 9]
            .into_iter()
            .chain([true])
            .collect());
        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        writer.write_execution_data(&data).unwrap();
        let bytes = writer.finish().unwrap();

        let blocks = read_all(&bytes).unwrap();
        assert_eq!(blocks, vec![ExecBlock::Execution(data)]);
    }

    #[test]
    fn test_empty_input_is_valid() {
        assert!(read_all(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_header_only_is_valid() {
        assert!(read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x07]).unwrap().is_empty());
    }

    #[test]
    fn test_concatenated_dumps() {
        let header = [0x01, 0xC0, 0xC0, 0x10, 0x07];
        let session = [0x10, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let bytes = [&header[..], &session, &header, &session].concat();

        assert_eq!(read_all(&bytes).unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_missing_header() {
        let err = read_all(&[0x10, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, ExecFormatError::MissingHeader));
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let err = read_all(&[0x01, 0xCA, 0xFE, 0x10, 0x07]).unwrap_err();
        assert!(matches!(err, ExecFormatError::InvalidMagic(0xCAFE)));

        let err = read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x06]).unwrap_err();
        assert!(matches!(err, ExecFormatError::IncompatibleVersion(0x1006)));
    }

    #[test]
    fn test_rejects_unknown_block() {
        let err = read_all(&[0x01, 0xC0, 0xC0, 0x10, 0x07, 0x42]).unwrap_err();
        assert!(matches!(err, ExecFormatError::UnknownBlock(0x42)));
    }

    #[test]
    fn test_rejects_truncated_probes() {
        // claims 16 probes but carries one byte
        let bytes = [
            &[0x01, 0xC0, 0xC0, 0x10, 0x07, 0x11][..],
            &[0, 0, 0, 0, 0, 0, 0, 1],
            &[0x00, 0x01, b'A', 0x10, 0xFF],
        ]
        .concat();
        let err = read_all(&bytes).unwrap_err();
        assert!(matches!(err, ExecFormatError::Io(_)));
    }

    #[test]
    fn test_classes_without_hits_are_skipped() {
        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        writer
            .write_execution_data(&ExecutionData::new(1, "A", vec![false, false]))
            .unwrap();
        let bytes = writer.finish().unwrap();

        assert_eq!(bytes.len(), 5);
    }

    #[test]
    fn test_var_int_spans_bytes() {
        let probes = vec![true; 300];
        let mut writer = ExecDataWriter::new(Vec::new()).unwrap();
        writer
            .write_execution_data(&ExecutionData::new(7, "B", probes.clone()))
            .unwrap();
        let bytes = writer.finish().unwrap();

        // 300 = 0b10_0101100 -> 0xAC 0x02
        let length_at = 5 + 1 + 8 + 2 + 1;
        assert_eq!(&bytes[length_at..length_at + 2], &[0xAC, 0x02]);

        let blocks = read_all(&bytes).unwrap();
        assert_eq!(blocks, vec![ExecBlock::Execution(ExecutionData::new(7, "B", probes))]);
    }

    #[test]
    fn test_modified_utf8_special_cases() {
        assert_eq!(encode_modified_utf8("\0"), vec![0xC0, 0x80]);
        assert_eq!(encode_modified_utf8("é"), vec![0xC3, 0xA9]);
        // supplementary characters are encoded as two surrogates
        assert_eq!(encode_modified_utf8("😀").len(), 6);

        for value in ["\0", "plain", "é", "😀", "a/b$Inner"] {
            let decoded = decode_modified_utf8(&encode_modified_utf8(value)).unwrap();
            assert_eq!(decoded, value);
        }
        assert!(decode_modified_utf8(&[0xC3]).is_err());
    }

    #[test]
    fn test_merge_ors_probes() {
        let mut left = ExecutionData::new(1, "A", vec![true, false, false]);
        let right = ExecutionData::new(1, "A", vec![false, false, true]);
        assert!(left.is_compatible(&right));

        left.merge(&right);
        assert_eq!(left.probes(), &[true, false, true]);
        assert_eq!(left.hit_count(), 2);
    }
}
