//! Redo log file header
//!
//! Fixed-size block at offset 0 of every log file. The writer rewrites it in
//! place on open and close; the reader reads it once.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crc32fast::Hasher;

use crate::error::{RedoError, Result};

// =============================================================================
// Layout Constants
// =============================================================================

/// Magic bytes identifying a redo log file
pub const MAGIC: &[u8; 8] = b"REDOLOG\0";

/// Highest format version this build reads and the version it writes
pub const VERSION_MAJOR: i16 = 1;
pub const VERSION_MINOR: i16 = 0;

/// Server id stored when none was configured
pub const UNKNOWN_SERVER_ID: &str = "unknown";

/// Largest server id (in bytes) the header can hold
pub const MAX_SERVER_ID_LEN: usize = 127;

const OPEN_LEN: usize = 1;
const I64_LEN: usize = 8;
const SERVER_ID_LEN_LEN: usize = 1;
const VERSION_LEN: usize = 2 + 2;
const CRC_LEN: usize = 4;

/// Total header length: magic, open flag, file size, sequence, server id
/// (length byte + max width), three timestamps, version, checksum
pub const HEADER_LEN: usize = MAGIC.len()
    + OPEN_LEN
    + I64_LEN
    + I64_LEN
    + SERVER_ID_LEN_LEN
    + MAX_SERVER_ID_LEN
    + I64_LEN * 3
    + VERSION_LEN
    + CRC_LEN;

/// Bytes covered by the checksum
const CRC_COVERED: usize = HEADER_LEN - CRC_LEN;

// =============================================================================
// FileHeader
// =============================================================================

/// In-memory copy of a log file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    open: bool,
    file_size: i64,
    sequence: i64,
    server_id: String,
    first_op_timestamp: i64,
    last_op_timestamp: i64,
    create_time: i64,
    version_major: i16,
    version_minor: i16,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FileHeader {
    /// Uninitialized header: closed, every number zero, current version
    pub fn new(server_id: Option<&str>) -> Self {
        let mut header = Self {
            open: false,
            file_size: 0,
            sequence: 0,
            server_id: String::new(),
            first_op_timestamp: 0,
            last_op_timestamp: 0,
            create_time: 0,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
        };
        header.set_server_id(server_id.unwrap_or(UNKNOWN_SERVER_ID));
        header
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn file_size(&self) -> i64 {
        self.file_size
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn first_op_timestamp(&self) -> i64 {
        self.first_op_timestamp
    }

    pub fn last_op_timestamp(&self) -> i64 {
        self.last_op_timestamp
    }

    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    pub fn version(&self) -> (i16, i16) {
        (self.version_major, self.version_minor)
    }

    // -------------------------------------------------------------------------
    // Mutators (memory only; call `write` to persist)
    // -------------------------------------------------------------------------

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub fn set_file_size(&mut self, size: i64) {
        self.file_size = size;
    }

    pub fn set_sequence(&mut self, sequence: i64) {
        self.sequence = sequence;
    }

    /// Set the server id, truncated on a char boundary to fit the header
    pub fn set_server_id(&mut self, id: &str) {
        let mut end = id.len().min(MAX_SERVER_ID_LEN);
        while !id.is_char_boundary(end) {
            end -= 1;
        }
        self.server_id = id[..end].to_string();
    }

    pub fn set_first_op_timestamp(&mut self, ts: i64) {
        self.first_op_timestamp = ts;
    }

    pub fn set_last_op_timestamp(&mut self, ts: i64) {
        self.last_op_timestamp = ts;
    }

    pub fn set_create_time(&mut self, ts: i64) {
        self.create_time = ts;
    }

    pub fn set_version(&mut self, major: i16, minor: i16) {
        self.version_major = major;
        self.version_minor = minor;
    }

    // -------------------------------------------------------------------------
    // Encoding
    // -------------------------------------------------------------------------

    /// Encode into exactly `HEADER_LEN` bytes
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        let mut cursor = 0usize;

        buf[cursor..cursor + MAGIC.len()].copy_from_slice(MAGIC);
        cursor += MAGIC.len();

        buf[cursor] = u8::from(self.open);
        cursor += OPEN_LEN;

        buf[cursor..cursor + 8].copy_from_slice(&self.file_size.to_le_bytes());
        cursor += 8;
        buf[cursor..cursor + 8].copy_from_slice(&self.sequence.to_le_bytes());
        cursor += 8;

        let id = self.server_id.as_bytes();
        buf[cursor] = id.len() as u8;
        cursor += SERVER_ID_LEN_LEN;
        buf[cursor..cursor + id.len()].copy_from_slice(id);
        cursor += MAX_SERVER_ID_LEN;

        buf[cursor..cursor + 8].copy_from_slice(&self.first_op_timestamp.to_le_bytes());
        cursor += 8;
        buf[cursor..cursor + 8].copy_from_slice(&self.last_op_timestamp.to_le_bytes());
        cursor += 8;
        buf[cursor..cursor + 8].copy_from_slice(&self.create_time.to_le_bytes());
        cursor += 8;

        buf[cursor..cursor + 2].copy_from_slice(&self.version_major.to_le_bytes());
        cursor += 2;
        buf[cursor..cursor + 2].copy_from_slice(&self.version_minor.to_le_bytes());
        cursor += 2;

        let crc = checksum(&buf[..CRC_COVERED]);
        buf[cursor..cursor + CRC_LEN].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode and validate: magic first, then version, then the remaining fields
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
            return Err(RedoError::Format(
                "missing magic bytes in redo log header".to_string(),
            ));
        }
        if data.len() < HEADER_LEN {
            return Err(RedoError::Format(format!(
                "truncated header: {} of {} bytes",
                data.len(),
                HEADER_LEN
            )));
        }

        let version_at = HEADER_LEN - CRC_LEN - VERSION_LEN;
        let major = read_i16(data, version_at);
        let minor = read_i16(data, version_at + 2);
        if major > VERSION_MAJOR {
            return Err(RedoError::Version {
                major,
                minor,
                max_major: VERSION_MAJOR,
                max_minor: VERSION_MINOR,
            });
        }

        let stored_crc = u32::from_le_bytes([
            data[CRC_COVERED],
            data[CRC_COVERED + 1],
            data[CRC_COVERED + 2],
            data[CRC_COVERED + 3],
        ]);
        let actual_crc = checksum(&data[..CRC_COVERED]);
        if stored_crc != actual_crc {
            return Err(RedoError::Format(format!(
                "header checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            )));
        }

        let mut cursor = MAGIC.len();

        let open = match data[cursor] {
            0 => false,
            1 => true,
            other => {
                return Err(RedoError::Format(format!("invalid open flag: {other}")));
            }
        };
        cursor += OPEN_LEN;

        let file_size = read_i64(data, cursor);
        cursor += 8;
        let sequence = read_i64(data, cursor);
        cursor += 8;

        let id_len = data[cursor] as usize;
        cursor += SERVER_ID_LEN_LEN;
        if id_len > MAX_SERVER_ID_LEN {
            return Err(RedoError::Format(format!(
                "server id length {id_len} exceeds {MAX_SERVER_ID_LEN}"
            )));
        }
        let server_id = std::str::from_utf8(&data[cursor..cursor + id_len])
            .map_err(|e| RedoError::Format(format!("invalid utf8 in server id: {e}")))?
            .to_string();
        cursor += MAX_SERVER_ID_LEN;

        let first_op_timestamp = read_i64(data, cursor);
        cursor += 8;
        let last_op_timestamp = read_i64(data, cursor);
        cursor += 8;
        let create_time = read_i64(data, cursor);

        Ok(Self {
            open,
            file_size,
            sequence,
            server_id,
            first_op_timestamp,
            last_op_timestamp,
            create_time,
            version_major: major,
            version_minor: minor,
        })
    }

    /// Write the header at offset 0, leaving the stream positioned just past it
    pub fn write<W: Write + Seek>(&self, file: &mut W) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read and validate the header at offset 0
    pub fn read<R: Read + Seek>(file: &mut R) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut buf = Vec::with_capacity(HEADER_LEN);
        file.by_ref().take(HEADER_LEN as u64).read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    /// Read the header of the file at `path`, `None` if it does not exist
    pub fn read_path(path: &std::path::Path) -> Result<Option<Self>> {
        match std::fs::File::open(path) {
            Ok(mut file) => Self::read(&mut file).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Display for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "sequence:    {}", self.sequence)?;
        writeln!(f, "open:        {}", self.open)?;
        writeln!(f, "filesize:    {}", self.file_size)?;
        writeln!(f, "serverId:    {}", self.server_id)?;
        writeln!(f, "firstOpTime: {}", self.first_op_timestamp)?;
        writeln!(f, "lastOpTime:  {}", self.last_op_timestamp)?;
        writeln!(f, "createTime:  {}", self.create_time)?;
        write!(f, "version:     {}.{}", self.version_major, self.version_minor)
    }
}

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

fn read_i64(data: &[u8], at: usize) -> i64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    i64::from_le_bytes(bytes)
}

fn read_i16(data: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([data[at], data[at + 1]])
}
