//! Random-access readers over bytecode images.
//!
//! Both variants validate the magic/version header at construction and
//! start positioned just past it. Positions are absolute file offsets,
//! matching the addresses written into the `store_address` prologue.

use std::{
    fmt, fs,
    io::{self, Read as _, Seek as _, SeekFrom},
    path::Path,
};

use super::exception::{RunError, RunResult};
use crate::bytecode::{HEADER_LEN, MAGIC, VERSION};

/// Failure to open a bytecode image.
#[derive(Debug)]
pub enum BytecodeError {
    InvalidMagic,
    InvalidVersion,
    Io(io::Error),
}

impl fmt::Display for BytecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMagic => f.write_str("not a bytecode file (bad magic)"),
            Self::InvalidVersion => f.write_str("unsupported bytecode version"),
            Self::Io(err) => write!(f, "could not read bytecode: {err}"),
        }
    }
}

impl std::error::Error for BytecodeError {}

impl From<io::Error> for BytecodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Uniform random-access reader the VM executes from.
///
/// Reading past `max` is prevented by the VM's main loop, which stops at
/// `position >= max`; a short read inside an instruction is a stream
/// error.
pub trait ByteStream {
    fn position(&self) -> u64;
    fn max(&self) -> u64;
    fn read_bytes(&mut self, buf: &mut [u8]) -> RunResult<()>;
    fn skip(&mut self, amount: u64);
    fn seek(&mut self, address: u64);

    fn eof(&self) -> bool {
        self.position() >= self.max()
    }

    fn read_u8(&mut self) -> RunResult<u8> {
        let mut buf = [0u8; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self) -> RunResult<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> RunResult<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> RunResult<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> RunResult<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn read_f64(&mut self) -> RunResult<f64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(f64::from_bits(u64::from_le_bytes(buf)))
    }

    /// Reads a string operand: `i32` length including the NUL, then the
    /// bytes. The returned string excludes the NUL.
    fn read_string(&mut self) -> RunResult<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| RunError::Stream("negative string length".to_owned()))?;
        if len == 0 {
            return Ok(String::new());
        }

        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        buf.pop(); // the NUL terminator
        String::from_utf8(buf).map_err(|_| RunError::Stream("string operand is not UTF-8".to_owned()))
    }
}

fn validate_header(magic: &[u8], version: &[u8]) -> Result<(), BytecodeError> {
    if magic != MAGIC {
        return Err(BytecodeError::InvalidMagic);
    }
    if version != VERSION {
        return Err(BytecodeError::InvalidVersion);
    }
    Ok(())
}

/// Reader over an in-memory bytecode image.
#[derive(Debug)]
pub struct MemoryByteStream {
    data: Vec<u8>,
    position: u64,
}

impl MemoryByteStream {
    /// Wraps a full image (header included), validating the signature.
    pub fn new(data: Vec<u8>) -> Result<Self, BytecodeError> {
        if data.len() < HEADER_LEN as usize {
            return Err(BytecodeError::InvalidMagic);
        }
        validate_header(&data[..4], &data[4..12])?;
        Ok(Self {
            data,
            position: HEADER_LEN,
        })
    }
}

impl ByteStream for MemoryByteStream {
    fn position(&self) -> u64 {
        self.position
    }

    fn max(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> RunResult<()> {
        let start = self.position as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(RunError::Stream("read past end of bytecode".to_owned()));
        }
        buf.copy_from_slice(&self.data[start..end]);
        self.position = end as u64;
        Ok(())
    }

    fn skip(&mut self, amount: u64) {
        self.position += amount;
    }

    fn seek(&mut self, address: u64) {
        self.position = address;
    }
}

/// Reader over a bytecode file on disk.
#[derive(Debug)]
pub struct FileByteStream {
    file: fs::File,
    position: u64,
    max: u64,
}

impl FileByteStream {
    /// Opens and validates a bytecode file.
    pub fn open(path: &Path) -> Result<Self, BytecodeError> {
        let mut file = fs::File::open(path)?;
        let max = file.metadata()?.len();

        let mut header = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut header).map_err(|_| BytecodeError::InvalidMagic)?;
        validate_header(&header[..4], &header[4..12])?;

        Ok(Self {
            file,
            position: HEADER_LEN,
            max,
        })
    }
}

impl ByteStream for FileByteStream {
    fn position(&self) -> u64 {
        self.position
    }

    fn max(&self) -> u64 {
        self.max
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> RunResult<()> {
        self.file
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| RunError::Stream(e.to_string()))?;
        self.file
            .read_exact(buf)
            .map_err(|e| RunError::Stream(e.to_string()))?;
        self.position += buf.len() as u64;
        Ok(())
    }

    fn skip(&mut self, amount: u64) {
        self.position += amount;
    }

    fn seek(&mut self, address: u64) {
        self.position = address;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(MAGIC);
        data.extend_from_slice(VERSION);
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert!(matches!(
            MemoryByteStream::new(b"NOPE0000000000".to_vec()),
            Err(BytecodeError::InvalidMagic)
        ));
    }

    #[test]
    fn test_typed_reads() {
        let mut body = Vec::new();
        body.push(7u8);
        body.extend_from_slice(&0x01020304u32.to_le_bytes());
        body.extend_from_slice(&(-5i64).to_le_bytes());
        body.extend_from_slice(&2.5f64.to_le_bytes());
        body.extend_from_slice(&4i32.to_le_bytes());
        body.extend_from_slice(b"abc\0");

        let mut stream = MemoryByteStream::new(image(&body)).unwrap();
        assert_eq!(stream.position(), HEADER_LEN);
        assert_eq!(stream.read_u8().unwrap(), 7);
        assert_eq!(stream.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(stream.read_i64().unwrap(), -5);
        assert!((stream.read_f64().unwrap() - 2.5).abs() < f64::EPSILON);
        assert_eq!(stream.read_string().unwrap(), "abc");
        assert!(stream.eof());
    }

    #[test]
    fn test_seek_and_skip() {
        let mut stream = MemoryByteStream::new(image(&[1, 2, 3, 4])).unwrap();
        stream.skip(2);
        assert_eq!(stream.read_u8().unwrap(), 3);
        stream.seek(HEADER_LEN);
        assert_eq!(stream.read_u8().unwrap(), 1);
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut stream = MemoryByteStream::new(image(&[1])).unwrap();
        stream.skip(1);
        assert!(stream.read_u8().is_err());
    }

    #[test]
    fn test_file_stream_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ac");
        fs::write(&path, image(&[42, 43])).unwrap();

        let mut stream = FileByteStream::open(&path).unwrap();
        assert_eq!(stream.max(), HEADER_LEN + 2);
        assert_eq!(stream.read_u8().unwrap(), 42);
        stream.seek(HEADER_LEN + 1);
        assert_eq!(stream.read_u8().unwrap(), 43);
        assert!(stream.eof());
    }
}
