// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Typed binary streams backing the intermediate files and final artifacts.
//!
//! All integers and doubles are little-endian; strings are stored as a u32
//! byte length followed by UTF-8 data. Readers distinguish a clean end of
//! stream (EOF at a record boundary, via the `try_read_*` variants) from a
//! truncated record (an error).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

pub struct StreamWriter<W: Write> {
    inner: W,
}

impl StreamWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: BufWriter::new(file),
        })
    }
}

impl<W: Write> StreamWriter<W> {
    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.inner.write_u32::<LE>(value)
    }

    pub fn write_i32(&mut self, value: i32) -> io::Result<()> {
        self.inner.write_i32::<LE>(value)
    }

    pub fn write_f64(&mut self, value: f64) -> io::Result<()> {
        self.inner.write_f64::<LE>(value)
    }

    pub fn write_string(&mut self, value: &str) -> io::Result<()> {
        self.write_u32(value.len() as u32)?;
        self.inner.write_all(value.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct StreamReader<R: Read> {
    inner: R,
}

impl StreamReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            inner: BufReader::new(file),
        })
    }
}

impl<R: Read> StreamReader<R> {
    pub fn read_u32(&mut self) -> io::Result<u32> {
        self.inner.read_u32::<LE>()
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        self.inner.read_i32::<LE>()
    }

    pub fn read_f64(&mut self) -> io::Result<f64> {
        self.inner.read_f64::<LE>()
    }

    pub fn read_string(&mut self) -> io::Result<String> {
        let length = self.read_u32()? as usize;
        let mut bytes = vec![0; length];
        self.inner.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Like [StreamReader::read_u32], but returns `None` on a clean EOF.
    pub fn try_read_u32(&mut self) -> io::Result<Option<u32>> {
        let mut bytes = [0; 4];
        if self.fill_or_eof(&mut bytes)? {
            Ok(Some(u32::from_le_bytes(bytes)))
        } else {
            Ok(None)
        }
    }

    /// Like [StreamReader::read_f64], but returns `None` on a clean EOF.
    pub fn try_read_f64(&mut self) -> io::Result<Option<f64>> {
        let mut bytes = [0; 8];
        if self.fill_or_eof(&mut bytes)? {
            Ok(Some(f64::from_le_bytes(bytes)))
        } else {
            Ok(None)
        }
    }

    /// Like [StreamReader::read_string], but returns `None` on a clean EOF
    /// before the length prefix.
    pub fn try_read_string(&mut self) -> io::Result<Option<String>> {
        match self.try_read_u32()? {
            None => Ok(None),
            Some(length) => {
                let mut bytes = vec![0; length as usize];
                self.inner.read_exact(&mut bytes)?;
                let string = String::from_utf8(bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(string))
            }
        }
    }

    /// Fills `bytes` completely, returning `false` if the stream was already
    /// exhausted. EOF in the middle of `bytes` is an [io::ErrorKind::UnexpectedEof].
    fn fill_or_eof(&mut self, bytes: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < bytes.len() {
            match self.inner.read(&mut bytes[filled..]) {
                Ok(0) if filled == 0 => return Ok(false),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ends in the middle of a record",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mixed_record_stream() -> io::Result<()> {
        let mut buffer = Vec::new();
        {
            let mut writer = StreamWriter { inner: &mut buffer };
            writer.write_string("Main Street")?;
            writer.write_i32(-1)?;
            writer.write_f64(48.28032)?;
            writer.write_u32(7)?;
        }

        let mut reader = StreamReader {
            inner: Cursor::new(buffer),
        };
        assert_eq!(reader.try_read_string()?, Some("Main Street".to_string()));
        assert_eq!(reader.read_i32()?, -1);
        assert_eq!(reader.read_f64()?, 48.28032);
        assert_eq!(reader.read_u32()?, 7);
        assert_eq!(reader.try_read_string()?, None);
        Ok(())
    }

    #[test]
    fn truncated_record_is_an_error() {
        let mut reader = StreamReader {
            inner: Cursor::new(vec![0x01, 0x02]),
        };
        let error = reader.try_read_u32().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
