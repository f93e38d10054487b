use std::io::{self, BufRead, BufReader, Error, ErrorKind, Read};

use base64::Engine;

use crate::ser::Alignment;

pub struct ASCIIImportIterator<'a> {
    buf_reader: BufReader<&'a mut dyn Read>,
}

impl<'a> ASCIIImportIterator<'a> {
    pub fn new(reader: &'a mut dyn Read) -> io::Result<Self> {
        let mut buf_reader = BufReader::new(reader);
        Self::read_header(&mut buf_reader)?;

        Ok(Self { buf_reader })
    }

    fn read_header(buf_reader: &mut BufReader<&'a mut dyn Read>) -> io::Result<Vec<String>> {
        buf_reader
            .lines()
            .map(|line| match line {
                Ok(s) if s.as_str().starts_with('#') => Ok(s),
                Ok(s) => Err(Error::new(
                    ErrorKind::Other,
                    format!("bad header line: {}", s),
                )),
                Err(e) => Err(e),
            })
            .take_while(|l| !l.as_ref().is_ok_and(|s| s == "# End of header"))
            .collect()
    }

    fn read_line(&mut self) -> io::Result<String> {
        self.buf_reader
            .by_ref()
            .lines()
            .next()
            .unwrap_or(Err(Error::new(ErrorKind::Other, "end of input")))
    }

    fn read_base64(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let bytes = self
            .buf_reader
            .by_ref()
            .bytes()
            .filter(|b| {
                !b.as_ref()
                    .map(|b| b.is_ascii_whitespace())
                    .unwrap_or_default()
            })
            .take((4 * length / 3 + 3) & !3) // length of base64 representation
            .collect::<io::Result<Vec<_>>>()?;

        // read past line ending
        self.read_line().and_then(|l| {
            l.is_empty()
                .then_some(())
                .ok_or_else(|| Error::new(ErrorKind::Other, "unexpected data"))
        })?;

        base64::prelude::BASE64_STANDARD
            .decode(bytes)
            .map_err(|e| Error::new(ErrorKind::Other, format!("bad base64: {}", e)))
            .and_then(|decoded| {
                (decoded.len() == length)
                    .then_some(decoded)
                    .ok_or_else(|| Error::new(ErrorKind::Other, "length mismatch"))
            })
    }

    fn read_datum(&mut self) -> io::Result<Option<Vec<u8>>> {
        let line = self.read_line()?;
        match line.split_once('=') {
            Some(("#:count", _)) => Ok(None),
            Some(("#:len", length)) => length
                .parse::<usize>()
                .map_err(|e| Error::new(ErrorKind::Other, format!("bad line ({}): {}", line, e)))
                .and_then(|length| self.read_base64(length))
                .map(Some),
            _ => Err(Error::new(ErrorKind::Other, format!("bad data ({})", line))),
        }
    }
}

impl<'a> Iterator for ASCIIImportIterator<'a> {
    type Item = io::Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_datum() {
            Ok(None) => None,
            Ok(Some(key)) => match self.read_datum() {
                Ok(None) => Some(Err(Error::new(ErrorKind::Other, "end of file"))),
                Ok(Some(value)) => Some(Ok((key, value))),
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reads records out of a binary dump produced by
/// [`export_bin`](crate::Store::export_bin): a fixed four-line banner followed by
/// `(length, bytes)` pairs with big-endian lengths, alternating key then value, until EOF.
pub struct BinaryImportIterator<'a> {
    alignment: Alignment,
    buf_reader: BufReader<&'a mut dyn Read>,
}

impl<'a> BinaryImportIterator<'a> {
    pub fn new(alignment: Alignment, reader: &'a mut dyn Read) -> io::Result<Self> {
        let mut buf_reader = BufReader::new(reader);
        Self::read_header(&mut buf_reader)?;

        Ok(Self {
            alignment,
            buf_reader,
        })
    }

    fn read_header(buf_reader: &mut BufReader<&'a mut dyn Read>) -> io::Result<()> {
        for _ in 0..4 {
            let mut line = String::new();
            buf_reader.read_line(&mut line)?;
            if !line.trim_end_matches(['\r', '\n']).starts_with('!') {
                return Err(Error::new(
                    ErrorKind::Other,
                    format!("bad header line: {}", line),
                ));
            }
        }
        Ok(())
    }

    // Like `Read::read_exact`, but returns `Ok(0)` instead of erroring if the stream is
    // already at EOF when called (partial reads past that point still error).
    fn read_upto(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.buf_reader.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn read_length(&mut self) -> io::Result<Option<u64>> {
        match self.alignment {
            Alignment::Align32 => {
                let mut buf = [0u8; 4];
                match self.read_upto(&mut buf)? {
                    0 => Ok(None),
                    4 => Ok(Some(u32::from_be_bytes(buf) as u64)),
                    _ => Err(Error::new(ErrorKind::UnexpectedEof, "truncated length")),
                }
            }
            Alignment::Align64 => {
                let mut buf = [0u8; 8];
                match self.read_upto(&mut buf)? {
                    0 => Ok(None),
                    8 => Ok(Some(u64::from_be_bytes(buf))),
                    _ => Err(Error::new(ErrorKind::UnexpectedEof, "truncated length")),
                }
            }
        }
    }

    fn read_datum(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.read_length()? {
            None => Ok(None),
            Some(length) => {
                let mut data = vec![0u8; length as usize];
                self.buf_reader.read_exact(&mut data)?;
                Ok(Some(data))
            }
        }
    }
}

impl<'a> Iterator for BinaryImportIterator<'a> {
    type Item = io::Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_datum() {
            Ok(None) => None,
            Ok(Some(key)) => match self.read_datum() {
                Ok(None) => Some(Err(Error::new(
                    ErrorKind::UnexpectedEof,
                    "truncated record: missing value",
                ))),
                Ok(Some(value)) => Some(Ok((key, value))),
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        }
    }
}
