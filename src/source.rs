//! Sequential line reader over the input log
//!
//! Detects gzip (1F 8B 08) and zstd (28 B5 2F FD) compression by magic bytes so
//! rotated logs can be imported without unpacking them first.

use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Cursor, Read};
use std::path::Path;

use crate::model::RawLine;

/// Sequential reader producing `(bytes, line_number, offset)` records
pub struct LineSource {
    reader: Box<dyn BufRead + Send>,
    name: String,
    line_number: u64,
    offset: u64,
    failed: bool,
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("name", &self.name)
            .field("line_number", &self.line_number)
            .field("offset", &self.offset)
            .finish()
    }
}

impl LineSource {
    /// Open a log file, or stdin when the path is `-`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if path_ref == Path::new("-") {
            let stdin = maybe_decompress(io::stdin()).context("Failed to read stdin")?;
            return Ok(Self::from_reader("<stdin>", BufReader::new(stdin)));
        }

        if let Some(extension) = path_ref.extension().and_then(|ext| ext.to_str()) {
            if extension.eq_ignore_ascii_case("zip") {
                return Err(anyhow!(
                    "ZIP archives are not supported, only gzip and zstd. Extract the file first: unzip {}",
                    path_ref.display()
                ));
            }
        }

        let file = File::open(path_ref)
            .with_context(|| format!("Failed to open log file: {}", path_ref.display()))?;
        let reader = maybe_decompress(file)
            .with_context(|| format!("Failed to detect compression of {}", path_ref.display()))?;
        Ok(Self::from_reader(
            path_ref.display().to_string(),
            BufReader::new(reader),
        ))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(name: impl Into<String>, reader: R) -> Self {
        Self {
            reader: Box::new(reader),
            name: name.into(),
            line_number: 0,
            offset: 0,
            failed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of lines read so far
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }
}

impl Iterator for LineSource {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let mut buffer = Vec::new();
        match self.reader.read_until(b'\n', &mut buffer) {
            Ok(0) => None,
            Ok(n) => {
                self.line_number += 1;
                let line = RawLine::new(buffer, self.line_number, self.offset);
                self.offset += n as u64;
                Some(Ok(line))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Wrap a reader so gzip and zstd streams are decompressed transparently
pub fn maybe_decompress<R: Read + Send + 'static>(
    mut reader: R,
) -> io::Result<Box<dyn Read + Send>> {
    let mut head = [0u8; 4];
    let mut n = 0;
    // short reads are legal, keep going until 4 bytes or EOF
    while n < head.len() {
        let read = reader.read(&mut head[n..])?;
        if read == 0 {
            break;
        }
        n += read;
    }

    // Put the read bytes back in front using a cursor chain
    let chained = Cursor::new(head[..n].to_vec()).chain(reader);

    let is_gzip = n >= 3 && head[0] == 0x1F && head[1] == 0x8B && head[2] == 0x08;
    let is_zstd = n >= 4 && head == [0x28, 0xB5, 0x2F, 0xFD];

    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(chained)))
    } else if is_zstd {
        Ok(Box::new(zstd::Decoder::new(chained)?))
    } else {
        Ok(Box::new(chained))
    }
}
