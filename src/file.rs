//! Plaintext and gzip-compressed table input and output.
//!
//! Marker tables and genotype tables are frequently shipped gzip-compressed;
//! [`InputFile`] and [`OutputFile`] let the rest of the crate read and write
//! them through a common interface without caring about compression.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::io::{self, BufWriter};
use std::io::{BufRead, BufReader, Read};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
}

/// Check whether a file is gzip-compressed by looking for the magic numbers.
///
/// Extensions lie often enough that sniffing the first two bytes is the
/// only reliable check.
fn is_gzipped_file(file_path: &str) -> io::Result<bool> {
    let mut file = File::open(file_path)?;
    let mut buffer = [0; 2];
    file.read_exact(&mut buffer)?;

    Ok(buffer == [0x1f, 0x8b])
}

/// An input table file, possibly gzip-compressed.
///
/// Reading always goes through [`InputFile::reader`], which transparently
/// decompresses gzip input, so marker and genotype tables can be supplied
/// either way.
pub struct InputFile {
    pub filepath: String,
}

impl InputFile {
    /// Constructs a new `InputFile` for the supplied path.
    pub fn new(filepath: &str) -> Self {
        Self {
            filepath: filepath.to_string(),
        }
    }

    /// Opens the file and returns a buffered reader, decompressing gzip
    /// input when the magic bytes indicate it.
    pub fn reader(&self) -> Result<BufReader<Box<dyn Read>>, FileError> {
        let file = File::open(self.filepath.clone())?;
        let is_gzipped = is_gzipped_file(&self.filepath)?;
        let reader: Box<dyn Read> = if is_gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(BufReader::new(reader))
    }

    /// Checks whether the first non-comment line starts with the expected
    /// header token.
    ///
    /// Tables in the wild come both with and without header rows; parsers use
    /// this to decide before handing the reader to [`csv`].
    pub fn has_header(&self, expect: &str) -> Result<bool, FileError> {
        let mut buf_reader = self.reader()?;
        let mut line = String::new();
        loop {
            line.clear();
            let n = buf_reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(false);
            }
            if !line.starts_with('#') {
                return Ok(line.starts_with(expect));
            }
        }
    }
}

/// An output table file, possibly gzip-compressed.
///
/// A `.gz` extension selects gzip output. Optional header entries are
/// written as `#`-prefixed comment lines before any records.
pub struct OutputFile {
    pub filepath: String,
    pub header: Option<Vec<String>>,
}

impl OutputFile {
    /// Constructs a new `OutputFile`.
    ///
    /// # Arguments
    ///
    /// * `filepath` - Path to write to; a `.gz` extension enables compression.
    /// * `header` - Optional comment lines to place at the top of the file.
    pub fn new(filepath: &str, header: Option<Vec<String>>) -> Self {
        Self {
            filepath: filepath.to_string(),
            header,
        }
    }

    /// Opens the file and returns a writer, writing any configured header
    /// lines first.
    pub fn writer(&self) -> Result<Box<dyn Write>, io::Error> {
        let outfile = &self.filepath;
        let is_gzip = outfile.ends_with(".gz");
        let mut writer: Box<dyn Write> = if is_gzip {
            Box::new(BufWriter::new(GzEncoder::new(
                File::create(outfile)?,
                Compression::default(),
            )))
        } else {
            Box::new(BufWriter::new(File::create(outfile)?))
        };
        if let Some(entries) = &self.header {
            for entry in entries {
                writeln!(writer, "#{}", entry)?;
            }
        }
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_gzip_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.tsv.gz");
        let path = path.to_str().unwrap();

        let out = OutputFile::new(path, Some(vec!["generated by test".to_string()]));
        let mut writer = out.writer().unwrap();
        writeln!(writer, "m1\t1\t0.0").unwrap();
        writeln!(writer, "m2\t1\t5.0").unwrap();
        drop(writer);

        let input = InputFile::new(path);
        let reader = input.reader().unwrap();
        let lines: Vec<String> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with('#'));
        assert_eq!(lines[1], "m1\t1\t0.0");
    }

    #[test]
    fn test_has_header_skips_comments() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.tsv");
        let path = path.to_str().unwrap();

        let out = OutputFile::new(path, Some(vec!["comment".to_string()]));
        let mut writer = out.writer().unwrap();
        writeln!(writer, "marker\tchrom\tpos").unwrap();
        writeln!(writer, "m1\t1\t0.0").unwrap();
        drop(writer);

        let input = InputFile::new(path);
        assert!(input.has_header("marker").unwrap());
        assert!(!input.has_header("chrom").unwrap());
    }
}
