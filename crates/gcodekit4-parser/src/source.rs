//! Line sources feeding the head of a processor chain.

use gcodekit4_core::{GcodeLine, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Something that can produce a fresh stream of parsed G-code lines,
/// re-iterable from the start on every call — required so the processor
/// chain builder can re-run the whole input during `init`'s preprocess
/// replay.
pub trait GcodeSource {
    /// Open (or re-open) this source and return an iterator over its
    /// parsed lines. Empty and comment-only lines are dropped here.
    fn lines(&self) -> Result<Box<dyn Iterator<Item = Result<GcodeLine>> + '_>>;
}

/// A source backed by a file on disk, newline-delimited, UTF-8, one
/// G-code line per text line.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// A source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GcodeSource for FileSource {
    fn lines(&self) -> Result<Box<dyn Iterator<Item = Result<GcodeLine>> + '_>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        Ok(Box::new(ParsedLines::new(reader.lines().map(|r| r.map_err(Into::into)))))
    }
}

/// A source backed by an in-memory list of raw G-code text lines.
#[derive(Debug, Clone)]
pub struct VecSource {
    lines: Vec<String>,
}

impl VecSource {
    /// A source over `lines`, each a raw (unparsed) line of text.
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

impl GcodeSource for VecSource {
    fn lines(&self) -> Result<Box<dyn Iterator<Item = Result<GcodeLine>> + '_>> {
        Ok(Box::new(ParsedLines::new(
            self.lines.iter().cloned().map(Ok),
        )))
    }
}

struct ParsedLines<I> {
    raw: I,
    line_number: u32,
}

impl<I> ParsedLines<I> {
    fn new(raw: I) -> Self {
        Self { raw, line_number: 0 }
    }
}

impl<I: Iterator<Item = Result<String>>> Iterator for ParsedLines<I> {
    type Item = Result<GcodeLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.raw.next()?;
            self.line_number += 1;
            let raw = match raw {
                Ok(r) => r,
                Err(e) => return Some(Err(e)),
            };
            let trimmed = raw.trim_end_matches('\r');
            if trimmed.trim().is_empty() {
                continue;
            }
            return match GcodeLine::parse(self.line_number, trimmed) {
                Ok(line) if line.words().is_empty() && line.comment().is_some() => continue,
                Ok(line) => Some(Ok(line)),
                Err(e) => Some(Err(e)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_drops_empty_and_comment_only_lines() {
        let src = VecSource::new(vec![
            "G0 X1".to_string(),
            "".to_string(),
            "; just a comment".to_string(),
            "G1 X2".to_string(),
        ]);
        let lines: Vec<_> = src.lines().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn vec_source_is_reiterable() {
        let src = VecSource::new(vec!["G0 X1".to_string()]);
        let first: Vec<_> = src.lines().unwrap().collect::<Result<Vec<_>>>().unwrap();
        let second: Vec<_> = src.lines().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn file_source_reads_lines() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prog.gcode");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "G0 X1").unwrap();
        writeln!(f, "G1 X2 Y3").unwrap();
        let src = FileSource::new(&path);
        let lines: Vec<_> = src.lines().unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(lines.len(), 2);
    }
}
