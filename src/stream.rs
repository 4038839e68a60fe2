use std::io::BufRead;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::domain::{EntryId, LineFilter};
use crate::error::ResolverError;
use crate::fs_util::open_text;

pub const DEFAULT_ID_FIELD: &str = "entry_id";

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub line: u64,
    pub entry: EntryId,
    pub raw: Value,
}

pub struct RecordStream {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    selected: LineFilter,
    effective: LineFilter,
    id_field: String,
    line: u64,
    skipped_by_resume: u64,
    buf: Vec<u8>,
    done: bool,
}

impl RecordStream {
    pub fn open(path: &Path, filter: LineFilter, id_field: &str) -> Result<Self, ResolverError> {
        let reader = open_text(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            effective: filter.clone(),
            selected: filter,
            id_field: id_field.to_string(),
            line: 0,
            skipped_by_resume: 0,
            buf: Vec::new(),
            done: false,
        })
    }

    pub fn resume_after(mut self, checkpoint: u64) -> Self {
        if checkpoint > 0 {
            self.effective = self.selected.intersect(&LineFilter::after(checkpoint));
        }
        self
    }

    pub fn lines_read(&self) -> u64 {
        self.line
    }

    pub fn skipped_by_resume(&self) -> u64 {
        self.skipped_by_resume
    }

    fn decode(&self, line: u64, bytes: &[u8]) -> Result<StreamRecord, ResolverError> {
        let malformed = |reason: String| ResolverError::MalformedRecord { line, reason };
        let raw: Value =
            serde_json::from_slice(bytes).map_err(|err| malformed(err.to_string()))?;
        let id = raw
            .get(&self.id_field)
            .and_then(|value| value.as_str())
            .ok_or_else(|| malformed(format!("missing string field `{}`", self.id_field)))?;
        let entry: EntryId = id.parse().map_err(|err: ResolverError| malformed(err.to_string()))?;
        Ok(StreamRecord { line, entry, raw })
    }
}

impl Iterator for RecordStream {
    type Item = Result<StreamRecord, ResolverError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self
                .effective
                .upper_bound()
                .is_some_and(|upper| self.line >= upper)
            {
                self.done = true;
                return None;
            }

            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(ResolverError::data_load(&self.path, err)));
                }
            }
            self.line += 1;

            if !self.effective.contains(self.line) {
                if self.selected.contains(self.line) {
                    self.skipped_by_resume += 1;
                }
                continue;
            }
            if self.buf.iter().all(|byte| byte.is_ascii_whitespace()) {
                continue;
            }

            let bytes = std::mem::take(&mut self.buf);
            let item = self.decode(self.line, trim_line_end(&bytes));
            self.buf = bytes;
            return Some(item);
        }
    }
}

fn trim_line_end(bytes: &[u8]) -> &[u8] {
    let mut end = bytes.len();
    while end > 0 && matches!(bytes[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &bytes[..end]
}
