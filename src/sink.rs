use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

use crate::error::ResolverError;
use crate::fs_util::GZIP_MAGIC;
use crate::record::ResolvedChainResult;

pub const DEFAULT_BATCH_SIZE: usize = 500;

pub const TABULAR_HEADER: [&str; 12] = [
    "line_number",
    "entry_id",
    "structure_id",
    "chain_id",
    "protein_name",
    "organism_scientific_name",
    "organism_common_name",
    "taxonomy_id",
    "classification",
    "max_longevity_yrs",
    "in_reference",
    "source",
];

fn open_for_append(path: &Path, append: bool) -> Result<File, ResolverError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| ResolverError::output_write(path, err))?;
    }
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    if !append {
        options.truncate(true);
    }
    options
        .open(path)
        .map_err(|err| ResolverError::output_write(path, err))
}

/// Appends `bytes` at `committed` and syncs; on failure the file is cut back to `committed`.
fn commit(file: &mut File, path: &Path, committed: u64, bytes: &[u8]) -> Result<u64, ResolverError> {
    let result = file
        .seek(SeekFrom::Start(committed))
        .and_then(|_| file.write_all(bytes))
        .and_then(|_| file.sync_data());
    match result {
        Ok(()) => Ok(committed + bytes.len() as u64),
        Err(err) => {
            if let Err(rollback) = file.set_len(committed) {
                warn!(path = %path.display(), error = %rollback, "failed to roll back partial batch");
            }
            Err(ResolverError::output_write(path, err))
        }
    }
}

fn truncate_torn_row(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }
    let mut chunk = [0u8; 8192];
    let mut end = len;
    let mut last_byte = true;
    while end > 0 {
        let start = end.saturating_sub(chunk.len() as u64);
        let size = (end - start) as usize;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut chunk[..size])?;
        if last_byte && chunk[size - 1] == b'\n' {
            return Ok(len);
        }
        last_byte = false;
        if let Some(pos) = chunk[..size].iter().rposition(|byte| *byte == b'\n') {
            let keep = start + pos as u64 + 1;
            file.set_len(keep)?;
            return Ok(keep);
        }
        end = start;
    }
    file.set_len(0)?;
    Ok(0)
}

fn truncate_torn_member(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut magic = Vec::with_capacity(GZIP_MAGIC.len());
    (&mut *file).take(GZIP_MAGIC.len() as u64).read_to_end(&mut magic)?;
    if !GZIP_MAGIC.starts_with(&magic) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "existing structured output is not gzip-compressed",
        ));
    }
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&mut *file);
    let mut good = 0u64;
    loop {
        if reader.fill_buf()?.is_empty() {
            break;
        }
        let mut decoder = GzDecoder::new(reader);
        let decoded = io::copy(&mut decoder, &mut io::sink());
        reader = decoder.into_inner();
        if decoded.is_err() {
            break;
        }
        good = reader.stream_position()?;
    }
    drop(reader);
    if good < len {
        file.set_len(good)?;
    }
    Ok(good)
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| if matches!(ch, '\t' | '\n' | '\r') { ' ' } else { ch })
        .collect()
}

fn tabular_fields(row: &ResolvedChainResult) -> [String; 12] {
    let text = |value: &Option<String>| value.as_deref().map(sanitize).unwrap_or_default();
    [
        row.line_number.to_string(),
        sanitize(&row.entry_id),
        row.structure_id.clone(),
        sanitize(&row.chain_id),
        text(&row.protein_name),
        text(&row.organism_scientific_name),
        text(&row.organism_common_name),
        row.taxonomy_id.map(|id| id.to_string()).unwrap_or_default(),
        sanitize(&row.classification),
        row.max_longevity_yrs
            .map(|value| value.to_string())
            .unwrap_or_default(),
        row.in_reference.to_string(),
        row.source.to_string(),
    ]
}

fn tsv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .has_headers(false)
        .from_writer(Vec::new())
}

pub struct TabularSink {
    path: PathBuf,
    file: File,
    committed: u64,
    pending: csv::Writer<Vec<u8>>,
    pending_rows: usize,
    rows_written: u64,
}

impl TabularSink {
    pub fn open(path: &Path, append: bool) -> Result<Self, ResolverError> {
        let mut file = open_for_append(path, append)?;
        let mut committed = truncate_torn_row(&mut file)
            .map_err(|err| ResolverError::output_write(path, err))?;
        if committed == 0 {
            let mut header = tsv_writer();
            header
                .write_record(TABULAR_HEADER)
                .map_err(|err| ResolverError::output_write(path, err))?;
            let bytes = header
                .into_inner()
                .map_err(|err| ResolverError::output_write(path, err.error()))?;
            committed = commit(&mut file, path, 0, &bytes)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            committed,
            pending: tsv_writer(),
            pending_rows: 0,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push_line(&mut self, rows: &[ResolvedChainResult]) -> Result<(), ResolverError> {
        for row in rows {
            self.pending
                .write_record(tabular_fields(row))
                .map_err(|err| ResolverError::output_write(&self.path, err))?;
        }
        self.pending_rows += rows.len();
        Ok(())
    }

    pub fn pending_rows(&self) -> usize {
        self.pending_rows
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn flush(&mut self) -> Result<(), ResolverError> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let pending = std::mem::replace(&mut self.pending, tsv_writer());
        let bytes = pending
            .into_inner()
            .map_err(|err| ResolverError::output_write(&self.path, err.error()))?;
        self.committed = commit(&mut self.file, &self.path, self.committed, &bytes)?;
        debug!(rows = self.pending_rows, path = %self.path.display(), "tabular batch flushed");
        self.rows_written += self.pending_rows as u64;
        self.pending_rows = 0;
        Ok(())
    }
}

pub struct StructuredSink {
    path: PathBuf,
    file: File,
    committed: u64,
    pending: Vec<u8>,
    pending_rows: usize,
}

impl StructuredSink {
    pub fn open(path: &Path, append: bool) -> Result<Self, ResolverError> {
        let mut file = open_for_append(path, append)?;
        let committed = if append {
            truncate_torn_member(&mut file).map_err(|err| ResolverError::output_write(path, err))?
        } else {
            0
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
            committed,
            pending: Vec::new(),
            pending_rows: 0,
        })
    }

    pub fn push_line(&mut self, rows: &[ResolvedChainResult]) -> Result<(), ResolverError> {
        for row in rows {
            serde_json::to_writer(&mut self.pending, row)
                .map_err(|err| ResolverError::output_write(&self.path, err))?;
            self.pending.push(b'\n');
        }
        self.pending_rows += rows.len();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ResolverError> {
        if self.pending_rows == 0 {
            return Ok(());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(&self.pending)
            .map_err(|err| ResolverError::output_write(&self.path, err))?;
        let member = encoder
            .finish()
            .map_err(|err| ResolverError::output_write(&self.path, err))?;
        self.committed = commit(&mut self.file, &self.path, self.committed, &member)?;
        self.pending.clear();
        self.pending_rows = 0;
        Ok(())
    }
}

pub struct SinkSet {
    tabular: TabularSink,
    structured: Option<StructuredSink>,
    batch_size: usize,
}

impl SinkSet {
    pub fn open(
        tabular: &Path,
        structured: Option<&Path>,
        batch_size: usize,
        append: bool,
    ) -> Result<Self, ResolverError> {
        Ok(Self {
            tabular: TabularSink::open(tabular, append)?,
            structured: structured
                .map(|path| StructuredSink::open(path, append))
                .transpose()?,
            batch_size: batch_size.max(1),
        })
    }

    pub fn push_line(&mut self, rows: &[ResolvedChainResult]) -> Result<(), ResolverError> {
        if rows.is_empty() {
            return Ok(());
        }
        if let Some(structured) = self.structured.as_mut() {
            structured.push_line(rows)?;
        }
        self.tabular.push_line(rows)?;
        if self.tabular.pending_rows() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ResolverError> {
        if let Some(structured) = self.structured.as_mut() {
            structured.flush()?;
        }
        self.tabular.flush()
    }

    pub fn rows_written(&self) -> u64 {
        self.tabular.rows_written()
    }

    pub fn finish(mut self) -> Result<u64, ResolverError> {
        self.flush()?;
        Ok(self.tabular.rows_written())
    }
}

pub fn read_checkpoint(path: &Path) -> Result<u64, ResolverError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(ResolverError::data_load(path, err)),
    };
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut checkpoint = 0u64;
    let mut header_seen = false;
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .map_err(|err| ResolverError::data_load(path, err))?;
        // A row without its newline was torn by a crash and does not count.
        if read == 0 || line.last() != Some(&b'\n') {
            break;
        }
        let first = line
            .split(|byte| *byte == b'\t' || *byte == b'\n')
            .next()
            .unwrap_or_default();
        if !header_seen {
            if first != TABULAR_HEADER[0].as_bytes() {
                return Err(ResolverError::data_load(
                    path,
                    "existing output does not start with the tabular header",
                ));
            }
            header_seen = true;
            continue;
        }
        let value = std::str::from_utf8(first)
            .ok()
            .and_then(|value| value.parse::<u64>().ok());
        match value {
            Some(value) => checkpoint = checkpoint.max(value),
            None => warn!(path = %path.display(), "ignoring tabular row without a line number"),
        }
    }
    Ok(checkpoint)
}
