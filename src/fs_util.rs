use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::ResolverError;

pub(crate) const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>, ResolverError> {
    let file = File::open(path).map_err(|err| ResolverError::data_load(path, err))?;
    let mut reader = BufReader::new(file);
    let gzip = reader
        .fill_buf()
        .map_err(|err| ResolverError::data_load(path, err))?
        .starts_with(&GZIP_MAGIC);
    if gzip {
        // Multi-member so appended gzip batches read back as one stream.
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}
