pub mod fasta;
pub mod history;
pub mod model;
pub mod newick;

pub use history::{load_history, save_history};
pub use model::read_model;
pub use newick::{parse_newick, write_newick};

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::errors::{CanopyError, Result};

/// Open a file as a buffered reader, transparently decompressing when the
/// file name ends in `.gz`.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>> {
    let p = path.as_ref();
    let is_gzipped = p
        .file_name()
        .map(|v| v.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gzipped {
        Box::new(
            File::open(p)
                .map(MultiGzDecoder::new)
                .map(BufReader::new)
                .map_err(|source| CanopyError::FileRead { source })?,
        )
    } else {
        Box::new(
            File::open(p)
                .map(BufReader::new)
                .map_err(|source| CanopyError::FileRead { source })?,
        )
    };
    Ok(reader)
}
