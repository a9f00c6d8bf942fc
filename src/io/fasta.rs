//! Gapped FASTA alignments, read and written with noodles.

use std::io::{BufRead, Write};
use std::path::Path;

use noodles::fasta::{self as fasta, record::{Definition, Sequence}, Record};

use crate::errors::Result;
use crate::io::open_reader;

/// Read every record of a gapped FASTA file as `(name, row)` pairs, in file
/// order. Multi-line sequences are concatenated; rows are not checked for
/// equal length here.
pub fn read_alignment(path: impl AsRef<Path>) -> Result<Vec<(String, String)>> {
    parse_alignment(open_reader(path)?)
}

pub fn parse_alignment(reader: impl BufRead) -> Result<Vec<(String, String)>> {
    let mut reader = fasta::Reader::new(reader);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let name = record.name().to_string();
        let row = String::from_utf8_lossy(record.sequence().as_ref()).into_owned();
        rows.push((name, row));
    }

    Ok(rows)
}

/// Write `(name, row)` pairs as FASTA records.
pub fn write_alignment(rows: &[(String, String)], output: impl Write) -> Result<()> {
    let mut writer = fasta::Writer::new(output);

    for (name, row) in rows {
        let record = Record::new(
            Definition::new(name.as_str(), None),
            Sequence::from_iter(row.bytes()),
        );
        writer.write_record(&record)?;
    }

    Ok(())
}
