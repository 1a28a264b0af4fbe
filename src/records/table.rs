//! In-memory call table and its CSV form

use super::record::{CallRecord, HEADERS};
use crate::error::Result;
use std::io::{Read, Write};
use std::path::Path;

/// All records from one run, in batch order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallTable {
    records: Vec<CallRecord>,
}

impl CallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<CallRecord>) -> Self {
        Self { records }
    }

    /// Append another file's records after the existing ones (no dedup)
    pub fn extend(&mut self, records: impl IntoIterator<Item = CallRecord>) {
        self.records.extend(records);
    }

    /// Append another table, keeping both orders
    pub fn append(&mut self, other: CallTable) {
        self.records.extend(other.records);
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CallRecord> {
        self.records.iter()
    }

    /// Write the table as UTF-8 CSV with a header row.
    /// An empty table still writes the header.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);

        csv_writer.write_record(HEADERS)?;
        for record in &self.records {
            csv_writer.serialize(record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Render the table as a CSV string
    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read a table previously written by [`CallTable::write_csv`]
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let records = csv_reader
            .deserialize::<CallRecord>()
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self { records })
    }

    /// Save as CSV, creating parent directories as needed
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))?;
        tracing::info!(path = %path.display(), rows = self.len(), "exported call table");
        Ok(())
    }

    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::read_csv(std::io::BufReader::new(file))
    }
}

impl FromIterator<CallRecord> for CallTable {
    fn from_iter<I: IntoIterator<Item = CallRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CallTable {
    type Item = &'a CallRecord;
    type IntoIter = std::slice::Iter<'a, CallRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
