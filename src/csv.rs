use std::borrow::Cow;
use std::io::{self, Write};

use crate::export::{RowSink, Table};

/// Writes a table as comma-separated text with a header line.
pub struct CsvWriter<W: Write> {
    out: W,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record<S: AsRef<str>>(&mut self, fields: &[S]) -> io::Result<()> {
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                self.out.write_all(b",")?;
            }
            self.out.write_all(escape_csv(field.as_ref()).as_bytes())?;
        }
        self.out.write_all(b"\n")
    }
}

impl<W: Write> RowSink for CsvWriter<W> {
    type Error = io::Error;

    fn accept(&mut self, table: &Table) -> io::Result<()> {
        self.write_record(&table.header)?;
        for row in &table.rows {
            self.write_record(row)?;
        }
        self.out.flush()
    }
}

/// Quote a field if it contains a separator, quote or line break.
pub fn escape_csv(value: &str) -> Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Render a table into an in-memory CSV string.
pub fn to_csv_string(table: &Table) -> io::Result<String> {
    let mut writer = CsvWriter::new(Vec::new());
    writer.accept(table)?;
    String::from_utf8(writer.into_inner()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
