use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use tracing::error;

use crate::db::SqliteSink;
use crate::error::SinkError;
use crate::record::AssembledRecord;
use crate::schema::FieldSchema;
use crate::settings::SinkKind;

/// Append-only record store. Owned by a single writer.
pub trait Sink: Send {
    fn append(&mut self, record: &AssembledRecord, schema: &FieldSchema) -> Result<(), SinkError>;
}

pub fn open(kind: SinkKind, path: &Path, schema: &FieldSchema) -> Result<Box<dyn Sink>, SinkError> {
    Ok(match kind {
        SinkKind::Sqlite => Box::new(SqliteSink::open(path, schema)?),
        SinkKind::Jsonl => Box::new(JsonLinesSink::open(path)?),
    })
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), SinkError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Append-only byte store that can be cut back to an earlier length.
pub trait LineStore: Write + Send {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LineStore for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// One JSON object per line, keys in schema order, absent fields as null.
pub struct JsonLinesSink<S = File> {
    store: S,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        ensure_parent(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonLinesSink { store: file })
    }
}

impl<S: LineStore> JsonLinesSink<S> {
    /// Write one full line and fsync it. On failure the store is cut back to
    /// its previous length so no torn line is left behind.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let start = self.store.size()?;
        let written = self.store.write_all(line).and_then(|_| self.store.sync());
        if let Err(e) = written {
            if let Err(t) = self.store.truncate(start).and_then(|_| self.store.sync()) {
                error!("Could not roll back partial line at byte {}: {}", start, t);
            }
            return Err(e);
        }
        Ok(())
    }
}

impl<S: LineStore> Sink for JsonLinesSink<S> {
    fn append(&mut self, record: &AssembledRecord, schema: &FieldSchema) -> Result<(), SinkError> {
        debug_assert!(record.matches(schema));
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        self.write_line(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{assemble, PartialRecord};

    #[test]
    fn appends_lines_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/cars.jsonl");
        let schema = FieldSchema::new(["Title", "Price"]);
        let part: PartialRecord = [("Title", "Kia Rio")].into_iter().collect();
        let rec = assemble(&schema, &[part]);

        JsonLinesSink::open(&path).unwrap().append(&rec, &schema).unwrap();
        JsonLinesSink::open(&path).unwrap().append(&rec, &schema).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"Title":"Kia Rio","Price":null}"#);
    }

    /// In-memory store that accepts `room` more bytes, then fails like a full disk.
    struct FullDisk {
        bytes: Vec<u8>,
        room: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let n = buf.len().min(self.room);
            self.bytes.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LineStore for FullDisk {
        fn size(&self) -> io::Result<u64> {
            Ok(self.bytes.len() as u64)
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.bytes.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_leaves_no_torn_line() {
        let schema = FieldSchema::new(["Title", "Price"]);
        let first = assemble(&schema, &[[("Title", "Kia Rio")].into_iter().collect()]);
        let second = assemble(&schema, &[[("Title", "Lada Granta")].into_iter().collect()]);
        let mut sink = JsonLinesSink {
            store: FullDisk { bytes: Vec::new(), room: 50 },
        };

        sink.append(&first, &schema).unwrap();
        let intact = sink.store.bytes.clone();
        let err = sink.append(&second, &schema).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert_eq!(sink.store.bytes, intact);

        sink.store.room = 1024;
        sink.append(&second, &schema).unwrap();
        let text = String::from_utf8(sink.store.bytes.clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], r#"{"Title":"Lada Granta","Price":null}"#);
    }
}
