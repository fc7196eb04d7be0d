use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::error::SinkError;
use crate::record::AssembledRecord;
use crate::schema::{field, FieldSchema};
use crate::sink::{ensure_parent, Sink};

const TABLE: &str = "listings";

pub fn connect(path: &Path) -> Result<Connection, SinkError> {
    ensure_parent(path)?;
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Create the listings table, adding any schema columns an older file lacks.
pub fn init_schema(conn: &Connection, schema: &FieldSchema) -> Result<(), SinkError> {
    let columns: Vec<String> = schema.iter().map(|f| format!("{} TEXT", quote(f))).collect();
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id         INTEGER PRIMARY KEY,
            scraped_at TEXT NOT NULL,
            {columns}
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_link ON {table}({link});",
        table = TABLE,
        columns = columns.join(",\n            "),
        link = quote(field::LINK),
    ))?;

    let existing: HashSet<String> = {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", TABLE))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        names
    };
    for f in schema.iter().filter(|f| !existing.contains(*f)) {
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} TEXT", TABLE, quote(f)))?;
    }
    Ok(())
}

pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    pub fn open(path: &Path, schema: &FieldSchema) -> Result<Self, SinkError> {
        let conn = connect(path)?;
        init_schema(&conn, schema)?;
        Ok(SqliteSink { conn })
    }

    #[cfg(test)]
    fn in_memory(schema: &FieldSchema) -> Self {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, schema).unwrap();
        SqliteSink { conn }
    }
}

impl Sink for SqliteSink {
    fn append(&mut self, record: &AssembledRecord, schema: &FieldSchema) -> Result<(), SinkError> {
        let names: Vec<String> = schema.iter().map(quote).collect();
        let placeholders: Vec<String> = (2..=names.len() + 1).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} (scraped_at, {}) VALUES (?1, {})",
            TABLE,
            names.join(", "),
            placeholders.join(", ")
        );

        let scraped_at = chrono::Utc::now().to_rfc3339();
        let values: Vec<Option<&str>> = std::iter::once(Some(scraped_at.as_str()))
            .chain(schema.iter().map(|f| record.value(f)))
            .collect();

        let tx = self.conn.transaction()?;
        tx.execute(&sql, rusqlite::params_from_iter(values))?;
        tx.commit()?;
        Ok(())
    }
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub with_specs: usize,
    pub brands: usize,
    pub first_scraped: Option<String>,
    pub last_scraped: Option<String>,
    pub top_brands: Vec<(String, usize)>,
}

pub fn get_stats(conn: &Connection, top: usize) -> Result<Stats> {
    let brand = quote(field::BRAND);
    let total: usize = conn.query_row(&format!("SELECT COUNT(*) FROM {}", TABLE), [], |r| r.get(0))?;
    let with_specs: usize = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} IS NOT NULL",
            TABLE,
            quote(field::FUEL_CONSUMPTION)
        ),
        [],
        |r| r.get(0),
    )?;
    let brands: usize = conn.query_row(
        &format!("SELECT COUNT(DISTINCT {}) FROM {}", brand, TABLE),
        [],
        |r| r.get(0),
    )?;
    let (first_scraped, last_scraped): (Option<String>, Option<String>) = conn.query_row(
        &format!("SELECT MIN(scraped_at), MAX(scraped_at) FROM {}", TABLE),
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {b}, COUNT(*) AS n FROM {t} WHERE {b} IS NOT NULL
         GROUP BY {b} ORDER BY n DESC, {b} LIMIT {top}",
        b = brand,
        t = TABLE,
        top = top
    ))?;
    let top_brands = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Stats {
        total,
        with_specs,
        brands,
        first_scraped,
        last_scraped,
        top_brands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{assemble, PartialRecord};

    fn car(brand: &str, fuel: Option<&str>) -> PartialRecord {
        let mut p: PartialRecord = [(field::TITLE, format!("{} X", brand)), (field::BRAND, brand.to_string())]
            .into_iter()
            .collect();
        if let Some(f) = fuel {
            p.insert(field::FUEL_CONSUMPTION, f);
        }
        p
    }

    #[test]
    fn appends_rows_with_nulls_for_absent() {
        let schema = FieldSchema::cars();
        let mut sink = SqliteSink::in_memory(&schema);
        for (b, f) in [("Kia", Some("6.5 л")), ("Kia", None), ("Lada", None)] {
            sink.append(&assemble(&schema, &[car(b, f)]), &schema).unwrap();
        }

        let vin: Option<String> = sink
            .conn
            .query_row("SELECT \"VIN\" FROM listings LIMIT 1", [], |r| r.get(0))
            .unwrap();
        assert!(vin.is_none());

        let stats = get_stats(&sink.conn, 5).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.with_specs, 1);
        assert_eq!(stats.brands, 2);
        assert_eq!(stats.top_brands[0], ("Kia".to_string(), 2));
        assert!(stats.first_scraped.is_some());
    }

    #[test]
    fn grows_older_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cars.sqlite");
        let old = FieldSchema::new(["Title", "Link"]);
        let new = FieldSchema::new(["Title", "Link", "VIN"]);

        let mut sink = SqliteSink::open(&path, &old).unwrap();
        sink.append(&assemble(&old, &[car("Kia", None)]), &old).unwrap();
        drop(sink);

        let mut sink = SqliteSink::open(&path, &new).unwrap();
        let part: PartialRecord = [("Title", "Kia Rio"), ("VIN", "XWE123")].into_iter().collect();
        sink.append(&assemble(&new, &[part]), &new).unwrap();

        let vins: Vec<Option<String>> = {
            let mut stmt = sink.conn.prepare("SELECT \"VIN\" FROM listings ORDER BY id").unwrap();
            let rows = stmt.query_map([], |r| r.get(0)).unwrap();
            rows.collect::<Result<_, _>>().unwrap()
        };
        assert_eq!(vins, vec![None, Some("XWE123".to_string())]);
    }
}
