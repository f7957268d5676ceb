/*!
Row-oriented storage.

[`TableHandle`] is the surface a table-backed formatter sees: named tables of
ordered rows whose cells are typed, plus a forward-only cursor opened by
[`query`](TableHandle::query). [`MemoryDatabase`] is an in-process
implementation suitable for tests and staging.
*/

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{already_open, not_open, OpenMode, ReadCursor, Storage, StorageHandle};
use crate::{PersistError, Result};

/// A typed table cell
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Ordered `(column, cell)` pairs
pub type Row = Vec<(String, Cell)>;

/// Table operations available to formatters
pub trait TableHandle {
    fn table_exists(&self, table: &str) -> bool;

    /// Create `table` unless it already exists
    fn create_table(&mut self, table: &str) -> Result<()>;

    /// Create `table` empty, dropping any rows it already holds
    fn recreate_table(&mut self, table: &str) -> Result<()>;

    /// Append a row; the table must exist
    fn insert_row(&mut self, table: &str, row: Row) -> Result<()>;

    /// Replace rows in place
    ///
    /// With a key, only rows whose `column` equals the cell are replaced;
    /// without one, the table's contents become the single new row.
    /// Returns the number of rows replaced.
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If the table is missing or nothing matched
    fn replace_rows(&mut self, table: &str, key: Option<(&str, &Cell)>, row: Row) -> Result<usize>;

    /// Open a cursor over all rows of `table`
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If the table does not exist
    fn query(&mut self, table: &str) -> Result<()>;

    /// Next row of the open cursor, `None` once it is drained
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Whether the open cursor has rows left
    fn has_next(&self) -> bool;
}

/// In-process database of named tables, shareable across storages
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<HashMap<String, Vec<Row>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of every row currently in `table`
    pub fn rows(&self, table: &str) -> Option<Vec<Row>> {
        self.tables().get(table).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables().get(table).map_or(0, Vec::len)
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.tables().is_empty()
    }

    /// Open a storage over this database
    pub fn storage<N: Into<String>>(&self, name: N) -> TableStorage {
        TableStorage::new(self.clone(), name)
    }
}

/// Table access for one open sequence
///
/// Changes are staged per table and only reach the database on `commit`.
#[derive(Debug)]
struct TableSession {
    db: MemoryDatabase,
    staged: HashMap<String, Vec<Row>>,
    pending: VecDeque<Row>,
}

impl TableSession {
    /// Staged copy of `table`, taken from the database on first touch
    fn staged_rows(&mut self, table: &str) -> Result<&mut Vec<Row>> {
        match self.staged.entry(table.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let rows = self
                    .db
                    .rows(table)
                    .ok_or_else(|| PersistError::not_found(format!("No table named '{table}'")))?;
                Ok(entry.insert(rows))
            }
        }
    }

    fn commit(&mut self) {
        if self.staged.is_empty() {
            return;
        }
        let mut tables = self.db.tables();
        for (name, rows) in self.staged.drain() {
            tables.insert(name, rows);
        }
    }

    fn reset(&mut self) {
        self.staged.clear();
        self.pending.clear();
    }
}

impl TableHandle for TableSession {
    fn table_exists(&self, table: &str) -> bool {
        self.staged.contains_key(table) || self.db.tables().contains_key(table)
    }

    fn create_table(&mut self, table: &str) -> Result<()> {
        if !self.table_exists(table) {
            self.staged.insert(table.to_string(), Vec::new());
        }
        Ok(())
    }

    fn recreate_table(&mut self, table: &str) -> Result<()> {
        self.staged.insert(table.to_string(), Vec::new());
        Ok(())
    }

    fn insert_row(&mut self, table: &str, row: Row) -> Result<()> {
        self.staged_rows(table)?.push(row);
        Ok(())
    }

    fn replace_rows(&mut self, table: &str, key: Option<(&str, &Cell)>, row: Row) -> Result<usize> {
        let rows = self.staged_rows(table)?;

        let replaced = match key {
            Some((column, wanted)) => {
                let mut count = 0;
                for existing in rows.iter_mut() {
                    let matches = existing
                        .iter()
                        .any(|(name, cell)| name == column && cell == wanted);
                    if matches {
                        *existing = row.clone();
                        count += 1;
                    }
                }
                count
            }
            None if rows.is_empty() => 0,
            None => {
                let count = rows.len();
                *rows = vec![row];
                count
            }
        };

        if replaced == 0 {
            return Err(PersistError::not_found(format!(
                "No previously written row to update in table '{table}'"
            )));
        }
        Ok(replaced)
    }

    fn query(&mut self, table: &str) -> Result<()> {
        let rows = match self.staged.get(table) {
            Some(rows) => rows.clone(),
            None => self
                .db
                .rows(table)
                .ok_or_else(|| PersistError::not_found(format!("No table named '{table}'")))?,
        };
        self.pending = rows.into();
        Ok(())
    }

    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.pending.pop_front())
    }

    fn has_next(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Storage over a [`MemoryDatabase`]
///
/// A table storage addresses the whole database; the formatter decides which
/// table it works on. Row changes are staged for the open sequence, applied
/// on `close` and dropped on `abort`.
#[derive(Debug)]
pub struct TableStorage {
    location: String,
    mode: Option<OpenMode>,
    session: TableSession,
    cursor: ReadCursor,
}

impl TableStorage {
    pub fn new<N: Into<String>>(db: MemoryDatabase, name: N) -> Self {
        Self {
            location: format!("table://{}", name.into()),
            mode: None,
            session: TableSession {
                db,
                staged: HashMap::new(),
                pending: VecDeque::new(),
            },
            cursor: ReadCursor::default(),
        }
    }
}

impl Storage for TableStorage {
    fn location(&self) -> &str {
        &self.location
    }

    /// Whether the database holds any table
    ///
    /// Existence is per database, not per table: a missing table is reported
    /// by the formatter that looks it up.
    fn exists(&self) -> bool {
        !self.session.db.is_empty()
    }

    fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(current) = self.mode {
            return Err(already_open(&self.location, current));
        }
        self.mode = Some(mode);
        self.session.reset();
        self.cursor = ReadCursor::default();
        Ok(())
    }

    fn mode(&self) -> Option<OpenMode> {
        self.mode
    }

    fn handle(&mut self) -> Result<StorageHandle<'_>> {
        match self.mode {
            Some(_) => Ok(StorageHandle::Table(&mut self.session)),
            None => Err(not_open(&self.location)),
        }
    }

    fn cursor(&mut self) -> &mut ReadCursor {
        &mut self.cursor
    }

    fn close(&mut self) -> Result<()> {
        if self.mode.take().is_some() {
            self.session.commit();
        }
        self.session.reset();
        Ok(())
    }

    fn abort(&mut self) {
        self.mode = None;
        self.session.reset();
    }
}
