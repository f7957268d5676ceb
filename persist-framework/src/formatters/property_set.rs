/*!
Formatter for [`PropertySet`] objects.

One formatter instance writes exactly one of the sub-formats selected by its
policy (see [`SubFormat`]). Stream sub-formats go through the archive entry
of `PropertySet`; the table sub-format maps each property to a typed column.
*/

use chrono::DateTime;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::stream;
use super::{SubFormat, TableLayout};
use crate::archive::{
    Archivable, ArchiveEntry, BinaryLoadArchive, BinarySaveArchive, LoadArchive, SaveArchive,
    TextLoadArchive, TextSaveArchive,
};
use crate::compression::FrameCodec;
use crate::formatter::{
    begin_read, check_batch_position, require_mode, Formatter, FormatterPtr, ReadOutcome,
};
use crate::persistable::{expect_type, Persistable, TypeTagged};
use crate::policy::PolicyPtr;
use crate::property_set::{PropertySet, PropertyValue};
use crate::registry::FormatterRegistration;
use crate::storage::{Cell, OpenMode, Row, Storage, StorageHandle, TableHandle};
use crate::{PersistError, Result};

/// Additional-data key overriding the policy's table name for one call
pub const TABLE_NAME_KEY: &str = "tableName";

const CODE_BOOL: u64 = 0;
const CODE_INT: u64 = 1;
const CODE_FLOAT: u64 = 2;
const CODE_STRING: u64 = 3;
const CODE_DATETIME: u64 = 4;

impl Archivable for PropertySet {
    const VERSION: u32 = 1;

    fn save(&self, archive: &mut dyn SaveArchive) -> Result<()> {
        archive.save_u64(self.len() as u64)?;
        for (name, value) in self.iter() {
            archive.save_str(name)?;
            match value {
                PropertyValue::Bool(v) => {
                    archive.save_u64(CODE_BOOL)?;
                    archive.save_bool(*v)?;
                }
                PropertyValue::Int(v) => {
                    archive.save_u64(CODE_INT)?;
                    archive.save_i64(*v)?;
                }
                PropertyValue::Float(v) => {
                    archive.save_u64(CODE_FLOAT)?;
                    archive.save_f64(*v)?;
                }
                PropertyValue::String(v) => {
                    archive.save_u64(CODE_STRING)?;
                    archive.save_str(v)?;
                }
                PropertyValue::DateTime(v) => {
                    archive.save_u64(CODE_DATETIME)?;
                    archive.save_i64(v.timestamp())?;
                    archive.save_u64(u64::from(v.timestamp_subsec_nanos()))?;
                }
            }
        }
        Ok(())
    }

    fn load(archive: &mut dyn LoadArchive, _version: u32) -> Result<Self> {
        let count = archive.load_u64()?;
        let mut set = PropertySet::new();
        let mut seen = HashSet::new();
        for _ in 0..count {
            let name = archive.load_string()?;
            if !seen.insert(name.clone()) {
                return Err(PersistError::format(format!(
                    "Property '{name}' appears twice in archive"
                )));
            }
            let value = match archive.load_u64()? {
                CODE_BOOL => PropertyValue::Bool(archive.load_bool()?),
                CODE_INT => PropertyValue::Int(archive.load_i64()?),
                CODE_FLOAT => PropertyValue::Float(archive.load_f64()?),
                CODE_STRING => PropertyValue::String(archive.load_string()?),
                CODE_DATETIME => {
                    let secs = archive.load_i64()?;
                    let nanos = archive.load_u64()?;
                    let timestamp = u32::try_from(nanos)
                        .ok()
                        .and_then(|nanos| DateTime::from_timestamp(secs, nanos))
                        .ok_or_else(|| {
                            PersistError::format(format!(
                                "Property '{name}' holds an out-of-range timestamp"
                            ))
                        })?;
                    PropertyValue::DateTime(timestamp)
                }
                code => {
                    return Err(PersistError::format(format!(
                        "Property '{name}' has unknown type code {code}"
                    )))
                }
            };
            set.set(name, value);
        }
        Ok(set)
    }
}

fn to_cell(value: &PropertyValue) -> Cell {
    match value {
        PropertyValue::Bool(v) => Cell::Bool(*v),
        PropertyValue::Int(v) => Cell::Int(*v),
        PropertyValue::Float(v) => Cell::Float(*v),
        PropertyValue::String(v) => Cell::Text(v.clone()),
        PropertyValue::DateTime(v) => Cell::Timestamp(*v),
    }
}

fn to_row(set: &PropertySet) -> Row {
    set.iter()
        .map(|(name, value)| (name.to_string(), to_cell(value)))
        .collect()
}

fn from_row(row: Row) -> PropertySet {
    let mut set = PropertySet::new();
    for (column, cell) in row {
        match cell {
            Cell::Null => {}
            Cell::Bool(v) => set.set(column, v),
            Cell::Int(v) => set.set(column, v),
            Cell::Float(v) => set.set(column, v),
            Cell::Text(v) => set.set(column, v),
            Cell::Timestamp(v) => set.set(column, v),
        }
    }
    set
}

fn writer_handle<'s>(storage: &'s mut dyn Storage) -> Result<&'s mut dyn std::io::Write> {
    let location = storage.location().to_string();
    match storage.handle()? {
        StorageHandle::Writer(writer) => Ok(writer),
        other => Err(PersistError::logic(format!(
            "Storage {location} provides a {} handle where a byte stream was expected",
            other.kind()
        ))),
    }
}

fn reader_handle<'s>(storage: &'s mut dyn Storage) -> Result<&'s mut dyn std::io::BufRead> {
    let location = storage.location().to_string();
    match storage.handle()? {
        StorageHandle::Reader(reader) => Ok(reader),
        other => Err(PersistError::logic(format!(
            "Storage {location} provides a {} handle where a byte stream was expected",
            other.kind()
        ))),
    }
}

fn table_handle<'s>(storage: &'s mut dyn Storage) -> Result<&'s mut dyn TableHandle> {
    let location = storage.location().to_string();
    match storage.handle()? {
        StorageHandle::Table(table) => Ok(table),
        other => Err(PersistError::logic(format!(
            "Storage {location} provides a {} handle where a table was expected",
            other.kind()
        ))),
    }
}

/// Reads, writes and updates [`PropertySet`] objects
///
/// # Example
/// ```rust
/// use persist_framework::{Formatter, MemoryStore, OpenMode, Policy, PropertySet, Storage};
/// use persist_framework::formatters::PropertySetFormatter;
///
/// let policy = Policy::builder().set("format", "text").build();
/// let formatter = PropertySetFormatter::new(policy.into())?;
///
/// let store = MemoryStore::new();
/// let mut storage = store.storage("visit");
/// let visit = PropertySet::new().with("visitId", 903334);
///
/// storage.open(OpenMode::Write)?;
/// formatter.write(&visit, &mut storage, &PropertySet::new(), 0, 1)?;
/// storage.close()?;
///
/// storage.open(OpenMode::Read)?;
/// let outcome = formatter.read(&mut storage, &PropertySet::new(), true)?;
/// storage.close()?;
/// assert!(outcome.done);
/// assert_eq!(outcome.object.downcast_ref::<PropertySet>(), Some(&visit));
/// # Ok::<(), persist_framework::PersistError>(())
/// ```
#[derive(Debug)]
pub struct PropertySetFormatter {
    policy: PolicyPtr,
    sub_format: SubFormat,
    archive: ArchiveEntry,
}

impl PropertySetFormatter {
    /// Build a formatter, reading every policy key it needs up front
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the policy does not select a valid sub-format
    pub fn new(policy: PolicyPtr) -> Result<Self> {
        let sub_format = SubFormat::from_policy(&policy)?;
        debug!(
            type_tag = PropertySet::TYPE_TAG,
            sub_format = %sub_format,
            "Constructed formatter"
        );
        Ok(Self {
            policy,
            sub_format,
            archive: ArchiveEntry::of::<PropertySet>(),
        })
    }

    /// Factory stored in the registry
    pub fn create(policy: PolicyPtr) -> Result<FormatterPtr> {
        Ok(Arc::new(Self::new(policy)?))
    }

    pub fn registration() -> FormatterRegistration {
        FormatterRegistration::new::<PropertySet>(Self::create)
    }

    pub fn sub_format(&self) -> &SubFormat {
        &self.sub_format
    }

    pub fn policy(&self) -> &PolicyPtr {
        &self.policy
    }

    /// Codec applied to binary frames, `None` for other sub-formats
    pub fn frame_codec(&self) -> Option<FrameCodec> {
        match self.sub_format {
            SubFormat::Binary { codec } => Some(codec),
            _ => None,
        }
    }

    fn write_stream_record(&self, writer: &mut dyn std::io::Write, set: &PropertySet) -> Result<()> {
        match &self.sub_format {
            SubFormat::Text => {
                let mut archive = TextSaveArchive::new();
                self.archive.save(set, &mut archive)?;
                stream::write_text_record(writer, &archive.to_json_line()?)
            }
            SubFormat::Binary { codec } => {
                let mut archive = BinarySaveArchive::new();
                self.archive.save(set, &mut archive)?;
                stream::write_frame(writer, *codec, &archive.into_bytes())
            }
            SubFormat::Table(_) => Err(PersistError::logic(
                "table sub-format has no byte-stream record",
            )),
        }
    }

    fn write_stream_header(&self, writer: &mut dyn std::io::Write) -> Result<()> {
        match self.sub_format {
            SubFormat::Text => stream::write_text_header(writer),
            _ => stream::write_binary_header(writer),
        }
    }

    fn read_stream_record(&self, reader: &mut dyn std::io::BufRead) -> Result<Box<dyn Persistable>> {
        match self.sub_format {
            SubFormat::Text => {
                let line = stream::read_text_line(reader)?.ok_or_else(|| {
                    PersistError::format("Text sequence ended before the next object")
                })?;
                let mut archive = TextLoadArchive::from_json_line(&line)?;
                let object = self.archive.load(&mut archive)?;
                ensure_consumed(&archive)?;
                Ok(object)
            }
            _ => {
                let payload = stream::read_frame(reader)?;
                let mut archive = BinaryLoadArchive::new(payload);
                let object = self.archive.load(&mut archive)?;
                ensure_consumed(&archive)?;
                Ok(object)
            }
        }
    }

    fn read_stream(&self, storage: &mut dyn Storage, first: bool) -> Result<ReadOutcome> {
        let location = storage.location().to_string();
        let reader = reader_handle(storage)?;
        if first {
            if stream::at_end(reader)? {
                return Err(PersistError::not_found(format!(
                    "Nothing persisted at {location}"
                )));
            }
            match self.sub_format {
                SubFormat::Text => stream::read_text_header(reader)?,
                _ => stream::read_binary_header(reader)?,
            }
            if stream::at_end(reader)? {
                return Err(PersistError::format(format!(
                    "Sequence at {location} holds a header but no objects"
                )));
            }
        }
        let object = self.read_stream_record(reader)?;
        let done = stream::at_end(reader)?;
        Ok(ReadOutcome { object, done })
    }

    fn read_table(
        &self,
        storage: &mut dyn Storage,
        layout: &TableLayout,
        additional: &PropertySet,
        first: bool,
    ) -> Result<ReadOutcome> {
        let table_name = resolve_table_name(layout, additional);
        let table = table_handle(storage)?;
        if first {
            table.query(table_name)?;
            if !table.has_next() {
                return Err(PersistError::not_found(format!(
                    "Table '{table_name}' holds no rows"
                )));
            }
        }
        let row = table.next_row()?.ok_or_else(|| {
            PersistError::logic(format!("Cursor over table '{table_name}' is already drained"))
        })?;
        Ok(ReadOutcome {
            object: Box::new(from_row(row)),
            done: !table.has_next(),
        })
    }
}

fn ensure_consumed(archive: &dyn LoadArchive) -> Result<()> {
    if archive.is_exhausted() {
        Ok(())
    } else {
        Err(PersistError::format(
            "Archive holds trailing data after the object",
        ))
    }
}

fn resolve_table_name<'a>(layout: &'a TableLayout, additional: &'a PropertySet) -> &'a str {
    additional
        .get_str(TABLE_NAME_KEY)
        .unwrap_or(layout.name.as_str())
}

impl Formatter for PropertySetFormatter {
    fn type_tag(&self) -> &'static str {
        PropertySet::TYPE_TAG
    }

    fn write(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
        iter: usize,
        len: usize,
    ) -> Result<()> {
        let set = expect_type::<PropertySet>(persistable)?;
        check_batch_position(iter, len)?;
        require_mode(storage, OpenMode::Write, "write")?;

        debug!(
            location = storage.location(),
            sub_format = %self.sub_format,
            iter,
            len,
            properties = set.len(),
            "Writing PropertySet"
        );

        match &self.sub_format {
            SubFormat::Table(layout) => {
                let table_name = resolve_table_name(layout, additional);
                let table = table_handle(storage)?;
                if iter == 0 {
                    table.recreate_table(table_name)?;
                }
                table.insert_row(table_name, to_row(set))
            }
            _ => {
                let writer = writer_handle(storage)?;
                if iter == 0 {
                    self.write_stream_header(writer)?;
                }
                self.write_stream_record(writer, set)
            }
        }
    }

    fn read(
        &self,
        storage: &mut dyn Storage,
        additional: &PropertySet,
        first: bool,
    ) -> Result<ReadOutcome> {
        begin_read(storage, first)?;

        let outcome = match &self.sub_format {
            SubFormat::Table(layout) => self.read_table(storage, layout, additional, first)?,
            _ => self.read_stream(storage, first)?,
        };
        storage.cursor().advance(outcome.done);

        debug!(
            location = storage.location(),
            sub_format = %self.sub_format,
            first,
            done = outcome.done,
            "Read PropertySet"
        );
        Ok(outcome)
    }

    fn update(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<()> {
        let set = expect_type::<PropertySet>(persistable)?;
        require_mode(storage, OpenMode::Update, "update")?;

        debug!(
            location = storage.location(),
            sub_format = %self.sub_format,
            "Updating PropertySet"
        );

        match &self.sub_format {
            SubFormat::Table(layout) => {
                let table_name = resolve_table_name(layout, additional);
                let key = match &layout.key {
                    Some(column) => {
                        let value = set.get(column).ok_or_else(|| {
                            PersistError::configuration(format!(
                                "Update key column '{column}' is not a property of the object"
                            ))
                        })?;
                        Some((column.as_str(), to_cell(value)))
                    }
                    None => None,
                };
                let table = table_handle(storage)?;
                if !table.table_exists(table_name) {
                    return Err(PersistError::not_found(format!(
                        "Cannot update table '{table_name}': nothing was written there"
                    )));
                }
                let key_ref = key.as_ref().map(|(column, cell)| (*column, cell));
                table.replace_rows(table_name, key_ref, to_row(set))?;
                Ok(())
            }
            _ => {
                let writer = writer_handle(storage)?;
                self.write_stream_header(writer)?;
                self.write_stream_record(writer, set)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use crate::storage::{MemoryDatabase, MemoryStore};
    use chrono::{TimeZone, Utc};

    fn formatter(policy: Policy) -> PropertySetFormatter {
        PropertySetFormatter::new(Arc::new(policy)).unwrap()
    }

    fn text() -> PropertySetFormatter {
        formatter(Policy::builder().set("format", "text").build())
    }

    fn binary(compressed: bool) -> PropertySetFormatter {
        formatter(
            Policy::builder()
                .set("format", "binary")
                .set("compression.enabled", compressed)
                .build(),
        )
    }

    fn table(key: Option<&str>) -> PropertySetFormatter {
        let mut builder = Policy::builder()
            .set("format", "table")
            .set("table.name", "Visit");
        if let Some(key) = key {
            builder = builder.set("table.key", key);
        }
        formatter(builder.build())
    }

    fn visit(id: i64) -> PropertySet {
        PropertySet::new()
            .with("visitId", id)
            .with("filter", "r")
            .with("exposureTime", 30.5)
            .with("calibrated", id % 2 == 0)
            .with(
                "taiObs",
                Utc.with_ymd_and_hms(2024, 3, 14, 1, 59, 26).unwrap()
                    + chrono::Duration::nanoseconds(535_897_932),
            )
    }

    fn write_all(f: &PropertySetFormatter, storage: &mut dyn Storage, objects: &[PropertySet]) {
        let none = PropertySet::new();
        storage.open(OpenMode::Write).unwrap();
        for (i, obj) in objects.iter().enumerate() {
            f.write(obj, storage, &none, i, objects.len()).unwrap();
        }
        storage.close().unwrap();
    }

    fn read_all(f: &PropertySetFormatter, storage: &mut dyn Storage) -> Vec<(PropertySet, bool)> {
        let none = PropertySet::new();
        storage.open(OpenMode::Read).unwrap();
        let mut out = Vec::new();
        let mut first = true;
        loop {
            let outcome = f.read(storage, &none, first).unwrap();
            first = false;
            let done = outcome.done;
            let set = *outcome.object.downcast::<PropertySet>().unwrap();
            out.push((set, done));
            if done {
                break;
            }
        }
        storage.close().unwrap();
        out
    }

    fn all_formatters() -> Vec<(PropertySetFormatter, Box<dyn Storage>)> {
        let store = MemoryStore::new();
        let db = MemoryDatabase::new();
        let text_storage: Box<dyn Storage> = Box::new(store.storage("text"));
        let binary_storage: Box<dyn Storage> = Box::new(store.storage("binary"));
        let gzip_storage: Box<dyn Storage> = Box::new(store.storage("gzip"));
        let table_storage: Box<dyn Storage> = Box::new(db.storage("visits"));
        vec![
            (text(), text_storage),
            (binary(false), binary_storage),
            (binary(true), gzip_storage),
            (table(None), table_storage),
        ]
    }

    #[test]
    fn test_single_object_roundtrip_in_every_sub_format() {
        for (f, mut storage) in all_formatters() {
            write_all(&f, storage.as_mut(), &[visit(903334)]);
            let read = read_all(&f, storage.as_mut());
            assert_eq!(read, vec![(visit(903334), true)], "{}", f.sub_format());
        }
    }

    #[test]
    fn test_batch_of_three_in_order() {
        let batch = [visit(1), visit(2), visit(3)];
        for (f, mut storage) in all_formatters() {
            write_all(&f, storage.as_mut(), &batch);
            let read = read_all(&f, storage.as_mut());
            let dones: Vec<bool> = read.iter().map(|(_, done)| *done).collect();
            assert_eq!(dones, vec![false, false, true], "{}", f.sub_format());
            let sets: Vec<PropertySet> = read.into_iter().map(|(set, _)| set).collect();
            assert_eq!(sets, batch.to_vec());
        }
    }

    #[test]
    fn test_second_write_replaces_first_in_every_sub_format() {
        for (f, mut storage) in all_formatters() {
            write_all(&f, storage.as_mut(), &[visit(1), visit(2)]);
            write_all(&f, storage.as_mut(), &[visit(3)]);
            let read = read_all(&f, storage.as_mut());
            assert_eq!(read, vec![(visit(3), true)], "{}", f.sub_format());
        }
    }

    #[test]
    fn test_read_after_done_is_logic_error() {
        for (f, mut storage) in all_formatters() {
            write_all(&f, storage.as_mut(), &[visit(7)]);

            let none = PropertySet::new();
            storage.open(OpenMode::Read).unwrap();
            assert!(f.read(storage.as_mut(), &none, true).unwrap().done);
            assert!(matches!(
                f.read(storage.as_mut(), &none, false),
                Err(PersistError::Logic(_))
            ));
            assert!(matches!(
                f.read(storage.as_mut(), &none, true),
                Err(PersistError::Logic(_))
            ));
            storage.close().unwrap();
        }
    }

    #[test]
    fn test_first_call_must_pass_first() {
        let store = MemoryStore::new();
        let mut storage = store.storage("seq");
        let f = text();
        write_all(&f, &mut storage, &[visit(1), visit(2)]);

        let none = PropertySet::new();
        storage.open(OpenMode::Read).unwrap();
        assert!(matches!(
            f.read(&mut storage, &none, false),
            Err(PersistError::Logic(_))
        ));
        assert!(!f.read(&mut storage, &none, true).unwrap().done);
        assert!(matches!(
            f.read(&mut storage, &none, true),
            Err(PersistError::Logic(_))
        ));
    }

    #[test]
    fn test_update_never_written_is_not_found() {
        let store = MemoryStore::new();
        let mut storage = store.storage("absent");
        assert!(matches!(
            storage.open(OpenMode::Update),
            Err(PersistError::NotFound(_))
        ));

        let db = MemoryDatabase::new();
        let mut storage = db.storage("visits");
        storage.open(OpenMode::Update).unwrap();
        let result = table(None).update(&visit(1), &mut storage, &PropertySet::new());
        assert!(matches!(result, Err(PersistError::NotFound(_))));
    }

    #[test]
    fn test_update_replaces_stream_contents() {
        let store = MemoryStore::new();
        let mut storage = store.storage("visit");
        let f = binary(true);
        write_all(&f, &mut storage, &[visit(1), visit(2)]);

        storage.open(OpenMode::Update).unwrap();
        f.update(&visit(9), &mut storage, &PropertySet::new()).unwrap();
        storage.close().unwrap();

        assert_eq!(read_all(&f, &mut storage), vec![(visit(9), true)]);
    }

    #[test]
    fn test_update_table_by_key() {
        let db = MemoryDatabase::new();
        let mut storage = db.storage("visits");
        let f = table(Some("visitId"));
        write_all(&f, &mut storage, &[visit(1), visit(2)]);

        let changed = visit(2).with("filter", "i");
        storage.open(OpenMode::Update).unwrap();
        f.update(&changed, &mut storage, &PropertySet::new()).unwrap();
        let missing = f.update(&visit(5), &mut storage, &PropertySet::new());
        assert!(matches!(missing, Err(PersistError::NotFound(_))));
        storage.close().unwrap();

        let sets: Vec<PropertySet> = read_all(&f, &mut storage)
            .into_iter()
            .map(|(set, _)| set)
            .collect();
        assert_eq!(sets, vec![visit(1), changed]);
    }

    #[test]
    fn test_table_name_override() {
        let db = MemoryDatabase::new();
        let mut storage = db.storage("raw");
        let f = table(None);
        let additional = PropertySet::new().with(TABLE_NAME_KEY, "RawVisit");

        storage.open(OpenMode::Write).unwrap();
        f.write(&visit(1), &mut storage, &additional, 0, 1).unwrap();
        storage.close().unwrap();

        assert_eq!(db.table_names(), vec!["RawVisit".to_string()]);
        assert_eq!(db.row_count("RawVisit"), 1);
    }

    #[test]
    fn test_read_missing_table_is_not_found() {
        let db = MemoryDatabase::new();
        let mut storage = db.storage("visits");
        storage.open(OpenMode::Read).unwrap();
        let result = table(None).read(&mut storage, &PropertySet::new(), true);
        assert!(matches!(result, Err(PersistError::NotFound(_))));
    }

    #[test]
    fn test_empty_blob_is_not_found() {
        let store = MemoryStore::new();
        store.insert("empty", Vec::new());
        let mut storage = store.storage("empty");
        storage.open(OpenMode::Read).unwrap();
        let result = text().read(&mut storage, &PropertySet::new(), true);
        assert!(matches!(result, Err(PersistError::NotFound(_))));
    }

    #[test]
    fn test_wrong_header_is_format_error() {
        let store = MemoryStore::new();
        let mut storage = store.storage("visit");
        write_all(&text(), &mut storage, &[visit(1)]);

        storage.open(OpenMode::Read).unwrap();
        let result = binary(false).read(&mut storage, &PropertySet::new(), true);
        assert!(matches!(result, Err(PersistError::Format(_))));
    }

    #[test]
    fn test_compressed_reader_accepts_plain_frames() {
        let store = MemoryStore::new();
        let mut storage = store.storage("visit");
        write_all(&binary(false), &mut storage, &[visit(4)]);
        assert_eq!(read_all(&binary(true), &mut storage), vec![(visit(4), true)]);
    }

    #[test]
    fn test_write_wrong_type_is_type_mismatch() {
        #[derive(Debug)]
        struct Exposure;
        impl TypeTagged for Exposure {
            const TYPE_TAG: &'static str = "Exposure";
        }
        impl Persistable for Exposure {
            fn type_tag(&self) -> &'static str {
                Self::TYPE_TAG
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
            fn into_any(self: Box<Self>) -> Box<dyn std::any::Any> {
                self
            }
        }

        let store = MemoryStore::new();
        let mut storage = store.storage("visit");
        storage.open(OpenMode::Write).unwrap();
        let result = text().write(&Exposure, &mut storage, &PropertySet::new(), 0, 1);
        assert!(matches!(result, Err(PersistError::TypeMismatch { .. })));
    }

    #[test]
    fn test_write_requires_valid_position_and_mode() {
        let store = MemoryStore::new();
        let mut storage = store.storage("visit");
        let none = PropertySet::new();

        assert!(matches!(
            text().write(&visit(1), &mut storage, &none, 0, 1),
            Err(PersistError::Logic(_))
        ));

        storage.open(OpenMode::Write).unwrap();
        assert!(matches!(
            text().write(&visit(1), &mut storage, &none, 1, 1),
            Err(PersistError::Logic(_))
        ));
        assert!(matches!(
            text().update(&visit(1), &mut storage, &none),
            Err(PersistError::Logic(_))
        ));
    }

    #[test]
    fn test_archive_rejects_duplicate_and_unknown_properties() {
        let mut sink = TextSaveArchive::new();
        sink.save_u64(2).unwrap();
        for _ in 0..2 {
            sink.save_str("filter").unwrap();
            sink.save_u64(CODE_STRING).unwrap();
            sink.save_str("r").unwrap();
        }
        let mut source = TextLoadArchive::new(sink.into_tokens());
        assert!(matches!(
            PropertySet::load(&mut source, 1),
            Err(PersistError::Format(_))
        ));

        let mut sink = TextSaveArchive::new();
        sink.save_u64(1).unwrap();
        sink.save_str("filter").unwrap();
        sink.save_u64(42).unwrap();
        let mut source = TextLoadArchive::new(sink.into_tokens());
        assert!(matches!(
            PropertySet::load(&mut source, 1),
            Err(PersistError::Format(_))
        ));
    }

    #[test]
    fn test_construction_errors() {
        let result = PropertySetFormatter::new(Arc::new(Policy::empty()));
        assert!(matches!(result, Err(PersistError::Configuration(_))));

        let f = binary(true);
        assert_eq!(f.frame_codec(), Some(FrameCodec::Gzip { level: 6 }));
        assert_eq!(text().frame_codec(), None);
        assert_eq!(f.type_tag(), "PropertySet");
    }
}
