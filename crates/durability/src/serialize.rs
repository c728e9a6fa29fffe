//! Header/body serialization of restartable data maps
//!
//! Writing is two-pass: every value's body is encoded into a scratch buffer
//! while its header entry is recorded, then the header block and the body
//! block are emitted. Reading is split the same way: a [`LoadPlan`] is built
//! from the header alone, checking every type hash, and only then are the
//! bodies decoded. A failed plan leaves every value untouched.

use std::collections::HashSet;
use std::io::Write;

use restartable_core::store::{read_u64, write_u64};
use restartable_core::{RestartableDataMap, RestartableDataValue};
use serde::Serialize;
use tracing::debug;

use crate::error::{RestartError, RestartResult};
use crate::header::{HeaderEntry, MapHeader};

/// Header and body block of one serialized map
#[derive(Debug, Default)]
pub(crate) struct SerializedMap {
    pub header: MapHeader,
    pub body: Vec<u8>,
}

/// Encode every value of `map`, in insertion order
pub(crate) fn serialize_map(map: &RestartableDataMap) -> RestartResult<SerializedMap> {
    let mut out = SerializedMap::default();
    for value in map.iter() {
        let start = out.body.len();
        value.store(&mut out.body)?;
        let size = (out.body.len() - start) as u64;
        out.header.push(
            value.name().to_string(),
            size,
            value.type_hash(),
            value.type_name().to_string(),
            value.has_context(),
        )?;
    }
    debug!(
        target: "restartable::io",
        entries = out.header.len(),
        body_bytes = out.body.len(),
        "Serialized restartable data map"
    );
    Ok(out)
}

impl SerializedMap {
    /// Write item count, header block and body block
    pub fn write_section(&self, w: &mut dyn Write) -> RestartResult<()> {
        write_u64(w, self.header.len() as u64)?;
        self.header.write_entries(w)?;
        w.write_all(&self.body)?;
        Ok(())
    }
}

/// Parsed header of one map, borrowing its body block from the stream
#[derive(Debug)]
pub(crate) struct Section<'a> {
    pub header: MapHeader,
    pub body: &'a [u8],
}

impl<'a> Section<'a> {
    /// Read a section written by [`SerializedMap::write_section`], advancing `stream`
    pub fn read(stream: &mut &'a [u8]) -> RestartResult<Self> {
        let count = read_u64(stream, "item count")?;
        let header = MapHeader::read_entries(stream, count)?;
        let body = take_body(stream, header.body_size())?;
        Ok(Section { header, body })
    }
}

/// Split `size` body bytes off the front of `stream`
pub(crate) fn take_body<'a>(stream: &mut &'a [u8], size: u64) -> RestartResult<&'a [u8]> {
    let size = usize::try_from(size)
        .ok()
        .filter(|&size| size <= stream.len())
        .ok_or_else(|| {
            RestartError::Corruption(format!(
                "body block of {} bytes exceeds the {} bytes left in the stream",
                size,
                stream.len()
            ))
        })?;
    let (body, rest) = stream.split_at(size);
    *stream = rest;
    Ok(body)
}

/// Outcome of a restore, merged across every map it touched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Number of values decoded from the stream
    pub loaded: usize,
    /// Recoverable values left at their defaults because this is a restart
    pub skipped_recoverable: Vec<String>,
    /// Values excluded by the caller's filter
    pub filtered: Vec<String>,
    /// Values the stream does not contain
    pub missing: Vec<String>,
}

impl RestoreReport {
    /// Whether every value found its data
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: RestoreReport) {
        self.loaded += other.loaded;
        self.skipped_recoverable.extend(other.skipped_recoverable);
        self.filtered.extend(other.filtered);
        self.missing.extend(other.missing);
    }

    /// Render the report as JSON
    pub fn to_json(&self) -> RestartResult<String> {
        serde_json::to_string(self)
            .map_err(|e| RestartError::Corruption(format!("cannot render report: {}", e)))
    }
}

/// Why a value is not loaded
pub(crate) enum Skip {
    Filtered,
    Recoverable,
}

/// Values of one map to decode, with the header entries they decode from
#[derive(Debug, Default)]
pub(crate) struct LoadPlan {
    loads: Vec<HeaderEntry>,
    report: RestoreReport,
}

impl LoadPlan {
    /// Match every value of `map` against `header`
    ///
    /// `header` is `None` when the stream has no data at all for this map.
    /// `skip` decides which names are never loaded. Type hashes are checked
    /// here so a mismatch is found before any value changes.
    pub fn build<F>(
        map: &RestartableDataMap,
        header: Option<&MapHeader>,
        skip: F,
    ) -> RestartResult<Self>
    where
        F: Fn(&str) -> Option<Skip>,
    {
        let mut plan = LoadPlan::default();
        for value in map.iter() {
            let name = value.name();
            match skip(name) {
                Some(Skip::Filtered) => {
                    plan.report.filtered.push(name.to_string());
                    continue;
                }
                Some(Skip::Recoverable) => {
                    plan.report.skipped_recoverable.push(name.to_string());
                    continue;
                }
                None => {}
            }

            match header.and_then(|h| h.find(name)) {
                Some(entry) => {
                    check_type(value, entry)?;
                    plan.loads.push(entry.clone());
                }
                None => plan.report.missing.push(name.to_string()),
            }
        }
        Ok(plan)
    }

    /// Names the stream does not contain
    pub fn missing(&self) -> &[String] {
        &self.report.missing
    }

    /// Decode the planned values from `body`
    pub fn apply(
        self,
        map: &mut RestartableDataMap,
        header: &MapHeader,
        body: &[u8],
    ) -> RestartResult<RestoreReport> {
        let LoadPlan { loads, mut report } = self;
        for entry in &loads {
            let bytes = header.body_of(entry, body)?;
            load_entry(map.data_mut(&entry.name)?, entry, bytes)?;
        }
        report.loaded = loads.len();
        Ok(report)
    }
}

/// Decode one value from exactly the bytes its header entry describes
pub(crate) fn load_entry(
    value: &mut dyn RestartableDataValue,
    entry: &HeaderEntry,
    bytes: &[u8],
) -> RestartResult<()> {
    let mut cursor = bytes;
    value.load(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(RestartError::Corruption(format!(
            "'{}' decoded {} of its {} stored bytes",
            entry.name,
            bytes.len() - cursor.len(),
            bytes.len()
        )));
    }
    Ok(())
}

/// Stored type must match the declared one
pub(crate) fn check_type(
    value: &dyn RestartableDataValue,
    entry: &HeaderEntry,
) -> RestartResult<()> {
    if value.type_hash() != entry.type_hash {
        return Err(RestartError::TypeHashMismatch {
            name: entry.name.clone(),
            stored_type: entry.type_name.clone(),
            declared_type: value.type_name().to_string(),
        });
    }
    Ok(())
}

/// Skip rule for a caller-supplied filter plus, on restart, recoverable names
pub(crate) fn skip_rule<'a>(
    filter: &'a HashSet<String>,
    recoverable: Option<&'a HashSet<String>>,
) -> impl Fn(&str) -> Option<Skip> + 'a {
    move |name| {
        if filter.contains(name) {
            Some(Skip::Filtered)
        } else if recoverable.map_or(false, |r| r.contains(name)) {
            Some(Skip::Recoverable)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use restartable_core::RestartableData;

    fn map_with(values: Vec<Box<dyn RestartableDataValue>>) -> RestartableDataMap {
        let mut map = RestartableDataMap::new();
        for v in values {
            map.add_data(v).unwrap();
        }
        map
    }

    fn source_map() -> RestartableDataMap {
        map_with(vec![
            Box::new(RestartableData::new("s/o/a", 42u32)),
            Box::new(RestartableData::new("s/o/b", String::from("hello"))),
            Box::new(RestartableData::new("s/o/c", vec![1.0f64, 2.0])),
        ])
    }

    fn target_map() -> RestartableDataMap {
        map_with(vec![
            Box::new(RestartableData::new("s/o/a", 0u32)),
            Box::new(RestartableData::new("s/o/b", String::new())),
            Box::new(RestartableData::new("s/o/c", Vec::<f64>::new())),
        ])
    }

    fn no_skip(_: &str) -> Option<Skip> {
        None
    }

    #[test]
    fn test_serialize_records_sizes_in_order() {
        let out = serialize_map(&source_map()).unwrap();
        let names: Vec<&str> = out.header.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["s/o/a", "s/o/b", "s/o/c"]);
        assert_eq!(out.header.entries()[0].size, 4);
        assert_eq!(out.header.entries()[1].size, 8 + 5);
        assert_eq!(out.header.body_size(), out.body.len() as u64);
    }

    #[test]
    fn test_serialize_marks_stored() {
        let map = source_map();
        serialize_map(&map).unwrap();
        assert!(map.iter().all(|v| v.stored()));
    }

    #[test]
    fn test_plan_and_apply() {
        let out = serialize_map(&source_map()).unwrap();
        let mut target = target_map();

        let plan = LoadPlan::build(&target, Some(&out.header), no_skip).unwrap();
        let report = plan.apply(&mut target, &out.header, &out.body).unwrap();

        assert_eq!(report.loaded, 3);
        assert!(report.is_complete());
        assert_eq!(*target.get::<u32>("s/o/a").unwrap(), 42);
        assert_eq!(target.get::<String>("s/o/b").unwrap(), "hello");
        assert_eq!(target.get::<Vec<f64>>("s/o/c").unwrap(), &vec![1.0, 2.0]);
        assert!(target.data("s/o/a").unwrap().loaded());
    }

    #[test]
    fn test_type_mismatch_found_at_plan_time() {
        let out = serialize_map(&source_map()).unwrap();
        let target = map_with(vec![Box::new(RestartableData::new("s/o/a", 0u64))]);

        let err = LoadPlan::build(&target, Some(&out.header), no_skip).unwrap_err();
        assert!(matches!(err, RestartError::TypeHashMismatch { ref name, .. } if name == "s/o/a"));
    }

    #[test]
    fn test_missing_and_skipped() {
        let out = serialize_map(&source_map()).unwrap();
        let mut target = map_with(vec![
            Box::new(RestartableData::new("s/o/a", 0u32)),
            Box::new(RestartableData::new("s/o/b", String::from("keep"))),
            Box::new(RestartableData::new("s/o/new", 5i8)),
        ]);

        let filter: HashSet<String> = ["s/o/b".to_string()].into_iter().collect();
        let plan = LoadPlan::build(&target, Some(&out.header), skip_rule(&filter, None)).unwrap();
        assert_eq!(plan.missing(), ["s/o/new".to_string()]);

        let report = plan.apply(&mut target, &out.header, &out.body).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.filtered, vec!["s/o/b".to_string()]);
        assert_eq!(target.get::<String>("s/o/b").unwrap(), "keep");
        assert_eq!(*target.get::<i8>("s/o/new").unwrap(), 5);
    }

    #[test]
    fn test_recoverable_skip_rule() {
        let filter = HashSet::new();
        let recoverable: HashSet<String> = ["x".to_string()].into_iter().collect();
        let rule = skip_rule(&filter, Some(&recoverable));
        assert!(matches!(rule("x"), Some(Skip::Recoverable)));
        assert!(rule("y").is_none());
    }

    #[test]
    fn test_no_header_means_everything_missing() {
        let target = target_map();
        let plan = LoadPlan::build(&target, None, no_skip).unwrap();
        assert_eq!(plan.missing().len(), 3);
    }

    #[test]
    fn test_size_mismatch_is_corruption() {
        let mut header = MapHeader::new();
        // A u32 body padded with two extra bytes
        header
            .push("s/o/a".into(), 6, restartable_core::type_hash::<u32>(), "u32".into(), false)
            .unwrap();
        let body = [1u8, 0, 0, 0, 9, 9];

        let mut target = map_with(vec![Box::new(RestartableData::new("s/o/a", 0u32))]);
        let plan = LoadPlan::build(&target, Some(&header), no_skip).unwrap();
        assert!(matches!(
            plan.apply(&mut target, &header, &body),
            Err(RestartError::Corruption(_))
        ));
    }

    #[test]
    fn test_section_roundtrip() {
        let out = serialize_map(&source_map()).unwrap();
        let mut stream = Vec::new();
        out.write_section(&mut stream).unwrap();
        stream.extend_from_slice(b"tail");

        let mut cursor = stream.as_slice();
        let section = Section::read(&mut cursor).unwrap();
        assert_eq!(section.header, out.header);
        assert_eq!(section.body, out.body.as_slice());
        assert_eq!(cursor, b"tail");
    }

    #[test]
    fn test_section_with_short_body() {
        let out = serialize_map(&source_map()).unwrap();
        let mut stream = Vec::new();
        out.write_section(&mut stream).unwrap();
        stream.pop();

        let mut cursor = stream.as_slice();
        assert!(matches!(
            Section::read(&mut cursor),
            Err(RestartError::Corruption(_))
        ));
    }

    #[test]
    fn test_report_merge_and_json() {
        let mut report = RestoreReport {
            loaded: 2,
            missing: vec!["a".into()],
            ..Default::default()
        };
        report.merge(RestoreReport {
            loaded: 1,
            filtered: vec!["b".into()],
            ..Default::default()
        });
        assert_eq!(report.loaded, 3);
        assert!(!report.is_complete());

        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["loaded"], 3);
        assert_eq!(value["filtered"][0], "b");
    }
}
