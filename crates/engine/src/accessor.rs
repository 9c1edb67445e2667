//! Uniform access to host-engine queries.
//!
//! Every "get one" / "get many" lookup the facade exposes runs through the
//! helpers here, so all of them share the same shape: native records by
//! default, an opt-in columnar [`Table`] rendering for analysis. Keyed bulk
//! lookups keep one slot per key: an unresolved key is `None`, never dropped.

use serde::Serialize;
use serde_json::Value;

/// How a query result should be shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Native,
    Table,
}

/// The result of a facade query.
///
/// `Record`/`Records` carry native domain records; `Table` is the columnar
/// rendering. Absent lookups stay visible: a single miss is `Record(None)`,
/// a miss inside a bulk lookup is a `None` slot.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult<T> {
    Record(Option<T>),
    Records(Vec<Option<T>>),
    Table(Option<Table>),
}

impl<T> QueryResult<T> {
    /// The single record, if this is a present `Record` result.
    pub fn record(self) -> Option<T> {
        match self {
            QueryResult::Record(record) => record,
            _ => None,
        }
    }

    /// The record slots, if this is a `Records` result.
    pub fn records(self) -> Vec<Option<T>> {
        match self {
            QueryResult::Records(records) => records,
            _ => Vec::new(),
        }
    }

    /// The table rendering, if one was requested and data was present.
    pub fn table(self) -> Option<Table> {
        match self {
            QueryResult::Table(table) => table,
            _ => None,
        }
    }
}

/// A rows-by-columns view over a sequence of flat records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from record slots.
    ///
    /// Columns are the union of the records' field names in first-seen order;
    /// absent slots contribute no row. Returns `None` when the input is empty
    /// or entirely absent ("no data").
    pub fn from_records<T, I>(records: I) -> Option<Self>
    where
        T: Serialize,
        I: IntoIterator<Item = Option<T>>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut objects = Vec::new();

        for record in records.into_iter().flatten() {
            // Records are flat field-name -> value mappings; anything else
            // cannot be rendered and is treated as absent.
            let Ok(Value::Object(object)) = serde_json::to_value(&record) else {
                continue;
            };
            for key in object.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
            objects.push(object);
        }

        if objects.is_empty() {
            return None;
        }

        let rows = objects
            .into_iter()
            .map(|mut object| {
                columns
                    .iter()
                    .map(|column| object.remove(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Some(Table { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.columns.join("\t"))?;
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Value::to_string).collect();
            writeln!(f, "{}", cells.join("\t"))?;
        }
        Ok(())
    }
}

/// Run a single-key query and shape the result.
///
/// The key is always genuinely present here; a no-key bulk query is
/// [`fetch_all`], a different function. This keeps a falsy-but-valid key
/// (such as an empty string) from ever being misrouted to the no-key path.
pub fn fetch_one<K, T, F>(query: F, key: K, mode: RenderMode) -> QueryResult<T>
where
    T: Serialize,
    F: FnOnce(K) -> Option<T>,
{
    let record = query(key);
    match mode {
        RenderMode::Native => QueryResult::Record(record),
        RenderMode::Table => QueryResult::Table(Table::from_records(std::iter::once(record))),
    }
}

/// Run a no-key bulk query and shape the result.
pub fn fetch_all<T, F>(query: F, mode: RenderMode) -> QueryResult<T>
where
    T: Serialize,
    F: FnOnce() -> Vec<T>,
{
    render_slots(query().into_iter().map(Some).collect(), mode)
}

/// Run a single-key query once per key, preserving one slot per key.
pub fn fetch_each<K, T, F>(mut query: F, keys: &[K]) -> Vec<Option<T>>
where
    F: FnMut(&K) -> Option<T>,
{
    keys.iter().map(|key| query(key)).collect()
}

/// Shape already-fetched record slots.
pub fn render_slots<T: Serialize>(slots: Vec<Option<T>>, mode: RenderMode) -> QueryResult<T> {
    match mode {
        RenderMode::Native => QueryResult::Records(slots),
        RenderMode::Table => QueryResult::Table(Table::from_records(slots)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Rec {
        a: u32,
        b: String,
    }

    #[derive(Serialize)]
    struct WideRec {
        a: u32,
        b: String,
        c: f64,
    }

    #[test]
    fn empty_input_renders_as_no_data() {
        assert!(Table::from_records(Vec::<Option<Rec>>::new()).is_none());
    }

    #[test]
    fn all_absent_input_renders_as_no_data() {
        let slots: Vec<Option<Rec>> = vec![None, None, None];
        assert!(Table::from_records(slots).is_none());
    }

    #[test]
    fn row_count_matches_present_records_only() {
        let slots = vec![
            Some(Rec { a: 1, b: "x".into() }),
            None,
            Some(Rec { a: 2, b: "y".into() }),
        ];
        let table = Table::from_records(slots).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns, vec!["a", "b"]);
    }

    #[test]
    fn columns_are_union_in_first_seen_order() {
        // Heterogeneous records: the wide one contributes a new trailing column.
        let narrow = serde_json::to_value(Rec { a: 1, b: "x".into() }).unwrap();
        let wide = serde_json::to_value(WideRec { a: 2, b: "y".into(), c: 0.5 }).unwrap();
        let table = Table::from_records(vec![Some(narrow), Some(wide)]).unwrap();
        assert_eq!(table.columns, vec!["a", "b", "c"]);
        // The narrow record has a null slot under the late column.
        assert_eq!(table.rows[0][2], Value::Null);
        assert_eq!(table.rows[1][2], json!(0.5));
    }

    #[test]
    fn fetch_one_passes_falsy_keys_through() {
        // An empty-string key must reach the query function unchanged; only
        // fetch_all represents "no key".
        let mut seen = Vec::new();
        let result = fetch_one(
            |key: &str| {
                seen.push(key.to_string());
                Some(Rec { a: 7, b: key.into() })
            },
            "",
            RenderMode::Native,
        );
        assert_eq!(seen, vec![String::new()]);
        assert_eq!(result.record().unwrap().a, 7);
    }

    #[test]
    fn fetch_one_table_mode_wraps_present_record() {
        let result = fetch_one(
            |_: &str| Some(Rec { a: 1, b: "x".into() }),
            "k",
            RenderMode::Table,
        );
        let table = result.table().unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn fetch_one_table_mode_absent_is_no_data() {
        let result: QueryResult<Rec> = fetch_one(|_: &str| None, "k", RenderMode::Table);
        assert!(matches!(result, QueryResult::Table(None)));
    }

    #[test]
    fn fetch_each_keeps_one_slot_per_key() {
        let known: HashMap<&str, u32> = [("a", 1), ("c", 3)].into_iter().collect();
        let keys = vec!["a", "b", "c", "d"];
        let slots = fetch_each(|k| known.get(k).copied(), &keys);
        assert_eq!(slots, vec![Some(1), None, Some(3), None]);
    }

    #[test]
    fn fetch_all_native_wraps_every_record() {
        let result = fetch_all(
            || vec![Rec { a: 1, b: "x".into() }, Rec { a: 2, b: "y".into() }],
            RenderMode::Native,
        );
        let records = result.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(Option::is_some));
    }
}
