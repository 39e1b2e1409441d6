use std::{fmt, hash::Hash, str::FromStr};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::string_key;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize, Serialize)]
/// Cardinality and nullability expected of each aligned position.
pub struct ResultShape {
    /// Each key may match any number of records
    pub collection: bool,
    /// Each key must match at least one record
    pub element_required: bool,
}

impl ResultShape {
    pub const ONE: Self = Self::new(false, false);
    pub const ONE_REQUIRED: Self = Self::new(false, true);
    pub const MANY: Self = Self::new(true, false);
    pub const MANY_REQUIRED: Self = Self::new(true, true);

    pub const fn new(collection: bool, element_required: bool) -> Self {
        Self {
            collection,
            element_required,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct UnknownShape(pub String);

impl fmt::Display for UnknownShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown result shape {:?}", self.0)
    }
}

impl std::error::Error for UnknownShape {}

impl FromStr for ResultShape {
    type Err = UnknownShape;

    /// Parse the `""`, `"!"`, `"[]"`, `"[]!"`, `"[!]"`, `"[!]!"` notation.
    ///
    /// Only the marker inside the brackets makes a collection required.
    fn from_str(notation: &str) -> Result<Self, Self::Err> {
        match notation {
            "" => Ok(Self::ONE),
            "!" => Ok(Self::ONE_REQUIRED),
            "[]" | "[]!" => Ok(Self::MANY),
            "[!]" | "[!]!" => Ok(Self::MANY_REQUIRED),
            other => Err(UnknownShape(other.to_string())),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
/// Paginated wrapper around a result list.
pub struct Page<R> {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub skip: u64,
    pub data: Vec<R>,
}

#[derive(Clone, PartialEq, Debug)]
/// Records returned by a bulk query.
pub enum ResultSet<R> {
    List(Vec<R>),
    Page(Page<R>),
}

impl<R> ResultSet<R> {
    pub fn into_records(self) -> Vec<R> {
        match self {
            ResultSet::List(records) => records,
            ResultSet::Page(page) => page.data,
        }
    }
}

impl<R> From<Vec<R>> for ResultSet<R> {
    fn from(records: Vec<R>) -> Self {
        ResultSet::List(records)
    }
}

impl<R> From<Page<R>> for ResultSet<R> {
    fn from(page: Page<R>) -> Self {
        ResultSet::Page(page)
    }
}

impl ResultSet<Value> {
    /// Interpret a JSON query result.
    ///
    /// Arrays are lists, objects carrying a `data` array are pages, any other
    /// object is a single record and `null` is empty.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => ResultSet::List(vec![]),
            Value::Array(records) => ResultSet::List(records),
            Value::Object(mut map) if map.get("data").is_some_and(Value::is_array) => {
                let count = |map: &serde_json::Map<String, Value>, field: &str| {
                    map.get(field).and_then(Value::as_u64).unwrap_or_default()
                };

                let page = Page {
                    total: count(&map, "total"),
                    limit: count(&map, "limit"),
                    skip: count(&map, "skip"),
                    data: match map.remove("data") {
                        Some(Value::Array(records)) => records,
                        _ => vec![],
                    },
                };

                ResultSet::Page(page)
            }
            record => ResultSet::List(vec![record]),
        }
    }
}

impl From<Value> for ResultSet<Value> {
    fn from(value: Value) -> Self {
        ResultSet::from_value(value)
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
/// One aligned output position.
pub enum Slot<R> {
    #[default]
    Empty,
    One(R),
    Many(Vec<R>),
}

impl<R> Slot<R> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }

    pub fn one(&self) -> Option<&R> {
        match self {
            Slot::One(record) => Some(record),
            _ => None,
        }
    }

    pub fn many(&self) -> &[R] {
        match self {
            Slot::Many(records) => records,
            _ => &[],
        }
    }

    pub fn into_one(self) -> Option<R> {
        match self {
            Slot::One(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_many(self) -> Vec<R> {
        match self {
            Slot::Many(records) => records,
            Slot::One(record) => vec![record],
            Slot::Empty => vec![],
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// Contract breach found while aligning, reported through the error callback.
pub enum Violation {
    /// The record at `index` of the result set has no key
    UnkeyedRecord { index: usize },
    /// The `bucket`th distinct key of the result set matched `found` records where one was expected
    NotSingle { bucket: usize, found: usize },
    /// Output position `index` requires a value and none was found
    MissingRequired { index: usize },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::UnkeyedRecord { index } => {
                write!(f, "#{index} This record has no key to align on.")
            }
            Violation::NotSingle { bucket, found } => write!(
                f,
                "#{bucket} This result needs a single result object. A collection of {found} elements was found."
            ),
            Violation::MissingRequired { index } => write!(
                f,
                "#{index} This key requires a non-null result. Null or empty-array found."
            ),
        }
    }
}

/// Default value and error callback for [`align`].
pub struct AlignOptions<R, F> {
    default: Slot<R>,
    on_error: F,
}

fn ignore_violation(_: Violation) {}

impl<R> AlignOptions<R, fn(Violation)> {
    pub fn new() -> Self {
        Self {
            default: Slot::Empty,
            on_error: ignore_violation,
        }
    }
}

impl<R> Default for AlignOptions<R, fn(Violation)> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, F: FnMut(Violation)> AlignOptions<R, F> {
    /// Value placed at positions whose key matched nothing.
    ///
    /// [`Violation::MissingRequired`] is only reported for positions left at
    /// [`Slot::Empty`], so a non-empty default such as `Slot::Many(vec![])`
    /// satisfies a required shape.
    pub fn with_default(self, default: Slot<R>) -> Self {
        Self { default, ..self }
    }

    /// Callback invoked for every [`Violation`].
    pub fn on_error<G: FnMut(Violation)>(self, on_error: G) -> AlignOptions<R, G> {
        AlignOptions {
            default: self.default,
            on_error,
        }
    }
}

/// Key extractor reading the property `name` of a JSON record.
pub fn field(name: &str) -> impl Fn(&Value) -> Option<String> + '_ {
    move |record: &Value| match record.get(name) {
        None | Some(Value::Null) => None,
        Some(value) => Some(string_key(value)),
    }
}

/// Align `results` onto `keys`.
///
/// The output has one slot per key, in key order. Repeated keys each get
/// their own copy of the matching records. Contract breaches go to the
/// error callback and the affected positions take the default value.
pub fn align<C, R, F>(
    keys: &[C],
    results: impl Into<ResultSet<R>>,
    key_of: impl Fn(&R) -> Option<C>,
    shape: ResultShape,
    options: AlignOptions<R, F>,
) -> Vec<Slot<R>>
where
    C: Hash + Eq,
    R: Clone,
    F: FnMut(Violation),
{
    let AlignOptions {
        default,
        mut on_error,
    } = options;

    let mut buckets: IndexMap<C, Vec<R>> = IndexMap::new();
    for (index, record) in results.into().into_records().into_iter().enumerate() {
        match key_of(&record) {
            Some(key) => buckets.entry(key).or_default().push(record),
            None => on_error(Violation::UnkeyedRecord { index }),
        }
    }

    let slots: IndexMap<C, Slot<R>> = buckets
        .into_iter()
        .enumerate()
        .map(|(bucket, (key, mut records))| {
            let slot = if shape.collection {
                Slot::Many(records)
            } else if records.len() == 1 {
                Slot::One(records.remove(0))
            } else {
                on_error(Violation::NotSingle {
                    bucket,
                    found: records.len(),
                });
                default.clone()
            };

            (key, slot)
        })
        .collect();

    keys.iter()
        .enumerate()
        .map(|(index, key)| {
            let slot = slots.get(key).cloned().unwrap_or_else(|| default.clone());
            if slot.is_empty() && shape.element_required {
                on_error(Violation::MissingRequired { index });
            }

            slot
        })
        .collect()
}
