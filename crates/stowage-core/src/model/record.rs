use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::{Map, Value};

use crate::store::DataStore;

/// A record field: a plain JSON value, or a nested store produced by
/// crawling or by a collection field.
#[derive(Debug, Clone)]
pub enum Field {
    Value(Value),
    Store(DataStore),
}

impl Field {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Store(_) => None,
        }
    }

    pub fn as_store(&self) -> Option<&DataStore> {
        match self {
            Self::Store(s) => Some(s),
            Self::Value(_) => None,
        }
    }

    /// JSON rendering; nested stores become an array of their records' data.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Store(store) => Value::Array(
                store
                    .records()
                    .iter()
                    .map(|r| Value::Object(r.to_json_data()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for Field {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// One entry of a [`DataStore`].
///
/// `index` is the record's position as of the last reindex. `revision`
/// starts at 1 and is bumped by every completed write.
#[derive(Debug, Clone)]
pub struct Record {
    pub index: usize,
    pub key: String,
    pub data: IndexMap<String, Field>,
    pub revision: u64,
}

impl Record {
    pub(crate) fn new(key: String, data: IndexMap<String, Field>) -> Self {
        Self {
            index: 0,
            key,
            data,
            revision: 1,
        }
    }

    /// Plain value of a field; `None` for missing fields and nested stores.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.data.get(field).and_then(Field::as_value)
    }

    /// Nested store held by a collection field.
    pub fn store(&self, field: &str) -> Option<&DataStore> {
        self.data.get(field).and_then(Field::as_store)
    }

    /// The record's data as a JSON object, nested stores expanded.
    pub fn to_json_data(&self) -> Map<String, Value> {
        self.data
            .iter()
            .map(|(k, f)| (k.clone(), f.to_json()))
            .collect()
    }

    /// The record's plain fields only; nested stores are left out.
    pub fn plain_values(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter_map(|(k, f)| f.as_value().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    pub(crate) fn with_index(self: &Arc<Self>, index: usize) -> Arc<Self> {
        if self.index == index {
            return Arc::clone(self);
        }
        let mut next = Self::clone(self);
        next.index = index;
        Arc::new(next)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Record", 3)?;
        s.serialize_field("index", &self.index)?;
        s.serialize_field("key", &self.key)?;
        s.serialize_field("data", &self.to_json_data())?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        let mut data = IndexMap::new();
        data.insert("name".to_owned(), Field::Value(json!("Ada")));
        data.insert("age".to_owned(), Field::Value(json!(36)));
        Record::new("ada".into(), data)
    }

    #[test]
    fn value_reads_plain_fields() {
        let rec = sample();
        assert_eq!(rec.value("name"), Some(&json!("Ada")));
        assert!(rec.value("missing").is_none());
        assert!(rec.store("name").is_none());
        assert_eq!(rec.revision, 1);
    }

    #[test]
    fn serializes_as_index_key_data() {
        let rec = sample();
        let v = serde_json::to_value(&rec).expect("serializable");
        assert_eq!(
            v,
            json!({"index": 0, "key": "ada", "data": {"name": "Ada", "age": 36}})
        );
    }

    #[test]
    fn with_index_reuses_unchanged_record() {
        let rec = Arc::new(sample());
        assert!(Arc::ptr_eq(&rec, &rec.with_index(0)));
        assert_eq!(rec.with_index(4).index, 4);
    }
}
