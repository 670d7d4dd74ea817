// ── Ordered record collection ──
//
// Backing sequence, key map and memoized sort views for one store. Every
// structural mutation clears the views, bumps the generation and
// publishes a fresh snapshot to `watch` subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{Record, Selector};

pub(crate) type Records = Arc<Vec<Arc<Record>>>;

pub(crate) struct Collection {
    records: Records,
    /// Key -> current position. Kept exact across removals; record
    /// `index` fields lag until `reindex`.
    keys: HashMap<String, usize>,
    views: HashMap<String, Records>,
    generation: u64,
    snapshot: watch::Sender<Records>,
}

impl Collection {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            records: Arc::new(Vec::new()),
            keys: HashMap::new(),
            views: HashMap::new(),
            generation: 0,
            snapshot,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn records(&self) -> Records {
        Arc::clone(&self.records)
    }

    pub(crate) fn keys(&self) -> &HashMap<String, usize> {
        &self.keys
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Records> {
        self.snapshot.subscribe()
    }

    // ── Lookup ───────────────────────────────────────────────────────

    pub(crate) fn by_key(&self, key: &str) -> Option<Arc<Record>> {
        let idx = *self.keys.get(key)?;
        self.records.get(idx).cloned()
    }

    pub(crate) fn by_index(&self, index: usize) -> Option<Arc<Record>> {
        self.records.get(index).cloned()
    }

    /// Resolve a selector, skipping entries that address nothing.
    pub(crate) fn resolve(&self, selector: &Selector) -> Vec<Arc<Record>> {
        match selector {
            Selector::All => self.records.iter().cloned().collect(),
            Selector::Key(key) => self.by_key(key).into_iter().collect(),
            Selector::Index(i) => self.by_index(*i).into_iter().collect(),
            Selector::Range { start, offset } => {
                let end = start.saturating_add(*offset).saturating_add(1);
                self.records
                    .get(*start..end.min(self.records.len()))
                    .map(<[Arc<Record>]>::to_vec)
                    .unwrap_or_default()
            }
            Selector::List(items) => items.iter().flat_map(|s| self.resolve(s)).collect(),
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Append a new record, assigning its index. Replaces in place when the
    /// key is already present.
    pub(crate) fn insert(&mut self, mut record: Record) -> Arc<Record> {
        if let Some(&idx) = self.keys.get(&record.key) {
            record.index = idx;
            let record = Arc::new(record);
            Arc::make_mut(&mut self.records)[idx] = Arc::clone(&record);
            self.touch();
            return record;
        }
        record.index = self.records.len();
        let record = Arc::new(record);
        self.keys.insert(record.key.clone(), record.index);
        Arc::make_mut(&mut self.records).push(Arc::clone(&record));
        self.touch();
        record
    }

    /// Remove by key, shifting later positions down.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Arc<Record>> {
        let idx = self.keys.remove(key)?;
        let removed = Arc::make_mut(&mut self.records).remove(idx);
        for pos in self.keys.values_mut() {
            if *pos > idx {
                *pos -= 1;
            }
        }
        self.touch();
        Some(removed)
    }

    /// Rewrite every record's `index` to its position and rebuild the key map.
    pub(crate) fn reindex(&mut self) {
        let records: Vec<Arc<Record>> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| r.with_index(i))
            .collect();
        self.keys = records
            .iter()
            .map(|r| (r.key.clone(), r.index))
            .collect();
        self.records = Arc::new(records);
        self.touch();
    }

    pub(crate) fn clear(&mut self) {
        self.records = Arc::new(Vec::new());
        self.keys.clear();
        self.touch();
    }

    // ── Views ────────────────────────────────────────────────────────

    pub(crate) fn view(&self, name: &str) -> Option<Records> {
        self.views.get(name).cloned()
    }

    pub(crate) fn view_names(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    /// Memoize a view computed at `generation`; dropped if the collection
    /// changed while it was being computed.
    pub(crate) fn store_view(&mut self, name: String, generation: u64, view: Records) -> bool {
        if generation != self.generation {
            return false;
        }
        self.views.insert(name, view);
        true
    }

    fn touch(&mut self) {
        self.views.clear();
        self.generation += 1;
        let snap = Arc::clone(&self.records);
        self.snapshot.send_modify(|s| *s = snap);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn rec(key: &str) -> Record {
        Record::new(key.to_owned(), IndexMap::new())
    }

    fn filled(keys: &[&str]) -> Collection {
        let mut col = Collection::new();
        for k in keys {
            col.insert(rec(k));
        }
        col
    }

    fn assert_keys_consistent(col: &Collection) {
        for (key, &idx) in col.keys() {
            assert_eq!(&col.records()[idx].key, key);
        }
        assert_eq!(col.keys().len(), col.len());
    }

    #[test]
    fn insert_assigns_sequential_indices() {
        let col = filled(&["a", "b", "c"]);
        assert_eq!(col.by_key("c").unwrap().index, 2);
        assert_eq!(col.by_index(1).unwrap().key, "b");
        assert_keys_consistent(&col);
    }

    #[test]
    fn insert_with_existing_key_replaces() {
        let mut col = filled(&["a", "b"]);
        let replaced = col.insert(rec("a"));
        assert_eq!(replaced.index, 0);
        assert_eq!(col.len(), 2);
    }

    #[test]
    fn remove_keeps_key_map_exact_until_reindex() {
        let mut col = filled(&["a", "b", "c", "d"]);
        col.remove("b").unwrap();
        assert_keys_consistent(&col);
        // Stale index field on the shifted record.
        assert_eq!(col.by_key("c").unwrap().index, 2);

        col.reindex();
        for (i, r) in col.records().iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(col.keys()[&r.key], i);
        }
    }

    #[test]
    fn resolve_handles_every_selector() {
        let col = filled(&["a", "b", "c", "d"]);
        let keys = |sel: Selector| -> Vec<String> {
            col.resolve(&sel).iter().map(|r| r.key.clone()).collect()
        };
        assert_eq!(keys(Selector::All).len(), 4);
        assert_eq!(keys(Selector::Key("c".into())), ["c"]);
        assert!(keys(Selector::Key("zz".into())).is_empty());
        assert_eq!(keys(Selector::Range { start: 1, offset: 1 }), ["b", "c"]);
        assert_eq!(keys(Selector::Range { start: 3, offset: 9 }), ["d"]);
        assert_eq!(keys(Selector::from("d,0")), ["d", "a"]);
    }

    #[test]
    fn mutation_clears_views_and_rejects_stale_ones() {
        let mut col = filled(&["a"]);
        let generation = col.generation();
        assert!(col.store_view("v".into(), generation, col.records()));
        assert!(col.view("v").is_some());

        col.insert(rec("b"));
        assert!(col.view("v").is_none());
        assert!(!col.store_view("v".into(), generation, col.records()));
    }

    #[test]
    fn snapshot_follows_mutations() {
        let mut col = Collection::new();
        let rx = col.subscribe();
        col.insert(rec("a"));
        assert_eq!(rx.borrow().len(), 1);
        col.clear();
        assert!(rx.borrow().is_empty());
    }
}
