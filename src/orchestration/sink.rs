//! Sink populator: fold the result of one operation into a caller-owned container.
//!
//! The source runs first (optionally through a permit pool); only a successful,
//! non-empty result touches the target. Bulk results are fully collected before
//! the first element is applied, so a target never sees half a range.
//!
//! Targets are borrowed: `&mut C` for exclusive use, `&parking_lot::Mutex<C>`
//! or `&DashMap` when several fills share one container. No lock is held while
//! the source is running.

use crate::errors::BoxError;
use crate::infrastructure::metrics::{global_metrics, names};
use crate::orchestration::gate::{contain, run_gated, PermitPool};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use tracing::debug;

/// A container that can take in one produced value.
pub trait Sink<V> {
    fn absorb(&mut self, value: V);
}

impl<T> Sink<T> for Vec<T> {
    fn absorb(&mut self, value: T) {
        self.push(value);
    }
}

/// Byte sink: a whole chunk is appended at once.
impl Sink<Vec<u8>> for Vec<u8> {
    fn absorb(&mut self, value: Vec<u8>) {
        self.extend_from_slice(&value);
    }
}

impl<T> Sink<T> for VecDeque<T> {
    fn absorb(&mut self, value: T) {
        self.push_back(value);
    }
}

impl<T: Eq + Hash, S: BuildHasher> Sink<T> for HashSet<T, S> {
    fn absorb(&mut self, value: T) {
        self.insert(value);
    }
}

impl<T: Ord> Sink<T> for BTreeSet<T> {
    fn absorb(&mut self, value: T) {
        self.insert(value);
    }
}

/// Single-value slot: the value overwrites whatever was there.
impl<T> Sink<T> for Option<T> {
    fn absorb(&mut self, value: T) {
        *self = Some(value);
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> Sink<(K, V)> for HashMap<K, V, S> {
    fn absorb(&mut self, (key, value): (K, V)) {
        self.insert(key, value);
    }
}

impl<K: Ord, V> Sink<(K, V)> for BTreeMap<K, V> {
    fn absorb(&mut self, (key, value): (K, V)) {
        self.insert(key, value);
    }
}

impl<C: Clone + Default> Sink<Table<C>> for Table<C> {
    fn absorb(&mut self, value: Table<C>) {
        self.merge(value);
    }
}

/// One row, in this table's column order.
impl<C: Clone + Default> Sink<Vec<C>> for Table<C> {
    fn absorb(&mut self, row: Vec<C>) {
        self.push_row(row);
    }
}

/// A borrowed handle through which a fill applies its result.
pub trait SinkTarget<V> {
    fn absorb(self, value: V);

    /// Apply a fully collected range in one step.
    fn absorb_all(self, values: Vec<V>);
}

impl<'t, C, V> SinkTarget<V> for &'t mut C
where
    C: Sink<V> + ?Sized,
{
    fn absorb(self, value: V) {
        Sink::absorb(self, value);
    }

    fn absorb_all(self, values: Vec<V>) {
        for value in values {
            Sink::absorb(&mut *self, value);
        }
    }
}

/// Shared target; the whole range is applied under one lock acquisition.
impl<'t, C, V> SinkTarget<V> for &'t Mutex<C>
where
    C: Sink<V>,
{
    fn absorb(self, value: V) {
        Sink::absorb(&mut *self.lock(), value);
    }

    fn absorb_all(self, values: Vec<V>) {
        let mut guard = self.lock();
        for value in values {
            Sink::absorb(&mut *guard, value);
        }
    }
}

/// Concurrent map; entries are upserted one key at a time.
impl<'t, K, V, S> SinkTarget<(K, V)> for &'t DashMap<K, V, S>
where
    K: Eq + Hash,
    S: BuildHasher + Clone,
{
    fn absorb(self, (key, value): (K, V)) {
        self.insert(key, value);
    }

    fn absorb_all(self, values: Vec<(K, V)>) {
        for (key, value) in values {
            self.insert(key, value);
        }
    }
}

/// Row-oriented table with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table<C> {
    columns: Vec<String>,
    rows: Vec<Vec<C>>,
}

impl<C: Clone + Default> Table<C> {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<C>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&C> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    /// Append a row, padding with defaults or truncating to the column count.
    pub fn push_row(&mut self, mut row: Vec<C>) {
        row.resize(self.columns.len(), C::default());
        self.rows.push(row);
    }

    pub fn with_row(mut self, row: Vec<C>) -> Self {
        self.push_row(row);
        self
    }

    /// Union columns and append `other`'s rows.
    ///
    /// Columns unknown to `self` are appended (existing rows get defaults);
    /// incoming rows are remapped by column name.
    pub fn merge(&mut self, other: Table<C>) {
        let mut columns = self.columns.clone();
        for name in &other.columns {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }

        let source_index: Vec<Option<usize>> = columns
            .iter()
            .map(|name| other.columns.iter().position(|c| c == name))
            .collect();

        let incoming: Vec<Vec<C>> = other
            .rows
            .into_iter()
            .map(|row| {
                source_index
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or_default())
                    .collect()
            })
            .collect();

        let width = columns.len();
        self.columns = columns;
        for row in &mut self.rows {
            row.resize(width, C::default());
        }
        self.rows.extend(incoming);
    }
}

fn target_name<T>() -> &'static str {
    std::any::type_name::<T>()
}

/// Run the source and reduce every non-value outcome to `None`, logging why.
async fn produce<F, Fut, V, E>(source: F, pool: Option<&PermitPool>, context: &str) -> Option<V>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    let produced = contain(run_gated(pool, source).await, context).flatten();
    let metrics = global_metrics();
    if produced.is_some() {
        metrics.increment(names::SINK_MERGED);
    } else {
        metrics.increment(names::SINK_UNCHANGED);
        debug!(target_type = context, "no value produced; target left unchanged");
    }
    produced
}

/// Append, insert or upsert one produced value into `target`.
///
/// With no target, the source is not run.
pub async fn fill<T, V, F, Fut, E>(target: Option<T>, source: F, pool: Option<&PermitPool>)
where
    T: SinkTarget<V>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    let Some(target) = target else {
        debug!(target_type = target_name::<T>(), "fill without target; skipped");
        return;
    };
    if let Some(value) = produce(source, pool, target_name::<T>()).await {
        target.absorb(value);
    }
}

/// Overwrite a single field with the produced value.
pub async fn fill_value<V, F, Fut, E>(target: Option<&mut V>, source: F, pool: Option<&PermitPool>)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    let Some(target) = target else {
        debug!(target_type = target_name::<V>(), "fill without target; skipped");
        return;
    };
    if let Some(value) = produce(source, pool, target_name::<V>()).await {
        *target = value;
    }
}

/// Merge a produced range into `target` as one update.
pub async fn fill_range<T, I, F, Fut, E>(target: Option<T>, source: F, pool: Option<&PermitPool>)
where
    I: IntoIterator,
    T: SinkTarget<I::Item>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<I>, E>>,
    E: Into<BoxError>,
{
    let Some(target) = target else {
        debug!(target_type = target_name::<T>(), "fill without target; skipped");
        return;
    };
    if let Some(range) = produce(source, pool, target_name::<T>()).await {
        let values: Vec<I::Item> = range.into_iter().collect();
        target.absorb_all(values);
    }
}

/// Upsert the produced value under `key`.
pub async fn fill_keyed<T, K, V, F, Fut, E>(
    target: Option<T>,
    key: K,
    source: F,
    pool: Option<&PermitPool>,
) where
    T: SinkTarget<(K, V)>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<V>, E>>,
    E: Into<BoxError>,
{
    let Some(target) = target else {
        debug!(target_type = target_name::<T>(), "fill without target; skipped");
        return;
    };
    if let Some(value) = produce(source, pool, target_name::<T>()).await {
        target.absorb((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TaskError;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_scalar_appends_to_vec() {
        let mut names = vec!["a".to_string()];
        fill(Some(&mut names), || async { Ok::<_, TaskError>(Some("b".to_string())) }, None).await;
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failure_leaves_set_unchanged() {
        let mut ids: HashSet<u32> = [1, 2, 3].into_iter().collect();
        let before = ids.clone();

        fill_range(Some(&mut ids), || async { Err::<Option<Vec<u32>>, _>("backend down") }, None).await;
        assert_eq!(ids, before);
    }

    #[tokio::test]
    async fn test_none_result_leaves_target_unchanged() {
        let mut slot = Some(5);
        fill(Some(&mut slot), || async { Ok::<Option<i32>, TaskError>(None) }, None).await;
        assert_eq!(slot, Some(5));

        fill(Some(&mut slot), || async { Ok::<_, TaskError>(Some(9)) }, None).await;
        assert_eq!(slot, Some(9));
    }

    #[tokio::test]
    async fn test_missing_target_does_not_run_source() {
        let ran = AtomicBool::new(false);
        let source = || async {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, TaskError>(Some(1_u8))
        };
        fill(None::<&mut Vec<u8>>, source, None).await;
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fill_value_overwrites_field() {
        let mut total = 10_u64;
        fill_value(Some(&mut total), || async { Ok::<_, TaskError>(Some(42)) }, None).await;
        assert_eq!(total, 42);
    }

    #[tokio::test]
    async fn test_keyed_upsert() {
        let mut cache: HashMap<String, u32> = HashMap::new();
        cache.insert("a".into(), 1);

        fill_keyed(Some(&mut cache), "a".to_string(), || async { Ok::<_, TaskError>(Some(2_u32)) }, None).await;
        fill_keyed(Some(&mut cache), "b".to_string(), || async { Ok::<_, TaskError>(Some(3)) }, None).await;

        assert_eq!(cache.get("a"), Some(&2));
        assert_eq!(cache.get("b"), Some(&3));
    }

    #[tokio::test]
    async fn test_bytes_chunk_appended_whole() {
        let mut buffer = b"head:".to_vec();
        fill(Some(&mut buffer), || async { Ok::<_, TaskError>(Some(b"body".to_vec())) }, None).await;
        assert_eq!(buffer, b"head:body");
    }

    #[tokio::test]
    async fn test_shared_targets() {
        let shared = Mutex::new(BTreeSet::<u32>::new());
        let pool = PermitPool::new(2);

        let fills = (0..6_u32).map(|i| {
            let shared = &shared;
            let pool = &pool;
            async move {
                let source = move || async move { Ok::<_, TaskError>(Some(vec![i, i % 3])) };
                fill_range(Some(shared), source, Some(pool)).await
            }
        });
        futures::future::join_all(fills).await;

        assert_eq!(shared.into_inner().into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pool.available(), 2);

        let map: DashMap<&str, u8> = DashMap::new();
        fill_keyed(Some(&map), "k", || async { Ok::<_, TaskError>(Some(1)) }, None).await;
        assert_eq!(*map.get("k").unwrap(), 1);
    }

    #[test]
    fn test_table_merge_unions_columns() {
        let mut table = Table::new(["id", "name"])
            .with_row(vec!["1".to_string(), "ada".to_string()]);
        let incoming = Table::new(["name", "email"])
            .with_row(vec!["grace".to_string(), "g@example.com".to_string()]);

        table.merge(incoming);

        assert_eq!(table.columns(), &["id", "name", "email"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0, "email"), Some(&String::new()));
        assert_eq!(table.get(1, "id"), Some(&String::new()));
        assert_eq!(table.get(1, "name").map(String::as_str), Some("grace"));
    }

    #[test]
    fn test_table_row_is_padded() {
        let mut table: Table<i64> = Table::new(["a", "b", "c"]);
        table.push_row(vec![1]);
        assert_eq!(table.rows()[0], vec![1, 0, 0]);
    }
}
