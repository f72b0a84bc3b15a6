//! Merge-join differencing of two key-ordered row streams

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::schema::types::Key;
use crate::sync::classifier::{classify, ChangeType};
use crate::sync::cursor::{HashedRow, RowCursor};

/// Keys that differ between source and destination, by change type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    inserts: BTreeSet<Key>,
    updates: BTreeSet<Key>,
    deletes: BTreeSet<Key>,
    steps: u64,
}

/// Number of keys per change type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one classification step
    pub fn record(&mut self, change: ChangeType, key: Key) {
        self.steps += 1;
        match change {
            ChangeType::Insert => {
                self.inserts.insert(key);
            }
            ChangeType::Update => {
                self.updates.insert(key);
            }
            ChangeType::Delete => {
                self.deletes.insert(key);
            }
            ChangeType::None => {}
        }
    }

    pub fn inserts(&self) -> &BTreeSet<Key> {
        &self.inserts
    }

    pub fn updates(&self) -> &BTreeSet<Key> {
        &self.updates
    }

    pub fn deletes(&self) -> &BTreeSet<Key> {
        &self.deletes
    }

    /// Classification steps taken, unchanged rows included
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            inserts: self.inserts.len(),
            updates: self.updates.len(),
            deletes: self.deletes.len(),
        }
    }
}

/// Rejects a stream whose keys stop increasing
struct OrderGuard {
    side: &'static str,
    last: Option<Key>,
}

impl OrderGuard {
    fn new(side: &'static str) -> Self {
        Self { side, last: None }
    }

    fn observe(&mut self, current: Option<&HashedRow>) -> Result<()> {
        let Some(row) = current else {
            return Ok(());
        };

        if let Some(last) = &self.last {
            if row.key <= *last {
                return Err(Error::UnorderedStream {
                    side: self.side,
                    detail: format!("key {} follows {}", row.key, last),
                });
            }
        }
        self.last = Some(row.key.clone());
        Ok(())
    }
}

/// Key order of the two cursor positions; an exhausted cursor sorts last
fn position(source: Option<&HashedRow>, destination: Option<&HashedRow>) -> Ordering {
    match (source, destination) {
        (Some(src), Some(dst)) => src.key.cmp(&dst.key),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Walk both cursors in lock-step and collect every differing key.
///
/// Both cursors must be positioned before their first row and yield rows in
/// strictly increasing key order under the same ordering.
pub async fn diff<S, D>(source: &mut S, destination: &mut D) -> Result<Changeset>
where
    S: RowCursor + ?Sized,
    D: RowCursor + ?Sized,
{
    let mut changeset = Changeset::new();
    let mut source_order = OrderGuard::new("source");
    let mut destination_order = OrderGuard::new("destination");

    source.advance().await?;
    source_order.observe(source.current())?;
    destination.advance().await?;
    destination_order.observe(destination.current())?;

    loop {
        let (advance_source, advance_destination) = {
            let src = source.current();
            let dst = destination.current();
            if src.is_none() && dst.is_none() {
                break;
            }

            let change = classify(src, dst)?;
            let authoritative = match change {
                ChangeType::Delete => dst,
                _ => src,
            };
            let key = authoritative.map(|row| row.key.clone()).ok_or_else(|| {
                Error::ClassifierDefect(format!("{} classified without a row to key it", change))
            })?;
            changeset.record(change, key);

            match position(src, dst) {
                Ordering::Less => (true, false),
                Ordering::Greater => (false, true),
                Ordering::Equal => (true, true),
            }
        };

        if advance_source {
            source.advance().await?;
            source_order.observe(source.current())?;
        }
        if advance_destination {
            destination.advance().await?;
            destination_order.observe(destination.current())?;
        }
    }

    tracing::trace!(steps = changeset.steps(), "Merge join finished");
    Ok(changeset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::value::Value;
    use crate::sync::cursor::MemoryCursor;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn key(id: i64) -> Key {
        Key::new(vec![Value::Int(id)])
    }

    fn rows(entries: &[(i64, &str)]) -> MemoryCursor {
        MemoryCursor::new(
            entries
                .iter()
                .map(|(id, content)| HashedRow::new(key(*id), content.as_bytes().to_vec()))
                .collect(),
        )
    }

    fn keys(ids: &[i64]) -> BTreeSet<Key> {
        ids.iter().map(|id| key(*id)).collect()
    }

    #[tokio::test]
    async fn classifies_inserts_updates_and_deletes() {
        let mut source = rows(&[(1, "a"), (2, "b"), (3, "c")]);
        let mut destination = rows(&[(2, "b"), (3, "x"), (4, "d")]);

        let changeset = diff(&mut source, &mut destination).await.unwrap();

        assert_eq!(changeset.inserts(), &keys(&[1]));
        assert_eq!(changeset.updates(), &keys(&[3]));
        assert_eq!(changeset.deletes(), &keys(&[4]));
        assert_eq!(changeset.steps(), 4);
    }

    #[tokio::test]
    async fn empty_source_deletes_everything() {
        let mut source = rows(&[]);
        let mut destination = rows(&[(1, "a"), (2, "b")]);

        let changeset = diff(&mut source, &mut destination).await.unwrap();

        assert!(changeset.inserts().is_empty());
        assert!(changeset.updates().is_empty());
        assert_eq!(changeset.deletes(), &keys(&[1, 2]));
    }

    #[tokio::test]
    async fn identical_sides_give_empty_changeset() {
        let mut source = rows(&[(1, "a"), (2, "b"), (5, "e")]);
        let mut destination = rows(&[(1, "a"), (2, "b"), (5, "e")]);

        let changeset = diff(&mut source, &mut destination).await.unwrap();

        assert!(changeset.is_empty());
        assert_eq!(changeset.steps(), 3);
        assert_eq!(changeset.counts(), ChangeCounts::default());
    }

    #[tokio::test]
    async fn both_empty_takes_no_steps() {
        let changeset = diff(&mut rows(&[]), &mut rows(&[])).await.unwrap();
        assert!(changeset.is_empty());
        assert_eq!(changeset.steps(), 0);
    }

    #[tokio::test]
    async fn out_of_order_stream_is_rejected() {
        let mut source = rows(&[(1, "a"), (3, "c"), (2, "b")]);
        let mut destination = rows(&[(1, "a")]);

        let result = diff(&mut source, &mut destination).await;

        assert!(matches!(
            result,
            Err(Error::UnorderedStream { side: "source", .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected() {
        let mut source = rows(&[(1, "a")]);
        let mut destination = rows(&[(1, "a"), (1, "b")]);

        let result = diff(&mut source, &mut destination).await;

        assert!(matches!(
            result,
            Err(Error::UnorderedStream { side: "destination", .. })
        ));
    }

    #[tokio::test]
    async fn works_through_trait_objects() {
        let mut source: Box<dyn RowCursor> = Box::new(rows(&[(1, "a")]));
        let mut destination: Box<dyn RowCursor> = Box::new(rows(&[]));

        let changeset = diff(source.as_mut(), destination.as_mut()).await.unwrap();
        assert_eq!(changeset.inserts(), &keys(&[1]));
    }

    /// Random sides drawn from one key space with some content changed
    fn random_sides(rng: &mut StdRng) -> (BTreeMap<i64, u8>, BTreeMap<i64, u8>) {
        let mut source = BTreeMap::new();
        let mut destination = BTreeMap::new();
        for id in 0..rng.gen_range(0..200) {
            let content: u8 = rng.gen_range(0..4);
            match rng.gen_range(0..4) {
                0 => {
                    source.insert(id, content);
                }
                1 => {
                    destination.insert(id, content);
                }
                2 => {
                    source.insert(id, content);
                    destination.insert(id, content);
                }
                _ => {
                    source.insert(id, content);
                    destination.insert(id, rng.gen_range(0..4));
                }
            }
        }
        (source, destination)
    }

    fn cursor(side: &BTreeMap<i64, u8>) -> MemoryCursor {
        MemoryCursor::new(
            side.iter()
                .map(|(id, content)| HashedRow::new(key(*id), vec![*content]))
                .collect(),
        )
    }

    #[tokio::test]
    async fn every_difference_is_found_once_within_m_plus_n_steps() {
        let mut rng = StdRng::seed_from_u64(0x7ab1e);

        for _ in 0..50 {
            let (source, destination) = random_sides(&mut rng);

            let changeset = diff(&mut cursor(&source), &mut cursor(&destination))
                .await
                .unwrap();

            let expected_inserts: BTreeSet<Key> = source
                .keys()
                .filter(|id| !destination.contains_key(*id))
                .map(|id| key(*id))
                .collect();
            let expected_deletes: BTreeSet<Key> = destination
                .keys()
                .filter(|id| !source.contains_key(*id))
                .map(|id| key(*id))
                .collect();
            let expected_updates: BTreeSet<Key> = source
                .iter()
                .filter(|(id, content)| destination.get(*id).is_some_and(|other| other != *content))
                .map(|(id, _)| key(*id))
                .collect();

            assert_eq!(changeset.inserts(), &expected_inserts);
            assert_eq!(changeset.deletes(), &expected_deletes);
            assert_eq!(changeset.updates(), &expected_updates);
            assert!(changeset.steps() <= (source.len() + destination.len()) as u64);
        }
    }
}
