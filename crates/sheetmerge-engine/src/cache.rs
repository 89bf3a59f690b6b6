use crate::rewrite::{Piece, render, tokenize};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type RowKey = (u32, u32);

/// Rewritten formulas keyed by `(template, template_row, target_row)`,
/// shared by every column task of a fill pass.
///
/// Bounded: once `capacity` entries are stored, further results are
/// computed and returned but not kept. Only [`FormulaCache::clear`] (called
/// between passes) empties it.
#[derive(Debug)]
pub struct FormulaCache {
    rewrites: RwLock<FxHashMap<String, FxHashMap<RowKey, String>>>,
    // Token lists are per template, so they stay outside the bound.
    tokens: RwLock<FxHashMap<String, Arc<Vec<Piece>>>>,
    len: AtomicUsize,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl FormulaCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            rewrites: RwLock::new(FxHashMap::default()),
            tokens: RwLock::new(FxHashMap::default()),
            len: AtomicUsize::new(0),
            capacity,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn rewrite(&self, template: &str, template_row: u32, target_row: u32) -> String {
        let key = (template_row, target_row);
        if let Some(hit) = self
            .rewrites
            .read()
            .get(template)
            .and_then(|rows| rows.get(&key))
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let pieces = self.pieces(template);
        let out = render(&pieces, template_row, target_row);

        if self.len.load(Ordering::Relaxed) < self.capacity {
            let mut map = self.rewrites.write();
            if self.len.load(Ordering::Relaxed) < self.capacity {
                let inserted = match map.get_mut(template) {
                    Some(rows) => rows.insert(key, out.clone()).is_none(),
                    None => {
                        let mut rows = FxHashMap::default();
                        rows.insert(key, out.clone());
                        map.insert(template.to_string(), rows);
                        true
                    }
                };
                if inserted {
                    self.len.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        out
    }

    fn pieces(&self, template: &str) -> Arc<Vec<Piece>> {
        if let Some(p) = self.tokens.read().get(template) {
            return p.clone();
        }
        let pieces = Arc::new(tokenize(template));
        self.tokens
            .write()
            .entry(template.to_string())
            .or_insert_with(|| pieces.clone())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut map = self.rewrites.write();
        map.clear();
        self.tokens.write().clear();
        self.len.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_after_first_rewrite() {
        let cache = FormulaCache::new(10);
        assert_eq!(cache.rewrite("=A2*2", 2, 7), "=A7*2");
        assert_eq!(cache.rewrite("=A2*2", 2, 7), "=A7*2");
        assert_eq!((cache.hits(), cache.misses(), cache.len()), (1, 1, 1));
    }

    #[test]
    fn full_cache_still_answers_but_stops_growing() {
        let cache = FormulaCache::new(2);
        for row in 3..10 {
            assert_eq!(cache.rewrite("=B2", 2, row), format!("=B{row}"));
        }
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_readers_agree() {
        let cache = Arc::new(FormulaCache::new(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    (3..200)
                        .map(|r| cache.rewrite("=C2+$D$1", 2, r))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for h in handles {
            let out = h.join().unwrap();
            assert_eq!(out[0], "=C3+$D$1");
            assert_eq!(out.len(), 197);
        }
        assert_eq!(cache.len(), 197);
    }
}
