use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry. The sequence number breaks ties so that entries with equal keys pop in
/// insertion order.
#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    seq: u64,
    value: V,
}

impl<K: Ord, V> Ord for Entry<K, V> {
    fn cmp(&self, other: &Self) -> Ordering {
        // note: reversed arguments, `BinaryHeap` is a max-heap
        Ord::cmp(&other.key, &self.key).then_with(|| Ord::cmp(&other.seq, &self.seq))
    }
}

impl<K: Ord, V> PartialOrd for Entry<K, V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(Ord::cmp(self, other))
    }
}

impl<K: Ord, V> Eq for Entry<K, V> {}
impl<K: Ord, V> PartialEq for Entry<K, V> {
    fn eq(&self, other: &Self) -> bool {
        Ord::cmp(self, other) == Ordering::Equal
    }
}

/// Min-queue: values come out ordered by key, smallest first, FIFO among equal keys.
#[derive(Debug, Clone)]
pub struct OrderedQueue<K, V> {
    heap: BinaryHeap<Entry<K, V>>,
    next_seq: u64,
}

impl<K, V> OrderedQueue<K, V>
where
    K: Ord,
{
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, key: K, value: V) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { key, seq, value });
    }

    pub fn pop_min(&mut self) -> Option<(K, V)> {
        self.heap.pop().map(|e| (e.key, e.value))
    }

    /// Pops the smallest entry, but only if its key satisfies `pred`.
    pub fn pop_min_if<P>(&mut self, pred: P) -> Option<(K, V)>
    where
        P: FnOnce(&K) -> bool,
    {
        match self.heap.peek() {
            Some(e) if pred(&e.key) => self.pop_min(),
            _ => None,
        }
    }

    pub fn peek_min(&self) -> Option<(&K, &V)> {
        self.heap.peek().map(|e| (&e.key, &e.value))
    }

    /// Keeps only the entries for which `keep` returns `true`. Returns the number of entries
    /// removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let before = self.heap.len();
        self.heap.retain(|e| keep(&e.key, &e.value));
        before - self.heap.len()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
        self.heap.drain().map(|e| (e.key, e.value))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<K: Ord, V> Default for OrderedQueue<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
