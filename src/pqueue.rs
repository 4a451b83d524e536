use rustc_hash::FxHashMap;

/// Priority queue keyed by move gain, with the operation set the k-way
/// searcher needs: keyed insertion, key updates and deletion by vertex id.
///
/// Two implementations behind one tagged type: a generic indexed binary
/// max-heap, and a bucket queue for integer gains bounded by the maximum
/// weighted vertex degree (selected with `use_bucket_queues`).
pub enum RefinementQueue {
    Heap(MaxNodeHeap),
    Bucket(BucketQueue),
}

impl RefinementQueue {
    pub fn new(use_bucket_queue: bool, max_degree: i64) -> Self {
        if use_bucket_queue {
            RefinementQueue::Bucket(BucketQueue::new(max_degree))
        } else {
            RefinementQueue::Heap(MaxNodeHeap::new())
        }
    }

    pub fn insert(&mut self, node: usize, key: i64) {
        match self {
            RefinementQueue::Heap(queue) => queue.insert(node, key),
            RefinementQueue::Bucket(queue) => queue.insert(node, key),
        }
    }

    pub fn change_key(&mut self, node: usize, key: i64) {
        match self {
            RefinementQueue::Heap(queue) => queue.change_key(node, key),
            RefinementQueue::Bucket(queue) => queue.change_key(node, key),
        }
    }

    /// Key of the current maximum. Only valid on a non-empty queue.
    pub fn max_value(&self) -> i64 {
        match self {
            RefinementQueue::Heap(queue) => queue.max_value(),
            RefinementQueue::Bucket(queue) => queue.max_value(),
        }
    }

    /// Remove and return a vertex with maximal key.
    pub fn delete_max(&mut self) -> usize {
        match self {
            RefinementQueue::Heap(queue) => queue.delete_max(),
            RefinementQueue::Bucket(queue) => queue.delete_max(),
        }
    }

    pub fn delete_node(&mut self, node: usize) {
        match self {
            RefinementQueue::Heap(queue) => queue.delete_node(node),
            RefinementQueue::Bucket(queue) => queue.delete_node(node),
        }
    }

    pub fn contains(&self, node: usize) -> bool {
        match self {
            RefinementQueue::Heap(queue) => queue.contains(node),
            RefinementQueue::Bucket(queue) => queue.contains(node),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        match self {
            RefinementQueue::Heap(queue) => queue.len(),
            RefinementQueue::Bucket(queue) => queue.len(),
        }
    }

    pub fn clear(&mut self) {
        match self {
            RefinementQueue::Heap(queue) => queue.clear(),
            RefinementQueue::Bucket(queue) => queue.clear(),
        }
    }
}

/// Indexed binary max-heap. After inserting a (node, key) pair the node can
/// be re-keyed or removed through the locator map in O(log n).
pub struct MaxNodeHeap {
    heap: Vec<(i64, usize)>,
    locator: FxHashMap<usize, usize>,
}

impl MaxNodeHeap {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            locator: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, node: usize, key: i64) {
        debug_assert!(!self.contains(node));
        self.heap.push((key, node));
        let last = self.heap.len() - 1;
        self.locator.insert(node, last);
        self.sift_up(last);
    }

    pub fn change_key(&mut self, node: usize, key: i64) {
        let position = self.locator[&node];
        let old_key = self.heap[position].0;
        self.heap[position].0 = key;
        if key > old_key {
            self.sift_up(position);
        } else if key < old_key {
            self.sift_down(position);
        }
    }

    pub fn max_value(&self) -> i64 {
        self.heap[0].0
    }

    pub fn delete_max(&mut self) -> usize {
        let (_, node) = self.heap[0];
        self.remove_at(0);
        node
    }

    pub fn delete_node(&mut self, node: usize) {
        let position = self.locator[&node];
        self.remove_at(position);
    }

    pub fn contains(&self, node: usize) -> bool {
        self.locator.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.locator.clear();
    }

    fn remove_at(&mut self, position: usize) {
        let (_, node) = self.heap[position];
        self.locator.remove(&node);
        let last = self.heap.len() - 1;
        if position == last {
            self.heap.pop();
            return;
        }
        self.heap.swap(position, last);
        self.heap.pop();
        let moved = self.heap[position].1;
        self.locator.insert(moved, position);
        self.sift_down(position);
        self.sift_up(position);
    }

    fn sift_up(&mut self, mut position: usize) {
        while position > 0 {
            let parent = (position - 1) / 2;
            if self.heap[position].0 <= self.heap[parent].0 {
                break;
            }
            self.swap_entries(position, parent);
            position = parent;
        }
    }

    fn sift_down(&mut self, mut position: usize) {
        loop {
            let left = 2 * position + 1;
            let right = 2 * position + 2;
            let mut largest = position;
            if left < self.heap.len() && self.heap[left].0 > self.heap[largest].0 {
                largest = left;
            }
            if right < self.heap.len() && self.heap[right].0 > self.heap[largest].0 {
                largest = right;
            }
            if largest == position {
                break;
            }
            self.swap_entries(position, largest);
            position = largest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.locator.insert(self.heap[a].1, a);
        self.locator.insert(self.heap[b].1, b);
    }
}

/// Bucket priority queue for integer keys in `[-max_key, max_key]`.
/// Insertion, key change and deletion are O(1) amortized; the maximum is
/// tracked by a pointer that only ever scans downwards between insertions.
pub struct BucketQueue {
    buckets: Vec<Vec<usize>>,
    locator: FxHashMap<usize, (usize, usize)>,
    offset: i64,
    max_bucket: usize,
}

impl BucketQueue {
    pub fn new(max_key: i64) -> Self {
        let max_key = max_key.max(0);
        Self {
            buckets: vec![Vec::new(); 2 * max_key as usize + 1],
            locator: FxHashMap::default(),
            offset: max_key,
            max_bucket: 0,
        }
    }

    pub fn insert(&mut self, node: usize, key: i64) {
        debug_assert!(!self.contains(node));
        let bucket = self.bucket_of(key);
        self.buckets[bucket].push(node);
        self.locator.insert(node, (bucket, self.buckets[bucket].len() - 1));
        if self.locator.len() == 1 || bucket > self.max_bucket {
            self.max_bucket = bucket;
        }
    }

    pub fn change_key(&mut self, node: usize, key: i64) {
        self.delete_node(node);
        self.insert(node, key);
    }

    pub fn max_value(&self) -> i64 {
        debug_assert!(!self.buckets[self.max_bucket].is_empty());
        self.max_bucket as i64 - self.offset
    }

    pub fn delete_max(&mut self) -> usize {
        debug_assert!(self.len() > 0);
        let bucket = self.max_bucket;
        let node = self.buckets[bucket].pop().unwrap();
        self.locator.remove(&node);
        self.descend_max();
        node
    }

    pub fn delete_node(&mut self, node: usize) {
        let (bucket, position) = self.locator.remove(&node).unwrap();
        self.buckets[bucket].swap_remove(position);
        if let Some(&displaced) = self.buckets[bucket].get(position) {
            self.locator.insert(displaced, (bucket, position));
        }
        self.descend_max();
    }

    pub fn contains(&self, node: usize) -> bool {
        self.locator.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.locator.len()
    }

    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.locator.clear();
        self.max_bucket = 0;
    }

    fn bucket_of(&self, key: i64) -> usize {
        let index = key + self.offset;
        debug_assert!(index >= 0 && (index as usize) < self.buckets.len());
        index as usize
    }

    fn descend_max(&mut self) {
        while self.max_bucket > 0 && self.buckets[self.max_bucket].is_empty() {
            self.max_bucket -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_queue(mut queue: RefinementQueue) {
        // Arrange
        queue.insert(4, -2);
        queue.insert(7, 5);
        queue.insert(1, 0);
        assert_eq!(queue.len(), 3);

        // Act and Assert: maximum first
        assert_eq!(queue.max_value(), 5);
        assert_eq!(queue.delete_max(), 7);

        // re-keying moves a node past the current maximum
        queue.change_key(4, 9);
        assert_eq!(queue.max_value(), 9);
        assert_eq!(queue.delete_max(), 4);

        // deletion by id leaves the queue empty
        assert!(queue.contains(1));
        queue.delete_node(1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_max_node_heap_operations() {
        exercise_queue(RefinementQueue::new(false, 10));
    }

    #[test]
    fn test_bucket_queue_operations() {
        exercise_queue(RefinementQueue::new(true, 10));
    }

    #[test]
    fn test_heap_orders_many_keys() {
        // Arrange
        let mut queue = MaxNodeHeap::new();
        for (node, key) in [(0, 3), (1, -1), (2, 8), (3, 0), (4, 8)] {
            queue.insert(node, key);
        }

        // Act
        let mut popped = Vec::new();
        while queue.len() > 0 {
            let key = queue.max_value();
            popped.push((key, queue.delete_max()));
        }

        // Assert: keys come out non-increasing
        let keys: Vec<i64> = popped.iter().map(|(key, _)| *key).collect();
        assert_eq!(keys, vec![8, 8, 3, 0, -1]);
    }

    #[test]
    fn test_bucket_queue_clear_resets_state() {
        // Arrange
        let mut queue = BucketQueue::new(4);
        queue.insert(0, 4);
        queue.insert(1, -4);

        // Act
        queue.clear();
        queue.insert(2, -1);

        // Assert
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.max_value(), -1);
        assert_eq!(queue.delete_max(), 2);
    }

    #[test]
    fn test_heap_change_key_downwards() {
        // Arrange
        let mut queue = MaxNodeHeap::new();
        queue.insert(0, 10);
        queue.insert(1, 5);

        // Act
        queue.change_key(0, 1);

        // Assert
        assert_eq!(queue.delete_max(), 1);
        assert_eq!(queue.delete_max(), 0);
    }
}
