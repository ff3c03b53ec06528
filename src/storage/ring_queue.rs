use parking_lot::Mutex;

/// Fixed-capacity FIFO backed by a circular buffer.
///
/// Every operation takes the same lock and returns immediately; a full queue
/// hands the rejected item back to the caller instead of blocking.
pub struct RingQueue<T> {
    inner: Mutex<Ring<T>>,
    capacity: usize,
}

struct Ring<T> {
    items: Vec<Option<T>>,
    head: usize,
    tail: usize,
    size: usize,
}

impl<T: Clone> RingQueue<T> {
    /// Creates an empty queue. A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut items = Vec::with_capacity(capacity);
        items.resize_with(capacity, || None);
        Self {
            inner: Mutex::new(Ring {
                items,
                head: 0,
                tail: 0,
                size: 0,
            }),
            capacity,
        }
    }

    /// Appends `item` at the tail. Returns `Err(item)` untouched when full.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut ring = self.inner.lock();
        if ring.size == self.capacity {
            return Err(item);
        }
        let tail = ring.tail;
        ring.items[tail] = Some(item);
        ring.tail = (tail + 1) % self.capacity;
        ring.size += 1;
        Ok(())
    }

    /// Removes and returns the oldest item.
    pub fn dequeue(&self) -> Option<T> {
        let mut ring = self.inner.lock();
        if ring.size == 0 {
            return None;
        }
        let head = ring.head;
        let item = ring.items[head].take();
        ring.head = (head + 1) % self.capacity;
        ring.size -= 1;
        item
    }

    /// Returns a copy of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        let ring = self.inner.lock();
        if ring.size == 0 {
            return None;
        }
        ring.items[ring.head].clone()
    }

    /// Removes everything, returning the items oldest-first.
    pub fn drain(&self) -> Vec<T> {
        let mut ring = self.inner.lock();
        let mut out = Vec::with_capacity(ring.size);
        while ring.size > 0 {
            let head = ring.head;
            if let Some(item) = ring.items[head].take() {
                out.push(item);
            }
            ring.head = (head + 1) % self.capacity;
            ring.size -= 1;
        }
        ring.head = 0;
        ring.tail = 0;
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots still free.
    pub fn free_capacity(&self) -> usize {
        self.capacity - self.len()
    }
}
