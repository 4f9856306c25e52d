/// Fixed-capacity FIFO that overwrites its oldest entry when full.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    buf: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let mut buf = Vec::with_capacity(capacity);
        buf.resize_with(capacity, || None);
        Self {
            buf,
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Appends `value`, handing back the evicted oldest entry when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        let idx = (self.head + self.len) % cap;

        if self.len < cap {
            self.buf[idx] = Some(value);
            self.len += 1;
            None
        } else {
            let evicted = self.buf[self.head].take();
            self.buf[self.head] = Some(value);
            self.head = (self.head + 1) % cap;
            evicted
        }
    }

    /// Removes and returns the oldest entry.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let value = self.buf[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        value
    }

    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        while let Some(value) = self.pop() {
            out.push(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_evicts_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        assert!(rb.is_empty());

        assert_eq!(rb.push(1), None);
        assert_eq!(rb.push(2), None);
        assert_eq!(rb.push(3), None);
        assert!(rb.is_full());

        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.len(), 3);
        assert_eq!(rb.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn pop_is_fifo_across_wraparound() {
        let mut rb = RingBuffer::new(2);
        rb.push("a");
        rb.push("b");
        rb.push("c");

        assert_eq!(rb.pop(), Some("b"));
        rb.push("d");
        assert_eq!(rb.pop(), Some("c"));
        assert_eq!(rb.pop(), Some("d"));
        assert_eq!(rb.pop(), None);
        assert!(rb.is_empty());
    }

    #[test]
    fn drain_empties_in_order() {
        let mut rb = RingBuffer::new(4);
        for i in 0..6 {
            rb.push(i);
        }
        assert_eq!(rb.drain(), vec![2, 3, 4, 5]);
        assert_eq!(rb.len(), 0);
    }
}
