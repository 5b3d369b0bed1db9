//! Bounded single-producer / single-consumer ring.
//!
//! Both the record and play caches stream blocks through one of these. The
//! producer half and consumer half can live on different threads; neither
//! side ever blocks or allocates after construction.

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

/// Create a ring holding at most `capacity` items.
pub fn bounded<T>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
    let (prod, cons) = HeapRb::<T>::new(capacity.max(1)).split();
    (RingProducer { prod }, RingConsumer { cons })
}

/// Write half.
pub struct RingProducer<T> {
    prod: HeapProd<T>,
}

impl<T> RingProducer<T> {
    /// Enqueue `item`, handing it back when the ring is full.
    #[inline]
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        self.prod.try_push(item)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.prod.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.prod.is_empty()
    }

    #[inline]
    pub fn vacant(&self) -> usize {
        self.prod.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.prod.capacity().get()
    }
}

/// Read half.
pub struct RingConsumer<T> {
    cons: HeapCons<T>,
}

impl<T> RingConsumer<T> {
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        self.cons.try_pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    #[inline]
    pub fn vacant(&self) -> usize {
        self.cons.vacant_len()
    }

    pub fn capacity(&self) -> usize {
        self.cons.capacity().get()
    }

    /// Drop every queued item. Returns how many were discarded.
    pub fn clear(&mut self) -> usize {
        let mut count = 0;
        while self.cons.try_pop().is_some() {
            count += 1;
        }
        count
    }
}
