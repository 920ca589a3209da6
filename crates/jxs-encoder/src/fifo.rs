/*
 * Copyright (c) 2023.
 *
 * This software is free software;
 *
 * You can redistribute it or modify it under terms of the MIT, Apache License or Zlib license
 */

//! Pooled object queues connecting the pipeline stages.
//!
//! A [`SystemResource`] pairs a fixed pool of objects with an empty
//! ring (producer side) and a full ring (consumer side). Producers
//! draw an empty object, fill it and post it full; consumers draw full
//! objects and release them back to the empty ring. One mutex guards
//! both rings, one condvar per side provides the wait primitive.
//!
//! The only terminal condition is [`shutdown`](SystemResource::shutdown):
//! afterwards every parked or future call returns
//! [`EncodeErrors::FifoShutdown`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::errors::EncodeErrors;

struct Rings {
    empty: VecDeque<u32>,
    full:  VecDeque<u32>,
    /// Reference counts of handed-out objects; releasing at zero is a
    /// programming error
    live: Vec<u32>,
    quit: bool
}

pub struct SystemResource<T> {
    objects:    Vec<T>,
    rings:      Mutex<Rings>,
    empty_cond: Condvar,
    full_cond:  Condvar
}

impl<T> SystemResource<T> {
    pub fn new(count: usize, mut creator: impl FnMut(usize) -> T) -> SystemResource<T> {
        SystemResource {
            objects:    (0..count).map(&mut creator).collect(),
            rings:      Mutex::new(Rings {
                empty: (0..count as u32).collect(),
                full:  VecDeque::with_capacity(count),
                live:  vec![0; count],
                quit:  false
            }),
            empty_cond: Condvar::new(),
            full_cond:  Condvar::new()
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Shared access to a pooled object. Interior synchronization of
    /// the object itself is up to `T`.
    pub fn obj(&self, idx: u32) -> &T {
        &self.objects[idx as usize]
    }

    /// Block until an empty object is available.
    pub fn get_empty(&self) -> Result<u32, EncodeErrors> {
        let mut rings = self.rings.lock().unwrap();
        loop {
            if rings.quit {
                return Err(EncodeErrors::FifoShutdown);
            }
            if let Some(idx) = rings.empty.pop_front() {
                rings.live[idx as usize] = 1;
                return Ok(idx);
            }
            rings = self.empty_cond.wait(rings).unwrap();
        }
    }

    pub fn get_empty_non_blocking(&self) -> Result<Option<u32>, EncodeErrors> {
        let mut rings = self.rings.lock().unwrap();
        if rings.quit {
            return Err(EncodeErrors::FifoShutdown);
        }
        let idx = rings.empty.pop_front();
        if let Some(idx) = idx {
            rings.live[idx as usize] = 1;
        }
        Ok(idx)
    }

    /// Route a filled object to the consumer side, waking one waiter.
    pub fn post_full(&self, idx: u32) {
        let mut rings = self.rings.lock().unwrap();
        rings.full.push_back(idx);
        drop(rings);
        self.full_cond.notify_one();
    }

    /// Block until a full object is available.
    pub fn get_full(&self) -> Result<u32, EncodeErrors> {
        let mut rings = self.rings.lock().unwrap();
        loop {
            if rings.quit {
                return Err(EncodeErrors::FifoShutdown);
            }
            if let Some(idx) = rings.full.pop_front() {
                return Ok(idx);
            }
            rings = self.full_cond.wait(rings).unwrap();
        }
    }

    pub fn get_full_non_blocking(&self) -> Result<Option<u32>, EncodeErrors> {
        let mut rings = self.rings.lock().unwrap();
        if rings.quit {
            return Err(EncodeErrors::FifoShutdown);
        }
        Ok(rings.full.pop_front())
    }

    /// Pin an object to `count` owners; [`release`](Self::release)
    /// returns it to the empty ring once all owners are done.
    pub fn set_live_count(&self, idx: u32, count: u32) {
        let mut rings = self.rings.lock().unwrap();
        rings.live[idx as usize] = count;
    }

    /// Drop one reference; the last one pushes the object to the front
    /// of the empty ring and wakes one producer.
    pub fn release(&self, idx: u32) {
        let mut rings = self.rings.lock().unwrap();
        debug_assert!(rings.live[idx as usize] > 0, "double release of pooled object");
        rings.live[idx as usize] = rings.live[idx as usize].saturating_sub(1);
        if rings.live[idx as usize] == 0 {
            rings.empty.push_front(idx);
            drop(rings);
            self.empty_cond.notify_one();
        }
    }

    /// Wake everything; all subsequent operations fail with
    /// [`EncodeErrors::FifoShutdown`].
    pub fn shutdown(&self) {
        let mut rings = self.rings.lock().unwrap();
        rings.quit = true;
        drop(rings);
        self.empty_cond.notify_all();
        self.full_cond.notify_all();
    }
}

/// Condvar-guarded counter, the free-slot signal of the reorder ring.
pub struct CondCounter {
    value: Mutex<(i64, bool)>,
    cond:  Condvar
}

impl CondCounter {
    pub fn new(initial: i64) -> CondCounter {
        CondCounter {
            value: Mutex::new((initial, false)),
            cond:  Condvar::new()
        }
    }

    /// Block until the counter is positive, then take one.
    pub fn acquire(&self) -> Result<(), EncodeErrors> {
        let mut guard = self.value.lock().unwrap();
        loop {
            if guard.1 {
                return Err(EncodeErrors::FifoShutdown);
            }
            if guard.0 > 0 {
                guard.0 -= 1;
                return Ok(());
            }
            guard = self.cond.wait(guard).unwrap();
        }
    }

    /// Give one back, waking one waiter.
    pub fn release(&self) {
        let mut guard = self.value.lock().unwrap();
        guard.0 += 1;
        drop(guard);
        self.cond.notify_one();
    }

    pub fn shutdown(&self) {
        let mut guard = self.value.lock().unwrap();
        guard.1 = true;
        drop(guard);
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::errors::EncodeErrors;
    use crate::fifo::{CondCounter, SystemResource};

    #[test]
    fn empty_ring_starts_full() {
        let res: SystemResource<u32> = SystemResource::new(3, |i| i as u32);
        assert_eq!(res.get_empty().unwrap(), 0);
        assert_eq!(res.get_empty().unwrap(), 1);
        assert_eq!(res.get_empty().unwrap(), 2);
        assert_eq!(res.get_empty_non_blocking().unwrap(), None);
    }

    #[test]
    fn release_returns_to_front() {
        let res: SystemResource<u32> = SystemResource::new(2, |i| i as u32);
        let a = res.get_empty().unwrap();
        let _b = res.get_empty().unwrap();
        res.release(a);
        // the released object comes back first
        assert_eq!(res.get_empty().unwrap(), a);
    }

    #[test]
    fn live_count_defers_release() {
        let res: SystemResource<u32> = SystemResource::new(1, |i| i as u32);
        let idx = res.get_empty().unwrap();
        res.set_live_count(idx, 3);
        res.release(idx);
        res.release(idx);
        assert_eq!(res.get_empty_non_blocking().unwrap(), None);
        res.release(idx);
        assert_eq!(res.get_empty_non_blocking().unwrap(), Some(idx));
    }

    #[test]
    fn full_queue_crosses_threads() {
        let res: Arc<SystemResource<AtomicU32>> =
            Arc::new(SystemResource::new(4, |_| AtomicU32::new(0)));
        let consumer = {
            let res = res.clone();
            thread::spawn(move || {
                let mut sum = 0;
                for _ in 0..16 {
                    let idx = res.get_full().unwrap();
                    sum += res.obj(idx).load(Ordering::Relaxed);
                    res.release(idx);
                }
                sum
            })
        };

        for v in 1..=16 {
            let idx = res.get_empty().unwrap();
            res.obj(idx).store(v, Ordering::Relaxed);
            res.post_full(idx);
        }
        assert_eq!(consumer.join().unwrap(), (1..=16).sum::<u32>());
    }

    #[test]
    fn shutdown_wakes_parked_consumers() {
        let res: Arc<SystemResource<u32>> = Arc::new(SystemResource::new(1, |i| i as u32));
        let parked = {
            let res = res.clone();
            thread::spawn(move || res.get_full())
        };
        thread::sleep(Duration::from_millis(20));
        res.shutdown();
        assert_eq!(parked.join().unwrap(), Err(EncodeErrors::FifoShutdown));
        assert_eq!(res.get_empty(), Err(EncodeErrors::FifoShutdown));
    }

    #[test]
    fn cond_counter_blocks_at_zero() {
        let counter = Arc::new(CondCounter::new(1));
        counter.acquire().unwrap();

        let waiter = {
            let counter = counter.clone();
            thread::spawn(move || counter.acquire())
        };
        thread::sleep(Duration::from_millis(20));
        counter.release();
        assert!(waiter.join().unwrap().is_ok());
    }
}
