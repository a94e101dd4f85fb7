use std::collections::{BinaryHeap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use engine_types::EngineError;

struct FifoState<T> {
    items: VecDeque<T>,
    shutting_down: bool,
    unfinished_tasks: usize,
}

/// A thread-safe FIFO queue with cooperative shutdown.
///
/// Every blocked waiter is woken on shutdown (via `Condvar::notify_all`),
/// giving an "every waiter eventually observes `Shutdown`" guarantee
/// without needing a sentinel item type threaded back through the queue.
pub struct Queue<T> {
    state: Mutex<FifoState<T>>,
    not_empty: Condvar,
    all_done: Condvar,
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FifoState {
                items: VecDeque::new(),
                shutting_down: false,
                unfinished_tasks: 0,
            }),
            not_empty: Condvar::new(),
            all_done: Condvar::new(),
        }
    }

    pub fn put(&self, item: T) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.shutting_down {
            return Err(EngineError::Shutdown);
        }
        state.items.push_back(item);
        state.unfinished_tasks += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn get(&self) -> Result<T, EngineError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.shutting_down {
                return Err(EngineError::Shutdown);
            }
            state = self.not_empty.wait(state).expect("queue mutex poisoned");
        }
    }

    /// Blocks until the queue is non-empty or shut down, returning a clone
    /// of the head item without removing it. Useful for a consumer that
    /// needs to keep an item visible to other readers while it works on it,
    /// only removing it once that work completes.
    pub fn peek(&self) -> Result<T, EngineError>
    where
        T: Clone,
    {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(item) = state.items.front() {
                return Ok(item.clone());
            }
            if state.shutting_down {
                return Err(EngineError::Shutdown);
            }
            state = self.not_empty.wait(state).expect("queue mutex poisoned");
        }
    }

    pub fn shutdown(&self, immediately: bool) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.shutting_down {
            tracing::warn!("queue already shut down");
        }
        state.shutting_down = true;
        if immediately {
            let drained = state.items.len();
            state.items.clear();
            state.unfinished_tasks = state.unfinished_tasks.saturating_sub(drained);
        }
        self.not_empty.notify_all();
        self.all_done.notify_all();
    }

    pub fn empty(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").items.is_empty()
    }

    pub fn task_done(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.unfinished_tasks = state.unfinished_tasks.saturating_sub(1);
        if state.unfinished_tasks == 0 {
            self.all_done.notify_all();
        }
    }

    pub fn join(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        while state.unfinished_tasks > 0 {
            state = self.all_done.wait(state).expect("queue mutex poisoned");
        }
    }
}

struct PriorityEntry<T> {
    priority: i64,
    seq: u64,
    item: T,
}

impl<T> PartialEq for PriorityEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for PriorityEntry<T> {}

impl<T> PartialOrd for PriorityEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PriorityEntry<T> {
    /// Reversed so that `BinaryHeap` (a max-heap) pops the *lowest*
    /// priority number first, with ties broken by earliest insertion
    /// (lowest `seq`) — matching `priority:int, lower = sooner`.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct PriorityState<T> {
    items: BinaryHeap<PriorityEntry<T>>,
    shutting_down: bool,
    unfinished_tasks: usize,
}

/// A thread-safe priority queue with cooperative shutdown.
///
/// Orders by `(priority, insertion-sequence)` so ties break by FIFO. An
/// unset priority is modeled by callers passing `i64::MAX`, which always
/// sorts after any event-declared priority.
pub struct PriorityQueue<T> {
    state: Mutex<PriorityState<T>>,
    not_empty: Condvar,
    all_done: Condvar,
    next_seq: AtomicU64,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PriorityState {
                items: BinaryHeap::new(),
                shutting_down: false,
                unfinished_tasks: 0,
            }),
            not_empty: Condvar::new(),
            all_done: Condvar::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn put(&self, item: T, priority: i64) -> Result<(), EngineError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.shutting_down {
            return Err(EngineError::Shutdown);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        state.items.push(PriorityEntry { priority, seq, item });
        state.unfinished_tasks += 1;
        self.not_empty.notify_one();
        Ok(())
    }

    pub fn get(&self) -> Result<T, EngineError> {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(entry) = state.items.pop() {
                return Ok(entry.item);
            }
            if state.shutting_down {
                return Err(EngineError::Shutdown);
            }
            state = self.not_empty.wait(state).expect("queue mutex poisoned");
        }
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T, EngineError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("queue mutex poisoned");
        loop {
            if let Some(entry) = state.items.pop() {
                return Ok(entry.item);
            }
            if state.shutting_down {
                return Err(EngineError::Shutdown);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EngineError::Timeout("priority queue get".to_string()));
            }
            let (guard, result) = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .expect("queue mutex poisoned");
            state = guard;
            if result.timed_out() && state.items.is_empty() && !state.shutting_down {
                return Err(EngineError::Timeout("priority queue get".to_string()));
            }
        }
    }

    pub fn shutdown(&self, immediately: bool) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        if state.shutting_down {
            tracing::warn!("priority queue already shut down");
        }
        state.shutting_down = true;
        if immediately {
            let drained = state.items.len();
            state.items.clear();
            state.unfinished_tasks = state.unfinished_tasks.saturating_sub(drained);
        }
        self.not_empty.notify_all();
        self.all_done.notify_all();
    }

    pub fn empty(&self) -> bool {
        self.state.lock().expect("queue mutex poisoned").items.is_empty()
    }

    pub fn task_done(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        state.unfinished_tasks = state.unfinished_tasks.saturating_sub(1);
        if state.unfinished_tasks == 0 {
            self.all_done.notify_all();
        }
    }

    pub fn join(&self) {
        let mut state = self.state.lock().expect("queue mutex poisoned");
        while state.unfinished_tasks > 0 {
            state = self.all_done.wait(state).expect("queue mutex poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order_preserved() {
        let q: Queue<i32> = Queue::new();
        q.put(1).unwrap();
        q.put(2).unwrap();
        q.put(3).unwrap();
        assert_eq!(q.get().unwrap(), 1);
        assert_eq!(q.get().unwrap(), 2);
        assert_eq!(q.get().unwrap(), 3);
    }

    #[test]
    fn priority_orders_lower_first_ties_fifo() {
        let q: PriorityQueue<&str> = PriorityQueue::new();
        q.put("low-a", 2).unwrap();
        q.put("low-b", 2).unwrap();
        q.put("high", 0).unwrap();
        assert_eq!(q.get().unwrap(), "high");
        assert_eq!(q.get().unwrap(), "low-a");
        assert_eq!(q.get().unwrap(), "low-b");
    }

    #[test]
    fn shutdown_wakes_all_blocked_waiters() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.get())
            })
            .collect();
        // Give the waiters a moment to block on the condvar.
        thread::sleep(Duration::from_millis(50));
        q.shutdown(false);
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Err(EngineError::Shutdown)));
        }
    }

    #[test]
    fn put_after_shutdown_fails() {
        let q: Queue<i32> = Queue::new();
        q.shutdown(false);
        assert!(matches!(q.put(1), Err(EngineError::Shutdown)));
    }

    #[test]
    fn immediate_shutdown_drains_queue() {
        let q: Queue<i32> = Queue::new();
        q.put(1).unwrap();
        q.put(2).unwrap();
        q.shutdown(true);
        q.join(); // must not block: unfinished tasks were drained
    }

    #[test]
    fn join_waits_for_task_done() {
        let q: Arc<Queue<i32>> = Arc::new(Queue::new());
        q.put(1).unwrap();
        let joiner = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.join())
        };
        thread::sleep(Duration::from_millis(20));
        let item = q.get().unwrap();
        assert_eq!(item, 1);
        q.task_done();
        joiner.join().unwrap();
    }

    #[test]
    fn peek_does_not_remove() {
        let q: Queue<i32> = Queue::new();
        q.put(42).unwrap();
        assert_eq!(q.peek().unwrap(), 42);
        assert_eq!(q.peek().unwrap(), 42);
        assert_eq!(q.get().unwrap(), 42);
    }
}
