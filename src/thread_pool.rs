use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use core_affinity::{get_core_ids, set_for_current};

/// Type-erased pointer to the task currently being broadcast. The pointee
/// lives on the stack of the thread calling `execute`, which does not return
/// until every worker has reported completion, so the pointer never dangles
/// while a worker holds it.
#[derive(Clone, Copy)]
struct Task(*const (dyn Fn(usize, usize) + Sync));

unsafe impl Send for Task {}
unsafe impl Sync for Task {}

struct Dispatch {
    epoch: u64,
    task: Option<Task>,
    finalize: bool,
}

struct Rendezvous {
    count: usize,
    round: u64,
}

struct Reduction {
    values: Vec<f64>,
    result: f64,
    count: usize,
    round: u64,
}

struct Shared {
    num_threads: usize,
    dispatch: Mutex<Dispatch>,
    dispatch_cv: Condvar,
    completed: Mutex<usize>,
    completed_cv: Condvar,
    rendezvous: Mutex<Rendezvous>,
    rendezvous_cv: Condvar,
    reduction: Mutex<Reduction>,
    reduction_cv: Condvar,
}

/**
 * A fixed-size SPMD thread pool. A single callable is broadcast to all `N`
 * execution contexts at once: context 0 is the thread calling `execute`, and
 * contexts `1..N-1` are persistent background workers pinned to CPU cores.
 * Workers detect a newly published task by comparing a monotonically
 * increasing epoch counter against a locally remembered copy, which guards
 * against both lost and spurious condition-variable wakeups.
 *
 * Within a broadcast task, contexts coordinate through `barrier` and the
 * collective reductions. Field buffers written during a row-partitioned
 * phase may only be read across chunk boundaries after a barrier separates
 * the read from the writes that produced it.
 */
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
}

// ============================================================================
impl ThreadPool {
    /// Create a pool with the given number of execution contexts. The calling
    /// thread counts as context 0, so `num_threads - 1` workers are spawned.
    /// Workers are pinned to physical cores round-robin.
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads >= 1, "thread pool requires at least one context");

        let shared = Arc::new(Shared {
            num_threads,
            dispatch: Mutex::new(Dispatch {
                epoch: 0,
                task: None,
                finalize: false,
            }),
            dispatch_cv: Condvar::new(),
            completed: Mutex::new(0),
            completed_cv: Condvar::new(),
            rendezvous: Mutex::new(Rendezvous { count: 0, round: 0 }),
            rendezvous_cv: Condvar::new(),
            reduction: Mutex::new(Reduction {
                values: vec![0.0; num_threads],
                result: 0.0,
                count: 0,
                round: 0,
            }),
            reduction_cv: Condvar::new(),
        });

        let core_ids = get_core_ids().unwrap_or_default();
        let workers = (1..num_threads)
            .map(|thread_id| {
                let shared = shared.clone();
                let core_id = core_ids.get(thread_id % core_ids.len().max(1)).copied();
                thread::spawn(move || {
                    if let Some(core_id) = core_id {
                        set_for_current(core_id);
                    }
                    shared.run_worker(thread_id);
                })
            })
            .collect();

        ThreadPool { shared, workers }
    }

    /// Create a pool sized to the hardware concurrency.
    pub fn with_hardware_concurrency() -> Self {
        let num_threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(num_threads)
    }

    /// Return the number of execution contexts (including the caller).
    pub fn num_threads(&self) -> usize {
        self.shared.num_threads
    }

    /// Broadcast `action` to every context. Each context invokes
    /// `action(thread_id, num_threads)` exactly once; context 0 runs on the
    /// calling thread. Returns after every context has completed the action,
    /// so the closure may borrow from the caller's stack. A panic inside the
    /// action on a worker poisons the pool and is not recoverable; action
    /// bodies must be infallible or capture their own errors into state the
    /// caller inspects afterwards.
    pub fn execute<F>(&self, action: F)
    where
        F: Fn(usize, usize) + Sync,
    {
        let shared = &*self.shared;
        let task: *const (dyn Fn(usize, usize) + Sync) = &action;
        // Erase the borrow lifetime. Sound because of the completion wait
        // below: no worker holds the pointer once `execute` returns.
        let task = Task(unsafe { mem::transmute(task) });

        {
            let mut dispatch = shared.dispatch.lock().unwrap();
            assert!(!dispatch.finalize, "task published after pool shutdown");
            *shared.completed.lock().unwrap() = 0;
            dispatch.task = Some(task);
            dispatch.epoch += 1;
        }
        shared.dispatch_cv.notify_all();

        action(0, shared.num_threads);

        let mut completed = shared.completed.lock().unwrap();
        while *completed != shared.num_threads - 1 {
            completed = shared.completed_cv.wait(completed).unwrap();
        }
        drop(completed);
        shared.dispatch.lock().unwrap().task = None;
    }

    /// Block until all contexts have arrived for the current round. The round
    /// counter (rather than the arrival count alone) releases waiters, so a
    /// context arriving early for round `r + 1` cannot be confused with a
    /// straggler still leaving round `r`.
    pub fn barrier(&self) {
        let shared = &*self.shared;
        let mut state = shared.rendezvous.lock().unwrap();
        state.count += 1;
        if state.count == shared.num_threads {
            state.count = 0;
            state.round = state.round.wrapping_add(1);
            shared.rendezvous_cv.notify_all();
        } else {
            let round = state.round;
            while state.round == round {
                state = shared.rendezvous_cv.wait(state).unwrap();
            }
        }
    }

    /// Collective minimum: every context contributes one value, and every
    /// context observes the same combined result before proceeding past the
    /// call.
    pub fn reduce_min(&self, thread_id: usize, value: f64) -> f64 {
        self.reduce(thread_id, value, f64::min)
    }

    /// Collective maximum, with the same protocol as `reduce_min`.
    pub fn reduce_max(&self, thread_id: usize, value: f64) -> f64 {
        self.reduce(thread_id, value, f64::max)
    }

    /// Contributions are stored per-context and folded in context order by
    /// whichever context arrives last, so the result is bitwise independent
    /// of arrival order.
    fn reduce<F>(&self, thread_id: usize, value: f64, combine: F) -> f64
    where
        F: Fn(f64, f64) -> f64,
    {
        let shared = &*self.shared;
        let mut state = shared.reduction.lock().unwrap();
        state.values[thread_id] = value;
        state.count += 1;
        if state.count == shared.num_threads {
            state.result = state.values[1..]
                .iter()
                .fold(state.values[0], |acc, &x| combine(acc, x));
            state.count = 0;
            state.round = state.round.wrapping_add(1);
            shared.reduction_cv.notify_all();
        } else {
            let round = state.round;
            while state.round == round {
                state = shared.reduction_cv.wait(state).unwrap();
            }
        }
        state.result
    }
}

impl Shared {
    fn run_worker(&self, thread_id: usize) {
        let mut local_epoch = 0;
        loop {
            let task = {
                let mut dispatch = self.dispatch.lock().unwrap();
                loop {
                    if dispatch.finalize {
                        return;
                    }
                    if dispatch.epoch != local_epoch {
                        break;
                    }
                    dispatch = self.dispatch_cv.wait(dispatch).unwrap();
                }
                local_epoch = dispatch.epoch;
                dispatch.task.unwrap()
            };
            unsafe { (*task.0)(thread_id, self.num_threads) };

            *self.completed.lock().unwrap() += 1;
            self.completed_cv.notify_all();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut dispatch = self.shared.dispatch.lock().unwrap();
            dispatch.finalize = true;
        }
        self.shared.dispatch_cv.notify_all();

        for worker in self.workers.drain(..) {
            worker.join().unwrap();
        }
    }
}

/**
 * A contiguous chunk of a one-dimensional iteration range, assigned to one
 * execution context. Chunks are near-equal: the first `count % num_threads`
 * contexts get one extra element.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkRange {
    pub begin: usize,
    pub end: usize,
}

// ============================================================================
impl WorkRange {
    pub fn split(count: usize, thread_id: usize, num_threads: usize) -> Self {
        let quotient = count / num_threads;
        let remainder = count % num_threads;
        let begin = thread_id * quotient + thread_id.min(remainder);
        let size = quotient + if thread_id < remainder { 1 } else { 0 };
        Self {
            begin,
            end: begin + size,
        }
    }

    pub fn iter(&self) -> std::ops::Range<usize> {
        self.begin..self.end
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{ThreadPool, WorkRange};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_context_runs_the_published_task_exactly_once() {
        for num_threads in [1, 2, 4, 8] {
            let pool = ThreadPool::new(num_threads);
            let slots: Vec<_> = (0..num_threads)
                .map(|_| AtomicUsize::new(usize::MAX))
                .collect();

            pool.execute(|thread_id, total| {
                assert_eq!(total, num_threads);
                slots[thread_id].store(thread_id, Ordering::SeqCst);
            });

            let written: Vec<_> = slots.iter().map(|s| s.load(Ordering::SeqCst)).collect();
            let expected: Vec<_> = (0..num_threads).collect();
            assert_eq!(written, expected);
        }
    }

    #[test]
    fn barrier_separates_writes_from_cross_context_reads() {
        for num_threads in [1, 2, 4, 8] {
            let pool = ThreadPool::new(num_threads);
            let written: Vec<_> = (0..num_threads).map(|_| AtomicUsize::new(0)).collect();
            let observed: Vec<_> = (0..num_threads).map(|_| AtomicUsize::new(0)).collect();

            pool.execute(|thread_id, total| {
                written[thread_id].store(thread_id + 1, Ordering::SeqCst);
                pool.barrier();
                let sum: usize = written.iter().map(|w| w.load(Ordering::SeqCst)).sum();
                observed[thread_id].store(sum, Ordering::SeqCst);
                assert_eq!(total, num_threads);
            });

            let expected = num_threads * (num_threads + 1) / 2;
            for slot in &observed {
                assert_eq!(slot.load(Ordering::SeqCst), expected);
            }
        }
    }

    #[test]
    fn barrier_is_reusable_across_rounds() {
        let pool = ThreadPool::new(4);
        let counter = AtomicUsize::new(0);

        pool.execute(|_, total| {
            for round in 0..100 {
                counter.fetch_add(1, Ordering::SeqCst);
                pool.barrier();
                assert_eq!(counter.load(Ordering::SeqCst), (round + 1) * total);
                pool.barrier();
            }
        });
    }

    #[test]
    fn reductions_are_independent_of_arrival_order() {
        let pool = ThreadPool::new(4);

        for trial in 0..50 {
            pool.execute(|thread_id, total| {
                // Stagger arrivals differently on every trial.
                let delay = (thread_id * 7 + trial * 13) % total;
                std::thread::sleep(std::time::Duration::from_micros(delay as u64 * 50));

                let contribution = (thread_id as f64 + 1.0) * 0.5;
                let result = pool.reduce_min(thread_id, contribution);
                assert_eq!(result, 0.5);

                let result = pool.reduce_max(thread_id, contribution);
                assert_eq!(result, total as f64 * 0.5);
            });
        }
    }

    #[test]
    fn consecutive_tasks_see_fresh_epochs() {
        let pool = ThreadPool::new(4);
        let counter = AtomicUsize::new(0);

        for _ in 0..100 {
            pool.execute(|_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn hardware_concurrency_pools_have_at_least_one_context() {
        let pool = ThreadPool::with_hardware_concurrency();
        assert!(pool.num_threads() >= 1);

        let counter = AtomicUsize::new(0);
        pool.execute(|_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), pool.num_threads());
    }

    #[test]
    fn single_context_pool_runs_on_the_calling_thread() {
        let pool = ThreadPool::new(1);
        let caller = std::thread::current().id();

        pool.execute(|thread_id, total| {
            assert_eq!(thread_id, 0);
            assert_eq!(total, 1);
            assert_eq!(std::thread::current().id(), caller);
            pool.barrier();
            assert_eq!(pool.reduce_min(0, 42.0), 42.0);
        });
    }

    #[test]
    fn work_ranges_tile_the_iteration_space() {
        for count in [0, 1, 7, 64, 101] {
            for num_threads in [1, 2, 4, 8] {
                let mut covered = 0;
                let mut next = 0;
                for thread_id in 0..num_threads {
                    let range = WorkRange::split(count, thread_id, num_threads);
                    assert_eq!(range.begin, next);
                    next = range.end;
                    covered += range.end - range.begin;
                }
                assert_eq!(covered, count);
                assert_eq!(next, count);
            }
        }
    }
}
