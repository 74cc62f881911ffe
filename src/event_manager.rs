//! # Cooperative event scheduler
//!
//! A single-threaded, deadline-ordered action queue. Actions are enum-dispatched rather
//! than boxed closures: the caller supplies its own `Action` type, and the manager just
//! carries `(Action, Instant)` pairs in a fixed-capacity queue. This keeps the crate
//! allocator-free, the same reasoning `heapless`-based embedded crates apply to avoid
//! `Vec`/`Box` for anything that runs on the hot path.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::error::MediatorError;

/// Maximum number of pending actions. Exceeding this is the crate's one fatal condition;
/// see [`MediatorError::SchedulerOverflow`].
pub const QUEUE_CAPACITY: usize = 10;

struct Scheduled<A> {
    action: A,
    deadline: Instant,
}

/// A cooperative scheduler generic over a caller-supplied action enum.
///
/// `run_loop` is the only blocking entry point; everything else just posts into the
/// queue and returns immediately, safe to call from any task since the mutation itself
/// is a short critical section.
pub struct EventManager<A> {
    queue: critical_section::Mutex<core::cell::RefCell<Vec<Scheduled<A>, QUEUE_CAPACITY>>>,
    quit: critical_section::Mutex<core::cell::Cell<bool>>,
}

impl<A: Copy> Default for EventManager<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Copy> EventManager<A> {
    pub fn new() -> Self {
        EventManager {
            queue: critical_section::Mutex::new(core::cell::RefCell::new(Vec::new())),
            quit: critical_section::Mutex::new(core::cell::Cell::new(false)),
        }
    }

    /// Enqueues `action` to run as soon as possible.
    pub fn run(&self, action: A) -> Result<(), MediatorError> {
        self.run_after(action, Instant::from_millis(0))
    }

    /// Enqueues `action` to run at or after `now + delay`.
    pub fn run_delayed(&self, action: A, delay: Duration) -> Result<(), MediatorError> {
        self.run_after(action, Instant::now() + delay)
    }

    /// Enqueues `action` to run at or after the absolute instant `deadline`.
    ///
    /// Starvation of later-deadline actions is possible if callers keep posting actions
    /// with earlier deadlines faster than [`Self::run_ready`]/[`Self::run_loop`] drains
    /// them; this scheduler makes no fairness guarantee beyond deadline order.
    pub fn run_after(&self, action: A, deadline: Instant) -> Result<(), MediatorError> {
        critical_section::with(|cs| {
            let mut queue = self.queue.borrow(cs).borrow_mut();
            queue
                .push(Scheduled { action, deadline })
                .map_err(|_| MediatorError::SchedulerOverflow)
        })
    }

    /// Idempotent request to unwind an in-progress [`Self::run_loop`] after its current
    /// batch finishes.
    pub fn quit(&self) {
        critical_section::with(|cs| self.quit.borrow(cs).set(true));
    }

    fn should_quit(&self) -> bool {
        critical_section::with(|cs| self.quit.borrow(cs).get())
    }

    /// Runs one scheduling tick against `now`: drains every action whose deadline has
    /// passed, in deadline order, dispatching each to `dispatch`. Returns the instant of
    /// the next pending deadline, if any, for the caller to use as its next sleep bound.
    ///
    /// Exposed directly (rather than folded into a blocking `run_loop`) so host tests can
    /// drive the scheduler with a synthetic clock one tick at a time.
    pub fn run_ready(&self, now: Instant, mut dispatch: impl FnMut(A)) -> Option<Instant> {
        let (mut due, next_wake): (Vec<Scheduled<A>, QUEUE_CAPACITY>, Option<Instant>) =
            critical_section::with(|cs| {
                let mut queue = self.queue.borrow(cs).borrow_mut();
                let mut due: Vec<Scheduled<A>, QUEUE_CAPACITY> = Vec::new();
                let mut remaining: Vec<Scheduled<A>, QUEUE_CAPACITY> = Vec::new();
                let mut next_wake = None;
                for scheduled in queue.iter() {
                    if scheduled.deadline <= now {
                        let _ = due.push(Scheduled {
                            action: scheduled.action,
                            deadline: scheduled.deadline,
                        });
                    } else {
                        next_wake = Some(match next_wake {
                            Some(current) if current <= scheduled.deadline => current,
                            _ => scheduled.deadline,
                        });
                        let _ = remaining.push(Scheduled {
                            action: scheduled.action,
                            deadline: scheduled.deadline,
                        });
                    }
                }
                *queue = remaining;
                (due, next_wake)
            });

        // Insertion sort by deadline; stable, so ties keep queue order. The batch is
        // bounded by `QUEUE_CAPACITY`, so O(n^2) is irrelevant here.
        for i in 1..due.len() {
            let mut j = i;
            while j > 0 && due[j].deadline < due[j - 1].deadline {
                due.swap(j, j - 1);
                j -= 1;
            }
        }

        for scheduled in due {
            dispatch(scheduled.action);
        }
        next_wake
    }

    /// Blocking run loop: repeatedly computes the next wake time, sleeps on an I/O
    /// readiness future or that timeout (whichever comes first), then dispatches the due
    /// batch. Returns once [`Self::quit`] has been called.
    ///
    /// `poll_io` is awaited with a timeout equal to the time remaining until the next
    /// deadline (or a long default poll interval if the queue is empty); it should return
    /// promptly on I/O readiness so actions posted from an interrupt or another task are
    /// not delayed past their deadline.
    pub async fn run_loop<F, Fut>(&self, mut dispatch: impl FnMut(A), mut poll_io: F)
    where
        F: FnMut(Duration) -> Fut,
        Fut: core::future::Future<Output = ()>,
    {
        const IDLE_POLL: Duration = Duration::from_millis(100);
        while !self.should_quit() {
            let now = Instant::now();
            let next_wake = self.run_ready(now, &mut dispatch);
            let timeout = match next_wake {
                Some(wake) if wake > now => wake - now,
                Some(_) => Duration::from_millis(0),
                None => IDLE_POLL,
            };
            poll_io(timeout).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec as StdVec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestAction {
        A,
        B,
        C,
    }

    #[test]
    fn run_schedules_for_immediate_execution() {
        let manager: EventManager<TestAction> = EventManager::new();
        manager.run(TestAction::A).unwrap();

        let mut seen = StdVec::new();
        manager.run_ready(Instant::from_millis(0), |a| seen.push(a));
        assert_eq!(vec![TestAction::A], seen);
    }

    #[test]
    fn run_after_defers_until_deadline() {
        let manager: EventManager<TestAction> = EventManager::new();
        manager.run_after(TestAction::A, Instant::from_millis(100)).unwrap();

        let mut seen = StdVec::new();
        let next_wake = manager.run_ready(Instant::from_millis(50), |a| seen.push(a));
        assert!(seen.is_empty());
        assert_eq!(Some(Instant::from_millis(100)), next_wake);

        manager.run_ready(Instant::from_millis(100), |a| seen.push(a));
        assert_eq!(vec![TestAction::A], seen);
    }

    #[test]
    fn actions_run_in_non_decreasing_deadline_order() {
        let manager: EventManager<TestAction> = EventManager::new();
        manager.run_after(TestAction::C, Instant::from_millis(30)).unwrap();
        manager.run_after(TestAction::A, Instant::from_millis(10)).unwrap();
        manager.run_after(TestAction::B, Instant::from_millis(20)).unwrap();

        let mut seen = StdVec::new();
        manager.run_ready(Instant::from_millis(100), |a| seen.push(a));
        assert_eq!(vec![TestAction::A, TestAction::B, TestAction::C], seen);
    }

    #[test]
    fn queue_overflow_is_reported_not_panicked() {
        let manager: EventManager<TestAction> = EventManager::new();
        for _ in 0..QUEUE_CAPACITY {
            manager.run(TestAction::A).unwrap();
        }
        assert_eq!(
            Err(MediatorError::SchedulerOverflow),
            manager.run(TestAction::A)
        );
    }

    #[test]
    fn quit_is_idempotent() {
        let manager: EventManager<TestAction> = EventManager::new();
        manager.quit();
        manager.quit();
        assert!(manager.should_quit());
    }
}
