//! Single-threaded event loop
//!
//! All engine state lives on the thread that owns the [`MainLoop`].
//! Framework threads never touch it directly: bus watches and signal
//! handlers hold a [`Scheduler`] and post [`LoopEvent`]s, and fader ticks,
//! delayed starts and sink teardown run as timers. The owner pops due
//! timers and drains events in [`Player::iterate`](crate::Player::iterate).

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use exaile_core::media::{AudioSinkElement, BusMessage, InstallResult};
use exaile_core::Clock;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;

/// Identifies one audio stream for the lifetime of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Handle returned by [`Scheduler::timeout_add`]
pub type TimerId = u64;

/// Something a stream's pipeline reported from a framework thread
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Bus(BusMessage),
    /// Output volume changed outside our control
    VolumeNotify(f64),
}

/// Work posted to the loop from any thread
pub enum LoopEvent {
    Stream {
        stream: StreamId,
        /// Pipeline generation the signal was raised under; stale
        /// generations are dropped
        generation: u64,
        signal: StreamSignal,
    },
    /// The platform plugin installer finished
    PluginsInstalled(InstallResult),
}

impl fmt::Debug for LoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopEvent::Stream {
                stream,
                generation,
                signal,
            } => f
                .debug_struct("Stream")
                .field("stream", stream)
                .field("generation", generation)
                .field("signal", signal)
                .finish(),
            LoopEvent::PluginsInstalled(result) => {
                f.debug_tuple("PluginsInstalled").field(result).finish()
            }
        }
    }
}

/// What a timer does when it fires
pub enum TimerTask {
    /// Advance the fader of a stream
    Fader(StreamId),
    /// Unpause after `player/auto_advance_delay`
    DelayedStart,
    /// Shut down a sink unlinked during a live switch once its data drained
    ReleaseSink(Box<dyn AudioSinkElement>),
}

impl fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerTask::Fader(id) => f.debug_tuple("Fader").field(id).finish(),
            TimerTask::DelayedStart => f.write_str("DelayedStart"),
            TimerTask::ReleaseSink(sink) => f.debug_tuple("ReleaseSink").field(&sink.name()).finish(),
        }
    }
}

struct Timer {
    id: TimerId,
    deadline: Duration,
    task: TimerTask,
}

#[derive(Default)]
struct TimerTable {
    next_id: TimerId,
    timers: Vec<Timer>,
}

/// Cloneable, thread-safe handle for scheduling onto a [`MainLoop`]
#[derive(Clone)]
pub struct Scheduler {
    table: Arc<Mutex<TimerTable>>,
    tx: Sender<LoopEvent>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Run `task` once after `delay`
    pub fn timeout_add(&self, delay: Duration, task: TimerTask) -> TimerId {
        let deadline = self.clock.now() + delay;
        let mut table = self.table();
        table.next_id += 1;
        let id = table.next_id;
        trace!(id, ?delay, ?task, "timeout_add");
        table.timers.push(Timer { id, deadline, task });
        id
    }

    /// Cancel a pending timer; false if it already fired or never existed
    pub fn source_remove(&self, id: TimerId) -> bool {
        let mut table = self.table();
        match table.timers.iter().position(|t| t.id == id) {
            Some(index) => {
                table.timers.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Queue an event for the loop
    pub fn post(&self, event: LoopEvent) {
        // The loop may already be gone during shutdown
        let _ = self.tx.send(event);
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Number of timers still pending
    pub fn pending_timers(&self) -> usize {
        self.table().timers.len()
    }

    fn table(&self) -> MutexGuard<'_, TimerTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receiving side of the loop
pub struct MainLoop {
    scheduler: Scheduler,
    rx: Receiver<LoopEvent>,
}

impl MainLoop {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            scheduler: Scheduler {
                table: Arc::new(Mutex::new(TimerTable::default())),
                tx,
                clock,
            },
            rx,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Next posted event, if any, without blocking
    pub fn try_recv(&self) -> Option<LoopEvent> {
        self.rx.try_recv().ok()
    }

    /// Remove and return the earliest timer due at `now`
    ///
    /// Timers with equal deadlines fire in the order they were added.
    pub fn pop_due(&self, now: Duration) -> Option<(TimerId, TimerTask)> {
        let mut table = self.scheduler.table();
        let index = table
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deadline <= now)
            .min_by_key(|(_, t)| (t.deadline, t.id))
            .map(|(i, _)| i)?;
        let timer = table.timers.swap_remove(index);
        Some((timer.id, timer.task))
    }

    /// Deadline of the earliest pending timer
    pub fn next_deadline(&self) -> Option<Duration> {
        self.scheduler.table().timers.iter().map(|t| t.deadline).min()
    }

    /// Block up to `timeout` for a posted event
    pub fn wait(&self, timeout: Duration) -> Option<LoopEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exaile_core::ManualClock;

    fn manual() -> (Arc<ManualClock>, MainLoop) {
        let clock = Arc::new(ManualClock::new());
        let main_loop = MainLoop::new(clock.clone());
        (clock, main_loop)
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let (clock, main_loop) = manual();
        let scheduler = main_loop.scheduler();

        let late = scheduler.timeout_add(Duration::from_millis(20), TimerTask::DelayedStart);
        let early = scheduler.timeout_add(Duration::from_millis(10), TimerTask::Fader(StreamId(1)));

        assert!(main_loop.pop_due(clock.now()).is_none());
        assert_eq!(main_loop.next_deadline(), Some(Duration::from_millis(10)));

        clock.advance(Duration::from_millis(25));
        let (first, _) = main_loop.pop_due(clock.now()).unwrap();
        let (second, _) = main_loop.pop_due(clock.now()).unwrap();
        assert_eq!(first, early);
        assert_eq!(second, late);
        assert!(main_loop.pop_due(clock.now()).is_none());
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let (clock, main_loop) = manual();
        let scheduler = main_loop.scheduler();
        let ids: Vec<_> = (0..4)
            .map(|i| scheduler.timeout_add(Duration::from_millis(10), TimerTask::Fader(StreamId(i))))
            .collect();

        clock.advance(Duration::from_millis(10));
        let fired: Vec<_> = std::iter::from_fn(|| main_loop.pop_due(clock.now()))
            .map(|(id, _)| id)
            .collect();
        assert_eq!(fired, ids);
    }

    #[test]
    fn test_source_remove() {
        let (clock, main_loop) = manual();
        let scheduler = main_loop.scheduler();
        let id = scheduler.timeout_add(Duration::ZERO, TimerTask::DelayedStart);

        assert_eq!(scheduler.pending_timers(), 1);
        assert!(scheduler.source_remove(id));
        assert!(!scheduler.source_remove(id));
        assert!(main_loop.pop_due(clock.now()).is_none());
    }

    #[test]
    fn test_post_from_another_thread() {
        let (_clock, main_loop) = manual();
        let scheduler = main_loop.scheduler();

        std::thread::spawn(move || {
            scheduler.post(LoopEvent::Stream {
                stream: StreamId(3),
                generation: 1,
                signal: StreamSignal::Bus(BusMessage::EndOfStream),
            });
        })
        .join()
        .unwrap();

        match main_loop.wait(Duration::from_secs(1)) {
            Some(LoopEvent::Stream { stream, signal, .. }) => {
                assert_eq!(stream, StreamId(3));
                assert_eq!(signal, StreamSignal::Bus(BusMessage::EndOfStream));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(main_loop.try_recv().is_none());
    }
}
