//! Collaborator traits for transport, time, and randomness.
//!
//! These let the engine run over:
//! - LoRa radios or peer-to-peer WiFi
//! - Real hardware time or simulated time
//! - Any source of randomness for transmit jitter

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::{Duration, Timestamp};
use crate::wire::FrameBuf;

/// Queue size for the inbound transport channel.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// A frame as it came off the air.
#[derive(Debug, Clone, Copy)]
pub struct Received {
    pub data: FrameBuf,
    /// Signal strength in dBm, if the transport knows it.
    pub rssi: Option<i16>,
}

impl Received {
    /// Wrap raw bytes. `None` if they exceed the largest packet size.
    pub fn new(data: &[u8], rssi: Option<i16>) -> Option<Self> {
        FrameBuf::from_slice(data).map(|data| Self { data, rssi })
    }
}

/// Incoming transport frame channel type.
pub type TransportInChannel = Channel<ChannelMutex, Received, TRANSPORT_QUEUE_SIZE>;

/// Outgoing frame class. Lower values are transmitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Acks and route replies.
    Control,
    /// Route requests.
    Discovery,
    /// Application data.
    Data,
}

/// A sealed frame handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transmission {
    pub frame: FrameBuf,
    /// Delay the transport waits before putting the frame on the air.
    pub jitter: Duration,
}

/// Priority queue for outgoing frames.
///
/// Frames are stored by priority and sequence number, so higher-priority
/// frames go first and frames of equal priority keep FIFO order.
///
/// When full, the lowest-priority frame is dropped to make room, unless the
/// new frame is itself of the lowest priority present, in which case it is
/// rejected.
///
/// The queue uses `CriticalSectionRawMutex`, so a radio TX task may call
/// `receive` while the protocol task calls `try_send`.
pub struct PriorityQueue {
    inner:
        embassy_sync::blocking_mutex::Mutex<ChannelMutex, core::cell::RefCell<PriorityQueueInner>>,
    /// Signalled when a frame is added.
    signal: embassy_sync::signal::Signal<ChannelMutex, ()>,
}

struct PriorityQueueInner {
    items: alloc::collections::BTreeMap<(Priority, u64), Transmission>,
    next_seq: u64,
    max_size: usize,
}

impl PriorityQueue {
    /// Create a new priority queue with the specified maximum size.
    pub const fn new(max_size: usize) -> Self {
        Self {
            inner: embassy_sync::blocking_mutex::Mutex::new(core::cell::RefCell::new(
                PriorityQueueInner {
                    items: alloc::collections::BTreeMap::new(),
                    next_seq: 0,
                    max_size,
                },
            )),
            signal: embassy_sync::signal::Signal::new(),
        }
    }

    /// Queue a frame. Returns false if it was rejected.
    pub fn try_send(&self, priority: Priority, tx: Transmission) -> bool {
        let accepted = self.inner.lock(|cell| {
            let mut inner = cell.borrow_mut();

            if inner.items.len() >= inner.max_size {
                match inner.items.last_key_value() {
                    Some((&lowest, _)) if priority < lowest.0 => {
                        inner.items.pop_last();
                    }
                    _ => return false,
                }
            }

            let seq = inner.next_seq;
            inner.next_seq = inner.next_seq.wrapping_add(1);
            inner.items.insert((priority, seq), tx);
            true
        });

        if accepted {
            self.signal.signal(());
        }
        accepted
    }

    /// Take the highest-priority frame without blocking.
    pub fn try_receive(&self) -> Option<Transmission> {
        self.inner.lock(|cell| {
            // First entry has lowest key = highest priority
            cell.borrow_mut().items.pop_first().map(|(_, tx)| tx)
        })
    }

    /// Wait for and take the highest-priority frame.
    pub async fn receive(&self) -> Transmission {
        loop {
            if let Some(tx) = self.try_receive() {
                return tx;
            }
            self.signal.wait().await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock(|cell| cell.borrow().items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport trait for radio/network backends.
///
/// Provides two channels:
/// - `outgoing()`: priority queue of sealed frames to transmit
/// - `incoming()`: frames received from the air
///
/// Push-style transports (WiFi receive callbacks, radio interrupts) call
/// `incoming().try_send()` from their own context; the node drains the
/// channel from its single task, so table mutation stays sequential.
pub trait Transport {
    /// Maximum frame size the link can carry. Larger frames are dropped.
    fn mtu(&self) -> usize;

    fn outgoing(&self) -> &PriorityQueue;

    fn incoming(&self) -> &TransportInChannel;
}

/// Time source trait for real or simulated time.
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number generator trait, used for transmit jitter.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;

    /// Default queue size for MockTransport.
    pub const MOCK_QUEUE_SIZE: usize = 16;

    /// Mock transport for testing using priority queue.
    pub struct MockTransport {
        mtu: usize,
        outgoing: PriorityQueue,
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::with_mtu(255)
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_mtu(mtu: usize) -> Self {
            Self {
                mtu,
                outgoing: PriorityQueue::new(MOCK_QUEUE_SIZE),
                incoming: Channel::new(),
            }
        }

        /// Inject a frame as if it was received.
        pub fn inject_rx(&self, data: &[u8], rssi: Option<i16>) {
            if let Some(rx) = Received::new(data, rssi) {
                let _ = self.incoming.try_send(rx);
            }
        }

        /// Take all queued transmissions in priority order.
        pub fn take_transmissions(&self) -> Vec<Transmission> {
            let mut txs = Vec::new();
            while let Some(tx) = self.outgoing.try_receive() {
                txs.push(tx);
            }
            txs
        }

        /// Take all queued frames in priority order.
        pub fn take_sent(&self) -> Vec<FrameBuf> {
            self.take_transmissions()
                .into_iter()
                .map(|tx| tx.frame)
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn mtu(&self) -> usize {
            self.mtu
        }

        fn outgoing(&self) -> &PriorityQueue {
            &self.outgoing
        }

        fn incoming(&self) -> &TransportInChannel {
            &self.incoming
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Tests advance time by hand.
            ready(())
        }
    }

    /// Mock random for testing (deterministic).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            // Simple LCG
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            min + (self.state % range)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(byte: u8) -> Transmission {
        Transmission {
            frame: FrameBuf::from_slice(&[byte]).unwrap(),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn test_priority_order_then_fifo() {
        let queue = PriorityQueue::new(8);
        assert!(queue.try_send(Priority::Data, tx(1)));
        assert!(queue.try_send(Priority::Control, tx(2)));
        assert!(queue.try_send(Priority::Discovery, tx(3)));
        assert!(queue.try_send(Priority::Control, tx(4)));

        let order: [u8; 4] = core::array::from_fn(|_| {
            queue.try_receive().unwrap().frame.as_slice()[0]
        });
        assert_eq!(order, [2, 4, 3, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_evicts_lowest() {
        let queue = PriorityQueue::new(2);
        assert!(queue.try_send(Priority::Data, tx(1)));
        assert!(queue.try_send(Priority::Data, tx(2)));
        assert!(!queue.try_send(Priority::Data, tx(3)), "Equal priority is rejected");
        assert!(queue.try_send(Priority::Control, tx(4)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.try_receive().unwrap().frame.as_slice(), &[4]);
        assert_eq!(queue.try_receive().unwrap().frame.as_slice(), &[1]);
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let queue = PriorityQueue::new(0);
        assert!(!queue.try_send(Priority::Control, tx(1)));
    }
}
