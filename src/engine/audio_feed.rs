/// Audio feed for the reference engine
///
/// The host pushes 16 kHz mono PCM into the feed; the engine thread pops
/// fixed-size frames out of it. Holds at most 3 seconds of audio and drops
/// the oldest samples when the engine falls behind.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{trace, warn};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

pub const SAMPLE_RATE: usize = 16000;

/// Samples per analysis frame (32ms at 16kHz)
pub const FRAME_LENGTH: usize = 512;

pub const FEED_DURATION_SECS: usize = 3;
pub const FEED_CAPACITY: usize = FEED_DURATION_SECS * SAMPLE_RATE;

#[derive(Error, Debug, PartialEq)]
pub enum AudioFeedError {
    #[error("Feed underflow: requested {requested} samples, only {available} buffered")]
    Underflow { requested: usize, available: usize },
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

struct FeedInner {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    dropped: AtomicU64,
}

/// Shared handle to the engine's input; clones feed the same buffer
#[derive(Clone)]
pub struct AudioFeed {
    inner: Arc<FeedInner>,
}

// Samples are plain integers, so a panic mid-push cannot leave them invalid
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioFeed {
    pub fn new() -> Self {
        Self::with_capacity(FEED_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity).split();

        Self {
            inner: Arc::new(FeedInner {
                producer: CachePadded::new(Mutex::new(producer)),
                consumer: CachePadded::new(Mutex::new(consumer)),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Append samples, evicting the oldest buffered audio to make room
    ///
    /// Returns how many of `samples` were kept.
    pub fn push(&self, samples: &[AudioSample]) -> usize {
        let mut producer = lock(&self.inner.producer);
        let capacity = producer.capacity().get();

        // Only the newest `capacity` samples can ever be read back
        let samples = &samples[samples.len().saturating_sub(capacity)..];

        let vacant = producer.vacant_len();
        if samples.len() > vacant {
            let mut consumer = lock(&self.inner.consumer);
            let evicted = consumer.skip(samples.len() - vacant);
            drop(consumer);

            self.inner.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
            warn!("Audio feed full, dropped {} oldest samples", evicted);
        }

        let written = producer.push_slice(samples);
        trace!("Pushed {} samples to audio feed", written);
        written
    }

    /// Remove exactly `len` samples from the front of the feed
    pub fn pop_frame(&self, len: usize) -> Result<Vec<AudioSample>, AudioFeedError> {
        let mut consumer = lock(&self.inner.consumer);
        let available = consumer.occupied_len();

        if len > available {
            return Err(AudioFeedError::Underflow {
                requested: len,
                available,
            });
        }

        let mut frame = vec![0; len];
        let read = consumer.pop_slice(&mut frame);
        frame.truncate(read);
        Ok(frame)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.consumer).occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner.consumer).capacity().get()
    }

    /// Samples evicted because the engine was not keeping up
    pub fn dropped_samples(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        let mut consumer = lock(&self.inner.consumer);
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
    }
}

impl Default for AudioFeed {
    fn default() -> Self {
        Self::new()
    }
}
