use rtrb::{Consumer, Producer, RingBuffer};
use tracing::warn;

/// Lock-free sample queue between the stream callback and the session loop.
pub struct CaptureRing {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
}

impl CaptureRing {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    /// Split into the callback-side writer and the session-side reader.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                producer: self.producer,
            },
            RingConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Writer half, owned by the stream callback.
pub struct RingProducer {
    producer: Producer<i16>,
}

impl RingProducer {
    /// Queue a callback chunk without blocking. Returns the number of
    /// samples queued; 0 when the ring has no room for the whole chunk.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let mut chunk = match self.producer.write_chunk(samples.len()) {
            Ok(chunk) => chunk,
            Err(_) => {
                warn!(
                    "capture ring overflow: dropping chunk of {} samples",
                    samples.len()
                );
                return 0;
            }
        };

        // the chunk may wrap; fill both slices
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        if split > 0 {
            first.copy_from_slice(&samples[..split]);
        }
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..]);
        }
        chunk.commit_all();
        samples.len()
    }

    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Reader half, owned by the sampling session.
pub struct RingConsumer {
    consumer: Consumer<i16>,
}

impl RingConsumer {
    /// Drain up to `buffer.len()` queued samples without blocking.
    /// Returns the number of samples copied out.
    pub fn read(&mut self, buffer: &mut [i16]) -> usize {
        let chunk = match self.consumer.read_chunk(buffer.len()) {
            Ok(chunk) => chunk,
            Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
                if available == 0 {
                    return 0;
                }
                self.consumer.read_chunk(available).unwrap()
            }
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        if split > 0 {
            buffer[..split].copy_from_slice(first);
        }
        if !second.is_empty() {
            buffer[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}
