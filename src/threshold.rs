//! Per-id visit caps.
//!
//! Every probe call ends up in [`VisitRecorder::visit`], on arbitrary application threads and
//! possibly inside latency-sensitive windows. The recorder consults a [`VisitThreshold`] and
//! forwards the visit to its [`VisitSink`] only while the id has been seen fewer times than the
//! configured threshold. Counters are atomics in an append-only `boxcar` vector, so reads and
//! increments never take a lock; only growing the vector is serialized.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

/// Granularity of counter growth
pub const BUCKET_SIZE: usize = 16384;

/// Growable counters capping the visits forwarded per coverage id.
#[derive(Debug)]
pub struct VisitThreshold {
    threshold: u32,
    counts: boxcar::Vec<AtomicU32>,
    grow: Mutex<()>,
}

impl VisitThreshold {
    /// Counters for `threshold`; 0 disables capping
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        VisitThreshold {
            threshold,
            counts: boxcar::Vec::new(),
            grow: Mutex::new(()),
        }
    }

    /// The configured cap
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Number of ids with a counter
    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.count()
    }

    /// True before the first resize
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make room for ids below `min_size`.
    ///
    /// When `min_size` exceeds the current length, grows to the next multiple of
    /// [`BUCKET_SIZE`] strictly greater than `min_size`. Never shrinks and never resets a
    /// counter.
    pub fn resize(&self, min_size: usize) {
        let _guard = lock!(self.grow);

        let len = self.counts.count();
        if min_size <= len {
            return;
        }

        let target = ((min_size / BUCKET_SIZE) + 1) * BUCKET_SIZE;
        for _ in len..target {
            self.counts.push(AtomicU32::new(0));
        }
    }

    /// Count a visit and decide whether to forward it.
    ///
    /// Id 0 is reserved and never forwarded. With a threshold of 0 every other visit is
    /// forwarded. Ids without a counter are forwarded uncounted.
    pub fn record_visit(&self, id: u32) -> bool {
        if id == 0 {
            return false;
        }
        if self.threshold == 0 {
            return true;
        }

        let Some(counter) = self.counts.get(id as usize) else {
            return true;
        };
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.threshold).then_some(count + 1)
            })
            .is_ok()
    }

    /// Visits counted so far for `id`
    #[must_use]
    pub fn count(&self, id: u32) -> u32 {
        self.counts
            .get(id as usize)
            .map_or(0, |counter| counter.load(Ordering::Acquire))
    }
}

/// Receives forwarded visits; usually the channel to the coverage host.
pub trait VisitSink: Send + Sync {
    /// A visit forwarded immediately
    fn visit(&self, id: u32);

    /// A visit the sink may hold back until [`VisitSink::flush`]
    ///
    /// Sinks without a buffer forward it like [`VisitSink::visit`].
    fn visit_buffered(&self, id: u32) {
        self.visit(id);
    }

    /// A visit tagged with a 128-bit correlation id; always forwarded immediately
    fn visit_with_context(&self, id: u32, high: u64, low: u64);

    /// Forward everything held back by [`VisitSink::visit_buffered`]
    fn flush(&self) {}
}

/// Runtime side of a probe: threshold check, then forward.
///
/// The counters are shared with the profiler, which grows them as methods get instrumented.
/// In safe mode every visit is forwarded as it happens; otherwise uncorrelated visits go
/// through the sink's buffer.
pub struct VisitRecorder<S: VisitSink> {
    threshold: Arc<VisitThreshold>,
    sink: S,
    safe_mode: bool,
}

impl<S: VisitSink> VisitRecorder<S> {
    /// Recorder forwarding to `sink`, capped by `threshold`, buffering visits
    pub fn new(threshold: Arc<VisitThreshold>, sink: S) -> Self {
        VisitRecorder {
            threshold,
            sink,
            safe_mode: false,
        }
    }

    /// Forward every visit immediately instead of buffering
    #[must_use]
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    /// True if visits bypass the sink's buffer
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode
    }

    /// The shared counters
    pub fn threshold(&self) -> &VisitThreshold {
        &self.threshold
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Entry point of the `(id)` probe
    pub fn visit(&self, id: u32) {
        if !self.threshold.record_visit(id) {
            return;
        }
        if self.safe_mode {
            self.sink.visit(id);
        } else {
            self.sink.visit_buffered(id);
        }
    }

    /// Entry point of the `(id, high, low)` probe
    pub fn visit_with_context(&self, id: u32, high: u64, low: u64) {
        if self.threshold.record_visit(id) {
            self.sink.visit_with_context(id, high, low);
        }
    }

    /// Push out buffered visits, e.g. when a thread or the session ends
    pub fn flush(&self) {
        self.sink.flush();
    }
}
