//! Device context: the model of the physical medium.
//!
//! Holds the state that determines how long a request takes: the seek
//! heuristic over the last accessed file, the busy-until clock, and the
//! write-back cache. The medium executes one request at a time; executing a
//! request here is what advances the model.

use crate::cache::WriteBackCache;
use crate::request::{Request, RequestKind};
use slowfs_config::{DeviceConfig, FsyncStrategy, WriteStrategy};
use slowfs_types::{ByteCount, Timestamp};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Length of the throughput observation window.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(30);

/// Read/write counters over one observation window. Purely operational;
/// none of this feeds back into timing.
#[derive(Debug, Default)]
struct ThroughputWindow {
    started_at: Timestamp,
    reads: u64,
    read_bytes: u64,
    writes: u64,
    write_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct DeviceContext {
    config: Arc<DeviceConfig>,

    /// The device runs one request at a time; this is when it frees up.
    /// Starts at the epoch so the first request never waits on prior work.
    busy_until: Timestamp,

    /// Path whose access sequence is being tracked. Accesses to a
    /// different file are non-sequential by definition.
    last_accessed_file: Option<PathBuf>,

    /// Offset one past the last byte read/written on `last_accessed_file`.
    first_unseen_byte: ByteCount,

    /// Present iff the fsync strategy is write-back.
    write_back_cache: Option<WriteBackCache>,

    window: ThroughputWindow,
}

impl DeviceContext {
    pub(crate) fn new(config: Arc<DeviceConfig>) -> Self {
        let write_back_cache = (config.fsync_strategy == FsyncStrategy::WriteBack)
            .then(|| WriteBackCache::new(config.write_bytes_per_second));
        Self {
            config,
            busy_until: Timestamp::ZERO,
            last_accessed_file: None,
            first_unseen_byte: ByteCount::ZERO,
            write_back_cache,
            window: ThroughputWindow::default(),
        }
    }

    pub(crate) fn busy_until(&self) -> Timestamp {
        self.busy_until
    }

    /// How long `req` takes given the current device state, as a delay on
    /// top of `req.timestamp`. Does not update the context.
    pub(crate) fn compute_time(&self, req: &Request) -> Duration {
        let request_duration = match req.kind {
            RequestKind::Metadata | RequestKind::Close => self.config.metadata_op_time,
            RequestKind::Allocate => self.seek_time(req) + self.config.allocate_time(req.size),
            RequestKind::Read => self.seek_time(req) + self.config.read_time(req.size),
            RequestKind::Write => match self.config.write_strategy {
                WriteStrategy::Fast => Duration::ZERO,
                WriteStrategy::Simulate => {
                    self.seek_time(req) + self.config.write_time(req.size)
                }
            },
            RequestKind::Fsync => match self.config.fsync_strategy {
                FsyncStrategy::None => Duration::ZERO,
                FsyncStrategy::Dumb => self.config.seek_time * 10,
                FsyncStrategy::WriteBack => {
                    self.config.seek_time + self.config.write_time(self.unwritten_bytes(req))
                }
            },
            other => {
                warn!(target: "slowfs::device", kind = %other, "unknown request kind");
                Duration::ZERO
            }
        };

        // A caller that submitted just in time is not slowed beyond the
        // device's due work: delay is zero when the device is idle and the
        // request itself is free.
        let completion = self.busy_until.max(req.timestamp) + request_duration;
        completion.saturating_duration_since(req.timestamp)
    }

    /// Execute `req`, applying its effects to the device state. The only
    /// mutator.
    pub(crate) fn execute(&mut self, req: &Request) {
        let spare_time = req.timestamp.saturating_duration_since(self.busy_until);

        self.record_throughput(req);

        // Spare time before this request arrived goes to writing back
        // dirty bytes, before any other state moves.
        if spare_time > Duration::ZERO {
            if let Some(cache) = &mut self.write_back_cache {
                cache.write_back(spare_time);
            }
        }

        self.busy_until = req.timestamp + self.compute_time(req);

        match req.kind {
            RequestKind::Metadata | RequestKind::Allocate => {}
            RequestKind::Close => {
                if let Some(cache) = &mut self.write_back_cache {
                    cache.close(&req.path);
                }
                if self.last_accessed_file.as_deref() == Some(req.path.as_path()) {
                    self.last_accessed_file = None;
                    self.first_unseen_byte = ByteCount::ZERO;
                }
            }
            RequestKind::Read => {
                self.last_accessed_file = Some(req.path.clone());
                self.first_unseen_byte = req.start.saturating_add(req.size);
            }
            RequestKind::Write => {
                // Fast writes leave the head where it was; only simulated
                // writes move the access sequence.
                if self.config.write_strategy == WriteStrategy::Simulate {
                    self.last_accessed_file = Some(req.path.clone());
                    self.first_unseen_byte = req.start.saturating_add(req.size);
                }
                if let Some(cache) = &mut self.write_back_cache {
                    cache.write(&req.path, req.size);
                }
            }
            RequestKind::Fsync => {
                if let Some(cache) = &mut self.write_back_cache {
                    cache.write_back_file(&req.path);
                }
            }
            other => {
                warn!(target: "slowfs::device", kind = %other, "unknown request kind");
            }
        }
    }

    fn unwritten_bytes(&self, req: &Request) -> ByteCount {
        self.write_back_cache
            .as_ref()
            .map_or(ByteCount::ZERO, |cache| cache.unwritten_bytes(&req.path))
    }

    /// Seek iff the access is on a different file, goes backwards, or jumps
    /// past the seek window. `start == first_unseen_byte` is sequential,
    /// except that a zero window makes every access after the first seek.
    fn seek_time(&self, req: &Request) -> Duration {
        let same_file = self.last_accessed_file.as_deref() == Some(req.path.as_path());
        if !same_file
            || req.start < self.first_unseen_byte
            || req.start.get() - self.first_unseen_byte.get() >= self.config.seek_window.get()
        {
            self.config.seek_time
        } else {
            Duration::ZERO
        }
    }

    fn record_throughput(&mut self, req: &Request) {
        match req.kind {
            RequestKind::Read => {
                self.window.reads += 1;
                self.window.read_bytes = self.window.read_bytes.saturating_add(req.size.get());
            }
            RequestKind::Write => {
                self.window.writes += 1;
                self.window.write_bytes =
                    self.window.write_bytes.saturating_add(req.size.get());
            }
            _ => {}
        }

        let elapsed = req.timestamp.saturating_duration_since(self.window.started_at);
        if elapsed > THROUGHPUT_WINDOW {
            if self.window.reads > 0 || self.window.writes > 0 {
                let secs = elapsed.as_secs_f64();
                let read_kbps = self.window.read_bytes as f64 / 1024.0 / secs;
                let write_kbps = self.window.write_bytes as f64 / 1024.0 / secs;
                info!(
                    target: "slowfs::device",
                    "IO Speed: {:.1} KB/s read ({} ops), {:.1} KB/s write ({} ops)",
                    read_kbps, self.window.reads, write_kbps, self.window.writes,
                );
            }
            self.window = ThroughputWindow {
                started_at: req.timestamp,
                ..ThroughputWindow::default()
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slowfs_types::ByteRate;

    fn config(write_strategy: WriteStrategy, fsync_strategy: FsyncStrategy) -> DeviceConfig {
        DeviceConfig {
            name: "test".to_owned(),
            seek_window: ByteCount(4096),
            seek_time: Duration::from_millis(5),
            read_bytes_per_second: ByteRate(10 * 1024 * 1024),
            write_bytes_per_second: ByteRate(10 * 1024 * 1024),
            allocate_bytes_per_second: ByteRate(1 << 30),
            request_reorder_max_delay: Duration::ZERO,
            metadata_op_time: Duration::from_millis(1),
            fsync_strategy,
            write_strategy,
        }
    }

    fn context(write_strategy: WriteStrategy, fsync_strategy: FsyncStrategy) -> DeviceContext {
        DeviceContext::new(Arc::new(config(write_strategy, fsync_strategy)))
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn at(v: u64) -> Timestamp {
        Timestamp(Duration::from_millis(v))
    }

    const MIB: u64 = 1 << 20;

    #[test]
    fn first_access_to_a_file_seeks() {
        let ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        let req = Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(MIB));
        assert_eq!(ctx.compute_time(&req), ms(105));
    }

    #[test]
    fn sequential_read_skips_the_seek() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(MIB)));
        let next = Request::read(at(105), "/a", ByteCount(MIB), ByteCount(MIB));
        assert_eq!(ctx.compute_time(&next), ms(100));
    }

    #[test]
    fn backward_access_seeks() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(MIB)));
        let back = Request::read(at(105), "/a", ByteCount::ZERO, ByteCount(4096));
        assert_eq!(
            ctx.compute_time(&back),
            ms(5) + Duration::from_nanos(390_625)
        );
    }

    #[test]
    fn forward_jump_at_the_window_edge_seeks() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(1024)));
        // first_unseen = 1024. A gap of window − 1 stays sequential; a gap
        // of exactly the window seeks.
        let near = Request::read(at(200), "/a", ByteCount(1024 + 4095), ByteCount(1024));
        let far = Request::read(at(200), "/a", ByteCount(1024 + 4096), ByteCount(1024));
        assert_eq!(ctx.compute_time(&far) - ctx.compute_time(&near), ms(5));
    }

    #[test]
    fn zero_window_always_seeks() {
        let mut cfg = config(WriteStrategy::Simulate, FsyncStrategy::None);
        cfg.seek_window = ByteCount::ZERO;
        let mut ctx = DeviceContext::new(Arc::new(cfg));
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(1024)));
        // Perfectly sequential, yet still a seek.
        let seq = Request::read(at(200), "/a", ByteCount(1024), ByteCount(1024));
        assert!(ctx.compute_time(&seq) > ms(5));
    }

    #[test]
    fn different_file_seeks() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(1024)));
        let other = Request::read(at(200), "/b", ByteCount(1024), ByteCount(1024));
        assert!(ctx.compute_time(&other) >= ms(5));
    }

    #[test]
    fn busy_device_queues_the_request() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(MIB)));
        assert_eq!(ctx.busy_until(), at(105));
        // Arrives at 50 ms while the device is busy until 105 ms: waits
        // 55 ms, then pays its own 105 ms.
        let queued = Request::read(at(50), "/b", ByteCount::ZERO, ByteCount(MIB));
        assert_eq!(ctx.compute_time(&queued), ms(55 + 105));
    }

    #[test]
    fn metadata_and_close_cost_the_flat_op_time() {
        let ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        assert_eq!(ctx.compute_time(&Request::metadata(at(0))), ms(1));
        assert_eq!(ctx.compute_time(&Request::close(at(0), "/a")), ms(1));
    }

    #[test]
    fn open_is_unknown_to_the_device_and_costs_nothing() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        let open = Request {
            kind: RequestKind::Open,
            timestamp: at(0),
            path: "/a".into(),
            start: ByteCount::ZERO,
            size: ByteCount::ZERO,
        };
        assert_eq!(ctx.compute_time(&open), Duration::ZERO);
        ctx.execute(&open);
        assert_eq!(ctx.busy_until(), at(0));
    }

    #[test]
    fn fast_writes_are_free_and_leave_sequentiality_alone() {
        let mut ctx = context(WriteStrategy::Fast, FsyncStrategy::WriteBack);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(1024)));
        let busy = ctx.busy_until();

        let write = Request::write(at(200), "/a", ByteCount(900_000), ByteCount(1024));
        assert_eq!(ctx.compute_time(&write), Duration::ZERO);
        ctx.execute(&write);
        assert!(ctx.busy_until() >= busy);
        assert_eq!(ctx.busy_until(), at(200));

        // The read sequence is untouched: continuing from the read is
        // still sequential.
        let seq = Request::read(at(300), "/a", ByteCount(1024), ByteCount(1024));
        assert!(ctx.compute_time(&seq) < ms(5));
    }

    #[test]
    fn simulated_writes_move_the_access_sequence() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::write(at(0), "/a", ByteCount::ZERO, ByteCount(4096)));
        let seq = Request::read(at(100), "/a", ByteCount(4096), ByteCount(1024));
        assert!(ctx.compute_time(&seq) < ms(5));
    }

    #[test]
    fn dumb_fsync_charges_ten_seeks() {
        let ctx = context(WriteStrategy::Fast, FsyncStrategy::Dumb);
        assert_eq!(ctx.compute_time(&Request::fsync(at(0), "/a")), ms(50));
    }

    #[test]
    fn none_fsync_is_free() {
        let ctx = context(WriteStrategy::Fast, FsyncStrategy::None);
        assert_eq!(ctx.compute_time(&Request::fsync(at(0), "/a")), Duration::ZERO);
    }

    #[test]
    fn writeback_fsync_pays_for_dirty_bytes_then_owes_nothing() {
        let mut ctx = context(WriteStrategy::Fast, FsyncStrategy::WriteBack);
        ctx.execute(&Request::write(at(0), "/c", ByteCount::ZERO, ByteCount(5 * MIB)));

        let fsync = Request::fsync(at(0), "/c");
        assert_eq!(ctx.compute_time(&fsync), ms(5 + 500));
        ctx.execute(&fsync);

        // Everything was written back; a second fsync is seek-only.
        let again = Request::fsync(at(505), "/c");
        assert_eq!(ctx.compute_time(&again), ms(5));
    }

    #[test]
    fn close_clears_sequence_state_only_for_its_own_path() {
        let mut ctx = context(WriteStrategy::Simulate, FsyncStrategy::None);
        ctx.execute(&Request::read(at(0), "/a", ByteCount::ZERO, ByteCount(1024)));
        ctx.execute(&Request::close(at(200), "/b"));
        // /a is still the tracked file.
        let seq = Request::read(at(300), "/a", ByteCount(1024), ByteCount(1024));
        assert!(ctx.compute_time(&seq) < ms(5));

        ctx.execute(&Request::close(at(400), "/a"));
        let cold = Request::read(at(500), "/a", ByteCount(1024), ByteCount(1024));
        assert!(ctx.compute_time(&cold) >= ms(5));
    }

    #[test]
    fn idle_time_drains_the_cache_before_the_request_lands() {
        let mut ctx = context(WriteStrategy::Fast, FsyncStrategy::WriteBack);
        // 1 MiB dirty at t=0; the device is idle afterwards.
        ctx.execute(&Request::write(at(0), "/c", ByteCount::ZERO, ByteCount(MIB)));
        assert_eq!(ctx.busy_until(), at(0));

        // By t=500 ms the drain budget (5 MiB) covers everything, so the
        // fsync pays only its seek.
        let fsync = Request::fsync(at(500), "/c");
        ctx.execute(&fsync);
        assert_eq!(ctx.busy_until(), at(505));
    }
}
