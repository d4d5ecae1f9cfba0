#![forbid(unsafe_code)]
//! End-to-end scheduling scenarios against a device with known geometry:
//! seek 5 ms over a 4 KiB window, 10 MiB/s (binary) or 10 MB/s (SI)
//! transfer, 1 ms metadata ops, write-back fsync.

use slowfs_config::{DeviceConfig, FsyncStrategy, WriteStrategy};
use slowfs_scheduler::{Request, Scheduler};
use slowfs_types::{ByteCount, ByteRate, Timestamp};
use std::time::Duration;

const MIB: u64 = 1 << 20;

fn device(rate: ByteRate, write_strategy: WriteStrategy) -> DeviceConfig {
    DeviceConfig {
        name: "scenario".to_owned(),
        seek_window: ByteCount(4096),
        seek_time: Duration::from_millis(5),
        read_bytes_per_second: rate,
        write_bytes_per_second: rate,
        allocate_bytes_per_second: ByteRate(1_000_000_000),
        request_reorder_max_delay: Duration::ZERO,
        metadata_op_time: Duration::from_millis(1),
        fsync_strategy: FsyncStrategy::WriteBack,
        write_strategy,
    }
}

fn binary_device(write_strategy: WriteStrategy) -> DeviceConfig {
    device(ByteRate(10 * 1024 * 1024), write_strategy)
}

fn si_device(write_strategy: WriteStrategy) -> DeviceConfig {
    device(ByteRate(10_000_000), write_strategy)
}

fn at(d: Duration) -> Timestamp {
    Timestamp(d)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn cold_read_then_sequential_then_seeks() {
    let scheduler = Scheduler::new(binary_device(WriteStrategy::Simulate));

    // Cold read: one seek plus 1 MiB of transfer.
    let d1 = scheduler.schedule(&Request::read(
        at(ms(0)),
        "/a",
        ByteCount::ZERO,
        ByteCount(MIB),
    ));
    assert_eq!(d1, ms(105));

    // Follow-on starting exactly at the first unseen byte: no seek.
    let d2 = scheduler.schedule(&Request::read(
        at(ms(105)),
        "/a",
        ByteCount(MIB),
        ByteCount(MIB),
    ));
    assert_eq!(d2, ms(100));

    // Backward to offset 0: seek plus 4 KiB of transfer.
    let d3 = scheduler.schedule(&Request::read(
        at(ms(205)),
        "/a",
        ByteCount::ZERO,
        ByteCount(4096),
    ));
    assert_eq!(d3, ms(5) + Duration::from_nanos(390_625));

    // The device is busy until 210.390625 ms; a request for another file
    // at 206 ms waits out the backlog, then pays seek + transfer.
    let d4 = scheduler.schedule(&Request::read(
        at(ms(206)),
        "/b",
        ByteCount::ZERO,
        ByteCount(MIB),
    ));
    assert_eq!(
        d4,
        ms(4) + Duration::from_nanos(390_625) + ms(105)
    );
}

#[test]
fn fast_write_is_free_until_fsync_collects() {
    let scheduler = Scheduler::new(si_device(WriteStrategy::Fast));

    let write = scheduler.schedule(&Request::write(
        at(ms(0)),
        "/c",
        ByteCount::ZERO,
        ByteCount(512_000),
    ));
    assert_eq!(write, Duration::ZERO);

    // Fsync pays one seek plus the dirty 512 KB at 10 MB/s.
    let fsync = scheduler.schedule(&Request::fsync(at(ms(0)), "/c"));
    assert_eq!(fsync, ms(5) + Duration::from_micros(51_200));

    // Nothing is owed afterwards.
    let again = scheduler.schedule(&Request::fsync(at(ms(5) + Duration::from_micros(51_200)), "/c"));
    assert_eq!(again, ms(5));
}

#[test]
fn idle_time_drains_the_write_back_cache() {
    let scheduler = Scheduler::new(si_device(WriteStrategy::Fast));

    let write = scheduler.schedule(&Request::write(
        at(ms(0)),
        "/c",
        ByteCount::ZERO,
        ByteCount(1_000_000),
    ));
    assert_eq!(write, Duration::ZERO);

    // 500 ms of idle covers 5 MB of drain, far more than the 1 MB owed.
    let metadata = scheduler.schedule(&Request::metadata(at(ms(500))));
    assert_eq!(metadata, ms(1));

    // The cache is empty, so fsync is seek-only.
    let fsync = scheduler.schedule(&Request::fsync(at(ms(501)), "/c"));
    assert_eq!(fsync, ms(5));
}

#[test]
fn close_is_idempotent() {
    let scheduler = Scheduler::new(si_device(WriteStrategy::Fast));

    scheduler.schedule(&Request::write(
        at(ms(0)),
        "/x",
        ByteCount::ZERO,
        ByteCount(512_000),
    ));
    let first = scheduler.schedule(&Request::close(at(ms(0)), "/x"));
    let second = scheduler.schedule(&Request::close(at(ms(1)), "/x"));
    assert_eq!(first, ms(1));
    assert_eq!(second, ms(1));

    // Both closes left the same state behind: the dirty bytes are gone, so
    // fsync owes only the seek.
    let fsync = scheduler.schedule(&Request::fsync(at(ms(2)), "/x"));
    assert_eq!(fsync, ms(5));
}

#[test]
fn a_run_inside_the_seek_window_pays_one_seek_total() {
    let scheduler = Scheduler::new(binary_device(WriteStrategy::Simulate));
    let step = ByteCount(1024);
    let transfer = Duration::from_nanos(97_656);

    let mut ts = at(ms(0));
    for i in 0..4_u64 {
        let delay = scheduler.schedule(&Request::read(
            ts,
            "/run",
            ByteCount(i * 1024),
            step,
        ));
        let expected = if i == 0 { ms(5) + transfer } else { transfer };
        assert_eq!(delay, expected, "read {i}");
        ts = ts + delay;
    }
}

#[test]
fn one_file_never_pays_for_anothers_dirty_bytes() {
    let scheduler = Scheduler::new(si_device(WriteStrategy::Fast));

    scheduler.schedule(&Request::write(
        at(ms(0)),
        "/a",
        ByteCount::ZERO,
        ByteCount(100_000),
    ));
    scheduler.schedule(&Request::write(
        at(ms(0)),
        "/b",
        ByteCount::ZERO,
        ByteCount(300_000),
    ));

    // /b collects its own 300 KB.
    let fsync_b = scheduler.schedule(&Request::fsync(at(ms(0)), "/b"));
    assert_eq!(fsync_b, ms(5) + ms(30));

    // Issued exactly when the device frees up, so no idle drain happens
    // in between: /a still owes exactly its own 100 KB.
    let fsync_a = scheduler.schedule(&Request::fsync(at(ms(35)), "/a"));
    assert_eq!(fsync_a, ms(5) + ms(10));
}

#[test]
fn completions_are_monotone_for_a_timestamp_ordered_stream() {
    let scheduler = Scheduler::new(binary_device(WriteStrategy::Simulate));
    let mut previous_completion = Timestamp::ZERO;
    let mut ts = Timestamp::ZERO;

    for i in 0..50_u64 {
        let req = match i % 5 {
            0 => Request::read(ts, "/m", ByteCount(i * 4096), ByteCount(4096)),
            1 => Request::write(ts, "/m", ByteCount(i * 4096), ByteCount(4096)),
            2 => Request::metadata(ts),
            3 => Request::fsync(ts, "/m"),
            _ => Request::close(ts, "/m"),
        };
        let delay = scheduler.schedule(&req);
        let completion = ts + delay;
        assert!(completion >= previous_completion, "request {i}");
        previous_completion = completion;
        ts = ts + Duration::from_micros(300);
    }
}
