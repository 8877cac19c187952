// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raw writes to the printer's character device.
//
// ESC/POS printers take the ticket as a plain byte stream: open the node,
// write, close. Bytes go out in small chunks, each flushed before the next,
// so the count reported on failure is what the kernel actually accepted.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ticketwerk_core::{Result, TicketwerkError};

/// Chunk size for device writes. usblp hands each write to a single bulk
/// transfer; small chunks keep the progress count honest.
pub const CHUNK_SIZE: usize = 1024;

pub(crate) const EBUSY: i32 = 16;

/// Write `bytes` to the device node at `path`.
///
/// The write is abandoned with `DeviceLost` as soon as the printer
/// generation published on `detach` moves away from `generation`, which
/// the hotplug listener does when the device disappears, and with
/// `Timeout` once `timeout` elapses.
///
/// Returns the number of bytes written.
pub async fn send(
    path: &Path,
    bytes: &[u8],
    generation: u64,
    detach: &mut watch::Receiver<u64>,
    timeout: Duration,
) -> Result<u64> {
    let sent = AtomicU64::new(0);

    tokio::select! {
        biased;
        _ = detach.wait_for(|current| *current != generation) => {
            let bytes_sent = sent.load(Ordering::Acquire);
            info!(path = %path.display(), bytes_sent, "printer detached during write");
            abandoned(path, bytes_sent, bytes.len());
            Err(TicketwerkError::DeviceLost {
                bytes_sent,
                detail: "printer detached during write".into(),
            })
        }
        _ = tokio::time::sleep(timeout) => {
            let bytes_sent = sent.load(Ordering::Acquire);
            abandoned(path, bytes_sent, bytes.len());
            Err(TicketwerkError::Timeout(format!(
                "printer accepted {bytes_sent} of {} bytes in {} ms",
                bytes.len(),
                timeout.as_millis()
            )))
        }
        result = transfer(path, bytes, &sent) => result,
    }
}

/// Dropping `transfer` mid-chunk cannot cancel the blocking write tokio
/// already handed to its pool: that chunk may still land and the node
/// stays open until the kernel returns it.
fn abandoned(path: &Path, bytes_sent: u64, total: usize) {
    if bytes_sent < total as u64 {
        warn!(
            path = %path.display(),
            bytes_sent,
            in_flight_max = CHUNK_SIZE,
            "write abandoned; the chunk in flight may still reach the printer and holds the node open until it returns"
        );
    }
}

async fn transfer(path: &Path, bytes: &[u8], sent: &AtomicU64) -> Result<u64> {
    let mut device = tokio::fs::OpenOptions::new()
        .write(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| map_io_error(e, path, 0))?;

    for chunk in bytes.chunks(CHUNK_SIZE) {
        let progress = sent.load(Ordering::Acquire);
        device
            .write_all(chunk)
            .await
            .map_err(|e| map_io_error(e, path, progress))?;
        // tokio::fs hands the write to a blocking thread; flush waits for it.
        device
            .flush()
            .await
            .map_err(|e| map_io_error(e, path, progress))?;
        sent.fetch_add(chunk.len() as u64, Ordering::AcqRel);
    }

    let total = sent.load(Ordering::Acquire);
    debug!(path = %path.display(), total, "ticket written");
    Ok(total)
}

/// Translate an I/O failure on the device node into the error taxonomy
/// the delivery loop retries on.
pub fn map_io_error(error: io::Error, path: &Path, bytes_sent: u64) -> TicketwerkError {
    if error.kind() == io::ErrorKind::PermissionDenied {
        return TicketwerkError::PermissionDenied {
            path: path.display().to_string(),
        };
    }
    match error.raw_os_error() {
        Some(EBUSY) => TicketwerkError::DeviceBusy(format!("{}: {error}", path.display())),
        // ENODEV/ENXIO after unplug, EIO on a reset, NotFound once the node
        // is gone: the printer state is unknown either way.
        _ => TicketwerkError::DeviceLost {
            bytes_sent,
            detail: format!("{}: {error}", path.display()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const EIO: i32 = 5;
    const ENXIO: i32 = 6;
    const ENODEV: i32 = 19;

    fn node() -> PathBuf {
        PathBuf::from("/dev/usb/lp0")
    }

    #[tokio::test]
    async fn writes_whole_ticket_to_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lp0");
        std::fs::write(&path, b"").expect("node");
        let (_tx, mut rx) = watch::channel(0u64);

        let ticket: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let written = send(&path, &ticket, 0, &mut rx, Duration::from_secs(5))
            .await
            .expect("send");

        assert_eq!(written, 5000);
        assert_eq!(std::fs::read(&path).expect("read back"), ticket);
    }

    #[tokio::test]
    async fn missing_node_is_device_lost_with_nothing_sent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (_tx, mut rx) = watch::channel(0u64);
        let err = send(&dir.path().join("lp9"), b"\x1b@", 0, &mut rx, Duration::from_secs(5))
            .await
            .expect_err("no node");
        assert!(matches!(err, TicketwerkError::DeviceLost { bytes_sent: 0, .. }));
    }

    #[tokio::test]
    async fn stale_generation_aborts_before_writing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lp0");
        std::fs::write(&path, b"").expect("node");
        let (_tx, mut rx) = watch::channel(3u64);

        let err = send(&path, b"hello", 2, &mut rx, Duration::from_secs(5))
            .await
            .expect_err("detached");
        assert!(matches!(err, TicketwerkError::DeviceLost { bytes_sent: 0, .. }));
        assert!(std::fs::read(&path).expect("read").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stalled_node_times_out_with_progress_in_message() {
        use std::io::Read;

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lp0");
        let status = std::process::Command::new("mkfifo")
            .arg(&path)
            .status()
            .expect("mkfifo");
        assert!(status.success());
        let (release, wait) = std::sync::mpsc::channel::<()>();
        let reader = {
            let path = path.clone();
            std::thread::spawn(move || {
                let mut fifo = std::fs::File::open(&path).expect("open fifo");
                let _ = wait.recv();
                let mut sink = Vec::new();
                fifo.read_to_end(&mut sink).expect("drain");
            })
        };
        let (_tx, mut rx) = watch::channel(0u64);

        let ticket = vec![b'x'; 256 * 1024];
        let err = send(&path, &ticket, 0, &mut rx, Duration::from_millis(300))
            .await
            .expect_err("stalled");
        match err {
            TicketwerkError::Timeout(detail) => {
                assert!(detail.contains("of 262144 bytes"), "{detail}");
            }
            other => panic!("expected Timeout, got {other:?}"),
        }

        release.send(()).expect("release");
        reader.join().expect("reader");
    }

    #[test]
    fn permission_denied_maps_to_user_action_error() {
        let err = map_io_error(io::Error::from(io::ErrorKind::PermissionDenied), &node(), 0);
        assert!(matches!(err, TicketwerkError::PermissionDenied { .. }));
    }

    #[test]
    fn ebusy_maps_to_busy() {
        let err = map_io_error(io::Error::from_raw_os_error(EBUSY), &node(), 0);
        assert!(matches!(err, TicketwerkError::DeviceBusy(_)));
    }

    #[test]
    fn disconnect_errors_keep_progress() {
        for errno in [ENODEV, ENXIO, EIO] {
            let err = map_io_error(io::Error::from_raw_os_error(errno), &node(), 2048);
            assert!(matches!(err, TicketwerkError::DeviceLost { bytes_sent: 2048, .. }));
        }
        let err = map_io_error(io::Error::from(io::ErrorKind::BrokenPipe), &node(), 7);
        assert!(matches!(err, TicketwerkError::DeviceLost { bytes_sent: 7, .. }));
    }
}
