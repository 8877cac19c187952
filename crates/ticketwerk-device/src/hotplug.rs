// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hotplug listener.
//
// A background thread polls the scanner's cheap name listing and runs a
// full probe whenever the set of candidate nodes changes, a writer has
// asked for one (after a failed write), or a listed candidate has not
// yet become a usable printer. The probe result is applied to the shared
// printer slot, which publishes detach events to in-flight writes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info, warn};

use ticketwerk_core::Result;

use crate::manager::Shared;

/// Handle to the running listener thread.
pub(crate) struct Listener {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Listener {
    /// `seen` is the listing the caller last applied.
    pub(crate) fn spawn(shared: Arc<Shared>, poll: Duration, seen: Vec<String>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("ticketwerk-hotplug".into())
            .spawn(move || {
                let mut last_seen = seen;
                while !stop_flag.load(Ordering::Acquire) {
                    std::thread::park_timeout(poll);
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }

                    let names = match shared.scanner.list() {
                        Ok(names) => names,
                        Err(e) => {
                            warn!(error = %e, "hotplug scan failed");
                            continue;
                        }
                    };
                    let requested = shared.rescan_requested.swap(false, Ordering::AcqRel);
                    if names == last_seen && !requested && !shared.unsettled(&names) {
                        continue;
                    }

                    debug!(?names, requested, "probing candidates");
                    shared.apply_scan(&names);
                    last_seen = names;
                }
                debug!("hotplug listener stopped");
            })?;

        info!(poll_ms = poll.as_millis() as u64, "hotplug listener started");
        Ok(Self { stop, thread })
    }

    /// Wake the thread early, e.g. after a rescan request.
    pub(crate) fn wake(&self) {
        self.thread.thread().unpark();
    }

    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.thread.thread().unpark();
        if self.thread.join().is_err() {
            warn!("hotplug listener panicked");
        }
    }
}
