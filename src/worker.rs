//! Port workers.
//!
//! Each opened port gets two OS threads: a receive worker that pulls frames
//! into pool buffers and runs them through the application, and a transmit
//! worker that drains the port's bounded ring onto the wire. Cancellation is
//! cooperative: a shared running flag checked between packets, with the
//! 1 ms receive timeout bounding how long a stop can take.

use crate::app::ProcessFn;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::pipeline;
use crate::port::{Frame, Port};
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// The spawned threads for one dataplane, stopped and joined as a unit.
pub struct WorkerSet {
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    ports: Vec<Arc<dyn Port>>,
}

impl WorkerSet {
    /// Opens every port bound to the dataplane and spawns its worker pair.
    /// On any failure the already-spawned workers are torn down again.
    pub fn spawn(dp: &Arc<Dataplane>, process: ProcessFn) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut set = Self {
            running: Arc::clone(&running),
            handles: Vec::new(),
            ports: Vec::new(),
        };

        for port_id in dp.ports() {
            let port = dp.port_table().get(port_id).ok_or(Error::Unknown {
                what: "port",
                id: port_id.to_string(),
            })?;
            if let Err(e) = port.open() {
                set.stop();
                return Err(e);
            }

            let (tx, rx) = channel::bounded(dp.tx_ring_depth());
            port.attach_ring(tx);
            set.ports.push(Arc::clone(&port));

            let spawn_result = spawn_pair(dp, &port, &process, &running, rx);
            match spawn_result {
                Ok((rx_handle, tx_handle)) => {
                    set.handles.push(rx_handle);
                    set.handles.push(tx_handle);
                }
                Err(e) => {
                    set.stop();
                    return Err(e);
                }
            }
        }
        Ok(set)
    }

    /// Flags the workers down, joins them, and closes the ports.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        for port in self.ports.drain(..) {
            port.detach_ring();
            port.close();
        }
    }
}

fn spawn_pair(
    dp: &Arc<Dataplane>,
    port: &Arc<dyn Port>,
    process: &ProcessFn,
    running: &Arc<AtomicBool>,
    ring: Receiver<Frame>,
) -> Result<(JoinHandle<()>, JoinHandle<()>)> {
    let rx_handle = thread::Builder::new()
        .name(format!("fp-rx-{}", port.name()))
        .spawn({
            let dp = Arc::clone(dp);
            let port = Arc::clone(port);
            let process = Arc::clone(process);
            let running = Arc::clone(running);
            move || rx_loop(&dp, &port, &process, &running)
        })?;

    let tx_handle = thread::Builder::new()
        .name(format!("fp-tx-{}", port.name()))
        .spawn({
            let dp = Arc::clone(dp);
            let port = Arc::clone(port);
            let running = Arc::clone(running);
            move || tx_loop(&dp, &port, &running, ring)
        })?;

    Ok((rx_handle, tx_handle))
}

/// Receive loop: buffer, recv, process, egress. Errors on a single packet
/// drop that packet and the loop keeps going; only the running flag ends it.
fn rx_loop(dp: &Arc<Dataplane>, port: &Arc<dyn Port>, process: &ProcessFn, running: &AtomicBool) {
    debug!(port = port.name(), "receive worker up");
    let mut scratch = vec![0u8; dp.buffer_size()];

    while running.load(Ordering::Relaxed) {
        let mut buffer = match dp.pool().alloc() {
            Ok(buffer) => buffer,
            Err(_) => {
                // No buffer free: keep servicing the socket so arrivals are
                // accounted instead of silently deferred.
                if let Ok(Some(_)) = port.recv(&mut scratch) {
                    port.stats().record_rx_drop();
                    dp.stats().pool_exhausted.inc();
                    dp.stats().dropped.inc();
                }
                continue;
            }
        };

        match port.recv(buffer.ctx.storage_mut()) {
            Ok(Some(n)) => {
                port.stats().record_rx(n);
                if buffer.ctx.set_len(n).is_err() {
                    port.stats().record_rx_drop();
                    let _ = dp.pool().dealloc(buffer);
                    continue;
                }
                buffer.ctx.set_ingress(port.id());
                dp.stats().processed.inc();

                let status = process.as_ref()(dp, &mut buffer.ctx);
                if status != 0 {
                    trace!(port = port.name(), status, "process fault");
                    dp.stats().app_faults.inc();
                    dp.stats().dropped.inc();
                    let _ = dp.pool().dealloc(buffer);
                    continue;
                }
                pipeline::egress(dp, buffer);
            }
            Ok(None) => {
                let _ = dp.pool().dealloc(buffer);
            }
            Err(e) => {
                trace!(port = port.name(), "receive error: {}", e);
                port.stats().record_rx_drop();
                let _ = dp.pool().dealloc(buffer);
            }
        }
    }
    debug!(port = port.name(), "receive worker down");
}

/// Transmit loop: drain the bounded ring onto the wire. After the running
/// flag drops, in-flight frames are still drained before returning.
fn tx_loop(dp: &Arc<Dataplane>, port: &Arc<dyn Port>, running: &AtomicBool, ring: Receiver<Frame>) {
    debug!(port = port.name(), "transmit worker up");
    while running.load(Ordering::Relaxed) {
        match ring.recv_timeout(Duration::from_millis(1)) {
            Ok(frame) => transmit(dp, port, frame),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    while let Ok(frame) = ring.try_recv() {
        transmit(dp, port, frame);
    }
    debug!(port = port.name(), "transmit worker down");
}

fn transmit(dp: &Arc<Dataplane>, port: &Arc<dyn Port>, frame: Frame) {
    match port.send(frame.bytes()) {
        Ok(n) => port.stats().record_tx(n),
        Err(e) => {
            warn!(port = port.name(), "send failed: {}", e);
            port.stats().record_tx_drop();
        }
    }
    if let Frame::Pooled(buffer) = frame {
        let _ = dp.pool().dealloc(buffer);
    }
}
