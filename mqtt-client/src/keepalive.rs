use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use mqtt_core::Packet;
use timer::{Guard, Timer};

use crate::transport::Transport;

struct Shared<T> {
    stream: Mutex<T>,
    /// Set whenever the connection handler's send path writes a packet;
    /// cleared (and checked) on each tick so a ping is only sent when the
    /// period was otherwise idle.
    sent_since_tick: AtomicBool,
    /// Consecutive idle ticks a PingReq has gone unanswered.
    unanswered: AtomicU32,
}

impl<T> Shared<T>
where
    T: Transport,
{
    fn send_ping(&self) {
        let mut buf = BytesMut::new();
        Packet::Ping.write_to(&mut buf);
        let _ = self.stream.lock().unwrap().write_all(&buf);
    }
}

/// Drives the keep-alive ping timer for a connected transport. Keep-alive of
/// 0 disables the timer entirely — `new` simply schedules nothing.
pub struct KeepAlive<T> {
    shared: Arc<Shared<T>>,
    _timer: Timer,
    _guard: Option<Guard>,
}

impl<T> KeepAlive<T>
where
    T: Transport,
{
    pub fn new(stream: T, keep_alive_secs: u16, mut on_unsolicited_disconnect: impl FnMut() + Send + 'static) -> Self {
        let shared = Arc::new(Shared {
            stream: Mutex::new(stream),
            sent_since_tick: AtomicBool::new(false),
            unanswered: AtomicU32::new(0),
        });

        let timer = Timer::new();
        let guard = if keep_alive_secs == 0 {
            None
        } else {
            let period = time::Duration::seconds(keep_alive_secs as i64);
            let tick_shared = shared.clone();

            Some(timer.schedule_repeating(period, move || {
                if tick_shared.sent_since_tick.swap(false, Ordering::SeqCst) {
                    tick_shared.unanswered.store(0, Ordering::SeqCst);
                    return;
                }

                tick_shared.send_ping();

                if tick_shared.unanswered.fetch_add(1, Ordering::SeqCst) + 1 >= 2 {
                    on_unsolicited_disconnect();
                }
            }))
        };

        KeepAlive {
            shared,
            _timer: timer,
            _guard: guard,
        }
    }

    /// Call after every packet the connection handler writes, Ping included
    /// isn't routed through here (it bypasses `note_sent` by design, so an
    /// idle period is still detected even if nothing but pings flowed).
    pub fn note_sent(&self) {
        self.shared.sent_since_tick.store(true, Ordering::SeqCst);
    }

    /// Call on every PingResp received.
    pub fn note_pong(&self) {
        self.shared.unanswered.store(0, Ordering::SeqCst);
    }

    /// A cloneable handle for resetting the unanswered-ping count from a
    /// dispatcher handler, which can't hold a borrow of the `KeepAlive`
    /// that owns it (the handler has to outlive the `connect()` call that
    /// registers it).
    pub fn pong_handle(&self) -> PongHandle<T> {
        PongHandle(self.shared.clone())
    }
}

#[derive(Clone)]
pub struct PongHandle<T>(Arc<Shared<T>>);

impl<T> PongHandle<T>
where
    T: Transport,
{
    pub fn note_pong(&self) {
        self.0.unanswered.store(0, Ordering::SeqCst);
    }
}
