//! IEEE 1588 follower task.
//!
//! Joins the PTP multicast group, tracks Sync/FollowUp/DelayResp exchanges
//! against the grandmaster and feeds measured drift into the PI servo. The
//! accumulated correction is what [`crate::PtpTimeSource`] subtracts from
//! the local clock.
//!
//! The epoch baseline is taken from the very first complete exchange with
//! no outlier rejection, so a glitched first measurement biases the
//! follower until it is restarted.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PtpError, Result};
use crate::message::{
    build_delay_req, PortIdentity, PtpBody, PtpMessage, EVENT_PORT, GENERAL_PORT, MULTICAST_GROUP,
};
use crate::servo::{PiServo, ServoState, DEFAULT_KI, DEFAULT_KP, DEFAULT_STEP_THRESHOLD};

/// Follower configuration.
#[derive(Debug, Clone)]
pub struct PtpConfig {
    /// Local interface address for the multicast join
    pub interface: Ipv4Addr,
    /// PTP domain to follow; messages for other domains are ignored
    pub domain: u8,
    /// Interface MAC for the EUI-64 port identity; a random clock
    /// identity is used when absent
    pub mac: Option<[u8; 6]>,
    /// Servo proportional gain
    pub kp: f64,
    /// Servo integral gain
    pub ki: f64,
    /// Servo step threshold in 100 ns ticks
    pub step_threshold: i64,
}

impl Default for PtpConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            domain: 0,
            mac: None,
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            step_threshold: DEFAULT_STEP_THRESHOLD,
        }
    }
}

/// One in-flight offset measurement.
#[derive(Debug, Default)]
struct Exchange {
    /// Master's Sync transmit time
    t1: Option<i64>,
    /// Our Sync receive time
    t2: Option<i64>,
    /// Our DelayReq transmit time
    t3: Option<i64>,
    sync_seq: u16,
    delay_seq: u16,
    awaiting_followup: bool,
    delay_pending: bool,
    baseline: Option<i64>,
    master: Option<PortIdentity>,
}

/// State shared between the follower task and its owner.
pub(crate) struct FollowerState {
    domain: u8,
    port_identity: PortIdentity,
    correction: AtomicI64,
    synchronized: AtomicBool,
    drift: AtomicI64,
    path_delay: AtomicI64,
    servo: Mutex<PiServo>,
    exchange: Mutex<Exchange>,
}

impl FollowerState {
    fn new(config: &PtpConfig) -> Self {
        let port_identity = match config.mac {
            Some(mac) => PortIdentity::from_mac(mac),
            None => PortIdentity::random(),
        };
        Self {
            domain: config.domain,
            port_identity,
            correction: AtomicI64::new(0),
            synchronized: AtomicBool::new(false),
            drift: AtomicI64::new(0),
            path_delay: AtomicI64::new(0),
            servo: Mutex::new(PiServo::new(config.kp, config.ki, config.step_threshold)),
            exchange: Mutex::new(Exchange::default()),
        }
    }

    fn servo_lock(&self) -> std::sync::MutexGuard<'_, PiServo> {
        self.servo.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn exchange_lock(&self) -> std::sync::MutexGuard<'_, Exchange> {
        self.exchange.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply one received message at local time `now`. Returns the
    /// sequence id of a DelayReq that should go out, if the exchange has
    /// both `t1` and `t2` and no request in flight.
    fn on_message(&self, msg: &PtpMessage, now: i64) -> Option<u16> {
        if msg.header.domain != self.domain {
            return None;
        }
        let mut ex = self.exchange_lock();
        match msg.body {
            PtpBody::Sync { origin } => {
                ex.t2 = Some(now);
                ex.sync_seq = msg.header.sequence_id;
                if ex.master != Some(msg.header.source_port) {
                    debug!("Following PTP master {:02X?}", msg.header.source_port.0);
                    ex.master = Some(msg.header.source_port);
                }
                if msg.header.two_step() {
                    ex.t1 = None;
                    ex.awaiting_followup = true;
                } else {
                    ex.t1 = Some(origin.to_hundred_ns() + msg.header.correction_hundred_ns());
                    ex.awaiting_followup = false;
                }
            }
            PtpBody::FollowUp { origin } => {
                if ex.awaiting_followup && msg.header.sequence_id == ex.sync_seq {
                    ex.t1 = Some(origin.to_hundred_ns() + msg.header.correction_hundred_ns());
                    ex.awaiting_followup = false;
                }
            }
            PtpBody::DelayResp { receive, requesting_port } => {
                if requesting_port == self.port_identity
                    && msg.header.sequence_id == ex.delay_seq
                    && ex.delay_pending
                {
                    self.complete_exchange(&mut ex, receive.to_hundred_ns());
                }
            }
            PtpBody::Other => {}
        }

        if ex.t1.is_some() && ex.t2.is_some() && !ex.delay_pending {
            ex.delay_seq = ex.delay_seq.wrapping_add(1);
            ex.delay_pending = true;
            Some(ex.delay_seq)
        } else {
            None
        }
    }

    /// Record the DelayReq transmit time.
    fn on_delay_req_sent(&self, t3: i64) {
        self.exchange_lock().t3 = Some(t3);
    }

    /// A DelayReq could not be written; allow a retry on the next Sync.
    fn on_delay_req_failed(&self) {
        self.exchange_lock().delay_pending = false;
    }

    fn complete_exchange(&self, ex: &mut Exchange, t4: i64) {
        let (Some(t1), Some(t2), Some(t3)) = (ex.t1, ex.t2, ex.t3) else {
            return;
        };

        // Round is over either way; the next Sync starts a fresh one
        ex.t1 = None;
        ex.t2 = None;
        ex.t3 = None;
        ex.awaiting_followup = false;
        ex.delay_pending = false;

        let (raw_offset, delay_sum) = compute_offset(t1, t2, t3, t4);
        if delay_sum < 0 {
            debug!("Negative path delay, ignoring PTP sample");
            return;
        }
        self.path_delay.store(delay_sum / 2, Ordering::Relaxed);

        match ex.baseline {
            None => {
                ex.baseline = Some(raw_offset);
                self.synchronized.store(true, Ordering::Relaxed);
                info!(
                    "PTP epoch baseline established ({} ticks, path delay {} ticks)",
                    raw_offset,
                    delay_sum / 2
                );
            }
            Some(baseline) => {
                let drift = raw_offset - baseline;
                self.drift.store(drift, Ordering::Relaxed);
                let correction = self.servo_lock().process_sample(drift);
                self.correction.fetch_add(correction, Ordering::Relaxed);
                debug!(
                    "PTP drift {} ticks, correction {} ticks, state {:?}",
                    drift,
                    correction,
                    self.servo_lock().state()
                );
            }
        }
    }
}

/// `raw_offset = ((t2 - t1) - (t4 - t3)) / 2`; the second value is the
/// unhalved path-delay sum `(t2 - t1) + (t4 - t3)`.
fn compute_offset(t1: i64, t2: i64, t3: i64, t4: i64) -> (i64, i64) {
    let master_to_slave = t2 - t1;
    let slave_to_master = t4 - t3;
    (
        (master_to_slave - slave_to_master) / 2,
        master_to_slave + slave_to_master,
    )
}

/// Background PTP follower.
pub struct PtpFollower {
    state: Arc<FollowerState>,
    config: PtpConfig,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PtpFollower {
    pub fn new(config: PtpConfig) -> Self {
        Self {
            state: Arc::new(FollowerState::new(&config)),
            config,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Bind the event and general sockets, join the multicast group and
    /// start the receive task.
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return Err(PtpError::AlreadyStarted);
        }

        let event = bind_multicast(EVENT_PORT, self.config.interface)?;
        let general = bind_multicast(GENERAL_PORT, self.config.interface)?;
        info!(
            "PTP follower listening on {}:{}/{} (domain {})",
            MULTICAST_GROUP, EVENT_PORT, GENERAL_PORT, self.config.domain
        );

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(run(state, cancel, event, general)));
        Ok(())
    }

    /// Stop the follower, waiting up to 2 s for the task to wind down
    /// before aborting it (which closes the sockets).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut handle) = handle {
            if timeout(Duration::from_secs(2), &mut handle).await.is_err() {
                warn!("PTP follower did not stop within 2 s, aborting");
                handle.abort();
            }
        }
    }

    /// Accumulated servo correction in 100 ns ticks.
    pub fn clock_correction_100ns(&self) -> i64 {
        self.state.correction.load(Ordering::Relaxed)
    }

    /// Whether an epoch baseline has been established.
    pub fn is_synchronized(&self) -> bool {
        self.state.synchronized.load(Ordering::Relaxed)
    }

    /// Last measured drift from the grandmaster, in microseconds.
    pub fn offset_microseconds(&self) -> f64 {
        self.state.drift.load(Ordering::Relaxed) as f64 / 10.0
    }

    /// Last measured one-way path delay in 100 ns ticks.
    pub fn path_delay_100ns(&self) -> i64 {
        self.state.path_delay.load(Ordering::Relaxed)
    }

    /// Current servo mode.
    pub fn servo_state(&self) -> ServoState {
        self.state.servo_lock().state()
    }

    /// Our 10-byte port identity.
    pub fn port_identity(&self) -> PortIdentity {
        self.state.port_identity
    }
}

fn bind_multicast(port: u16, interface: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&std::net::SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    socket.join_multicast_v4(MULTICAST_GROUP, interface)?;
    socket.set_multicast_ttl_v4(1)?;
    Ok(socket)
}

async fn run(
    state: Arc<FollowerState>,
    cancel: CancellationToken,
    event: UdpSocket,
    general: UdpSocket,
) {
    enum Inbound {
        Event(usize),
        General(usize),
    }

    let epoch = Instant::now();
    let now_100ns = |epoch: Instant| (epoch.elapsed().as_nanos() / 100) as i64;
    let mut event_buf = [0u8; 512];
    let mut general_buf = [0u8; 512];

    loop {
        let inbound = tokio::select! {
            _ = cancel.cancelled() => break,
            // Event socket polls with a bound so cancellation is never
            // starved by a silent network
            recv = timeout(Duration::from_millis(100), event.recv_from(&mut event_buf)) => {
                match recv {
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        warn!("PTP event socket error: {}", e);
                        continue;
                    }
                    Ok(Ok((len, _))) => Inbound::Event(len),
                }
            }
            recv = general.recv_from(&mut general_buf) => {
                match recv {
                    Err(e) => {
                        warn!("PTP general socket error: {}", e);
                        continue;
                    }
                    Ok((len, _)) => Inbound::General(len),
                }
            }
        };

        let received = match inbound {
            Inbound::Event(len) => &event_buf[..len],
            Inbound::General(len) => &general_buf[..len],
        };

        let msg = match PtpMessage::parse(received) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Ignoring malformed PTP message: {}", e);
                continue;
            }
        };

        if let Some(seq) = state.on_message(&msg, now_100ns(epoch)) {
            let wire = build_delay_req(state.domain, state.port_identity, seq);
            state.on_delay_req_sent(now_100ns(epoch));
            if let Err(e) = event.send_to(&wire, (MULTICAST_GROUP, EVENT_PORT)).await {
                warn!("Failed to send DelayReq: {}", e);
                state.on_delay_req_failed();
            }
        }
    }
    debug!("PTP follower task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{PtpHeader, PtpTimestamp, MessageType};

    fn state() -> FollowerState {
        FollowerState::new(&PtpConfig::default())
    }

    fn header(message_type: MessageType, seq: u16, two_step: bool) -> PtpHeader {
        PtpHeader {
            message_type,
            version: 2,
            message_length: 44,
            domain: 0,
            flags: [if two_step { 0x02 } else { 0 }, 0],
            correction: 0,
            source_port: PortIdentity([9; 10]),
            sequence_id: seq,
        }
    }

    fn sync(seq: u16, two_step: bool, origin_ticks: i64) -> PtpMessage {
        PtpMessage {
            header: header(MessageType::Sync, seq, two_step),
            body: PtpBody::Sync {
                origin: PtpTimestamp::from_hundred_ns(origin_ticks),
            },
        }
    }

    fn follow_up(seq: u16, origin_ticks: i64) -> PtpMessage {
        PtpMessage {
            header: header(MessageType::FollowUp, seq, false),
            body: PtpBody::FollowUp {
                origin: PtpTimestamp::from_hundred_ns(origin_ticks),
            },
        }
    }

    fn delay_resp(seq: u16, port: PortIdentity, receive_ticks: i64) -> PtpMessage {
        PtpMessage {
            header: header(MessageType::DelayResp, seq, false),
            body: PtpBody::DelayResp {
                receive: PtpTimestamp::from_hundred_ns(receive_ticks),
                requesting_port: port,
            },
        }
    }

    /// Drive one full exchange with the given timestamps.
    fn run_exchange(state: &FollowerState, seq: u16, t1: i64, t2: i64, t3: i64, t4: i64) {
        let req = state.on_message(&sync(seq, false, t1), t2);
        assert!(req.is_some(), "exchange must emit a DelayReq");
        state.on_delay_req_sent(t3);
        let delay_seq = state.exchange_lock().delay_seq;
        assert!(state
            .on_message(&delay_resp(delay_seq, state.port_identity, t4), t4)
            .is_none());
    }

    #[test]
    fn test_offset_and_delay_computation() {
        let (offset, delay_sum) = compute_offset(1000, 1100, 1200, 1250);
        assert_eq!(offset, 25);
        assert_eq!(delay_sum / 2, 75);
    }

    #[test]
    fn test_first_exchange_sets_baseline_without_adjusting() {
        let state = state();
        run_exchange(&state, 1, 1000, 1100, 1200, 1250);

        assert!(state.synchronized.load(Ordering::Relaxed));
        assert_eq!(state.exchange_lock().baseline, Some(25));
        assert_eq!(state.path_delay.load(Ordering::Relaxed), 75);
        // First measurement never moves the clock
        assert_eq!(state.correction.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_drift_feeds_servo_after_baseline() {
        let state = state();
        run_exchange(&state, 1, 1000, 1100, 1200, 1250);

        // Same geometry shifted: identical offset, drift 0
        run_exchange(&state, 2, 2000, 2100, 2200, 2250);
        assert_eq!(state.drift.load(Ordering::Relaxed), 0);
        assert_eq!(state.correction.load(Ordering::Relaxed), 0);

        // Offset grows by 50 ticks. The zero-drift sample above was the
        // servo's full step, so this one is PI-filtered: 0.7 * 50
        run_exchange(&state, 3, 3000, 3200, 3300, 3350);
        assert_eq!(state.drift.load(Ordering::Relaxed), 50);
        assert_eq!(state.correction.load(Ordering::Relaxed), 35);
    }

    #[test]
    fn test_two_step_waits_for_follow_up() {
        let state = state();
        // Two-step Sync: no DelayReq until the FollowUp arrives
        assert!(state.on_message(&sync(5, true, 0), 1100).is_none());
        let req = state.on_message(&follow_up(5, 1000), 1110);
        assert!(req.is_some());
        assert_eq!(state.exchange_lock().t1, Some(1000));
    }

    #[test]
    fn test_follow_up_sequence_must_match() {
        let state = state();
        assert!(state.on_message(&sync(5, true, 0), 1100).is_none());
        assert!(state.on_message(&follow_up(6, 1000), 1110).is_none());
        assert_eq!(state.exchange_lock().t1, None);
    }

    #[test]
    fn test_wrong_domain_ignored() {
        let state = state();
        let mut msg = sync(1, false, 1000);
        msg.header.domain = 7;
        assert!(state.on_message(&msg, 1100).is_none());
        assert_eq!(state.exchange_lock().t2, None);
    }

    #[test]
    fn test_delay_resp_for_other_port_ignored() {
        let state = state();
        let req = state.on_message(&sync(1, false, 1000), 1100);
        assert!(req.is_some());
        state.on_delay_req_sent(1200);

        let seq = state.exchange_lock().delay_seq;
        let other = PortIdentity([0xEE; 10]);
        state.on_message(&delay_resp(seq, other, 1250), 1250);
        assert!(!state.synchronized.load(Ordering::Relaxed));
    }

    #[test]
    fn test_negative_delay_sum_sample_ignored() {
        let state = state();
        run_exchange(&state, 1, 1000, 1100, 1200, 1250);
        // t4 earlier than t3 by more than the forward leg: impossible
        // geometry, sample discarded
        run_exchange(&state, 2, 2000, 2050, 2200, 2000);
        assert_eq!(state.drift.load(Ordering::Relaxed), 0);
        assert_eq!(state.correction.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_one_delay_req_per_round() {
        let state = state();
        assert!(state.on_message(&sync(1, false, 1000), 1100).is_some());
        state.on_delay_req_sent(1200);
        // A repeated Sync before the DelayResp must not double-request
        assert!(state.on_message(&sync(2, false, 2000), 2100).is_none());
    }
}
