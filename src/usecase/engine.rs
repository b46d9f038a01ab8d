//! Cyclic acquisition engine.
//!
//! One spawned task per poller owns the connection, drives the
//! connect/poll/backoff state machine and publishes into a single
//! latest-value cell. Callers never touch the connection: they read the
//! published snapshot and enqueue requests that the loop serializes.
//!
//! Failure-tolerance contract: a transport failure moves the loop into
//! `Retrying` without discarding the last published snapshot; only an
//! explicit disconnect clears it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::adapters::driver::{ConnectedClient, DriverError, PlcDriver};
use crate::core::codec::decode_page;
use crate::core::layout::RecordLayout;
use crate::core::model::{ConnectionState, PlcConfig, SawLog, Snapshot, SnapshotPayload};
use crate::usecase::session::{Session, SessionError};

/// Requests the poll loop serializes with its own ticks.
pub enum Request {
    Connect(PlcConfig),
    Disconnect,
    Reconfigure(PlcConfig),
    WriteRecord {
        index: usize,
        record: SawLog,
        ack: oneshot::Sender<Result<(), SessionError>>,
    },
}

/// Contents of the published latest-value cell.
#[derive(Clone, Debug, Default)]
pub struct Latest {
    pub snapshot: Option<Snapshot>,
    pub last_error: Option<String>,
}

pub struct SawlogPoller {
    requests: mpsc::UnboundedSender<Request>,
    state_rx: watch::Receiver<ConnectionState>,
    latest: Arc<Mutex<Latest>>,
    join: JoinHandle<()>,
}

impl SawlogPoller {
    /// Spawn the poll loop in `Disconnected` state.
    pub fn spawn(driver: Arc<dyn PlcDriver>) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let latest = Arc::new(Mutex::new(Latest::default()));

        let task = PollLoop {
            driver,
            requests: request_rx,
            state_tx,
            latest: Arc::clone(&latest),
            seq: 0,
        };
        let join = tokio::spawn(task.run());

        Self {
            requests: request_tx,
            state_rx,
            latest,
            join,
        }
    }

    pub fn connect(&self, config: PlcConfig) {
        let _ = self.requests.send(Request::Connect(config));
    }

    pub fn disconnect(&self) {
        let _ = self.requests.send(Request::Disconnect);
    }

    pub fn reconfigure(&self, config: PlcConfig) {
        let _ = self.requests.send(Request::Reconfigure(config));
    }

    /// Enqueue a single-record write and wait for it to be applied. The write
    /// is serialized with poll reads on the same connection.
    pub async fn write_record(&self, index: usize, record: SawLog) -> Result<(), SessionError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.requests
            .send(Request::WriteRecord {
                index,
                record,
                ack: ack_tx,
            })
            .map_err(|_| poller_stopped())?;
        ack_rx.await.map_err(|_| poller_stopped())?
    }

    /// Raw request channel, for callers that multiplex their own acks.
    pub fn requests(&self) -> mpsc::UnboundedSender<Request> {
        self.requests.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn latest(&self) -> Latest {
        self.latest.lock().clone()
    }

    /// Close the request channel and wait for the loop to wind down.
    pub async fn shutdown(self) {
        drop(self.requests);
        let _ = tokio::time::timeout(Duration::from_secs(1), self.join).await;
    }
}

fn poller_stopped() -> SessionError {
    SessionError::Driver(DriverError::Comm {
        message: "poller stopped".to_string(),
    })
}

fn not_connected(context: &str) -> SessionError {
    SessionError::Driver(DriverError::Comm {
        message: format!("not connected ({context})"),
    })
}

/// How an active connection phase ended.
enum Exit {
    Disconnect,
    Reconfigure(PlcConfig),
    Shutdown,
}

enum ConnectOutcome {
    Client(ConnectedClient),
    Failed(DriverError),
    Exit(Exit),
}

enum ReadOutcome {
    Data(Vec<u8>),
    Failed(SessionError),
    Exit(Exit),
}

enum PollEnd {
    Transport(String),
    Exit(Exit),
}

struct WriteJob {
    index: usize,
    record: SawLog,
    ack: oneshot::Sender<Result<(), SessionError>>,
}

struct PollLoop {
    driver: Arc<dyn PlcDriver>,
    requests: mpsc::UnboundedReceiver<Request>,
    state_tx: watch::Sender<ConnectionState>,
    latest: Arc<Mutex<Latest>>,
    seq: u64,
}

impl PollLoop {
    async fn run(mut self) {
        loop {
            let Some(request) = self.requests.recv().await else {
                return;
            };
            match request {
                Request::Connect(config) => {
                    let mut next = Some(config);
                    while let Some(config) = next.take() {
                        match self.run_connection(config).await {
                            Exit::Reconfigure(new_config) => next = Some(new_config),
                            Exit::Disconnect => {}
                            Exit::Shutdown => return,
                        }
                    }
                }
                Request::Reconfigure(_) | Request::Disconnect => {
                    debug!("[comm][poll] ignoring request while disconnected");
                }
                Request::WriteRecord { ack, .. } => {
                    let _ = ack.send(Err(not_connected("disconnected")));
                }
            }
        }
    }

    /// Drive one configured connection until an explicit exit. Transport
    /// failures stay inside: they feed the reconnect/backoff loop.
    async fn run_connection(&mut self, config: PlcConfig) -> Exit {
        let layout = RecordLayout::of(config.layout_version);
        let key = match self.driver.connection_key(&config) {
            Ok(key) => key,
            Err(err) => {
                self.record_error(format!("invalid connection config: {err}"));
                self.publish_state(ConnectionState::Disconnected);
                return Exit::Disconnect;
            }
        };
        let timeout = Duration::from_millis(config.timeout_ms);
        let base_delay = Duration::from_millis(config.retry.base_delay_ms);
        let max_delay = Duration::from_millis(config.retry.max_delay_ms);

        let mut attempt: u32 = 0;
        let mut delay = base_delay;

        loop {
            self.publish_state(ConnectionState::Connecting);
            info!("[comm][conn] connect {key}");

            match self.connect_with_requests(&config, timeout).await {
                ConnectOutcome::Exit(exit) => {
                    self.finish(&exit);
                    return exit;
                }
                ConnectOutcome::Failed(err) => {
                    self.record_error(format!("connect failed: {err}"));
                }
                ConnectOutcome::Client(client) => {
                    info!("[comm][conn] connected {key}");
                    self.publish_state(ConnectionState::Connected);
                    attempt = 0;
                    delay = base_delay;

                    let mut session =
                        Session::new(client, layout, config.block_id, config.start_offset);
                    match self.poll_until_exit(&mut session, &config, layout).await {
                        PollEnd::Exit(exit) => {
                            session.disconnect().await;
                            self.finish(&exit);
                            return exit;
                        }
                        PollEnd::Transport(message) => {
                            warn!("[comm][poll] {key}: {message}");
                            self.record_error(message);
                            session.disconnect().await;
                        }
                    }
                }
            }

            attempt += 1;
            self.publish_state(ConnectionState::Retrying {
                attempt,
                next_delay_ms: delay.as_millis() as u64,
            });
            debug!("[comm][poll] {key}: reconnect attempt {attempt} in {delay:?}");
            if let Some(exit) = self.wait_backoff(delay).await {
                self.finish(&exit);
                return exit;
            }
            delay = (delay * 2).min(max_delay);
        }
    }

    /// Interruptible backoff wait between reconnect attempts.
    async fn wait_backoff(&mut self, delay: Duration) -> Option<Exit> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    None => return Some(Exit::Shutdown),
                    Some(Request::Disconnect) => return Some(Exit::Disconnect),
                    Some(Request::Connect(new_config) | Request::Reconfigure(new_config)) => {
                        return Some(Exit::Reconfigure(new_config));
                    }
                    Some(Request::WriteRecord { ack, .. }) => {
                        let _ = ack.send(Err(not_connected("reconnecting")));
                    }
                },
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }

    /// Exit-time bookkeeping. Disconnect/shutdown clear the published
    /// snapshot; a reconfigure keeps it for the restarted loop.
    fn finish(&mut self, exit: &Exit) {
        match exit {
            Exit::Disconnect | Exit::Shutdown => {
                *self.latest.lock() = Latest::default();
                self.publish_state(ConnectionState::Disconnected);
                info!("[comm][conn] disconnected");
            }
            Exit::Reconfigure(_) => {
                info!("[comm][conn] restarting with new configuration");
            }
        }
    }

    async fn connect_with_requests(
        &mut self,
        config: &PlcConfig,
        timeout: Duration,
    ) -> ConnectOutcome {
        let driver = Arc::clone(&self.driver);
        let connect_fut = tokio::time::timeout(timeout, driver.connect(config));
        tokio::pin!(connect_fut);
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    None => return ConnectOutcome::Exit(Exit::Shutdown),
                    Some(Request::Disconnect) => return ConnectOutcome::Exit(Exit::Disconnect),
                    Some(Request::Connect(new_config) | Request::Reconfigure(new_config)) => {
                        return ConnectOutcome::Exit(Exit::Reconfigure(new_config));
                    }
                    Some(Request::WriteRecord { ack, .. }) => {
                        let _ = ack.send(Err(not_connected("connecting")));
                    }
                },
                result = &mut connect_fut => return match result {
                    Ok(Ok(client)) => ConnectOutcome::Client(client),
                    Ok(Err(err)) => ConnectOutcome::Failed(err),
                    Err(_) => ConnectOutcome::Failed(DriverError::Timeout),
                },
            }
        }
    }

    /// Poll on the configured interval until a transport failure or an
    /// explicit exit. Writes arriving while a read is in flight are deferred
    /// behind it; writes arriving between ticks run immediately. Either way a
    /// write suppresses the next tick instead of racing it.
    async fn poll_until_exit(
        &mut self,
        session: &mut Session,
        config: &PlcConfig,
        layout: &'static RecordLayout,
    ) -> PollEnd {
        let interval = Duration::from_millis(config.poll_interval_ms);
        let timeout = Duration::from_millis(config.timeout_ms);
        let mut pending: VecDeque<WriteJob> = VecDeque::new();

        loop {
            let outcome = {
                let read_fut = tokio::time::timeout(
                    timeout,
                    session.read_range(config.start_offset, config.length),
                );
                tokio::pin!(read_fut);
                loop {
                    tokio::select! {
                        request = self.requests.recv() => match request {
                            None => break ReadOutcome::Exit(Exit::Shutdown),
                            Some(Request::Disconnect) => break ReadOutcome::Exit(Exit::Disconnect),
                            Some(Request::Connect(new_config) | Request::Reconfigure(new_config)) => {
                                break ReadOutcome::Exit(Exit::Reconfigure(new_config));
                            }
                            Some(Request::WriteRecord { index, record, ack }) => {
                                pending.push_back(WriteJob { index, record, ack });
                            }
                        },
                        result = &mut read_fut => break match result {
                            Ok(Ok(payload)) => ReadOutcome::Data(payload),
                            Ok(Err(err)) => ReadOutcome::Failed(err),
                            Err(_) => ReadOutcome::Failed(SessionError::Driver(DriverError::Timeout)),
                        },
                    }
                }
            };

            match outcome {
                ReadOutcome::Exit(exit) => {
                    nack_all(&mut pending, "disconnecting");
                    return PollEnd::Exit(exit);
                }
                ReadOutcome::Failed(err) => {
                    let message = format!("poll read failed: {err}");
                    nack_all(&mut pending, "connection lost");
                    return PollEnd::Transport(message);
                }
                ReadOutcome::Data(payload) => self.publish_payload(payload, config, layout),
            }

            while let Some(job) = pending.pop_front() {
                if let Some(message) = self.apply_write(session, timeout, job).await {
                    nack_all(&mut pending, "connection lost");
                    return PollEnd::Transport(message);
                }
            }

            let deadline = Instant::now() + interval;
            loop {
                tokio::select! {
                    request = self.requests.recv() => match request {
                        None => return PollEnd::Exit(Exit::Shutdown),
                        Some(Request::Disconnect) => return PollEnd::Exit(Exit::Disconnect),
                        Some(Request::Connect(new_config) | Request::Reconfigure(new_config)) => {
                            return PollEnd::Exit(Exit::Reconfigure(new_config));
                        }
                        Some(Request::WriteRecord { index, record, ack }) => {
                            let job = WriteJob { index, record, ack };
                            if let Some(message) = self.apply_write(session, timeout, job).await {
                                return PollEnd::Transport(message);
                            }
                        }
                    },
                    _ = tokio::time::sleep_until(deadline) => break,
                }
            }
        }
    }

    /// Returns the error message if the write failed at the transport layer;
    /// range and shape errors only answer the caller.
    async fn apply_write(
        &mut self,
        session: &mut Session,
        timeout: Duration,
        job: WriteJob,
    ) -> Option<String> {
        let result = match tokio::time::timeout(
            timeout,
            session.write_record(job.index, &job.record),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Driver(DriverError::Timeout)),
        };

        match result {
            Ok(()) => {
                debug!("[comm][poll] wrote record {}", job.index);
                let _ = job.ack.send(Ok(()));
                None
            }
            Err(err) => {
                let transport = err.is_transport();
                let message = format!("write record {} failed: {err}", job.index);
                let _ = job.ack.send(Err(err));
                transport.then_some(message)
            }
        }
    }

    fn publish_payload(
        &mut self,
        payload: Vec<u8>,
        config: &PlcConfig,
        layout: &'static RecordLayout,
    ) {
        let full_register = config.start_offset == 0 && config.length == layout.page_size();
        let (payload, decode_error) = if full_register {
            match decode_page(&payload, layout) {
                Ok(page) => (SnapshotPayload::Page(page), None),
                Err(err) => (SnapshotPayload::Raw(payload), Some(err.to_string())),
            }
        } else {
            (SnapshotPayload::Raw(payload), None)
        };

        self.seq += 1;
        let snapshot = Snapshot {
            seq: self.seq,
            payload,
            read_at: Utc::now(),
        };
        let mut latest = self.latest.lock();
        latest.snapshot = Some(snapshot);
        latest.last_error = decode_error;
    }

    fn record_error(&self, message: String) {
        warn!("[comm][poll] {message}");
        self.latest.lock().last_error = Some(message);
    }

    fn publish_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }
}

fn nack_all(pending: &mut VecDeque<WriteJob>, context: &str) {
    for job in pending.drain(..) {
        let _ = job.ack.send(Err(not_connected(context)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::driver::mock::{MockDriver, MockEvent};
    use crate::core::layout::LayoutVersion;
    use crate::core::model::{RegisterPage, RetryPolicy};

    fn page_config(layout_version: LayoutVersion) -> PlcConfig {
        let layout = RecordLayout::of(layout_version);
        PlcConfig {
            ip: "192.168.0.10".to_string(),
            rack: 0,
            slot: 1,
            tcp_port: 102,
            block_id: 200,
            start_offset: 0,
            length: layout.page_size(),
            poll_interval_ms: 20,
            timeout_ms: 500,
            layout_version,
            retry: RetryPolicy {
                base_delay_ms: 50,
                max_delay_ms: 1000,
            },
        }
    }

    fn page_driver(layout_version: LayoutVersion) -> MockDriver {
        MockDriver::with_payload(vec![0u8; RecordLayout::of(layout_version).page_size()])
    }

    async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..deadline_ms.div_ceil(5) {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    #[tokio::test]
    async fn full_register_polls_publish_decoded_pages_with_monotonic_seq() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver));
        poller.connect(page_config(LayoutVersion::V1Compact));

        assert!(
            wait_until(2000, || {
                poller
                    .latest()
                    .snapshot
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.seq >= 2)
            })
            .await
        );

        let latest = poller.latest();
        let snapshot = latest.snapshot.unwrap();
        assert!(latest.last_error.is_none());
        assert_eq!(poller.state(), ConnectionState::Connected);
        match snapshot.payload {
            SnapshotPayload::Page(page) => {
                assert_eq!(page.records().len(), RegisterPage::CAPACITY)
            }
            SnapshotPayload::Raw(_) => panic!("full-register read should decode"),
        }

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn partial_range_polls_publish_raw_bytes() {
        let driver = page_driver(LayoutVersion::V1Compact);
        driver.set_payload((0u8..64).collect());
        let mut config = page_config(LayoutVersion::V1Compact);
        config.start_offset = 8;
        config.length = 16;

        let poller = SawlogPoller::spawn(Arc::new(driver));
        poller.connect(config);

        assert!(wait_until(2000, || poller.latest().snapshot.is_some()).await);
        match poller.latest().snapshot.unwrap().payload {
            SnapshotPayload::Raw(bytes) => assert_eq!(bytes, (8u8..24).collect::<Vec<_>>()),
            SnapshotPayload::Page(_) => panic!("partial range must not be decoded"),
        }

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn backoff_doubles_per_attempt_and_keeps_last_snapshot() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));

        let retry_states = Arc::new(Mutex::new(Vec::new()));
        let mut state_rx = poller.watch_state();
        let collector_states = Arc::clone(&retry_states);
        let collector = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = state_rx.borrow_and_update().clone();
                if let ConnectionState::Retrying { .. } = &state {
                    collector_states.lock().push(state);
                }
            }
        });

        poller.connect(page_config(LayoutVersion::V1Compact));
        assert!(wait_until(2000, || poller.latest().snapshot.is_some()).await);
        let seq_before = poller.latest().snapshot.unwrap().seq;

        // One broken read, then two refused reconnects: three transport
        // failures before the line comes back.
        driver.fail_reads(1);
        driver.fail_connects(2);

        assert!(wait_until(2000, || retry_states.lock().len() >= 3).await);
        assert_eq!(
            retry_states.lock()[0..3],
            [
                ConnectionState::Retrying {
                    attempt: 1,
                    next_delay_ms: 50
                },
                ConnectionState::Retrying {
                    attempt: 2,
                    next_delay_ms: 100
                },
                ConnectionState::Retrying {
                    attempt: 3,
                    next_delay_ms: 200
                },
            ]
        );

        // The pre-failure snapshot stayed queryable the whole time.
        let latest = poller.latest();
        assert!(latest.snapshot.is_some_and(|snapshot| snapshot.seq >= seq_before));

        assert!(
            wait_until(2000, || {
                poller.state() == ConnectionState::Connected
                    && poller
                        .latest()
                        .snapshot
                        .is_some_and(|snapshot| snapshot.seq > seq_before)
            })
            .await
        );
        assert!(poller.latest().last_error.is_none());

        poller.shutdown().await;
        collector.abort();
    }

    #[tokio::test]
    async fn backoff_delay_is_capped_at_max_delay() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let mut config = page_config(LayoutVersion::V1Compact);
        config.retry = RetryPolicy {
            base_delay_ms: 20,
            max_delay_ms: 40,
        };

        let retry_states = Arc::new(Mutex::new(Vec::new()));
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));
        let mut state_rx = poller.watch_state();
        let collector_states = Arc::clone(&retry_states);
        let collector = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                if let ConnectionState::Retrying { next_delay_ms, .. } =
                    *state_rx.borrow_and_update()
                {
                    collector_states.lock().push(next_delay_ms);
                }
            }
        });

        driver.fail_connects(4);
        poller.connect(config);

        assert!(wait_until(2000, || retry_states.lock().len() >= 4).await);
        assert_eq!(retry_states.lock()[0..4], [20, 40, 40, 40]);

        poller.shutdown().await;
        collector.abort();
    }

    #[tokio::test]
    async fn write_issued_during_read_applies_after_the_read_completes() {
        let layout = RecordLayout::of(LayoutVersion::V1Compact);
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));

        // Generous transport timeout: the gated read must not time out under
        // a slow test scheduler.
        let mut config = page_config(LayoutVersion::V1Compact);
        config.timeout_ms = 5000;

        driver.hold_reads();
        poller.connect(config);

        assert!(
            wait_until(2000, || {
                driver
                    .events()
                    .iter()
                    .any(|event| matches!(event, MockEvent::ReadStart { .. }))
            })
            .await
        );

        let mut record = SawLog::zeroed(layout);
        record.id = 4242;
        let (ack_tx, ack_rx) = oneshot::channel();
        poller
            .requests()
            .send(Request::WriteRecord {
                index: 7,
                record,
                ack: ack_tx,
            })
            .unwrap();

        // The read is still gated open; the write must wait behind it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            !driver
                .events()
                .iter()
                .any(|event| matches!(event, MockEvent::WriteStart { .. }))
        );

        driver.release_reads();
        ack_rx.await.unwrap().unwrap();

        let events = driver.events();
        let read_end = events
            .iter()
            .position(|event| *event == MockEvent::ReadEnd)
            .unwrap();
        let write_start = events
            .iter()
            .position(|event| matches!(event, MockEvent::WriteStart { .. }))
            .unwrap();
        let write_end = events
            .iter()
            .position(|event| *event == MockEvent::WriteEnd)
            .unwrap();
        assert!(read_end < write_start);
        assert!(write_start < write_end);
        // No poll read slipped in while the write was outstanding.
        assert!(!events[write_start..write_end]
            .iter()
            .any(|event| matches!(event, MockEvent::ReadStart { .. })));
        assert_eq!(
            driver.written()[0].0,
            7 * layout.record_size() as u32
        );

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn out_of_range_write_fails_without_a_transport_call() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));
        poller.connect(page_config(LayoutVersion::V1Compact));
        assert!(wait_until(2000, || poller.state() == ConnectionState::Connected).await);

        let record = SawLog::zeroed(RecordLayout::of(LayoutVersion::V1Compact));
        for index in [RegisterPage::CAPACITY, usize::MAX] {
            let err = poller.write_record(index, record.clone()).await.unwrap_err();
            assert!(matches!(err, SessionError::IndexOutOfRange { .. }));
        }
        assert!(driver.written().is_empty());
        // A rejected write does not disturb the connection.
        assert_eq!(poller.state(), ConnectionState::Connected);

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_clears_the_snapshot_and_releases_the_transport() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));
        poller.connect(page_config(LayoutVersion::V1Compact));
        assert!(wait_until(2000, || poller.latest().snapshot.is_some()).await);

        poller.disconnect();
        assert!(
            wait_until(2000, || {
                poller.state() == ConnectionState::Disconnected
                    && poller.latest().snapshot.is_none()
            })
            .await
        );
        assert!(driver
            .events()
            .iter()
            .any(|event| *event == MockEvent::Disconnect));

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn reconfigure_restarts_the_loop_without_clearing_the_snapshot() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));
        poller.connect(page_config(LayoutVersion::V1Compact));
        assert!(wait_until(2000, || poller.latest().snapshot.is_some()).await);

        let mut raw_config = page_config(LayoutVersion::V1Compact);
        raw_config.start_offset = 4;
        raw_config.length = 8;
        poller.reconfigure(raw_config);

        // Until the restarted loop publishes, every query still answers with
        // the old page snapshot.
        let mut saw_raw = false;
        for _ in 0..400 {
            let latest = poller.latest();
            let snapshot = latest.snapshot.expect("snapshot must survive reconfigure");
            if matches!(snapshot.payload, SnapshotPayload::Raw(_)) {
                saw_raw = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(saw_raw, "restarted loop never published the new range");

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_is_honored_during_a_backoff_wait() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let mut config = page_config(LayoutVersion::V1Compact);
        config.retry = RetryPolicy {
            base_delay_ms: 10_000,
            max_delay_ms: 10_000,
        };

        driver.fail_connects(1);
        let poller = SawlogPoller::spawn(Arc::new(driver));
        poller.connect(config);
        assert!(
            wait_until(2000, || {
                matches!(poller.state(), ConnectionState::Retrying { .. })
            })
            .await
        );

        // The wait is interruptible: no sitting out the remaining 10 s.
        let started = std::time::Instant::now();
        poller.disconnect();
        assert!(wait_until(2000, || poller.state() == ConnectionState::Disconnected).await);
        assert!(started.elapsed() < Duration::from_secs(5));

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn write_while_disconnected_is_rejected() {
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver));

        let record = SawLog::zeroed(RecordLayout::of(LayoutVersion::V1Compact));
        let err = poller.write_record(0, record).await.unwrap_err();
        assert!(err.is_transport());

        poller.shutdown().await;
    }

    #[tokio::test]
    async fn failed_write_answers_the_caller_and_triggers_reconnect() {
        let layout = RecordLayout::of(LayoutVersion::V1Compact);
        let driver = page_driver(LayoutVersion::V1Compact);
        let poller = SawlogPoller::spawn(Arc::new(driver.clone()));
        poller.connect(page_config(LayoutVersion::V1Compact));
        assert!(wait_until(2000, || poller.latest().snapshot.is_some()).await);
        let seq_before = poller.latest().snapshot.unwrap().seq;

        let mut record = SawLog::zeroed(layout);
        record.id = 1;
        driver.fail_writes(1);
        let err = poller.write_record(100, record.clone()).await.unwrap_err();
        assert!(err.is_transport());

        // The loop treats it as a broken connection but keeps the snapshot,
        // reconnects, and accepts the write on the fresh connection.
        assert!(poller
            .latest()
            .snapshot
            .is_some_and(|snapshot| snapshot.seq >= seq_before));
        assert!(wait_until(2000, || poller.state() == ConnectionState::Connected).await);
        poller.write_record(100, record).await.unwrap();
        assert!(!driver.written().is_empty());

        poller.shutdown().await;
    }
}
