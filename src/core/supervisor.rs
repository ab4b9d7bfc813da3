//! Connection supervisor: owns the lifetime of the one live event stream.
//!
//! Opening a stream never fails synchronously. The stream runs in its own
//! task and reports everything (open, events, transport failures) as
//! [`StreamMessage`]s on a channel, each tagged with the attempt and job it
//! was opened for. The task stops reading after a terminal event, a
//! transport failure, or an idle timeout. There is no automatic reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::adapters::{http, EventSource, TransportError};
use crate::domain::{Inbound, JobId, RawEvent};

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

/// What happened on a stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    /// Transport is up
    Opened,

    /// One raw event, in arrival order
    Event(RawEvent),

    /// Stream is gone without a terminal event
    TransportFailed(TransportError),
}

/// A stream signal tagged with the job it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub attempt: Uuid,
    pub job_id: JobId,
    pub signal: StreamSignal,
}

/// Supervisor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SupervisorError {
    #[error("A connection for job {0} is already open")]
    AlreadyOpen(JobId),

    #[error("Invalid stream endpoint: {0}")]
    Endpoint(String),
}

/// Handle to one live stream
pub struct Connection {
    attempt: Uuid,
    job_id: JobId,
    state: Arc<watch::Sender<ConnectionState>>,
    task: JoinHandle<()>,
}

impl Connection {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn attempt(&self) -> Uuid {
        self.attempt
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Stop reading and drop the transport
    fn close(&self) {
        self.task.abort();
        if self.state().is_live() {
            self.state.send_replace(ConnectionState::Closed);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Owns at most one connection at a time
pub struct ConnectionSupervisor {
    source: Arc<dyn EventSource>,
    base_url: Url,
    idle_timeout: Option<Duration>,
    tx: mpsc::UnboundedSender<StreamMessage>,
    active: Option<Connection>,
}

impl ConnectionSupervisor {
    /// Create a supervisor and the receiving end of its message channel
    pub fn new(
        source: Arc<dyn EventSource>,
        base_url: Url,
        idle_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            source,
            base_url,
            idle_timeout,
            tx,
            active: None,
        };
        (supervisor, rx)
    }

    /// State of the current connection
    pub fn state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn active(&self) -> Option<&Connection> {
        self.active.as_ref()
    }

    /// Open the stream for a job.
    ///
    /// A live connection for the same job is a caller error. A connection
    /// for any other job is stale and is closed first.
    pub fn open(
        &mut self,
        attempt: Uuid,
        job_id: &JobId,
        auth_token: &str,
    ) -> Result<ConnectionState, SupervisorError> {
        if let Some(current) = &self.active {
            if current.job_id == *job_id && current.attempt == attempt && current.state().is_live()
            {
                return Err(SupervisorError::AlreadyOpen(job_id.clone()));
            }
            if current.state().is_live() {
                warn!(stale_job = %current.job_id, "Closing stream of superseded job");
            }
            self.close();
        }

        let endpoint = http::stream_url(&self.base_url, job_id, auth_token)
            .map_err(|e| SupervisorError::Endpoint(e.to_string()))?;
        info!(%job_id, url = %http::redact(&endpoint), "Opening event stream");

        let (state, _) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state);

        let task = tokio::spawn(pump(
            Arc::clone(&self.source),
            endpoint,
            attempt,
            job_id.clone(),
            self.idle_timeout,
            Arc::clone(&state),
            self.tx.clone(),
        ));

        self.active = Some(Connection {
            attempt,
            job_id: job_id.clone(),
            state,
            task,
        });

        Ok(ConnectionState::Connecting)
    }

    /// Close the current connection, if any. The handle stays around so its
    /// final state can still be read.
    pub fn close(&mut self) {
        if let Some(connection) = &self.active {
            if connection.state().is_live() {
                debug!(job_id = %connection.job_id, "Closing event stream");
            }
            connection.close();
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read one stream until it ends, forwarding everything as messages
async fn pump(
    source: Arc<dyn EventSource>,
    endpoint: Url,
    attempt: Uuid,
    job_id: JobId,
    idle_timeout: Option<Duration>,
    state: Arc<watch::Sender<ConnectionState>>,
    tx: mpsc::UnboundedSender<StreamMessage>,
) {
    let send = |signal: StreamSignal| {
        // Receiver gone means the flow is gone; nothing left to tell
        let _ = tx.send(StreamMessage {
            attempt,
            job_id: job_id.clone(),
            signal,
        });
    };

    let mut stream = match source.connect(endpoint).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%job_id, error = %e, "Event stream could not be opened");
            state.send_replace(ConnectionState::Errored);
            send(StreamSignal::TransportFailed(e));
            return;
        }
    };

    state.send_replace(ConnectionState::Open);
    send(StreamSignal::Opened);

    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(next) => next,
                Err(_) => Some(Err(TransportError::IdleTimeout(limit))),
            },
            None => stream.next().await,
        };

        match next {
            Some(Ok(Inbound::KeepAlive)) => continue,
            Some(Ok(Inbound::Event(event))) => {
                // A terminal event tagged for another job does not end this stream
                let terminal = event.is_terminal()
                    && event
                        .job_id
                        .as_deref()
                        .map_or(true, |tagged| tagged == job_id.as_str());
                send(StreamSignal::Event(event));
                if terminal {
                    state.send_replace(ConnectionState::Closed);
                    debug!(%job_id, "Terminal event received, stream closed");
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(%job_id, error = %e, "Event stream failed");
                state.send_replace(ConnectionState::Errored);
                send(StreamSignal::TransportFailed(e));
                return;
            }
            None => {
                warn!(%job_id, "Event stream ended without a terminal event");
                state.send_replace(ConnectionState::Errored);
                send(StreamSignal::TransportFailed(TransportError::ClosedByServer));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::EventStream;
    use async_trait::async_trait;
    use futures::stream;

    /// Source that replays a fixed script for every connection
    struct ScriptedSource {
        items: Vec<Result<Inbound, TransportError>>,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self, _endpoint: Url) -> Result<EventStream, TransportError> {
            Ok(stream::iter(self.items.clone()).boxed())
        }
    }

    /// Source that never connects
    struct Unreachable;

    #[async_trait]
    impl EventSource for Unreachable {
        async fn connect(&self, _endpoint: Url) -> Result<EventStream, TransportError> {
            Err(TransportError::Connect("connection refused".to_string()))
        }
    }

    /// Source whose stream stays silent forever
    struct Silent;

    #[async_trait]
    impl EventSource for Silent {
        async fn connect(&self, _endpoint: Url) -> Result<EventStream, TransportError> {
            Ok(stream::pending().boxed())
        }
    }

    fn base() -> Url {
        Url::parse("http://localhost:3000").unwrap()
    }

    #[tokio::test]
    async fn test_terminal_event_closes_stream() {
        let source = ScriptedSource {
            items: vec![
                Ok(Inbound::Event(RawEvent::log("Starting orchestration"))),
                Ok(Inbound::KeepAlive),
                Ok(Inbound::Event(RawEvent::failure("boom"))),
                Ok(Inbound::Event(RawEvent::log("never delivered"))),
            ],
        };
        let (mut supervisor, mut rx) = ConnectionSupervisor::new(Arc::new(source), base(), None);
        let attempt = Uuid::new_v4();
        let job = JobId::new("j1");
        supervisor.open(attempt, &job, "t").unwrap();

        assert_eq!(rx.recv().await.unwrap().signal, StreamSignal::Opened);
        assert!(matches!(
            rx.recv().await.unwrap().signal,
            StreamSignal::Event(RawEvent { kind: crate::domain::EventKind::Log, .. })
        ));
        let last = rx.recv().await.unwrap();
        assert_eq!(last.signal, StreamSignal::Event(RawEvent::failure("boom")));
        assert_eq!(last.job_id, job);
        assert_eq!(last.attempt, attempt);

        tokio::task::yield_now().await;
        assert_eq!(supervisor.state(), ConnectionState::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_foreign_terminal_event_keeps_stream_open() {
        let source = ScriptedSource {
            items: vec![
                Ok(Inbound::Event(RawEvent::failure("other").with_job_id("j2"))),
                Ok(Inbound::Event(RawEvent::complete(None, vec![]).with_job_id("j1"))),
            ],
        };
        let (mut supervisor, mut rx) = ConnectionSupervisor::new(Arc::new(source), base(), None);
        supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();

        assert_eq!(rx.recv().await.unwrap().signal, StreamSignal::Opened);
        rx.recv().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().signal,
            StreamSignal::Event(RawEvent { kind: crate::domain::EventKind::Complete, .. })
        ));

        tokio::task::yield_now().await;
        assert_eq!(supervisor.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_asynchronously() {
        let (mut supervisor, mut rx) =
            ConnectionSupervisor::new(Arc::new(Unreachable), base(), None);
        let state = supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        let message = rx.recv().await.unwrap();
        assert!(matches!(
            message.signal,
            StreamSignal::TransportFailed(TransportError::Connect(_))
        ));
        assert_eq!(supervisor.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_end_of_stream_is_transport_failure() {
        let source = ScriptedSource {
            items: vec![Ok(Inbound::Event(RawEvent::log("Execution plan ready")))],
        };
        let (mut supervisor, mut rx) = ConnectionSupervisor::new(Arc::new(source), base(), None);
        supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap().signal,
            StreamSignal::TransportFailed(TransportError::ClosedByServer)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let limit = Duration::from_secs(30);
        let (mut supervisor, mut rx) =
            ConnectionSupervisor::new(Arc::new(Silent), base(), Some(limit));
        supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();

        assert_eq!(rx.recv().await.unwrap().signal, StreamSignal::Opened);
        assert_eq!(
            rx.recv().await.unwrap().signal,
            StreamSignal::TransportFailed(TransportError::IdleTimeout(limit))
        );
    }

    /// Source sending `count` keep-alives `every` apart, then going silent
    struct Heartbeat {
        every: Duration,
        count: u32,
    }

    #[async_trait]
    impl EventSource for Heartbeat {
        async fn connect(&self, _endpoint: Url) -> Result<EventStream, TransportError> {
            let every = self.every;
            let count = self.count;
            Ok(stream::unfold(0u32, move |sent| async move {
                if sent == count {
                    return None;
                }
                tokio::time::sleep(every).await;
                Some((Ok(Inbound::KeepAlive), sent + 1))
            })
            .chain(stream::pending())
            .boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alives_reset_idle_timeout() {
        let limit = Duration::from_secs(30);
        let source = Heartbeat {
            every: Duration::from_secs(20),
            count: 5,
        };
        let (mut supervisor, mut rx) =
            ConnectionSupervisor::new(Arc::new(source), base(), Some(limit));
        let started = tokio::time::Instant::now();
        supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();

        assert_eq!(rx.recv().await.unwrap().signal, StreamSignal::Opened);
        assert_eq!(
            rx.recv().await.unwrap().signal,
            StreamSignal::TransportFailed(TransportError::IdleTimeout(limit))
        );

        // 100s of keep-alives well past the limit, then one full idle period
        assert!(started.elapsed() >= Duration::from_secs(130));
        assert_eq!(supervisor.state(), ConnectionState::Errored);
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let (supervisor, _rx) = ConnectionSupervisor::new(Arc::new(Silent), base(), None);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
        assert!(supervisor.active().is_none());
    }

    #[tokio::test]
    async fn test_second_open_for_same_job_is_rejected() {
        let (mut supervisor, _rx) = ConnectionSupervisor::new(Arc::new(Silent), base(), None);
        let attempt = Uuid::new_v4();
        let job = JobId::new("j1");

        supervisor.open(attempt, &job, "t").unwrap();
        assert_eq!(
            supervisor.open(attempt, &job, "t"),
            Err(SupervisorError::AlreadyOpen(job.clone()))
        );
    }

    #[tokio::test]
    async fn test_open_for_new_job_closes_stale_one() {
        let (mut supervisor, _rx) = ConnectionSupervisor::new(Arc::new(Silent), base(), None);

        supervisor.open(Uuid::new_v4(), &JobId::new("old"), "t").unwrap();
        supervisor.open(Uuid::new_v4(), &JobId::new("new"), "t").unwrap();

        assert_eq!(supervisor.active().unwrap().job_id(), &JobId::new("new"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut supervisor, _rx) = ConnectionSupervisor::new(Arc::new(Silent), base(), None);
        supervisor.open(Uuid::new_v4(), &JobId::new("j1"), "t").unwrap();

        supervisor.close();
        supervisor.close();
        assert_eq!(supervisor.state(), ConnectionState::Closed);
    }
}
