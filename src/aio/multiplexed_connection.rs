//! The async connection lifecycle state machine (§4.4): a single cooperative
//! task per connection that owns the socket, loops over inbound requests and
//! inbound frames with `tokio::select!`, and completes the oldest in-flight
//! request on every non-push reply (head-of-line binding, §3/§8). This
//! replaces the teacher's hand-written `Sink`/`Stream` combinator pipeline
//! with the simpler actor shape the design calls for; see `SPEC_FULL.md` §5.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

use crate::client::ClientOptions;
use crate::cmd::Cmd;
use crate::commands::{lookup_command, parse_loading_state};
use crate::connection::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use crate::parser::RespCodec;
use crate::push_manager::PushManager;
use crate::retry_strategies::{ReconnectDecision, ReconnectOnErrorFn, RetryStrategyFn};
use crate::subscription::{SubscriptionKind, SubscriptionSet};
use crate::types::{stringify_large_integers, ErrorKind, RedisError, RedisResult, Value};

/// Coarse lifecycle state (§4.4), exposed mainly for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Wait,
    Connecting,
    Ready,
    Reconnecting,
    End,
}

/// The subset of `ClientOptions` the actor loop needs, plus the connection
/// target. Kept separate from `Client` so a `MultiplexedConnection` can be
/// built without depending on the sync connection path.
#[derive(Clone)]
pub struct MultiplexedConnectionConfig {
    pub addr: ConnectionAddr,
    pub redis: RedisConnectionInfo,
    pub connect_timeout: Option<Duration>,
    pub retry_strategy: RetryStrategyFn,
    pub reconnect_on_error: Option<ReconnectOnErrorFn>,
    pub enable_offline_queue: bool,
    pub enable_ready_check: bool,
    pub max_loading_retry_time: Duration,
    pub auto_resubscribe: bool,
    pub auto_resend_unfulfilled_commands: bool,
    pub max_retries_per_request: u32,
    pub stringify_numbers: bool,
    pub lazy_connect: bool,
}

impl MultiplexedConnectionConfig {
    pub fn new(connection_info: ConnectionInfo, options: &ClientOptions) -> Self {
        MultiplexedConnectionConfig {
            addr: connection_info.addr,
            redis: connection_info.redis,
            connect_timeout: options.connect_timeout,
            retry_strategy: options.retry_strategy.clone(),
            reconnect_on_error: options.reconnect_on_error.clone(),
            enable_offline_queue: options.enable_offline_queue,
            enable_ready_check: options.enable_ready_check,
            max_loading_retry_time: options.max_loading_retry_time,
            auto_resubscribe: options.auto_resubscribe,
            auto_resend_unfulfilled_commands: options.auto_resend_unfulfilled_commands,
            max_retries_per_request: options.max_retries_per_request,
            stringify_numbers: options.stringify_numbers,
            lazy_connect: options.lazy_connect,
        }
    }
}

trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type Transport = Framed<Pin<Box<dyn AsyncStream>>, RespCodec>;

/// What to write and how many replies to collect before answering, plus any
/// subscription-set updates the command implies. Turned into a `Request`
/// (with its response channel) by `MultiplexedConnection::send`.
struct RequestSpec {
    packed: Vec<u8>,
    expected_replies: usize,
    subscribe: Vec<(SubscriptionKind, String)>,
    unsubscribe: Vec<(SubscriptionKind, String)>,
    /// The originating command's name, for subscriber/monitor-mode gating
    /// (§4.4); `None` for packed pipelines, which are not gated (§1 scope:
    /// gating is defined per single command, not per pipeline batch).
    command_name: Option<String>,
    /// Whether writing this request should flip the connection into monitor
    /// mode (§4.4), mirroring the immediate, pre-reply bookkeeping `subscribe`
    /// already gets.
    enters_monitor: bool,
}

/// One queued request: the packed command(s) to write, how many replies to
/// collect before answering, and whether its reply should update the
/// subscription set once it completes.
struct Request {
    packed: Vec<u8>,
    expected_replies: usize,
    subscribe: Vec<(SubscriptionKind, String)>,
    unsubscribe: Vec<(SubscriptionKind, String)>,
    command_name: Option<String>,
    enters_monitor: bool,
    /// How many times this request has been (re)sent. Zero for a request
    /// that has never left the queue; incremented each time
    /// `auto_resend_unfulfilled_commands` resends it after a dropped socket.
    attempt: u32,
    respond_to: oneshot::Sender<RedisResult<Vec<Value>>>,
}

enum ActorMessage {
    Request(Request),
}

struct PendingRequest {
    /// Retained so the request can be resent verbatim if the socket dies
    /// before it's fully answered and `auto_resend_unfulfilled_commands` is
    /// set; a partially-answered command is resent from scratch rather than
    /// patched up, since a fresh connection can't be assumed to share any
    /// state with the one that produced the replies collected so far.
    packed: Vec<u8>,
    original_expected: usize,
    remaining: usize,
    collected: Vec<Value>,
    command_name: Option<String>,
    enters_monitor: bool,
    attempt: u32,
    respond_to: oneshot::Sender<RedisResult<Vec<Value>>>,
}

/// A cloneable handle to a background connection task. Cloning shares the
/// same socket and in-flight pipeline (§3 "Multiplexed connection").
#[derive(Clone)]
pub struct MultiplexedConnection {
    tx: mpsc::UnboundedSender<ActorMessage>,
    state: Arc<ArcSwap<ConnectionState>>,
    push_manager: PushManager,
    enable_offline_queue: bool,
    stringify_numbers: bool,
}

impl MultiplexedConnection {
    /// Spawns the actor task and, unless `lazy_connect` is set, waits for the
    /// first connection attempt to finish before returning.
    pub async fn connect(config: MultiplexedConnectionConfig) -> RedisResult<Self> {
        let lazy_connect = config.lazy_connect;
        let enable_offline_queue = config.enable_offline_queue;
        let stringify_numbers = config.stringify_numbers;
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(ArcSwap::new(Arc::new(ConnectionState::Wait)));
        let push_manager = PushManager::new(None);

        let (ready_tx, ready_rx) = oneshot::channel();
        let task_state = state.clone();
        let task_push_manager = push_manager.clone();
        crate::aio::runtime::spawn(run(config, rx, task_state, task_push_manager, Some(ready_tx)));

        let connection = MultiplexedConnection {
            tx,
            state,
            push_manager,
            enable_offline_queue,
            stringify_numbers,
        };
        if lazy_connect {
            return Ok(connection);
        }
        match ready_rx.await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(RedisError::new(
                ErrorKind::ConnectionClosed,
                "connection task ended before completing its first connect",
            )),
        }
    }

    pub fn state(&self) -> ConnectionState {
        **self.state.load()
    }

    pub fn push_manager(&self) -> &PushManager {
        &self.push_manager
    }

    async fn send(&self, spec: RequestSpec) -> RedisResult<Vec<Value>> {
        if !self.enable_offline_queue && self.state() != ConnectionState::Ready {
            return Err(RedisError::new(
                ErrorKind::ConnectionClosed,
                "offline queueing is disabled and the connection is not ready",
            ));
        }
        let (respond_to, rx) = oneshot::channel();
        let request = Request {
            packed: spec.packed,
            expected_replies: spec.expected_replies,
            subscribe: spec.subscribe,
            unsubscribe: spec.unsubscribe,
            command_name: spec.command_name,
            enters_monitor: spec.enters_monitor,
            attempt: 0,
            respond_to,
        };
        self.tx
            .send(ActorMessage::Request(request))
            .map_err(|_| RedisError::new(ErrorKind::ConnectionClosed, "connection task is gone"))?;
        rx.await
            .map_err(|_| RedisError::new(ErrorKind::ConnectionClosed, "connection task dropped the request"))?
    }

    pub async fn req_command(&self, cmd: &Cmd) -> RedisResult<Value> {
        let (subscribe, unsubscribe) = subscription_deltas(cmd);
        let spec = RequestSpec {
            packed: cmd.get_packed_command(),
            expected_replies: 1,
            subscribe,
            unsubscribe,
            command_name: Some(cmd.name().to_string()),
            enters_monitor: cmd.name().eq_ignore_ascii_case("MONITOR"),
        };
        let mut replies = self.send(spec).await?;
        let value = replies.pop().ok_or_else(|| {
            RedisError::new(ErrorKind::Protocol, "no reply received for command")
        })?;
        let value = value.extract_error()?;
        let value = if self.stringify_numbers { stringify_large_integers(value) } else { value };
        Ok(crate::commands::transform_reply(cmd.name(), value))
    }

    /// Switches the connection into monitor mode (§4.4): once the reply to
    /// this command is acknowledged, every subsequent request other than one
    /// flagged `valid_in_monitor_mode` is rejected with
    /// `ErrorKind::MonitorMode` until the connection reconnects. There is no
    /// command to leave monitor mode short of disconnecting.
    pub async fn monitor(&self) -> RedisResult<()> {
        self.req_command(&Cmd::with_name("MONITOR")).await?;
        Ok(())
    }

    pub async fn req_packed_commands(
        &self,
        packed: Vec<u8>,
        offset: usize,
        count: usize,
    ) -> RedisResult<Vec<Value>> {
        let spec = RequestSpec {
            packed,
            expected_replies: offset + count,
            subscribe: Vec::new(),
            unsubscribe: Vec::new(),
            command_name: None,
            enters_monitor: false,
        };
        let mut replies = self.send(spec).await?;
        let tail = replies.split_off(offset.min(replies.len()));
        Ok(if self.stringify_numbers {
            tail.into_iter().map(stringify_large_integers).collect()
        } else {
            tail
        })
    }
}

fn subscription_deltas(cmd: &Cmd) -> (Vec<(SubscriptionKind, String)>, Vec<(SubscriptionKind, String)>) {
    let kind = match cmd.name() {
        "SUBSCRIBE" => Some((SubscriptionKind::Channel, true)),
        "UNSUBSCRIBE" => Some((SubscriptionKind::Channel, false)),
        "PSUBSCRIBE" => Some((SubscriptionKind::Pattern, true)),
        "PUNSUBSCRIBE" => Some((SubscriptionKind::Pattern, false)),
        _ => None,
    };
    let Some((kind, adding)) = kind else {
        return (Vec::new(), Vec::new());
    };
    let targets: Vec<String> = cmd
        .args()
        .iter()
        .skip(1)
        .filter_map(|a| std::str::from_utf8(a).ok().map(str::to_string))
        .collect();
    if adding {
        (targets.into_iter().map(|t| (kind, t)).collect(), Vec::new())
    } else {
        (Vec::new(), targets.into_iter().map(|t| (kind, t)).collect())
    }
}

async fn run(
    config: MultiplexedConnectionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ActorMessage>,
    state: Arc<ArcSwap<ConnectionState>>,
    push_manager: PushManager,
    mut ready_tx: Option<oneshot::Sender<RedisResult<()>>>,
) {
    let mut subscriptions = SubscriptionSet::new();
    let mut attempt: u32 = 0;
    let mut pending_offline: VecDeque<Request> = VecDeque::new();

    'reconnect: loop {
        state.store(Arc::new(ConnectionState::Connecting));
        let transport = match connect_and_ready(&config).await {
            Ok(t) => t,
            Err(err) => {
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Err(err.clone()));
                }
                attempt += 1;
                match (config.retry_strategy)(attempt) {
                    Some(delay_ms) => {
                        state.store(Arc::new(ConnectionState::Reconnecting));
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        continue 'reconnect;
                    }
                    None => {
                        state.store(Arc::new(ConnectionState::End));
                        fail_all_queued(&mut pending_offline, err.clone());
                        drain_channel_with_error(&mut cmd_rx, err);
                        return;
                    }
                }
            }
        };
        attempt = 0;
        if let Some(tx) = ready_tx.take() {
            let _ = tx.send(Ok(()));
        }
        state.store(Arc::new(ConnectionState::Ready));
        // Monitor mode never survives a reconnect; there's no MONITOR
        // equivalent of `auto_resubscribe` to replay it.
        let mut monitor_mode = false;

        let (mut sink, mut stream) = transport.split();
        if config.auto_resubscribe && !subscriptions.is_empty() {
            for replay in subscriptions.replay_commands() {
                if sink.send(replay.get_packed_command()).await.is_err() {
                    continue 'reconnect;
                }
            }
        }

        let mut in_flight: VecDeque<PendingRequest> = VecDeque::new();
        if config.auto_resend_unfulfilled_commands {
            while let Some(request) = pending_offline.pop_front() {
                if write_request(&mut sink, &mut in_flight, &mut subscriptions, &mut monitor_mode, request)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        } else {
            pending_offline.clear();
        }

        loop {
            tokio::select! {
                maybe_msg = cmd_rx.recv() => {
                    match maybe_msg {
                        Some(ActorMessage::Request(request)) => {
                            if write_request(&mut sink, &mut in_flight, &mut subscriptions, &mut monitor_mode, request)
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        None => {
                            state.store(Arc::new(ConnectionState::End));
                            return;
                        }
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(value)) => {
                            let reconnect = reply_triggers_reconnect(&value, config.reconnect_on_error.as_ref());
                            handle_reply(value, &mut in_flight, &mut subscriptions, &push_manager);
                            if reconnect {
                                let err = RedisError::new(ErrorKind::ConnectionClosed, "reconnect_on_error requested a reconnect");
                                requeue_or_fail(&mut in_flight, &mut pending_offline, err, config.auto_resend_unfulfilled_commands, config.max_retries_per_request);
                                break;
                            }
                        }
                        Some(Err(err)) => {
                            requeue_or_fail(&mut in_flight, &mut pending_offline, err, config.auto_resend_unfulfilled_commands, config.max_retries_per_request);
                            break;
                        }
                        None => {
                            let err = RedisError::new(ErrorKind::ConnectionClosed, "server closed the connection");
                            requeue_or_fail(&mut in_flight, &mut pending_offline, err, config.auto_resend_unfulfilled_commands, config.max_retries_per_request);
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Rejects a command that isn't valid given the connection's current
/// subscriber/monitor mode (§4.4), consulting the static command table.
/// Commands absent from the table (custom commands) are always allowed,
/// same as routing treats them as keyless rather than rejecting them.
fn gate_for_mode(name: &str, subscriber_mode: bool, monitor_mode: bool) -> Option<RedisError> {
    let (valid_in_subscriber, valid_in_monitor) = lookup_command(name)
        .map(|f| (f.valid_in_subscriber_mode, f.valid_in_monitor_mode))
        .unwrap_or((true, true));
    if monitor_mode && !valid_in_monitor {
        return Some(RedisError::new(
            ErrorKind::MonitorMode,
            format!("{name} is not valid while the connection is monitoring"),
        ));
    }
    if subscriber_mode && !valid_in_subscriber {
        return Some(RedisError::new(
            ErrorKind::SubscriberMode,
            format!("{name} is not valid while subscribed"),
        ));
    }
    None
}

async fn write_request(
    sink: &mut (impl futures_util::Sink<Vec<u8>, Error = RedisError> + Unpin),
    in_flight: &mut VecDeque<PendingRequest>,
    subscriptions: &mut SubscriptionSet,
    monitor_mode: &mut bool,
    request: Request,
) -> Result<(), ()> {
    let Request {
        packed,
        expected_replies,
        subscribe,
        unsubscribe,
        command_name,
        enters_monitor,
        attempt,
        respond_to,
    } = request;

    if let Some(name) = &command_name {
        if let Some(err) = gate_for_mode(name, !subscriptions.is_empty(), *monitor_mode) {
            let _ = respond_to.send(Err(err));
            return Ok(());
        }
    }

    if sink.send(packed.clone()).await.is_err() {
        let _ = respond_to.send(Err(RedisError::new(
            ErrorKind::ConnectionClosed,
            "failed writing to the connection",
        )));
        return Err(());
    }
    for (kind, target) in subscribe {
        subscriptions.add(kind, target);
    }
    for (kind, target) in unsubscribe {
        subscriptions.remove(kind, &target);
    }
    if enters_monitor {
        *monitor_mode = true;
    }
    in_flight.push_back(PendingRequest {
        packed,
        original_expected: expected_replies,
        remaining: expected_replies,
        collected: Vec::with_capacity(expected_replies),
        command_name,
        enters_monitor,
        attempt,
        respond_to,
    });
    Ok(())
}

/// Consults `reconnect_on_error` (§4.4, §7) against a server error reply
/// before it's bound to its request, so a caller-classified error (e.g. a
/// `READONLY` hit against a failed-over primary) can tear the socket down
/// even though the reply itself completes normally.
fn reply_triggers_reconnect(value: &Value, reconnect_on_error: Option<&ReconnectOnErrorFn>) -> bool {
    let Value::ServerError(server_err) = value else {
        return false;
    };
    let err: RedisError = server_err.clone().into();
    matches!(
        classify_reconnect(&err, reconnect_on_error),
        ReconnectDecision::Disconnect | ReconnectDecision::DisconnectAndResend
    )
}

fn handle_reply(
    value: Value,
    in_flight: &mut VecDeque<PendingRequest>,
    _subscriptions: &mut SubscriptionSet,
    push_manager: &PushManager,
) {
    let push_kind = push_manager.try_deliver(&value);
    let also_completes = matches!(push_kind, Some(kind) if kind.is_confirmation());
    if push_kind.is_some() && !also_completes {
        return;
    }
    bind_to_head(value, in_flight);
}

fn bind_to_head(value: Value, in_flight: &mut VecDeque<PendingRequest>) {
    let Some(front) = in_flight.front_mut() else {
        return;
    };
    front.collected.push(value);
    front.remaining = front.remaining.saturating_sub(1);
    if front.remaining == 0 {
        if let Some(done) = in_flight.pop_front() {
            let _ = done.respond_to.send(Ok(done.collected));
        }
    }
}

/// Decides what happens to in-flight requests when the socket dies mid-flight
/// (§4.4 `auto_resend_unfulfilled_commands`, §7): with it disabled, every
/// in-flight request fails outright; with it enabled, each is turned back
/// into a `Request` (from its retained packed bytes) and queued ahead of
/// whatever was already waiting offline, so the oldest unanswered command is
/// resent first. `max_retries_per_request` bounds how many times any single
/// request can make this trip: once its attempt counter hits a multiple of
/// `max_retries_per_request + 1`, it is flushed with `ErrorKind::MaxRetries`
/// instead of being queued again (§4.4).
fn requeue_or_fail(
    in_flight: &mut VecDeque<PendingRequest>,
    pending_offline: &mut VecDeque<Request>,
    err: RedisError,
    auto_resend: bool,
    max_retries_per_request: u32,
) {
    if !auto_resend {
        fail_all(in_flight, err);
        return;
    }
    let cap = max_retries_per_request as u64 + 1;
    let mut resend: VecDeque<Request> = VecDeque::new();
    while let Some(pending) = in_flight.pop_front() {
        let attempt = pending.attempt + 1;
        if attempt as u64 % cap == 0 {
            let _ = pending.respond_to.send(Err(RedisError::new(
                ErrorKind::MaxRetries,
                "max_retries_per_request was reached while resending an in-flight command",
            )));
            continue;
        }
        resend.push_back(Request {
            packed: pending.packed,
            expected_replies: pending.original_expected,
            subscribe: Vec::new(),
            unsubscribe: Vec::new(),
            command_name: pending.command_name,
            enters_monitor: pending.enters_monitor,
            attempt,
            respond_to: pending.respond_to,
        });
    }
    resend.append(pending_offline);
    *pending_offline = resend;
    let _ = err;
}

fn fail_all(in_flight: &mut VecDeque<PendingRequest>, err: RedisError) {
    while let Some(pending) = in_flight.pop_front() {
        let _ = pending.respond_to.send(Err(err.clone()));
    }
}

fn fail_all_queued(pending_offline: &mut VecDeque<Request>, err: RedisError) {
    while let Some(request) = pending_offline.pop_front() {
        let _ = request.respond_to.send(Err(err.clone()));
    }
}

fn drain_channel_with_error(rx: &mut mpsc::UnboundedReceiver<ActorMessage>, err: RedisError) {
    while let Ok(ActorMessage::Request(request)) = rx.try_recv() {
        let _ = request.respond_to.send(Err(err.clone()));
    }
}

async fn connect_and_ready(config: &MultiplexedConnectionConfig) -> RedisResult<Transport> {
    let stream = open_transport(config).await?;
    let mut transport = Framed::new(stream, RespCodec::default());
    authenticate_and_select(&mut transport, &config.redis).await?;
    if config.enable_ready_check {
        wait_until_ready(&mut transport, config.max_loading_retry_time).await?;
    }
    Ok(transport)
}

async fn open_transport(config: &MultiplexedConnectionConfig) -> RedisResult<Pin<Box<dyn AsyncStream>>> {
    match &config.addr {
        ConnectionAddr::Tcp { host, port } => {
            let tcp = connect_tcp(host, *port, config.connect_timeout).await?;
            Ok(Box::pin(tcp))
        }
        ConnectionAddr::TcpTls { host, port, insecure } => {
            #[cfg(feature = "tls-rustls")]
            {
                let tcp = connect_tcp(host, *port, config.connect_timeout).await?;
                let mode = if *insecure {
                    crate::tls::TlsMode::Insecure
                } else {
                    crate::tls::TlsMode::Secure
                };
                let tls_config = crate::tls::build_client_config(&mode)?;
                let connector = tokio_rustls::TlsConnector::from(tls_config);
                let server_name = crate::tls::server_name(host)?;
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| RedisError::new(ErrorKind::IoError, e.to_string()))?;
                Ok(Box::pin(tls_stream))
            }
            #[cfg(not(feature = "tls-rustls"))]
            {
                let _ = (host, port, insecure);
                Err(RedisError::new(
                    ErrorKind::InvalidClientConfig,
                    "this build was compiled without the tls-rustls feature",
                ))
            }
        }
        #[cfg(unix)]
        ConnectionAddr::Unix { path } => {
            let unix = tokio::net::UnixStream::connect(path)
                .await
                .map_err(RedisError::from)?;
            Ok(Box::pin(unix))
        }
    }
}

async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> RedisResult<TcpStream> {
    let connect = TcpStream::connect((host, port));
    let stream = match timeout {
        Some(dur) => tokio::time::timeout(dur, connect)
            .await
            .map_err(|_| RedisError::new(ErrorKind::ConnectTimeout, "connect phase timed out"))??,
        None => connect.await?,
    };
    stream.set_nodelay(true).ok();
    Ok(stream)
}

async fn authenticate_and_select(transport: &mut Transport, info: &RedisConnectionInfo) -> RedisResult<()> {
    if let Some(password) = &info.password {
        let mut c = Cmd::with_name("AUTH");
        if let Some(username) = &info.username {
            c.arg(username);
        }
        c.arg(password);
        send_and_await_one(transport, &c).await?;
    }
    if info.db != 0 {
        let mut c = Cmd::with_name("SELECT");
        c.arg(info.db);
        send_and_await_one(transport, &c).await?;
    }
    if let Some(name) = &info.connection_name {
        let mut c = Cmd::with_name("CLIENT");
        c.arg("SETNAME").arg(name);
        send_and_await_one(transport, &c).await?;
    }
    Ok(())
}

async fn send_and_await_one(transport: &mut Transport, cmd: &Cmd) -> RedisResult<Value> {
    transport.send(cmd.get_packed_command()).await?;
    let reply = transport
        .next()
        .await
        .ok_or_else(|| RedisError::new(ErrorKind::ConnectionClosed, "connection closed during handshake"))??;
    reply.extract_error()
}

async fn wait_until_ready(transport: &mut Transport, max_wait: Duration) -> RedisResult<()> {
    let deadline = tokio::time::Instant::now() + max_wait;
    loop {
        let reply = send_and_await_one(transport, &Cmd::with_name("INFO")).await?;
        let Value::Data(bytes) = reply else {
            return Ok(());
        };
        let text = String::from_utf8_lossy(&bytes);
        let (loading, eta) = parse_loading_state(&text);
        if !loading {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RedisError::new(
                ErrorKind::ConnectTimeout,
                "server was still loading its dataset when max_loading_retry_time elapsed",
            ));
        }
        let wait = Duration::from_secs(eta.max(1)).min(max_wait);
        tokio::time::sleep(wait).await;
    }
}

/// Maps a server error to what the connection should do about the socket,
/// consulting `reconnect_on_error` first and otherwise falling back to the
/// default cluster-retriable classification (§4.4, §7).
pub fn classify_reconnect(err: &RedisError, reconnect_on_error: Option<&ReconnectOnErrorFn>) -> ReconnectDecision {
    if let Some(f) = reconnect_on_error {
        return f(err);
    }
    if matches!(err.kind(), ErrorKind::ConnectionClosed | ErrorKind::IoError) {
        ReconnectDecision::DisconnectAndResend
    } else {
        ReconnectDecision::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(remaining: usize, respond_to: oneshot::Sender<RedisResult<Vec<Value>>>) -> PendingRequest {
        PendingRequest {
            packed: b"*1\r\n$4\r\nPING\r\n".to_vec(),
            original_expected: remaining,
            remaining,
            collected: Vec::new(),
            command_name: Some("PING".to_string()),
            enters_monitor: false,
            attempt: 0,
            respond_to,
        }
    }

    #[test]
    fn default_classification_resends_on_connection_closed() {
        let err = RedisError::new(ErrorKind::ConnectionClosed, "closed");
        assert_eq!(classify_reconnect(&err, None), ReconnectDecision::DisconnectAndResend);
    }

    #[test]
    fn default_classification_ignores_ordinary_reply_errors() {
        let err = RedisError::new(ErrorKind::Reply, "WRONGTYPE");
        assert_eq!(classify_reconnect(&err, None), ReconnectDecision::Ignore);
    }

    #[test]
    fn subscription_deltas_extract_channel_targets() {
        let mut c = Cmd::with_name("SUBSCRIBE");
        c.arg("ch1").arg("ch2");
        let (subscribe, unsubscribe) = subscription_deltas(&c);
        assert_eq!(subscribe.len(), 2);
        assert!(unsubscribe.is_empty());
    }

    #[test]
    fn bind_to_head_completes_request_once_remaining_hits_zero() {
        let mut in_flight = VecDeque::new();
        let (tx, mut rx) = oneshot::channel();
        in_flight.push_back(pending(2, tx));
        bind_to_head(Value::Int(1), &mut in_flight);
        assert!(rx.try_recv().is_err());
        bind_to_head(Value::Int(2), &mut in_flight);
        let result = rx.try_recv().unwrap().unwrap();
        assert_eq!(result, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn gate_rejects_ordinary_commands_while_subscribed() {
        let err = gate_for_mode("GET", true, false).unwrap();
        assert_eq!(err.kind(), ErrorKind::SubscriberMode);
    }

    #[test]
    fn gate_allows_ping_while_subscribed() {
        assert!(gate_for_mode("PING", true, false).is_none());
    }

    #[test]
    fn gate_rejects_ordinary_commands_while_monitoring() {
        let err = gate_for_mode("GET", false, true).unwrap();
        assert_eq!(err.kind(), ErrorKind::MonitorMode);
    }

    #[test]
    fn gate_allows_quit_in_either_mode() {
        assert!(gate_for_mode("QUIT", true, false).is_none());
        assert!(gate_for_mode("QUIT", false, true).is_none());
    }

    #[test]
    fn gate_allows_unknown_commands_through() {
        assert!(gate_for_mode("FOO.BAR", true, true).is_none());
    }

    #[test]
    fn auto_resend_disabled_fails_in_flight_requests_immediately() {
        let mut in_flight = VecDeque::new();
        let mut pending_offline = VecDeque::new();
        let (tx, mut rx) = oneshot::channel();
        in_flight.push_back(pending(1, tx));
        requeue_or_fail(&mut in_flight, &mut pending_offline, RedisError::new(ErrorKind::IoError, "dead"), false, 3);
        assert!(in_flight.is_empty());
        assert!(pending_offline.is_empty());
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn auto_resend_requeues_in_flight_requests_ahead_of_ones_already_offline() {
        let mut in_flight = VecDeque::new();
        let (tx1, _rx1) = oneshot::channel();
        in_flight.push_back(pending(1, tx1));

        let mut pending_offline = VecDeque::new();
        let (tx2, _rx2) = oneshot::channel();
        pending_offline.push_back(Request {
            packed: b"*1\r\n$4\r\nPING\r\n".to_vec(),
            expected_replies: 1,
            subscribe: Vec::new(),
            unsubscribe: Vec::new(),
            command_name: Some("PING".into()),
            enters_monitor: false,
            attempt: 0,
            respond_to: tx2,
        });

        requeue_or_fail(&mut in_flight, &mut pending_offline, RedisError::new(ErrorKind::IoError, "dead"), true, 3);
        assert!(in_flight.is_empty());
        assert_eq!(pending_offline.len(), 2);
        assert_eq!(pending_offline[0].attempt, 1);
        assert_eq!(pending_offline[1].attempt, 0);
    }

    #[test]
    fn auto_resend_gives_up_once_max_retries_per_request_is_reached() {
        let mut in_flight = VecDeque::new();
        let (tx, mut rx) = oneshot::channel();
        in_flight.push_back(pending(1, tx));
        let mut pending_offline = VecDeque::new();

        // max_retries_per_request == 1 means a second attempt (attempt == 2)
        // trips the cap.
        requeue_or_fail(&mut in_flight, &mut pending_offline, RedisError::new(ErrorKind::IoError, "dead"), true, 1);
        assert_eq!(pending_offline.len(), 1);
        assert_eq!(pending_offline[0].attempt, 1);

        let mut in_flight = VecDeque::new();
        let request = pending_offline.pop_front().unwrap();
        let (tx2, _rx2) = oneshot::channel();
        in_flight.push_back(PendingRequest {
            packed: request.packed,
            original_expected: request.expected_replies,
            remaining: request.expected_replies,
            collected: Vec::new(),
            command_name: request.command_name,
            enters_monitor: request.enters_monitor,
            attempt: request.attempt,
            respond_to: tx2,
        });
        let _ = request.respond_to;

        let mut pending_offline = VecDeque::new();
        requeue_or_fail(&mut in_flight, &mut pending_offline, RedisError::new(ErrorKind::IoError, "dead again"), true, 1);
        assert!(pending_offline.is_empty());
        assert_eq!(rx.try_recv().unwrap_err(), oneshot::error::TryRecvError::Empty);
    }
}
