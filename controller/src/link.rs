use std::time::Duration;

use envnode_common::{
    clock::monotonic_ms, CommandChannel, CommandOutcome, ConnectionManager, ConnectionSnapshot,
    Intent, LinkAction, LinkConfig, LinkError,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

const TIMER_RESOLUTION_MS: u64 = 100;
const MAX_FRAME_BYTES: usize = 256;

enum LinkRequest {
    Connect,
    Disconnect,
    Toggle(oneshot::Sender<CommandOutcome>),
    Intent(Intent, oneshot::Sender<CommandOutcome>),
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
}

enum ChannelEvent {
    Opened {
        session: u64,
        writer: mpsc::Sender<String>,
    },
    OpenFailed {
        session: u64,
        error: LinkError,
    },
    Frame {
        session: u64,
        text: String,
    },
    Closed {
        session: u64,
        error: LinkError,
    },
}

/// Cloneable front for the link actor; safe to use from any task.
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<LinkRequest>,
}

impl LinkHandle {
    pub async fn connect(&self) -> anyhow::Result<()> {
        self.requests.send(LinkRequest::Connect).await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> anyhow::Result<()> {
        self.requests.send(LinkRequest::Disconnect).await?;
        Ok(())
    }

    pub async fn toggle(&self) -> anyhow::Result<CommandOutcome> {
        let (reply, response) = oneshot::channel();
        self.requests.send(LinkRequest::Toggle(reply)).await?;
        Ok(response.await?)
    }

    pub async fn dispatch(&self, intent: Intent) -> anyhow::Result<CommandOutcome> {
        let (reply, response) = oneshot::channel();
        self.requests.send(LinkRequest::Intent(intent, reply)).await?;
        Ok(response.await?)
    }

    pub async fn snapshot(&self) -> anyhow::Result<ConnectionSnapshot> {
        let (reply, response) = oneshot::channel();
        self.requests.send(LinkRequest::Snapshot(reply)).await?;
        Ok(response.await?)
    }
}

/// Spawns the actor that exclusively owns the connection state.
pub fn spawn_link(config: LinkConfig) -> LinkHandle {
    let (requests_tx, requests_rx) = mpsc::channel(32);
    let (events_tx, events_rx) = mpsc::channel(64);

    let actor = LinkActor {
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        channel: CommandChannel::new(ConnectionManager::new(config)),
        requests: requests_rx,
        events_tx,
        events_rx,
        io: None,
        writer: None,
    };
    tokio::spawn(actor.run());

    LinkHandle {
        requests: requests_tx,
    }
}

struct LinkActor {
    channel: CommandChannel,
    connect_timeout: Duration,
    requests: mpsc::Receiver<LinkRequest>,
    events_tx: mpsc::Sender<ChannelEvent>,
    events_rx: mpsc::Receiver<ChannelEvent>,
    io: Option<(u64, JoinHandle<()>)>,
    writer: Option<(u64, mpsc::Sender<String>)>,
}

impl LinkActor {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(TIMER_RESOLUTION_MS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let actions = tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                _ = ticker.tick() => self.channel.link_mut().tick(monotonic_ms()),
            };
            self.execute(actions);
        }

        let actions = self.channel.link_mut().disconnect();
        self.execute(actions);
        debug!("link actor stopped");
    }

    fn handle_request(&mut self, request: LinkRequest) -> Vec<LinkAction> {
        let now_ms = monotonic_ms();
        match request {
            LinkRequest::Connect => self.channel.link_mut().connect(now_ms),
            LinkRequest::Disconnect => {
                info!("link disconnect requested");
                self.channel.link_mut().disconnect()
            }
            LinkRequest::Toggle(reply) => {
                let (outcome, actions) = self.channel.toggle();
                let _ = reply.send(outcome);
                actions
            }
            LinkRequest::Intent(intent, reply) => {
                let (outcome, actions) = self.channel.dispatch(intent, now_ms);
                let _ = reply.send(outcome);
                actions
            }
            LinkRequest::Snapshot(reply) => {
                let _ = reply.send(self.channel.link().snapshot(now_ms));
                Vec::new()
            }
        }
    }

    fn handle_event(&mut self, event: ChannelEvent) -> Vec<LinkAction> {
        let now_ms = monotonic_ms();
        let link = self.channel.link_mut();
        match event {
            ChannelEvent::Opened { session, writer } => {
                let actions = link.on_opened(session, now_ms);
                if link.is_connected() && link.session() == session {
                    info!("link connected (session {session})");
                    self.writer = Some((session, writer));
                }
                actions
            }
            ChannelEvent::OpenFailed { session, error } => {
                let actions = link.on_open_failed(session, error.clone(), now_ms);
                if !actions.is_empty() {
                    warn!("link connect failed: {error}");
                }
                actions
            }
            ChannelEvent::Frame { session, text } => {
                debug!("link frame: {text}");
                link.on_frame(session, &text, now_ms)
            }
            ChannelEvent::Closed { session, error } => {
                let actions = link.on_closed(session, error.clone(), now_ms);
                if !actions.is_empty() {
                    warn!("link lost: {error}");
                }
                actions
            }
        }
    }

    fn execute(&mut self, actions: Vec<LinkAction>) {
        for action in actions {
            match action {
                LinkAction::Open { session, addr } => {
                    self.abort_io();
                    info!("link connecting to {addr} (session {session})");
                    let task = tokio::spawn(run_channel(
                        session,
                        addr,
                        self.connect_timeout,
                        self.events_tx.clone(),
                    ));
                    self.io = Some((session, task));
                }
                LinkAction::Close { session } => {
                    if matches!(self.io, Some((current, _)) if current == session) {
                        self.abort_io();
                    }
                    if let Some(reconnect_at) = self.channel.link().reconnect_at() {
                        info!(
                            "link reconnect scheduled in {} ms",
                            reconnect_at.saturating_sub(monotonic_ms())
                        );
                    }
                }
                LinkAction::Send { session, frame } => match &self.writer {
                    Some((current, writer)) if *current == session => {
                        if let Err(err) = writer.try_send(frame.as_frame().to_string()) {
                            warn!("link send of {} dropped: {err}", frame.as_frame());
                        }
                    }
                    _ => debug!("link send of {} skipped: no live writer", frame.as_frame()),
                },
            }
        }
    }

    fn abort_io(&mut self) {
        if let Some((_, task)) = self.io.take() {
            task.abort();
        }
        self.writer = None;
    }
}

/// Owns one TCP session: connect, then pump newline-delimited frames both ways.
async fn run_channel(
    session: u64,
    addr: String,
    connect_timeout: Duration,
    events: mpsc::Sender<ChannelEvent>,
) {
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            let _ = events
                .send(ChannelEvent::OpenFailed {
                    session,
                    error: LinkError::Connect(err.to_string()),
                })
                .await;
            return;
        }
        Err(_) => {
            let _ = events
                .send(ChannelEvent::OpenFailed {
                    session,
                    error: LinkError::ConnectTimeout,
                })
                .await;
            return;
        }
    };
    let _ = stream.set_nodelay(true);

    let (reader, mut writer) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::channel::<String>(16);
    if events
        .send(ChannelEvent::Opened {
            session,
            writer: writer_tx,
        })
        .await
        .is_err()
    {
        return;
    }

    let mut lines = BufReader::new(reader).lines();
    let error = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(text)) => {
                    if text.len() > MAX_FRAME_BYTES {
                        warn!("dropping oversized frame ({} bytes)", text.len());
                        continue;
                    }
                    if events.send(ChannelEvent::Frame { session, text }).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break LinkError::ChannelClosed("closed by peer".to_string()),
                Err(err) => break LinkError::ChannelClosed(err.to_string()),
            },
            frame = writer_rx.recv() => {
                let Some(frame) = frame else {
                    return;
                };
                let mut bytes = frame.into_bytes();
                bytes.push(b'\n');
                if let Err(err) = writer.write_all(&bytes).await {
                    break LinkError::ChannelClosed(err.to_string());
                }
            }
        }
    };

    let _ = events.send(ChannelEvent::Closed { session, error }).await;
}
