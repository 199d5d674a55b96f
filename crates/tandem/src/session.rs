use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::ToSocketAddrs;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::SystemClock;
use crate::config::SessionConfig;
use crate::engine::{PlayerAction, ReconciliationEngine, Roster, SyncStats};
use crate::net::{
    LinkMonitor, Message, Payload, TransportError, UdpReceiver, UdpTransport, decode_inbound,
};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to open connection: {0}")]
    Io(#[from] io::Error),
    #[error("session is no longer running")]
    Closed,
}

enum Command<A> {
    AddAction(PlayerAction<A>),
    Shutdown,
}

/// Handle to a running sync session.
///
/// The engine, the socket and both schedules live in one spawned task; this
/// handle only talks to it through a mailbox. Dropping the handle closes the
/// mailbox, which stops the task.
pub struct Session<A> {
    commands: mpsc::UnboundedSender<Command<A>>,
    stats: watch::Receiver<SyncStats>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl<A> Session<A>
where
    A: Payload + Send + 'static,
{
    /// Binds a socket towards `remote` and starts the session task.
    ///
    /// Probing starts right away. Prediction starts once the first valid
    /// datagram arrives and pauses whenever the link goes quiet for longer
    /// than the configured timeout.
    pub async fn connect<R, S, F>(
        remote: R,
        config: SessionConfig,
        initial_state: S,
        update: F,
    ) -> Result<Self, SessionError>
    where
        R: ToSocketAddrs,
        S: Payload + Send + 'static,
        F: FnMut(&S, &[PlayerAction<A>], &Roster, f32) -> S + Send + 'static,
    {
        let (transport, receiver) = UdpTransport::connect(config.bind_addr.as_str(), remote).await?;
        let local_addr = transport.local_addr()?;
        log::info!(
            "Session bound on {}, syncing with {}",
            local_addr,
            transport.remote_addr()
        );

        let engine =
            ReconciliationEngine::new(&config, initial_state, update, transport, SystemClock);
        let (commands, mailbox) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(SyncStats::default());

        let actor = SessionActor {
            engine,
            receiver,
            mailbox,
            link: LinkMonitor::new(config.connection_timeout()),
            stats: stats_tx,
            liveness_interval: config.liveness_check_interval(),
        };
        let task = tokio::spawn(actor.run());

        Ok(Self {
            commands,
            stats,
            local_addr,
            task,
        })
    }

    /// Queues a locally originated action for the next prediction tick.
    pub fn add_player_action(&self, action: PlayerAction<A>) -> Result<(), SessionError> {
        self.commands
            .send(Command::AddAction(action))
            .map_err(|_| SessionError::Closed)
    }

    /// Latest statistics, refreshed on every liveness check.
    pub fn stats(&self) -> watch::Receiver<SyncStats> {
        self.stats.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            log::warn!("Session task ended abnormally: {}", e);
        }
    }
}

struct SessionActor<S, A, F> {
    engine: ReconciliationEngine<S, A, F, UdpTransport, SystemClock>,
    receiver: UdpReceiver,
    mailbox: mpsc::UnboundedReceiver<Command<A>>,
    link: LinkMonitor,
    stats: watch::Sender<SyncStats>,
    liveness_interval: Duration,
}

impl<S, A, F> SessionActor<S, A, F>
where
    S: Payload,
    A: Payload,
    F: FnMut(&S, &[PlayerAction<A>], &Roster, f32) -> S,
{
    async fn run(mut self) {
        self.engine.start_probing(Instant::now());

        let mut liveness = tokio::time::interval(self.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.engine.next_deadline();

            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(Command::AddAction(action)) => self.engine.add_player_action(action),
                    Some(Command::Shutdown) | None => break,
                },
                received = self.receiver.recv() => self.handle_datagram(received),
                _ = sleep_until(deadline) => {
                    self.engine.run_due(Instant::now());
                }
                _ = liveness.tick() => {
                    if self.link.check(Instant::now()) {
                        log::warn!("No traffic from remote peer, link considered lost");
                        self.engine.on_disconnected();
                    }
                    self.stats.send_replace(self.engine.stats());
                }
            }
        }

        self.engine.stop();
        self.stats.send_replace(self.engine.stats());
        log::info!("Session stopped");
    }

    fn handle_datagram(&mut self, received: Result<Message, TransportError>) {
        let message = match received {
            Ok(message) => message,
            Err(TransportError::Protocol(e)) => {
                log::debug!("Dropping malformed datagram: {}", e);
                return;
            }
            Err(TransportError::Io(e)) => {
                log::debug!("Receive failed: {}", e);
                return;
            }
        };

        let now = Instant::now();
        if self.link.touch(now) {
            log::info!("Link to remote peer is up");
            self.engine.on_connected(now);
        }

        match decode_inbound::<S, A>(message) {
            Ok(Some(inbound)) => self.engine.handle_message(inbound, now),
            Ok(None) => {}
            Err(e) => log::debug!("Dropping message: {}", e),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
