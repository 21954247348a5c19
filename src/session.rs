//! Фасад сессии для слоя представления.
//!
//! `Session` держит задачу-драйвер, которая владеет движком согласования и
//! скармливает ему события по одному. Наружу видны только команды и снимок
//! состояния через `watch`.

use crate::config::EngineConfig;
use crate::error::{Result, SessionError};
use crate::media::{LocalMedia, RemoteMedia};
use crate::peer::negotiation::{EngineInbox, EngineInput, NegotiationEngine, SessionDeps};
use crate::peer::state::{ConnectionPhase, Role};
use crate::signaling::SignalEnvelope;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Наблюдаемое состояние сессии
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: ConnectionPhase,
    pub role: Role,
    pub local_media: Option<LocalMedia>,
    pub remote_media: Option<RemoteMedia>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub last_error: Option<SessionError>,
}

enum Command {
    Begin(oneshot::Sender<Result<()>>),
    End(oneshot::Sender<()>),
    SetAudio(bool, oneshot::Sender<Result<()>>),
    SetVideo(bool, oneshot::Sender<Result<()>>),
}

pub struct Session {
    room_id: String,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
    driver: JoinHandle<()>,
}

impl Session {
    /// Создаёт сессию комнаты и запускает её драйвер.
    ///
    /// `inbound`: входящие конверты сигнализации, чужие комнаты движок отбрасывает сам.
    /// Некорректные ICE серверы отклоняются сразу, до первого offer.
    pub fn spawn(
        room_id: impl Into<String>,
        config: EngineConfig,
        deps: SessionDeps,
        inbound: mpsc::UnboundedReceiver<SignalEnvelope>,
    ) -> Result<Self> {
        config.ice.validate()?;
        let room_id = room_id.into();
        let (engine, inbox) = NegotiationEngine::new(room_id.clone(), config, deps);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(engine.snapshot());

        info!(room = %room_id, "Session created");
        let driver = tokio::spawn(drive(engine, inbox, command_rx, inbound, state_tx));

        Ok(Self {
            room_id,
            commands,
            state,
            driver,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub async fn begin_session(&self) -> Result<()> {
        self.request(Command::Begin).await?
    }

    /// Возвращается, когда peer connection и локальное медиа уже освобождены
    pub async fn end_session(&self) {
        if self.request(Command::End).await.is_err() {
            debug!(room = %self.room_id, "Session driver already stopped");
        }
    }

    pub async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetAudio(enabled, reply))
            .await?
    }

    pub async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetVideo(enabled, reply))
            .await?
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.state.borrow().phase
    }

    pub fn role(&self) -> Role {
        self.state.borrow().role
    }

    pub fn local_media(&self) -> Option<LocalMedia> {
        self.state.borrow().local_media.clone()
    }

    pub fn remote_media(&self) -> Option<RemoteMedia> {
        self.state.borrow().remote_media.clone()
    }

    pub fn audio_enabled(&self) -> bool {
        self.state.borrow().audio_enabled
    }

    pub fn video_enabled(&self) -> bool {
        self.state.borrow().video_enabled
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.state.borrow().last_error.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Ждёт, пока сессия дойдёт до фазы `phase`
    pub async fn wait_for_phase(&self, phase: ConnectionPhase) -> Result<SessionSnapshot> {
        let mut rx = self.state.clone();
        let snapshot = rx
            .wait_for(|s| s.phase == phase)
            .await
            .map_err(|_| SessionError::DriverStopped)?;
        Ok(snapshot.clone())
    }

    /// Закрывает сессию и дожидается остановки драйвера
    pub async fn shutdown(self) {
        self.end_session().await;
        let Session {
            commands, driver, ..
        } = self;
        drop(commands);
        if let Err(e) = driver.await {
            warn!(error = %e, "Session driver terminated abnormally");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| SessionError::DriverStopped)?;
        rx.await.map_err(|_| SessionError::DriverStopped)
    }
}

/// Единственная задача, которая трогает движок
async fn drive(
    mut engine: NegotiationEngine,
    mut inbox: EngineInbox,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<SignalEnvelope>,
    state: watch::Sender<SessionSnapshot>,
) {
    let mut inbound_open = true;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => run_command(&mut engine, command, &state).await,
                None => {
                    // фасад отпустили: закрываемся
                    engine.end_session().await;
                    state.send_replace(engine.snapshot());
                    break;
                }
            },
            Some(input) = inbox.recv() => engine.handle(input).await,
            envelope = inbound.recv(), if inbound_open => match envelope {
                Some(envelope) => engine.handle(EngineInput::Signal(envelope)).await,
                None => {
                    warn!(room = %engine.room_id(), "Signaling inbound stream closed");
                    inbound_open = false;
                }
            },
        }
        state.send_replace(engine.snapshot());
    }
    debug!(room = %engine.room_id(), "Session driver stopped");
}

/// Снимок публикуется до ответа, чтобы вызывающий сразу видел результат команды
async fn run_command(
    engine: &mut NegotiationEngine,
    command: Command,
    state: &watch::Sender<SessionSnapshot>,
) {
    match command {
        Command::Begin(reply) => {
            let result = engine.begin_session();
            state.send_replace(engine.snapshot());
            let _ = reply.send(result);
        }
        Command::End(reply) => {
            engine.end_session().await;
            state.send_replace(engine.snapshot());
            let _ = reply.send(());
        }
        Command::SetAudio(enabled, reply) => {
            let result = engine.set_audio_enabled(enabled);
            state.send_replace(engine.snapshot());
            let _ = reply.send(result);
        }
        Command::SetVideo(enabled, reply) => {
            let result = engine.set_video_enabled(enabled);
            state.send_replace(engine.snapshot());
            let _ = reply.send(result);
        }
    }
}
