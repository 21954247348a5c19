//! Локальное и удалённое медиа.
//!
//! Камера и микрофон здесь не захватываются: `MediaSource` внешний,
//! движок получает от него готовый `LocalMedia` или ошибку доступа.

use crate::error::Result;
use crate::peer::types::TrackKind;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Какие устройства запрашивать
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Источник локального медиа (камера/микрофон)
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

/// Куда уходят закодированные сэмплы трека (трек peer connection)
#[async_trait]
pub trait SampleWriter: Send + Sync {
    async fn write(&self, data: Bytes, duration: Duration) -> Result<()>;
}

/// Локальный трек.
///
/// Захват пишет сэмплы через `write_sample`; пока трек выключен или
/// остановлен, сэмплы отбрасываются и собеседник их не получает.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    live: AtomicBool,
    writer: RwLock<Option<Arc<dyn SampleWriter>>>,
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            live: AtomicBool::new(true),
            writer: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Останавливает трек; возвращает false, если он уже был остановлен
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }

    /// Привязывает трек к peer connection; прежняя привязка заменяется
    pub async fn attach(&self, writer: Arc<dyn SampleWriter>) {
        *self.writer.write().await = Some(writer);
    }

    pub async fn detach(&self) {
        self.writer.write().await.take();
    }

    /// Отправляет сэмпл собеседнику. false, если сэмпл отброшен:
    /// трек выключен, остановлен или ещё не привязан к соединению.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> Result<bool> {
        if !self.is_live() || !self.is_enabled() {
            return Ok(false);
        }
        let writer = self.writer.read().await.clone();
        match writer {
            Some(writer) => {
                writer.write(data, duration).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Локальный поток: набор треков одного захвата
#[derive(Debug, Clone)]
pub struct LocalMedia {
    id: String,
    tracks: Vec<Arc<LocalTrack>>,
}

impl LocalMedia {
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self {
            id: id.into(),
            tracks: tracks.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.tracks_of(TrackKind::Audio)
            .for_each(|t| t.set_enabled(enabled));
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.tracks_of(TrackKind::Video)
            .for_each(|t| t.set_enabled(enabled));
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// Отвязывает все треки от peer connection
    pub async fn detach(&self) {
        for track in &self.tracks {
            track.detach().await;
        }
    }
}

/// RTP пакет удалённого трека
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub marker: bool,
    pub payload: Bytes,
}

/// Источник входящих пакетов удалённого трека
#[async_trait]
pub trait RemoteTrackReader: Send + Sync {
    /// None, когда трек закрыт
    async fn read(&self) -> Option<RemotePacket>;
}

/// Разделяемая ручка чтения удалённого трека
#[derive(Clone)]
pub struct RemoteReader(Arc<dyn RemoteTrackReader>);

impl RemoteReader {
    pub fn new(reader: impl RemoteTrackReader + 'static) -> Self {
        Self(Arc::new(reader))
    }

    pub async fn read(&self) -> Option<RemotePacket> {
        self.0.read().await
    }
}

impl fmt::Debug for RemoteReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RemoteReader")
    }
}

impl PartialEq for RemoteReader {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RemoteReader {}

/// Трек, пришедший от собеседника
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: TrackKind,
    /// Входящий RTP; у треков без транспорта (тесты) отсутствует
    pub reader: Option<RemoteReader>,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            reader: None,
        }
    }

    pub fn with_reader(mut self, reader: RemoteReader) -> Self {
        self.reader = Some(reader);
        self
    }
}

/// Удалённый поток. Не принадлежит сессии: им управляет другая сторона.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteMedia {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            tracks: Vec::new(),
        }
    }

    /// Добавляет трек, если его ещё нет
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }
}
