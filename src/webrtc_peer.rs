//! Peer connection поверх webrtc-rs.
//!
//! Локальный трек получает `SampleWriter` поверх `TrackLocalStaticSample`,
//! удалённый несёт `RemoteReader` поверх `TrackRemote`.

use crate::config::IceConfig;
use crate::error::{Result, SessionError};
use crate::media::{
    LocalTrack, RemotePacket, RemoteReader, RemoteTrack, RemoteTrackReader, SampleWriter,
};
use crate::peer::connection::{
    PeerConnectionFactory, PeerConnectionResource, PeerEvent, PeerEventSink,
};
use crate::peer::types::{
    ConnectivityState, IceCandidate, SdpKind, ServerConfig, SessionDescription, TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn peer_err(e: webrtc::Error) -> SessionError {
    SessionError::PeerConnection(e.to_string())
}

/// Фабрика peer connection с кодеками и интерсепторами по умолчанию
pub struct WebRtcPeerFactory {
    api: API,
}

impl WebRtcPeerFactory {
    pub fn new() -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(peer_err)?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(peer_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice: &IceConfig,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerConnectionResource>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(ice))
                .await
                .map_err(peer_err)?,
        );

        // Обработчик для локальных кандидатов (Trickle-ICE)
        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => {
                            sink.emit(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                    },
                    // cand == None означает конец сбора
                    None => debug!("ICE candidate gathering completed (null candidate received)"),
                }
            })
        }));

        let sink = events.clone();
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                sink.emit(PeerEvent::RemoteTrack {
                    stream_id: track.stream_id(),
                    track: RemoteTrack::new(track.id(), kind)
                        .with_reader(RemoteReader::new(RtpReader(track.clone()))),
                });
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!(state = ?st, "Peer connection state changed");
            if let Some(state) = connectivity_of(st) {
                events.emit(PeerEvent::Connectivity(state));
            }
            Box::pin(async {})
        }));

        Ok(Box::new(WebRtcPeer { pc }))
    }
}

/// Peer connection webrtc-rs за интерфейсом `PeerConnectionResource`
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerConnectionResource for WebRtcPeer {
    async fn add_track(&self, track: Arc<LocalTrack>, stream_id: &str) -> Result<()> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind()),
            track.id().to_owned(),
            stream_id.to_owned(),
        ));
        let sender = self
            .pc
            .add_track(local.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(peer_err)?;

        // RTCP надо вычитывать, иначе интерсепторы (NACK, отчёты) не работают
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        track.attach(Arc::new(SampleTrack(local))).await;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await.map_err(peer_err)?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await.map_err(peer_err)?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(peer_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(peer_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(peer_err)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.map_err(peer_err)
    }
}

/// Запись сэмплов в трек peer connection; RTP пакетизация внутри webrtc-rs
struct SampleTrack(Arc<TrackLocalStaticSample>);

#[async_trait]
impl SampleWriter for SampleTrack {
    async fn write(&self, data: Bytes, duration: Duration) -> Result<()> {
        self.0
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(peer_err)
    }
}

struct RtpReader(Arc<TrackRemote>);

#[async_trait]
impl RemoteTrackReader for RtpReader {
    async fn read(&self) -> Option<RemotePacket> {
        match self.0.read_rtp().await {
            Ok((packet, _)) => Some(RemotePacket {
                sequence_number: packet.header.sequence_number,
                timestamp: packet.header.timestamp,
                marker: packet.header.marker,
                payload: packet.payload,
            }),
            Err(e) => {
                debug!(track = %self.0.id(), error = %e, "Remote track closed");
                None
            }
        }
    }
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(ice: &IceConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&ice.servers),
        ice_candidate_pool_size: ice.candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn codec_for(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90000,
            ..Default::default()
        },
    }
}

fn connectivity_of(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(SessionError::PeerConnection(format!(
            "unsupported session description type {other}"
        ))),
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(peer_err)
}
