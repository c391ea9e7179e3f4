//! WebRTC backend for the connection object

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::manager::{
    ConnectionState, PeerEvent, PeerEventSink, PeerTransport, PeerTransportFactory, SdpType,
    SessionDescription,
};
use super::mdns::{default_mdns_host_name, mdns_mode, mdns_mode_label};
use crate::config::{IceConfig, MediaConfig, VideoCodec};
use crate::error::{CallError, Result};
use crate::media::{MediaStream, MediaTrack, TrackKind};
use crate::signaling::IceCandidate;

/// RTP codec capability for video
fn video_codec_capability(codec: VideoCodec) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: codec.mime_type().to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: codec.sdp_fmtp().to_string(),
        rtcp_feedback: vec![],
    }
}

/// RTP codec capability for audio (Opus)
fn audio_codec_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn ice_servers(config: &IceConfig) -> Vec<RTCIceServer> {
    let mut servers = vec![];

    for stun_url in &config.stun_servers {
        servers.push(RTCIceServer {
            urls: vec![stun_url.clone()],
            ..Default::default()
        });
    }

    for turn in &config.turn_servers {
        servers.push(RTCIceServer {
            urls: turn.urls.clone(),
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    servers
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Factory for `webrtc`-crate peer connections
pub struct RtcPeerFactory {
    media: MediaConfig,
}

impl RtcPeerFactory {
    pub fn new(media: MediaConfig) -> Self {
        Self { media }
    }
}

#[async_trait]
impl PeerTransportFactory for RtcPeerFactory {
    async fn create(
        &self,
        ice: &IceConfig,
        local: &MediaStream,
        events: PeerEventSink,
    ) -> Result<Box<dyn PeerTransport>> {
        let transport = RtcPeerTransport::new(ice, self.media.video_codec, local, events).await?;
        Ok(Box::new(transport))
    }
}

/// One `RTCPeerConnection` with the call's local tracks attached
pub struct RtcPeerTransport {
    session: u64,
    pc: Arc<RTCPeerConnection>,
    stream_id: String,
    video_codec: VideoCodec,
    video_sender: Option<Arc<RTCRtpSender>>,
}

impl RtcPeerTransport {
    pub async fn new(
        ice: &IceConfig,
        video_codec: VideoCodec,
        local: &MediaStream,
        events: PeerEventSink,
    ) -> Result<Self> {
        let session = events.session();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| CallError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            CallError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode(ice.mdns_mode.as_deref());
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(default_mdns_host_name(session));
        }
        debug!("WebRTC mDNS mode: {} (session {})", mdns_mode_label(mode), session);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(ice),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            CallError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;

        let mut transport = Self {
            session,
            pc: Arc::new(pc),
            stream_id: local.id().to_string(),
            video_codec,
            video_sender: None,
        };

        transport.setup_event_handlers(events);

        for track in local.tracks() {
            let sender = transport.add_local_track(&track).await?;
            if track.kind() == TrackKind::Video {
                transport.video_sender = Some(sender);
            }
        }

        Ok(transport)
    }

    fn setup_event_handlers(&self, events: PeerEventSink) {
        let session = self.session;

        let state_events = events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let events = state_events.clone();

                Box::pin(async move {
                    if let Some(state) = map_state(s) {
                        info!("Peer {} connection state: {}", session, state);
                        events.emit(PeerEvent::StateChanged(state));
                    }
                })
            }));

        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();

                Box::pin(async move {
                    let Some(c) = candidate else { return };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            events.emit(PeerEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Skipping unserializable ICE candidate: {}", e),
                    }
                })
            }));

        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();

                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Video => TrackKind::Video,
                        _ => TrackKind::Audio,
                    };
                    info!("Peer {} remote {} track: {}", session, kind, track.id());
                    events.emit(PeerEvent::RemoteTrack(MediaTrack::remote(track.id(), kind)));
                })
            },
        ));
    }

    fn local_rtp_track(&self, track: &MediaTrack) -> Arc<TrackLocalStaticSample> {
        let capability = match track.kind() {
            TrackKind::Audio => audio_codec_capability(),
            TrackKind::Video => video_codec_capability(self.video_codec),
        };
        Arc::new(TrackLocalStaticSample::new(
            capability,
            track.id().to_string(),
            self.stream_id.clone(),
        ))
    }

    async fn add_local_track(&self, track: &MediaTrack) -> Result<Arc<RTCRtpSender>> {
        let rtp_track = self.local_rtp_track(track);
        let sender = self
            .pc
            .add_track(rtp_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                CallError::WebRtcError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        // Drain RTCP so interceptors keep running
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        debug!("Local {} track {} attached", track.kind(), track.id());
        Ok(sender)
    }

    fn description(description: SessionDescription) -> Result<RTCSessionDescription> {
        let parsed = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        };
        parsed.map_err(|e| CallError::Negotiation(format!("Invalid SDP: {}", e)))
    }
}

#[async_trait]
impl PeerTransport for RtcPeerTransport {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| {
                CallError::Negotiation(format!("Failed to set local description: {}", e))
            })?;

        Ok(offer.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| CallError::Negotiation(format!("Failed to create answer: {}", e)))?;

        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| {
                CallError::Negotiation(format!("Failed to set local description: {}", e))
            })?;

        Ok(answer.sdp)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let sdp = Self::description(description)?;
        self.pc.set_remote_description(sdp).await.map_err(|e| {
            CallError::Negotiation(format!("Failed to set remote description: {}", e))
        })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| CallError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn replace_video_track(&self, track: Option<&MediaTrack>) -> Result<()> {
        let sender = self
            .video_sender
            .as_ref()
            .ok_or_else(|| CallError::InvalidState("no outbound video sender".to_string()))?;

        let replacement =
            track.map(|t| self.local_rtp_track(t) as Arc<dyn TrackLocal + Send + Sync>);
        sender
            .replace_track(replacement)
            .await
            .map_err(|e| CallError::WebRtcError(format!("Failed to replace video track: {}", e)))?;

        info!(
            "Peer {} outbound video track replaced ({})",
            self.session,
            track.map(|t| t.id()).unwrap_or("none")
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| CallError::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn test_ice_servers_from_config() {
        let mut config = IceConfig::default();
        config.turn_servers.push(TurnServer::new(
            "turn:turn.example.com:3478".to_string(),
            "user".to_string(),
            "secret".to_string(),
        ));

        let servers = ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.l.google.com:19302".to_string()]);
        assert_eq!(servers[1].username, "user");
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(
            map_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(map_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_codec_capability() {
        let cap = video_codec_capability(VideoCodec::H264);
        assert_eq!(cap.mime_type, "video/H264");
        assert!(cap.sdp_fmtp_line.contains("packetization-mode=1"));
        assert_eq!(audio_codec_capability().clock_rate, 48000);
    }
}
