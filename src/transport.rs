//! Transport adapter: a thin wrapper over one browser peer connection.
//!
//! Binds the seven labeled data channels the domain side expects, and turns
//! the peer connection's callback-based API into a single event stream the
//! supervisor drains like every other input.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// The seven labels a client is required to open before the handshake may
/// begin. `domain_server_dc` carries everything the relay can't classify
/// against a node, plus STUN/ICE/domain-connect traffic before any node is
/// known.
pub const REQUIRED_LABELS: [&str; 7] = [
    "domain_server_dc",
    "audio_mixer_dc",
    "avatar_mixer_dc",
    "entity_server_dc",
    "entity_script_server_dc",
    "messages_mixer_dc",
    "asset_server_dc",
];

#[derive(Debug)]
pub enum TransportEvent {
    /// All seven labeled channels are open.
    Ready,
    DataChannelMessage { label: &'static str, data: Vec<u8> },
    IceCandidate {
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    },
    DomainChannelClosed,
}

/// A channel's outbound queue: one per labeled data channel, drained by a
/// single writer task so back-to-back sends on the same label never race
/// each other out of order.
type OutboundQueue = mpsc::UnboundedSender<Vec<u8>>;

pub struct Transport {
    peer_connection: Arc<RTCPeerConnection>,
    channels: Arc<Mutex<AHashMap<&'static str, OutboundQueue>>>,
    /// Labels that have actually fired `on_open`, as distinct from labels
    /// merely bound in `channels` at announce time.
    opened: Arc<Mutex<AHashSet<&'static str>>>,
}

impl Transport {
    pub async fn new(stun_url: String, events: mpsc::UnboundedSender<TransportEvent>) -> Result<Self> {
        let api = APIBuilder::new().build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![stun_url],
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        let channels: Arc<Mutex<AHashMap<&'static str, OutboundQueue>>> = Arc::new(Mutex::new(AHashMap::default()));
        let opened: Arc<Mutex<AHashSet<&'static str>>> = Arc::new(Mutex::new(AHashSet::default()));

        let ice_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let ice_events = ice_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };

                if let Ok(init) = candidate.to_json() {
                    let _ = ice_events.send(TransportEvent::IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    });
                }
            })
        }));

        let dc_events = events.clone();
        let dc_channels = channels.clone();
        let dc_opened = opened.clone();
        peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = dc_events.clone();
            let channels = dc_channels.clone();
            let opened = dc_opened.clone();

            Box::pin(async move {
                let Some(label) = REQUIRED_LABELS.iter().copied().find(|l| *l == dc.label()) else {
                    log::warn!("ignoring data channel with unexpected label: {}", dc.label());
                    return;
                };

                let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
                channels.lock().insert(label, outbound_tx);

                let writer_channel = dc.clone();
                tokio::spawn(async move {
                    while let Some(bytes) = outbound_rx.recv().await {
                        if let Err(err) = writer_channel.send(&bytes::Bytes::from(bytes)).await {
                            log::warn!("failed to send on data channel {label}: {err}");
                        }
                    }
                });

                let ready_events = events.clone();
                let ready_opened = opened.clone();
                dc.on_open(Box::new(move || {
                    let events = ready_events.clone();
                    let opened = ready_opened.clone();
                    Box::pin(async move {
                        let all_open = {
                            let mut opened = opened.lock();
                            opened.insert(label);
                            REQUIRED_LABELS.iter().all(|l| opened.contains(l))
                        };

                        if all_open {
                            let _ = events.send(TransportEvent::Ready);
                        }
                    })
                }));

                let message_events = events.clone();
                dc.on_message(Box::new(move |message: DataChannelMessage| {
                    let events = message_events.clone();
                    Box::pin(async move {
                        let _ = events.send(TransportEvent::DataChannelMessage {
                            label,
                            data: message.data.to_vec(),
                        });
                    })
                }));

                if label == "domain_server_dc" {
                    let close_events = events.clone();
                    dc.on_close(Box::new(move || {
                        let events = close_events.clone();
                        Box::pin(async move {
                            let _ = events.send(TransportEvent::DomainChannelClosed);
                        })
                    }));
                }
            })
        }));

        Ok(Self { peer_connection, channels, opened })
    }

    pub async fn handle_offer(&self, sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer_connection.set_remote_description(offer).await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection.set_local_description(answer.clone()).await?;

        Ok(answer.sdp)
    }

    /// The browser prefixes candidate lines with `"a="`; strip it before
    /// handing the rest to the peer connection.
    pub async fn add_remote_candidate(&self, candidate: &str) -> Result<()> {
        let candidate = candidate.strip_prefix("a=").unwrap_or(candidate).to_string();

        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate,
                ..Default::default()
            })
            .await?;

        Ok(())
    }

    /// Queue `bytes` for `label`, preserving the order datagrams were
    /// relayed in. Each label has exactly one writer task draining its
    /// queue, so two calls for the same label in quick succession can never
    /// reach `RTCDataChannel::send` out of order.
    pub fn send_binary(&self, label: &str, bytes: &[u8]) -> Result<()> {
        let queue = self
            .channels
            .lock()
            .get(label)
            .cloned()
            .ok_or_else(|| anyhow!("no open data channel for label {label}"))?;

        queue
            .send(bytes.to_vec())
            .map_err(|_| anyhow!("data channel writer for {label} has stopped"))?;

        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
