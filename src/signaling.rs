//! Signaling endpoint: JSON over a text websocket.
//!
//! One connected websocket corresponds to exactly one [`crate::supervisor::Supervisor`].
//! Inbound frames are parsed here and handed to the supervisor as
//! [`SignalingEvent`]s; outbound frames are serialized here from whatever the
//! transport adapter and handshake engine produce.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Inbound {
    Offer { sdp: String },
    Candidate { candidate: CandidateIn },
}

#[derive(Debug, Deserialize)]
struct CandidateIn {
    candidate: String,
}

#[derive(Debug, Serialize)]
struct IceCandidateOut<'a> {
    candidate: &'a str,
    #[serde(rename = "sdpMid")]
    sdp_mid: Option<&'a str>,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: Option<u16>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Outbound<'a> {
    Connected,
    Answer { sdp: &'a str },
    Candidate { candidate: IceCandidateOut<'a> },
}

/// Events the signaling task surfaces to the supervisor's event loop.
#[derive(Debug)]
pub enum SignalingEvent {
    /// Remote SDP offer; carries `"a="`-free SDP ready for
    /// `set_remote_description`.
    Offer(String),
    /// Remote ICE candidate, still prefixed the way the browser sent it.
    Candidate(String),
    Closed,
}

/// A handle the rest of the connection uses to push frames back out over
/// the websocket.
#[derive(Clone)]
pub struct SignalingHandle {
    outbound: mpsc::UnboundedSender<Message>,
}

impl SignalingHandle {
    pub fn send_connected(&self) -> Result<()> {
        self.send(&Outbound::Connected)
    }

    pub fn send_answer(&self, sdp: &str) -> Result<()> {
        self.send(&Outbound::Answer { sdp })
    }

    /// Empty candidate strings (end-of-candidates markers) are suppressed;
    /// the source never forwards them to the client.
    pub fn send_candidate(&self, candidate: &str, sdp_mid: Option<&str>, sdp_mline_index: Option<u16>) -> Result<()> {
        if candidate.is_empty() {
            return Ok(());
        }

        self.send(&Outbound::Candidate {
            candidate: IceCandidateOut {
                candidate,
                sdp_mid,
                sdp_mline_index,
            },
        })
    }

    fn send(&self, message: &Outbound) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.outbound
            .send(Message::Text(text.into()))
            .context("signaling socket closed")
    }
}

/// Drive one signaling websocket until it closes, forwarding parsed events
/// to `events` and flushing anything queued on the returned handle's sender.
pub async fn run(stream: WebSocketStream<TcpStream>, events: mpsc::UnboundedSender<SignalingEvent>) -> SignalingHandle {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let handle = SignalingHandle { outbound: outbound_tx };

    let (mut sink, mut source) = stream.split();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            if sink.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                inbound = source.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Inbound>(&text) {
                                Ok(Inbound::Offer { sdp }) => {
                                    let _ = events.send(SignalingEvent::Offer(sdp));
                                }
                                Ok(Inbound::Candidate { candidate }) => {
                                    let _ = events.send(SignalingEvent::Candidate(candidate.candidate));
                                }
                                Err(err) => log::warn!("signaling: unrecognized message: {err}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            let _ = events.send(SignalingEvent::Closed);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            log::warn!("signaling socket error: {err}");
                            let _ = events.send(SignalingEvent::Closed);
                            break;
                        }
                    }
                }
            }
        }
    });

    handle
}
