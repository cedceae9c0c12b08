//! `PipeSession`: the sans-IO driver for one codec pipe.
//!
//! A pipe carries application bytes in one logical direction, opportunistically
//! rewritten through the [`xcodec_core`] codec. `PipeSession` owns the HELLO
//! handshake, the ASK/LEARN interlock that resolves a decoder's unknown
//! `REF`s, `ADVANCE` bookkeeping for the encoder side, and the EOS/EOS_ACK
//! half-close handshake. It performs no I/O itself: callers hand it bytes
//! (from the wire, or from the application) and drain the [`PipeAction`]s it
//! returns.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;
use xcodec_core::{
    DecodeOutcome, Decoder, Encoder, SegmentBacking, SlidingWindow, Tag, hash_segment,
    reconcile_extract, segment_from_slice,
};
use xcodec_proto::{PipeFrame, ProtocolError};

use crate::error::{PipeError, Result};

/// Resolves the segment cache backing a given namespace UUID.
///
/// A pipe session asks for two caches by UUID: its own (advertised to the
/// peer in `HELLO`, used by the encoder) and the peer's (learned from the
/// peer's `HELLO`, used by the decoder). A single process typically answers
/// both from one process-wide registry keyed by UUID, lazily creating
/// entries on first contact — see `wanproxy-net`'s registry for the
/// concurrent implementation used in production.
pub trait CacheProvider: Send + Sync {
    /// Return the cache for `uuid`, creating it if this is the first request.
    fn resolve(&self, uuid: Uuid) -> Arc<dyn SegmentBacking>;
}

/// One action a [`PipeSession`] asks its caller to perform.
#[derive(Debug)]
pub enum PipeAction {
    /// Write these bytes to the underlying connection, in order.
    SendWire(Bytes),
    /// Deliver these application bytes to whatever consumes this pipe's
    /// decoded output (typically the other half of a splice).
    Deliver(Bytes),
    /// Both directions have completed the EOS/EOS_ACK handshake; the pipe
    /// is done and can be torn down.
    Complete,
    /// The session hit a fatal, unrecoverable protocol violation.
    Fail(PipeError),
}

/// Sans-IO driver for one codec pipe.
///
/// Construct with [`PipeSession::new`], call [`PipeSession::start`] once to
/// emit the local `HELLO`, then feed it wire bytes via
/// [`PipeSession::receive_wire`] and application bytes via
/// [`PipeSession::submit_outbound`]. Every method returns the list of
/// actions the caller must carry out; none of them perform I/O.
pub struct PipeSession {
    self_uuid: Uuid,
    provider: Arc<dyn CacheProvider>,
    window_capacity: usize,

    encoder: Encoder,
    encoder_cache: Arc<dyn SegmentBacking>,

    decoder: Option<Decoder>,
    decoder_cache: Option<Arc<dyn SegmentBacking>>,
    peer_uuid: Option<Uuid>,

    hello_sent: bool,
    hello_received: bool,

    wire_buf: Vec<u8>,
    codec_carry: Vec<u8>,
    pending_remainder: Option<Vec<u8>>,
    queued_frames: VecDeque<Bytes>,
    asked_tags: HashSet<Tag>,

    unacked: VecDeque<HashSet<Tag>>,

    tx_eos_sent: bool,
    tx_eos_acked: bool,
    rx_eos_received: bool,
    rx_eos_ack_sent: bool,
    completion_reported: bool,
}

impl PipeSession {
    /// Build a session that will advertise `self_uuid` as its cache
    /// namespace. `window_capacity` sizes both the encoder's and (once
    /// established) the decoder's sliding window.
    #[must_use]
    pub fn new(self_uuid: Uuid, provider: Arc<dyn CacheProvider>, window_capacity: usize) -> Self {
        let encoder_cache = provider.resolve(self_uuid);
        let encoder = Encoder::new(encoder_cache.clone(), SlidingWindow::new(window_capacity));
        Self {
            self_uuid,
            provider,
            window_capacity,
            encoder,
            encoder_cache,
            decoder: None,
            decoder_cache: None,
            peer_uuid: None,
            hello_sent: false,
            hello_received: false,
            wire_buf: Vec::new(),
            codec_carry: Vec::new(),
            pending_remainder: None,
            queued_frames: VecDeque::new(),
            asked_tags: HashSet::new(),
            unacked: VecDeque::new(),
            tx_eos_sent: false,
            tx_eos_acked: false,
            rx_eos_received: false,
            rx_eos_ack_sent: false,
            completion_reported: false,
        }
    }

    /// The peer's cache namespace, once its `HELLO` has been received.
    #[must_use]
    pub fn peer_uuid(&self) -> Option<Uuid> {
        self.peer_uuid
    }

    /// Whether both directions have completed the EOS/EOS_ACK handshake.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tx_eos_acked && self.rx_eos_ack_sent
    }

    /// Emit the local `HELLO`. Idempotent: a second call is a no-op.
    pub fn start(&mut self) -> Vec<PipeAction> {
        if self.hello_sent {
            return Vec::new();
        }
        self.hello_sent = true;
        let frame = PipeFrame::Hello { uuid: *self.self_uuid.as_bytes(), flags: 0 };
        one_or_fail(encode_frame(&frame))
    }

    /// Encode and send `payload` as one `FRAME`, tracking the tags it
    /// depends on for later `ADVANCE` accounting.
    pub fn submit_outbound(&mut self, payload: &[u8]) -> Vec<PipeAction> {
        let encoded = self.encoder.encode(payload);
        let frame = PipeFrame::Frame { payload: Bytes::from(encoded.bytes) };
        match encode_frame(&frame) {
            Ok(wire) => {
                self.unacked.push_back(encoded.tags);
                vec![PipeAction::SendWire(wire)]
            }
            Err(err) => vec![PipeAction::Fail(err)],
        }
    }

    /// Signal that no more outbound application bytes will arrive. Sends
    /// `EOS`; idempotent.
    pub fn send_eos(&mut self) -> Vec<PipeAction> {
        if self.tx_eos_sent {
            return Vec::new();
        }
        self.tx_eos_sent = true;
        one_or_fail(encode_frame(&PipeFrame::Eos))
    }

    /// Feed bytes just read from the underlying connection. Parses as many
    /// complete pipe frames as `bytes` (plus anything buffered from a prior
    /// call) contains, dispatching each in order.
    pub fn receive_wire(&mut self, bytes: &[u8]) -> Vec<PipeAction> {
        self.wire_buf.extend_from_slice(bytes);
        let mut actions = Vec::new();
        let mut cursor = 0usize;

        loop {
            match PipeFrame::decode(&self.wire_buf[cursor..]) {
                Ok(Some((frame, consumed))) => {
                    cursor += consumed;
                    if !self.hello_received && !matches!(frame, PipeFrame::Hello { .. }) {
                        let opcode = frame.opcode().to_byte();
                        actions
                            .push(PipeAction::Fail(ProtocolError::HelloNotFirst(opcode).into()));
                        break;
                    }
                    actions.extend(self.dispatch(frame));
                }
                Ok(None) => break,
                Err(err) => {
                    actions.push(PipeAction::Fail(err.into()));
                    break;
                }
            }
        }

        self.wire_buf.drain(0..cursor);

        if self.is_complete() && !self.completion_reported {
            self.completion_reported = true;
            actions.push(PipeAction::Complete);
        }

        actions
    }

    fn dispatch(&mut self, frame: PipeFrame) -> Vec<PipeAction> {
        match frame {
            PipeFrame::Hello { uuid, flags } => self.on_hello(uuid, flags),
            PipeFrame::Learn { segments } => self.on_learn(segments),
            PipeFrame::Ask { tags } => self.on_ask(tags),
            PipeFrame::Frame { payload } => self.feed_frame_payload(payload),
            PipeFrame::Advance { count } => self.on_advance(count),
            PipeFrame::Eos => self.on_eos(),
            PipeFrame::EosAck => self.on_eos_ack(),
        }
    }

    fn on_hello(&mut self, uuid: [u8; 16], _flags: u8) -> Vec<PipeAction> {
        if self.hello_received {
            return vec![PipeAction::Fail(PipeError::DuplicateHello)];
        }
        let peer_uuid = Uuid::from_bytes(uuid);
        self.hello_received = true;
        self.peer_uuid = Some(peer_uuid);
        let cache = self.provider.resolve(peer_uuid);
        self.decoder_cache = Some(cache.clone());
        self.decoder = Some(Decoder::new(cache, SlidingWindow::new(self.window_capacity)));
        Vec::new()
    }

    fn on_learn(&mut self, segments: Vec<Bytes>) -> Vec<PipeAction> {
        let Some(cache) = self.decoder_cache.clone() else {
            return vec![PipeAction::Fail(ProtocolError::HelloNotFirst(xcodec_proto::PipeOp::Learn.to_byte()).into())];
        };
        for raw in segments {
            let tag = hash_segment(&raw);
            let segment = segment_from_slice(&raw);
            reconcile_extract(cache.as_ref(), tag, segment);
            self.asked_tags.remove(&tag);
        }

        let mut actions = Vec::new();
        if let Some(remainder) = self.pending_remainder.take() {
            actions.extend(self.decode_and_handle(remainder));
        }
        actions.extend(self.drain_queue());
        actions
    }

    fn on_ask(&mut self, tags: Vec<u64>) -> Vec<PipeAction> {
        let mut segments = Vec::with_capacity(tags.len());
        for raw in &tags {
            match self.encoder_cache.lookup(Tag::new(*raw)) {
                Some(segment) => segments.push(Bytes::copy_from_slice(segment.as_slice())),
                None => return vec![PipeAction::Fail(PipeError::AskUnknownTag(*raw))],
            }
        }
        one_or_fail(encode_frame(&PipeFrame::Learn { segments }))
    }

    fn on_advance(&mut self, count: u32) -> Vec<PipeAction> {
        let count = count as usize;
        if count > self.unacked.len() {
            return vec![PipeAction::Fail(PipeError::AdvanceOverrun {
                count: count as u32,
                outstanding: self.unacked.len(),
            })];
        }
        for _ in 0..count {
            self.unacked.pop_front();
        }
        Vec::new()
    }

    fn on_eos(&mut self) -> Vec<PipeAction> {
        if self.rx_eos_received {
            return vec![PipeAction::Fail(PipeError::DuplicateEos)];
        }
        self.rx_eos_received = true;
        self.rx_eos_ack_sent = true;
        one_or_fail(encode_frame(&PipeFrame::EosAck))
    }

    fn on_eos_ack(&mut self) -> Vec<PipeAction> {
        if !self.tx_eos_sent {
            return vec![PipeAction::Fail(PipeError::UnsolicitedEosAck)];
        }
        self.tx_eos_acked = true;
        Vec::new()
    }

    fn feed_frame_payload(&mut self, payload: Bytes) -> Vec<PipeAction> {
        if self.pending_remainder.is_some() {
            self.queued_frames.push_back(payload);
            return Vec::new();
        }
        let mut buf = std::mem::take(&mut self.codec_carry);
        buf.extend_from_slice(&payload);
        self.decode_and_handle(buf)
    }

    fn drain_queue(&mut self) -> Vec<PipeAction> {
        let mut actions = Vec::new();
        while self.pending_remainder.is_none() {
            let Some(next) = self.queued_frames.pop_front() else { break };
            let mut buf = std::mem::take(&mut self.codec_carry);
            buf.extend_from_slice(&next);
            actions.extend(self.decode_and_handle(buf));
        }
        actions
    }

    fn decode_and_handle(&mut self, buf: Vec<u8>) -> Vec<PipeAction> {
        let Some(decoder) = self.decoder.as_mut() else {
            return vec![PipeAction::Fail(
                ProtocolError::HelloNotFirst(xcodec_proto::PipeOp::Frame.to_byte()).into(),
            )];
        };

        match decoder.decode(&buf) {
            Ok(DecodeOutcome::Done { output, consumed }) => {
                self.codec_carry = buf[consumed..].to_vec();
                let mut actions = Vec::new();
                if !output.is_empty() {
                    actions.push(PipeAction::Deliver(Bytes::from(output)));
                }
                match encode_frame(&PipeFrame::Advance { count: 1 }) {
                    Ok(wire) => actions.push(PipeAction::SendWire(wire)),
                    Err(err) => actions.push(PipeAction::Fail(err)),
                }
                actions.extend(self.drain_queue());
                actions
            }
            Ok(DecodeOutcome::NeedLearn { output, consumed, unknown_hashes }) => {
                self.pending_remainder = Some(buf[consumed..].to_vec());
                let mut actions = Vec::new();
                if !output.is_empty() {
                    actions.push(PipeAction::Deliver(Bytes::from(output)));
                }
                let fresh: Vec<u64> = unknown_hashes
                    .into_iter()
                    .filter(|tag| self.asked_tags.insert(*tag))
                    .map(Tag::get)
                    .collect();
                if !fresh.is_empty() {
                    actions.extend(one_or_fail(encode_frame(&PipeFrame::Ask { tags: fresh })));
                }
                actions
            }
            Err(err) => vec![PipeAction::Fail(err.into())],
        }
    }
}

fn encode_frame(frame: &PipeFrame) -> Result<Bytes> {
    let mut buf = Vec::new();
    frame.encode(&mut buf)?;
    Ok(Bytes::from(buf))
}

fn one_or_fail(result: Result<Bytes>) -> Vec<PipeAction> {
    match result {
        Ok(wire) => vec![PipeAction::SendWire(wire)],
        Err(err) => vec![PipeAction::Fail(err)],
    }
}
