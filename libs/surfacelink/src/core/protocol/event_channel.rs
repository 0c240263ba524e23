// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Duplex event channel over a stream socket.
//!
//! One background thread reads and decodes frames and forwards them through
//! a crossbeam queue; the owner drains the queue on its own thread. Writes
//! are serialized by a lock and each frame goes out in one buffer. Any I/O
//! failure breaks the channel for good and queues exactly one
//! [`ChannelEvent::Closed`].

use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::message::{encode_app_event_frame, encode_tree_frame, read_message, FrameLimits};
use super::{InputEvent, Message, StatusKind};
use crate::core::capability::scm;
use crate::core::tree::TreeNode;
use crate::core::{LinkError, Result};

/// Item delivered to the owner of an [`EventChannel`].
#[derive(Debug)]
pub enum ChannelEvent {
    Message(Message),
    /// The peer went away or the stream failed. Sent at most once, and not
    /// at all for an intentional [`EventChannel::close`].
    Closed(LinkError),
}

struct Shared {
    stream: UnixStream,
    write_lock: Mutex<()>,
    broken: AtomicBool,
    closing: AtomicBool,
    notified: AtomicBool,
    events_tx: Sender<ChannelEvent>,
}

impl Shared {
    fn notify_closed(&self, error: LinkError) {
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        if !self.notified.swap(true, Ordering::SeqCst) {
            let _ = self.events_tx.send(ChannelEvent::Closed(error));
        }
    }
}

pub struct EventChannel {
    shared: Arc<Shared>,
    events_rx: Receiver<ChannelEvent>,
    reader: Option<JoinHandle<()>>,
    limits: FrameLimits,
}

impl EventChannel {
    /// Take ownership of a connected stream and start the reader thread.
    pub fn start(stream: UnixStream, limits: FrameLimits) -> Result<Self> {
        let read_stream = stream.try_clone()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            stream,
            write_lock: Mutex::new(()),
            broken: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            events_tx,
        });

        let reader_shared = Arc::clone(&shared);
        let reader = std::thread::Builder::new()
            .name("surfacelink-events".into())
            .spawn(move || reader_loop(read_stream, limits, reader_shared))?;

        tracing::debug!("[EventChannel] Reader thread started");
        Ok(Self {
            shared,
            events_rx,
            reader: Some(reader),
            limits,
        })
    }

    pub fn send(&self, message: &Message) -> Result<()> {
        let mut frame = Vec::with_capacity(32);
        message.encode_into(&mut frame)?;
        if let Message::Tree(_) = message {
            self.check_tree_size(&frame)?;
        }
        self.write_frame(message.name(), &frame)
    }

    pub fn send_status(&self, kind: StatusKind) -> Result<()> {
        self.write_frame("STATUS", &[super::message::TAG_STATUS, kind.to_u8()])
    }

    pub fn send_frame_ready(&self) -> Result<()> {
        self.send_status(StatusKind::FrameReady)
    }

    pub fn send_input(&self, event: &InputEvent) -> Result<()> {
        let mut frame = [0u8; 1 + InputEvent::WIRE_SIZE];
        frame[0] = super::message::TAG_INPUT;
        frame[1..].copy_from_slice(&event.to_bytes());
        self.write_frame("INPUT", &frame)
    }

    /// Send a tree. Trees larger than the peer accepts are rejected here
    /// rather than breaking the channel.
    pub fn send_tree(&self, node: &TreeNode) -> Result<()> {
        let mut frame = Vec::with_capacity(64);
        encode_tree_frame(node, &mut frame)?;
        self.check_tree_size(&frame)?;
        self.write_frame("TREE", &frame)
    }

    pub fn send_app_event(&self, payload: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(2 + payload.len());
        encode_app_event_frame(payload, &mut frame)?;
        self.write_frame("APP_EVENT", &frame)
    }

    /// Next queued event without blocking.
    pub fn try_recv(&self) -> Option<ChannelEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Next queued event, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChannelEvent> {
        self.events_rx.recv_timeout(timeout).ok()
    }

    /// Receiver side of the event queue, for `select!`-style consumers.
    pub fn events(&self) -> &Receiver<ChannelEvent> {
        &self.events_rx
    }

    pub fn is_broken(&self) -> bool {
        self.shared.broken.load(Ordering::SeqCst)
    }

    /// Shut the stream down and join the reader. No `Closed` event is
    /// queued for this. Idempotent.
    pub fn close(&mut self) {
        let Some(reader) = self.reader.take() else {
            return;
        };
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.broken.store(true, Ordering::SeqCst);
        let _ = self.shared.stream.shutdown(std::net::Shutdown::Both);

        if reader.join().is_err() {
            tracing::error!("[EventChannel] Reader thread panicked");
        }
        tracing::debug!("[EventChannel] Closed");
    }

    /// `frame` is a complete TREE frame: tag, u32 length, payload.
    fn check_tree_size(&self, frame: &[u8]) -> Result<()> {
        let payload = frame.len().saturating_sub(5);
        if payload > self.limits.max_tree_payload as usize {
            return Err(LinkError::InvalidArgument(format!(
                "tree of {} bytes exceeds limit {}",
                payload, self.limits.max_tree_payload
            )));
        }
        Ok(())
    }

    fn write_frame(&self, name: &str, frame: &[u8]) -> Result<()> {
        if self.is_broken() {
            return Err(LinkError::ChannelBroken(format!(
                "cannot send {}: channel is broken",
                name
            )));
        }

        let _guard = self.shared.write_lock.lock();
        if let Err(e) = scm::send_all_nosignal(self.shared.stream.as_fd(), frame) {
            let reason = format!("{} write failed: {}", name, e);
            self.shared.broken.store(true, Ordering::SeqCst);
            tracing::warn!("[EventChannel] {}", reason);
            self.shared
                .notify_closed(LinkError::ChannelBroken(reason.clone()));
            return Err(LinkError::ChannelBroken(reason));
        }
        tracing::trace!("[EventChannel] Sent {} ({} bytes)", name, frame.len());
        Ok(())
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop(mut stream: UnixStream, limits: FrameLimits, shared: Arc<Shared>) {
    loop {
        match read_message(&mut stream, &limits) {
            Ok(Some(message)) => {
                tracing::trace!("[EventChannel] Received {}", message.name());
                if shared.events_tx.send(ChannelEvent::Message(message)).is_err() {
                    break;
                }
            }
            Ok(None) => continue,
            Err(e) => {
                shared.broken.store(true, Ordering::SeqCst);
                if shared.closing.load(Ordering::SeqCst) {
                    tracing::trace!("[EventChannel] Reader stopping after close");
                    break;
                }
                match &e {
                    LinkError::ChildExited(_) => tracing::info!("[EventChannel] {}", e),
                    LinkError::ProtocolViolation(_) => {
                        tracing::error!("[EventChannel] {}; closing channel", e);
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                    }
                    _ => tracing::warn!("[EventChannel] {}", e),
                }
                shared.notify_closed(e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::message::TAG_TREE;
    use crate::core::protocol::Modifiers;
    use std::io::{Read, Write};

    const WAIT: Duration = Duration::from_secs(5);

    fn channel_pair() -> (EventChannel, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (EventChannel::start(ours, FrameLimits::default()).unwrap(), theirs)
    }

    #[test]
    fn test_input_is_byte_identical() {
        let (channel, mut peer) = channel_pair();
        let event = InputEvent::pointer_move(10, 20, Modifiers::empty());
        channel.send_input(&event).unwrap();

        let mut frame = [0u8; 17];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(frame[0], 1);
        assert_eq!(frame[1..], event.to_bytes());
        assert_eq!(InputEvent::from_bytes(frame[1..].try_into().unwrap()), event);
    }

    #[test]
    fn test_messages_are_redelivered_in_order() {
        let (channel, mut peer) = channel_pair();
        let mut bytes = Vec::new();
        Message::Status(StatusKind::FrameReady)
            .encode_into(&mut bytes)
            .unwrap();
        Message::AppEvent(b"hi".to_vec())
            .encode_into(&mut bytes)
            .unwrap();
        peer.write_all(&bytes).unwrap();

        assert!(matches!(
            channel.recv_timeout(WAIT),
            Some(ChannelEvent::Message(Message::Status(StatusKind::FrameReady)))
        ));
        match channel.recv_timeout(WAIT) {
            Some(ChannelEvent::Message(Message::AppEvent(payload))) => assert_eq!(payload, b"hi"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_oversized_tree_closes_channel() {
        let (channel, mut peer) = channel_pair();
        let mut frame = vec![TAG_TREE];
        frame.extend_from_slice(&(2 * 1024 * 1024u32).to_le_bytes());
        peer.write_all(&frame).unwrap();

        match channel.recv_timeout(WAIT) {
            Some(ChannelEvent::Closed(e)) => {
                assert!(matches!(e, LinkError::ProtocolViolation(_)));
                assert!(e.is_disconnect());
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(channel.is_broken());

        // The peer sees the stream shut down.
        let mut buf = [0u8; 1];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
        assert!(channel.send_frame_ready().is_err());
    }

    #[test]
    fn test_peer_exit_reported_once() {
        let (channel, peer) = channel_pair();
        drop(peer);

        assert!(matches!(
            channel.recv_timeout(WAIT),
            Some(ChannelEvent::Closed(LinkError::ChildExited(_)))
        ));
        assert!(matches!(
            channel.send_frame_ready(),
            Err(LinkError::ChannelBroken(_))
        ));
        assert!(channel.recv_timeout(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_intentional_close_is_silent() {
        let (mut channel, _peer) = channel_pair();
        channel.close();
        channel.close();
        assert!(channel.is_broken());
        assert!(channel.try_recv().is_none());
    }

    #[test]
    fn test_tree_over_limit_rejected_locally() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let limits = FrameLimits {
            max_tree_payload: 16,
            ..FrameLimits::default()
        };
        let channel = EventChannel::start(ours, limits).unwrap();
        let node = TreeNode::new("a-long-node-type").with_property("k", "value");

        assert!(matches!(
            channel.send_tree(&node),
            Err(LinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            channel.send(&Message::Tree(node)),
            Err(LinkError::InvalidArgument(_))
        ));
        assert!(!channel.is_broken());
    }

    #[test]
    fn test_generic_send_applies_no_tree_limit_to_other_messages() {
        let (ours, mut peer) = UnixStream::pair().unwrap();
        let limits = FrameLimits {
            max_tree_payload: 1,
            ..FrameLimits::default()
        };
        let channel = EventChannel::start(ours, limits).unwrap();

        channel
            .send(&Message::AppEvent(b"longer than one byte".to_vec()))
            .unwrap();
        let mut frame = [0u8; 22];
        peer.read_exact(&mut frame).unwrap();
        assert_eq!(frame[..2], [3, 20]);
        assert_eq!(&frame[2..], b"longer than one byte");
    }
}
