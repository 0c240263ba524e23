// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end provider tests against the `surfacelink_ui_helper` fixture.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use surfacelink::{
    ChannelListener, LinkError, Provider, ProviderConfig, ProviderEvent, ProviderState, TreeNode,
    Variant,
};

const HELPER: &str = env!("CARGO_BIN_EXE_surfacelink_ui_helper");
const WAIT: Duration = Duration::from_secs(5);

fn config(mode: &str) -> ProviderConfig {
    static SEQ: AtomicUsize = AtomicUsize::new(0);
    ProviderConfig::default()
        .with_executable(HELPER)
        .with_args([format!("--mode={}", mode)])
        .with_rendezvous_prefix(format!(
            "surfacelink-test-{}",
            SEQ.fetch_add(1, Ordering::SeqCst)
        ))
        .with_grace_period(Duration::from_millis(500))
}

fn start(mode: &str, width: u32, height: u32) -> (Provider, Receiver<ProviderEvent>) {
    let (listener, events) = ChannelListener::new();
    let mut provider = Provider::new(config(mode), Box::new(listener));
    provider
        .start(width, height, 1.0, None)
        .expect("provider should start");
    (provider, events)
}

/// Dispatch until an event matching `pred` arrives. Returns every event seen
/// along the way, the match included.
fn pump_until(
    provider: &mut Provider,
    events: &Receiver<ProviderEvent>,
    pred: impl Fn(&ProviderEvent) -> bool,
) -> Vec<ProviderEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        provider.dispatch_timeout(Duration::from_millis(10));
        while let Ok(event) = events.try_recv() {
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
    }
    panic!("timed out waiting for event; saw {:?}", seen);
}

fn presented_with_width(width: u32) -> impl Fn(&ProviderEvent) -> bool {
    move |e| matches!(e, ProviderEvent::SurfacePresented { width: w, .. } if *w == width)
}

#[test]
fn test_initial_frame_is_presented() {
    let (mut provider, events) = start("echo", 800, 600);

    assert_eq!(provider.state(), ProviderState::Running);
    assert!(provider.child_pid().is_some());
    assert!(provider.view().displayed().is_some());

    let seen = pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::FirstFrameReady)
    });
    assert!(matches!(
        seen[0],
        ProviderEvent::SurfacePresented {
            width: 800,
            height: 600,
            ..
        }
    ));
    assert_eq!(provider.acks_outstanding(), 0);

    let surface = provider.surfaces().current().expect("current surface");
    let mapping = surface.map().unwrap();
    assert_eq!(&mapping.as_slice()[..4], &[800u32 as u8, 600u32 as u8, 0x7F, 0xFF]);

    provider.stop();
    assert_eq!(provider.state(), ProviderState::Stopped);
    assert!(provider.surfaces().current().is_none());
    assert!(provider.child_pid().is_none());
}

#[test]
fn test_resize_keeps_old_surface_until_frame_ready() {
    let (mut provider, events) = start("manual", 800, 600);
    let initial = provider.view().displayed().unwrap();

    provider.send_app_event(b"ack").unwrap();
    pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::FirstFrameReady)
    });

    provider.resize(1024, 768).unwrap();
    let pending = provider.view().pending().expect("pending surface");
    assert_ne!(pending, initial);
    assert_eq!(provider.acks_outstanding(), 1);

    for _ in 0..5 {
        provider.dispatch_timeout(Duration::from_millis(10));
    }
    assert_eq!(provider.view().displayed(), Some(initial));
    assert_eq!(provider.surfaces().current().unwrap().width(), 800);

    provider.send_app_event(b"ack").unwrap();
    pump_until(&mut provider, &events, presented_with_width(1024));

    assert_eq!(provider.view().displayed(), Some(pending));
    assert_eq!(provider.view().pending(), None);
    assert_eq!(provider.surfaces().commit_count(), 1);
    assert!(provider.surfaces().previous().is_none());
    assert_eq!(provider.view().bounds().width, 1024);
    assert_eq!(provider.view().bounds().height, 768);

    let current = provider.surfaces().current().unwrap();
    assert_eq!((current.width(), current.height()), (1024, 768));
    let mapping = current.map().unwrap();
    assert_eq!(&mapping.as_slice()[..4], &[0, 0, 0x7F, 0xFF]);
}

#[test]
fn test_overlapping_resizes_commit_on_newest_frame() {
    let (mut provider, events) = start("latest", 400, 300);
    provider.send_app_event(b"ack").unwrap();
    pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::FirstFrameReady)
    });

    provider.resize(500, 400).unwrap();
    provider.resize(600, 500).unwrap();
    assert_eq!(provider.acks_outstanding(), 1);
    assert_eq!(provider.surfaces().current().unwrap().width(), 400);

    // The child skips the superseded 500x400 surface entirely.
    provider.send_app_event(b"ack").unwrap();
    let seen = pump_until(&mut provider, &events, presented_with_width(600));
    assert!(!seen.iter().any(presented_with_width(500)));
    assert_eq!(provider.surfaces().commit_count(), 1);
    assert_eq!(provider.acks_outstanding(), 0);

    let current = provider.surfaces().current().unwrap();
    assert_eq!((current.width(), current.height()), (600, 500));
    let mapping = current.map().unwrap();
    assert_eq!(&mapping.as_slice()[..4], &[600u32 as u8, 500u32 as u8, 0x7F, 0xFF]);
}

#[test]
fn test_failed_resize_keeps_last_good_surface() {
    let (mut provider, events) = start("exit-early", 800, 600);
    let initial = provider.view().displayed().unwrap();

    // Let the child acknowledge its first frame and exit without dispatching.
    std::thread::sleep(Duration::from_millis(500));

    assert!(provider.resize(1024, 768).is_err());
    assert_eq!(provider.state(), ProviderState::Disconnected);
    assert!(provider.surfaces().pending().is_none());
    assert_eq!(provider.view().pending(), None);

    for _ in 0..10 {
        provider.dispatch_timeout(Duration::from_millis(5));
    }
    assert_eq!(provider.view().displayed(), Some(initial));
    assert_eq!(provider.surfaces().displayed_id(), Some(initial));
    assert_eq!(provider.surfaces().commit_count(), 0);

    let disconnects = events
        .try_iter()
        .filter(|e| matches!(e, ProviderEvent::Disconnected(_)))
        .count();
    assert_eq!(disconnects, 1);
}

#[test]
fn test_tree_over_configured_limit_is_rejected() {
    let (listener, _events) = ChannelListener::new();
    let mut provider = Provider::new(config("echo").with_max_tree_payload(64), Box::new(listener));
    provider.start(100, 100, 1.0, None).unwrap();

    let big = TreeNode::new("blob").with_property("data", vec![0u8; 256]);
    assert!(matches!(
        provider.send_tree(&big),
        Err(LinkError::InvalidArgument(_))
    ));
    assert_eq!(provider.state(), ProviderState::Running);
    provider.send_tree(&TreeNode::new("small")).unwrap();
}

#[test]
fn test_resize_to_same_size_is_noop() {
    let (mut provider, _events) = start("echo", 320, 240);
    provider.resize(320, 240).unwrap();
    provider.resize(0, 100).unwrap();
    assert!(provider.surfaces().pending().is_none());
    assert!(provider.view().pending().is_none());
    assert_eq!(provider.surfaces().generation(), 1);
}

#[test]
fn test_tree_and_app_event_echo() {
    let (mut provider, events) = start("echo", 200, 100);

    let tree = TreeNode::new("label")
        .with_property("text", "hello")
        .with_property("size", Variant::Double(12.5))
        .with_child(TreeNode::new("span").with_property("bold", true));
    provider.send_tree(&tree).unwrap();
    let seen = pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::TreeMessage(_))
    });
    assert_eq!(seen.last(), Some(&ProviderEvent::TreeMessage(tree)));

    provider.send_app_event(b"ping").unwrap();
    pump_until(&mut provider, &events, |e| {
        *e == ProviderEvent::AppEvent(b"ping".to_vec())
    });

    assert!(matches!(
        provider.send_app_event(&[0u8; 256]),
        Err(LinkError::InvalidArgument(_))
    ));
}

#[test]
fn test_parameter_round_trip() {
    let (mut provider, events) = start("echo", 200, 100);
    let registry = provider.parameters();

    provider.set_parameter(7, 0.25).unwrap();
    assert_eq!(registry.get(7), Some(0.25));

    pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::TreeMessage(node) if node.has_type("param"))
    });
    assert_eq!(registry.get(7), Some(0.25));
}

#[test]
fn test_child_exit_reports_disconnect_once() {
    let (mut provider, events) = start("exit-early", 640, 480);

    let seen = pump_until(&mut provider, &events, |e| {
        matches!(e, ProviderEvent::Disconnected(_))
    });
    assert!(seen
        .iter()
        .any(|e| matches!(e, ProviderEvent::FirstFrameReady)));
    assert_eq!(provider.state(), ProviderState::Disconnected);
    assert!(provider.view().displayed().is_some());

    for _ in 0..10 {
        provider.dispatch_timeout(Duration::from_millis(5));
    }
    assert!(!events
        .try_iter()
        .any(|e| matches!(e, ProviderEvent::Disconnected(_))));

    assert!(matches!(
        provider.resize(100, 100),
        Err(LinkError::ChannelBroken(_))
    ));

    provider.stop();
    assert_eq!(provider.state(), ProviderState::Stopped);
}

#[test]
fn test_handshake_timeout_tears_down() {
    let (listener, events) = ChannelListener::new();
    let config = config("no-handshake").with_handshake_timeout(Duration::from_millis(200));
    let mut provider = Provider::new(config, Box::new(listener));

    let started = Instant::now();
    let result = provider.start(100, 100, 1.0, None);
    assert!(matches!(result, Err(LinkError::Handshake(_))));
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(provider.state(), ProviderState::Stopped);
    assert!(provider.child_pid().is_none());
    assert!(provider.surfaces().current().is_none());
    assert!(events.try_recv().is_err());
}

#[test]
fn test_missing_executable() {
    let config = ProviderConfig::default()
        .with_executable("/nonexistent/surfacelink-ui")
        .with_rendezvous_prefix("surfacelink-test-missing");
    let mut provider = Provider::new(config, Box::new(surfacelink::NoopListener));

    let result = provider.start(100, 100, 1.0, None);
    assert!(matches!(result, Err(LinkError::Process(_))));
    assert_eq!(provider.state(), ProviderState::Stopped);
}
