// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! UI-process fixture for the provider integration tests.
//!
//! `--mode=` selects the behavior:
//!
//! - `echo` (default): paint and acknowledge every surface, echo trees and
//!   app events back, exit on EOF.
//! - `manual`: like `echo`, but hold each surface until the host sends the
//!   app event `ack`; every `ack` presents the oldest held surface.
//! - `latest`: like `manual`, but an `ack` presents only the newest surface
//!   received and skips any older ones.
//! - `exit-early`: acknowledge the first surface, then exit with status 3.
//! - `no-handshake`: never connect to the rendezvous; exit on EOF.
//! - `hang`: ignore everything and never exit on its own.
//!
//! Every surface is filled with `[width as u8, height as u8, 0x7F, 0xFF]`.

use std::collections::VecDeque;
use std::io::Read;
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::time::Duration;

use surfacelink::core::subprocess::CHANNEL_FD;
use surfacelink::{ChannelEvent, GuestArgs, GuestSession, Message, SharedSurface};

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Echo,
    Manual,
    Latest,
    ExitEarly,
    NoHandshake,
    Hang,
}

fn mode_of(args: &[String]) -> Mode {
    let mode = args
        .iter()
        .find_map(|a| a.strip_prefix("--mode="))
        .unwrap_or("echo");
    match mode {
        "manual" => Mode::Manual,
        "latest" => Mode::Latest,
        "exit-early" => Mode::ExitEarly,
        "no-handshake" => Mode::NoHandshake,
        "hang" => Mode::Hang,
        _ => Mode::Echo,
    }
}

fn paint(surface: &SharedSurface) -> surfacelink::Result<()> {
    let mut mapping = surface.map()?;
    mapping.fill([surface.width() as u8, surface.height() as u8, 0x7F, 0xFF]);
    Ok(())
}

fn present(session: &GuestSession, surface: &SharedSurface) -> surfacelink::Result<()> {
    paint(surface)?;
    session.send_frame_ready()
}

/// Move every surface already pushed by the host into `held`.
fn drain_surfaces(
    session: &GuestSession,
    held: &mut VecDeque<SharedSurface>,
) -> surfacelink::Result<()> {
    while let Some(surface) = session.recv_surface(Some(Duration::ZERO))? {
        held.push_back(surface);
    }
    Ok(())
}

fn wait_for_eof() {
    // SAFETY: the host installed the event stream at CHANNEL_FD for us.
    let mut stream = UnixStream::from(unsafe { OwnedFd::from_raw_fd(CHANNEL_FD) });
    let mut buf = [0u8; 256];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
    }
}

fn run(mode: Mode, args: GuestArgs) -> surfacelink::Result<ExitCode> {
    let session = GuestSession::connect(args)?;

    if mode == Mode::ExitEarly {
        if let Some(surface) = session.recv_surface(Some(Duration::from_secs(5)))? {
            present(&session, &surface)?;
        }
        std::thread::sleep(Duration::from_millis(20));
        return Ok(ExitCode::from(3));
    }

    let mut held: VecDeque<SharedSurface> = VecDeque::new();
    let mut acks_requested = 0usize;

    loop {
        if let Some(surface) = session.recv_surface(Some(POLL))? {
            match mode {
                Mode::Manual | Mode::Latest => held.push_back(surface),
                _ => present(&session, &surface)?,
            }
        }

        while let Some(event) = session.try_recv() {
            match event {
                ChannelEvent::Message(Message::Tree(node)) => session.send_tree(&node)?,
                ChannelEvent::Message(Message::AppEvent(payload)) => {
                    if matches!(mode, Mode::Manual | Mode::Latest) && payload == b"ack" {
                        acks_requested += 1;
                    } else {
                        session.send_app_event(&payload)?;
                    }
                }
                ChannelEvent::Message(_) => {}
                ChannelEvent::Closed(_) => return Ok(ExitCode::SUCCESS),
            }
        }

        if acks_requested > 0 {
            // The host pushes a surface before it can ask for its frame.
            drain_surfaces(&session, &mut held)?;
            if mode == Mode::Latest {
                while held.len() > 1 {
                    held.pop_front();
                }
            }
        }
        while acks_requested > 0 {
            let Some(surface) = held.pop_front() else {
                break;
            };
            acks_requested -= 1;
            present(&session, &surface)?;
        }
    }
}

fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mode = mode_of(&raw);

    match mode {
        Mode::Hang => loop {
            std::thread::sleep(Duration::from_secs(1));
        },
        Mode::NoHandshake => {
            wait_for_eof();
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let args = match GuestArgs::parse(raw) {
        Ok(args) => args,
        Err(_) => return ExitCode::from(2),
    };
    match run(mode, args) {
        Ok(code) => code,
        // The host closing the capability endpoint under us is a normal way out.
        Err(e) if e.is_disconnect() => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
