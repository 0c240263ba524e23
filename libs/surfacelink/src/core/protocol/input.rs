// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fixed 16-byte input record.
//!
//! ```text
//! type:u8 action:u8 button:u8 modifiers:u8 x:i16 y:i16 data1:i16 data2:i16 timestamp_ms:u32
//! ```
//!
//! Field meaning by type:
//! - pointer: x/y position; scroll deltas in data1/data2 scaled by 10000
//! - key: x is the platform key code; data1/data2 hold the low/high 16 bits
//!   of a UTF-32 codepoint
//! - focus: data1 is 1 when gained, 0 when lost
//! - resize: x/y are the new size in device pixels; data1 is scale x100

use bitflags::bitflags;

/// Fixed-point factor applied to scroll deltas.
pub const SCROLL_SCALE: f32 = 10000.0;

/// Fixed-point factor applied to the resize backing scale.
pub const RESIZE_SCALE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputKind {
    Pointer = 0,
    Key = 1,
    Focus = 2,
    Resize = 3,
}

/// Pointer and key actions. Keys use only `Press` and `Release`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputAction {
    Press = 0,
    Release = 1,
    Move = 2,
    Scroll = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MouseButton {
    #[default]
    None = 0,
    Left = 1,
    Right = 2,
    Middle = 3,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u8 {
        const SHIFT = 1;
        const CTRL = 2;
        const ALT = 4;
        const META = 8;
    }
}

/// One input record. Fields are kept raw so unknown values survive a
/// read/write cycle unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputEvent {
    pub kind: u8,
    pub action: u8,
    pub button: u8,
    pub modifiers: u8,
    pub x: i16,
    pub y: i16,
    pub data1: i16,
    pub data2: i16,
    pub timestamp_ms: u32,
}

impl InputEvent {
    pub const WIRE_SIZE: usize = 16;

    pub fn pointer_move(x: i32, y: i32, modifiers: Modifiers) -> Self {
        Self {
            kind: InputKind::Pointer as u8,
            action: InputAction::Move as u8,
            modifiers: modifiers.bits(),
            x: saturate(x),
            y: saturate(y),
            ..Self::default()
        }
    }

    /// Press or release of `button` at x/y.
    pub fn pointer_button(
        pressed: bool,
        button: MouseButton,
        x: i32,
        y: i32,
        modifiers: Modifiers,
    ) -> Self {
        Self {
            kind: InputKind::Pointer as u8,
            action: press_or_release(pressed) as u8,
            button: button as u8,
            modifiers: modifiers.bits(),
            x: saturate(x),
            y: saturate(y),
            ..Self::default()
        }
    }

    pub fn pointer_scroll(x: i32, y: i32, delta_x: f32, delta_y: f32, modifiers: Modifiers) -> Self {
        Self {
            kind: InputKind::Pointer as u8,
            action: InputAction::Scroll as u8,
            modifiers: modifiers.bits(),
            x: saturate(x),
            y: saturate(y),
            data1: fixed_point(delta_x * SCROLL_SCALE),
            data2: fixed_point(delta_y * SCROLL_SCALE),
            ..Self::default()
        }
    }

    pub fn key(pressed: bool, key_code: i32, codepoint: u32, modifiers: Modifiers) -> Self {
        Self {
            kind: InputKind::Key as u8,
            action: press_or_release(pressed) as u8,
            modifiers: modifiers.bits(),
            x: saturate(key_code),
            data1: (codepoint & 0xFFFF) as u16 as i16,
            data2: (codepoint >> 16) as u16 as i16,
            ..Self::default()
        }
    }

    pub fn focus(gained: bool) -> Self {
        Self {
            kind: InputKind::Focus as u8,
            data1: i16::from(gained),
            ..Self::default()
        }
    }

    /// New surface size in device pixels plus the backing scale.
    ///
    /// Dimensions above `i16::MAX` do not fit the record and are clamped
    /// with a warning. Provider configs cap surfaces below that limit.
    pub fn resize(width: u32, height: u32, scale: f64) -> Self {
        let limit = i16::MAX as u32;
        if width > limit || height > limit {
            tracing::warn!(
                "[Input] Resize {}x{} exceeds {} and was clamped",
                width,
                height,
                limit
            );
        }
        Self {
            kind: InputKind::Resize as u8,
            x: width.min(limit) as i16,
            y: height.min(limit) as i16,
            data1: fixed_point((scale * RESIZE_SCALE) as f32),
            ..Self::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u32) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn kind(&self) -> Option<InputKind> {
        match self.kind {
            0 => Some(InputKind::Pointer),
            1 => Some(InputKind::Key),
            2 => Some(InputKind::Focus),
            3 => Some(InputKind::Resize),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<InputAction> {
        match self.action {
            0 => Some(InputAction::Press),
            1 => Some(InputAction::Release),
            2 => Some(InputAction::Move),
            3 => Some(InputAction::Scroll),
            _ => None,
        }
    }

    pub fn button(&self) -> Option<MouseButton> {
        match self.button {
            0 => Some(MouseButton::None),
            1 => Some(MouseButton::Left),
            2 => Some(MouseButton::Right),
            3 => Some(MouseButton::Middle),
            _ => None,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        Modifiers::from_bits_truncate(self.modifiers)
    }

    pub fn scroll_delta(&self) -> (f32, f32) {
        (
            f32::from(self.data1) / SCROLL_SCALE,
            f32::from(self.data2) / SCROLL_SCALE,
        )
    }

    pub fn codepoint(&self) -> Option<char> {
        let raw = u32::from(self.data1 as u16) | (u32::from(self.data2 as u16) << 16);
        char::from_u32(raw)
    }

    pub fn focus_gained(&self) -> bool {
        self.data1 != 0
    }

    pub fn resize_size(&self) -> (u32, u32) {
        (self.x.max(0) as u32, self.y.max(0) as u32)
    }

    pub fn resize_scale(&self) -> f64 {
        f64::from(self.data1) / RESIZE_SCALE
    }

    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0] = self.kind;
        out[1] = self.action;
        out[2] = self.button;
        out[3] = self.modifiers;
        out[4..6].copy_from_slice(&self.x.to_le_bytes());
        out[6..8].copy_from_slice(&self.y.to_le_bytes());
        out[8..10].copy_from_slice(&self.data1.to_le_bytes());
        out[10..12].copy_from_slice(&self.data2.to_le_bytes());
        out[12..16].copy_from_slice(&self.timestamp_ms.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; Self::WIRE_SIZE]) -> Self {
        let i16_at = |at: usize| i16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Self {
            kind: bytes[0],
            action: bytes[1],
            button: bytes[2],
            modifiers: bytes[3],
            x: i16_at(4),
            y: i16_at(6),
            data1: i16_at(8),
            data2: i16_at(10),
            timestamp_ms: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
        }
    }
}

fn press_or_release(pressed: bool) -> InputAction {
    if pressed {
        InputAction::Press
    } else {
        InputAction::Release
    }
}

fn saturate(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

fn fixed_point(value: f32) -> i16 {
    // `as` saturates and maps NaN to 0.
    value.round() as i16
}
