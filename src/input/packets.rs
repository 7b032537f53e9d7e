//! Input packet wire formats
//!
//! Every packet is a 4-byte big-endian type tag followed by a fixed-length
//! payload. Byte order is per field: mouse packets are big-endian, keyboard
//! and controller payloads are mostly little-endian.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of the packet type tag
pub const INPUT_HEADER_LENGTH: usize = 4;

/// First host generation using the decremented multi-controller header
pub const SERVER_GENERATION_5: u32 = 5;

/// A serializable input packet
pub trait InputPacket {
    fn packet_type(&self) -> u32;

    fn payload_length(&self) -> usize;

    /// Append the payload, exactly `payload_length()` bytes
    fn write_payload(&self, buf: &mut BytesMut);

    fn packet_length(&self) -> usize {
        INPUT_HEADER_LENGTH + self.payload_length()
    }

    /// Append header and payload
    fn write_wire(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.put_u32(self.packet_type());
        self.write_payload(buf);
        debug_assert_eq!(buf.len() - start, self.packet_length());
    }

    /// Header and payload as a standalone buffer
    fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.packet_length());
        self.write_wire(&mut buf);
        buf.freeze()
    }
}

/// Relative mouse motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseMovePacket {
    pub delta_x: i16,
    pub delta_y: i16,
}

impl MouseMovePacket {
    pub const PACKET_TYPE: u32 = 0x08;
    const HEADER: [u8; 4] = [0x06, 0x00, 0x00, 0x00];

    pub fn new(delta_x: i16, delta_y: i16) -> Self {
        Self { delta_x, delta_y }
    }
}

impl InputPacket for MouseMovePacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        8
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&Self::HEADER);
        buf.put_i16(self.delta_x);
        buf.put_i16(self.delta_y);
    }
}

/// Mouse buttons as numbered on the wire
pub mod mouse_button {
    pub const LEFT: u8 = 0x01;
    pub const MIDDLE: u8 = 0x02;
    pub const RIGHT: u8 = 0x03;
}

/// Mouse button press or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonPacket {
    pub pressed: bool,
    pub button: u8,
}

impl MouseButtonPacket {
    pub const PACKET_TYPE: u32 = 0x05;
    pub const PRESS_EVENT: u8 = 0x07;
    pub const RELEASE_EVENT: u8 = 0x08;

    pub fn new(pressed: bool, button: u8) -> Self {
        Self { pressed, button }
    }
}

impl InputPacket for MouseButtonPacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        5
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(if self.pressed {
            Self::PRESS_EVENT
        } else {
            Self::RELEASE_EVENT
        });
        buf.put_i32(self.button as i32);
    }
}

/// Vertical wheel motion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseScrollPacket {
    /// Wheel delta, 120 per click
    pub amount: i16,
}

impl MouseScrollPacket {
    pub const PACKET_TYPE: u32 = 0x0A;
    const CLICK: i16 = 120;

    pub fn new(clicks: i8) -> Self {
        Self {
            amount: clicks as i16 * Self::CLICK,
        }
    }
}

impl InputPacket for MouseScrollPacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        10
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&[0x09, 0x00, 0x00, 0x00]);
        buf.put_i16(self.amount);
        buf.put_i16(self.amount);
        buf.put_i16(0);
    }
}

/// Keyboard modifier bits
pub mod modifier {
    pub const SHIFT: u8 = 0x01;
    pub const CTRL: u8 = 0x02;
    pub const ALT: u8 = 0x04;
}

/// Key press or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardPacket {
    pub key_code: i16,
    pub direction: u8,
    pub modifiers: u8,
}

impl KeyboardPacket {
    pub const PACKET_TYPE: u32 = 0x0A;
    pub const KEY_DOWN: u8 = 0x03;
    pub const KEY_UP: u8 = 0x04;

    pub fn new(key_code: i16, direction: u8, modifiers: u8) -> Self {
        Self {
            key_code,
            direction,
            modifiers,
        }
    }
}

impl InputPacket for KeyboardPacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        10
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u8(self.direction);
        buf.put_u16_le(0);
        buf.put_u16_le(0);
        buf.put_i16_le(self.key_code);
        buf.put_u8(self.modifiers);
        buf.put_u16_le(0);
    }
}

/// Gamepad button bits
pub mod controller_button {
    pub const UP: u16 = 0x0001;
    pub const DOWN: u16 = 0x0002;
    pub const LEFT: u16 = 0x0004;
    pub const RIGHT: u16 = 0x0008;
    pub const PLAY: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LS_CLK: u16 = 0x0040;
    pub const RS_CLK: u16 = 0x0080;
    pub const LB: u16 = 0x0100;
    pub const RB: u16 = 0x0200;
    pub const SPECIAL: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

const CONTROLLER_TAIL: [u8; 6] = [0x9C, 0x00, 0x00, 0x00, 0x55, 0x00];

/// Full state of one gamepad
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub left_stick_x: i16,
    pub left_stick_y: i16,
    pub right_stick_x: i16,
    pub right_stick_y: i16,
}

impl ControllerState {
    fn write_le(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.buttons);
        buf.put_u8(self.left_trigger);
        buf.put_u8(self.right_trigger);
        buf.put_i16_le(self.left_stick_x);
        buf.put_i16_le(self.left_stick_y);
        buf.put_i16_le(self.right_stick_x);
        buf.put_i16_le(self.right_stick_y);
    }
}

/// Single-gamepad state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerPacket {
    pub state: ControllerState,
}

impl ControllerPacket {
    pub const PACKET_TYPE: u32 = 0x18;
    const HEADER: [u8; 6] = [0x0A, 0x00, 0x00, 0x00, 0x00, 0x14];

    pub fn new(state: ControllerState) -> Self {
        Self { state }
    }
}

impl InputPacket for ControllerPacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        24
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_slice(&Self::HEADER);
        self.state.write_le(buf);
        buf.put_slice(&CONTROLLER_TAIL);
    }
}

/// Gamepad state tagged with its controller slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiControllerPacket {
    header_code: u32,
    pub controller_number: u16,
    pub active_mask: u16,
    pub state: ControllerState,
}

impl MultiControllerPacket {
    pub const PACKET_TYPE: u32 = 0x1E;
    const HEADER_CODE: u32 = 0x0D;

    pub fn new(server_generation: u32, controller_number: u16, active_mask: u16, state: ControllerState) -> Self {
        let header_code = if server_generation >= SERVER_GENERATION_5 {
            Self::HEADER_CODE - 1
        } else {
            Self::HEADER_CODE
        };

        Self {
            header_code,
            controller_number,
            active_mask,
            state,
        }
    }

    pub fn header_code(&self) -> u32 {
        self.header_code
    }
}

impl InputPacket for MultiControllerPacket {
    fn packet_type(&self) -> u32 {
        Self::PACKET_TYPE
    }

    fn payload_length(&self) -> usize {
        30
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.header_code);
        buf.put_u16_le(0x1A);
        buf.put_u16_le(self.controller_number);
        buf.put_u16_le(self.active_mask);
        buf.put_u16_le(0x14);
        self.state.write_le(buf);
        buf.put_slice(&CONTROLLER_TAIL);
    }
}

/// Any input packet, as queued for sending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    MouseMove(MouseMovePacket),
    MouseButton(MouseButtonPacket),
    MouseScroll(MouseScrollPacket),
    Keyboard(KeyboardPacket),
    Controller(ControllerPacket),
    MultiController(MultiControllerPacket),
}

impl InputEvent {
    fn packet(&self) -> &dyn InputPacket {
        match self {
            Self::MouseMove(p) => p,
            Self::MouseButton(p) => p,
            Self::MouseScroll(p) => p,
            Self::Keyboard(p) => p,
            Self::Controller(p) => p,
            Self::MultiController(p) => p,
        }
    }
}

impl InputPacket for InputEvent {
    fn packet_type(&self) -> u32 {
        self.packet().packet_type()
    }

    fn payload_length(&self) -> usize {
        self.packet().payload_length()
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        self.packet().write_payload(buf);
    }
}
