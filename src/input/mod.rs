//! Input packet framing and the outbound input channel

pub mod packets;
pub mod stream;

pub use packets::{
    controller_button, modifier, mouse_button, ControllerPacket, ControllerState, InputEvent, InputPacket,
    KeyboardPacket, MouseButtonPacket, MouseMovePacket, MouseScrollPacket, MultiControllerPacket,
};
pub use stream::InputStream;
