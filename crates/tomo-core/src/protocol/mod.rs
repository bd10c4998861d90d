//! Wire protocols: device command codec, projection channel messages,
//! slicing progress frames, and base64 helpers.

pub mod base64;
pub mod channel;
pub mod device;
pub mod progress;

pub use channel::{ChannelDecodeError, ChannelMessage};
pub use device::DeviceCommand;
pub use progress::{parse_progress_frame, SseDecoder};
