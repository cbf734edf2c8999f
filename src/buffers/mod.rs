pub mod channel;
pub mod stream_buffer;

pub use channel::{Channel, Point, SampleValue};
pub use stream_buffer::{
    SampleStreamBuffer, ScalarPolicy, SessionClock, BASE_WINDOW, DEFAULT_CHANNEL_CAPACITY,
};
