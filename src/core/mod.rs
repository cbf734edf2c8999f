pub mod publish;
pub mod record;

pub use publish::{ChannelPublisher, JsonLinesPublisher, Publication, Publisher};
pub use record::{DecodedRecord, FieldValue};
