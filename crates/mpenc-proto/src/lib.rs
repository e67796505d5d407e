pub mod data;
pub mod error;
pub mod frame;
pub mod greeter;
pub mod message;
pub mod tlv;
pub mod transport;

pub use data::PaddingSize;
pub use error::ProtocolError;
pub use greeter::{Greeter, GreeterEvent, GreeterState};
pub use message::ProtocolMessage;
pub use transport::{ChannelAction, ChannelEvent, GroupChannel, StaticKeyDirectory};
