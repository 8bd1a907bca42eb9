pub mod codec;
pub mod peer_name;
pub mod relative_time;
pub mod units;

pub use peer_name::{PeerName, PeerNameError};
