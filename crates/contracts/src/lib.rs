//! Wire contracts shared between CheenHub clients and the media relay.

pub mod signaling;
