// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Data Sender/Receiver Manager transport: TCP fragment delivery and the
//! UDP-distributed routing table that tells a sender which builder rank
//! owns a given sequence id.

pub mod error;
pub mod receiver;
pub mod routing_cache;
pub mod sender;

pub use error::TransportError;
pub use receiver::FragmentReceiver;
pub use routing_cache::{RoutingListener, RoutingTableCache};
pub use sender::FragmentSender;
