// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Request protocol: a coalescing sender/receiver pair for `(sequence_id,
//! timestamp)` requests, plus the windowing policies a fragment generator
//! uses to answer them.

pub mod buffer;
pub mod error;
pub mod generator;
pub mod receiver;
pub mod sender;
pub mod window;

pub use buffer::FragmentBuffer;
pub use error::ReqProtoError;
pub use generator::{CommandableFragmentGenerator, GeneratorConfig};
pub use receiver::RequestReceiver;
pub use sender::RequestSender;
pub use window::{WindowMode, WindowOutcome};
