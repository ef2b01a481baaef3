//! AdChoices Host - the browsing-context boundary and window chain classification

pub mod chain;
pub mod host;

pub use chain::{build_chain, classify, probe, FrameDescriptor, WindowChain};
pub use host::{FrameHost, PopupRef, Timer, TimerHandle};
