//! The rotating bearer-token engine: codec, grace-window tracking, and the
//! per-validation rotation state machine. Everything here is transport
//! agnostic; header handling lives in `crate::auth`.

pub mod codec;
pub mod grace;
pub mod rotation;
