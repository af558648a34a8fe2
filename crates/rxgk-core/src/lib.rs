//! RxGK transport core.
//!
//! Wraps [`rxgk_crypto`]'s pure codec with the key lifecycle of a secured
//! connection: key generations with byte and time budgets, rekeying without
//! interrupting in-flight traffic, and binding each incoming packet to the
//! generation named by its header.
//!
//! # Components
//!
//! - [`TransportKeyContext`]: one generation of derived keys and its budget
//! - [`ContextManager`]: current generation, retained predecessors, rekey
//! - [`RekeyPolicy`]: byte and time limits, retention and receive grace
//! - [`Environment`] / [`SystemEnv`]: clock and randomness

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod context;
pub mod env;
pub mod error;
pub mod manager;
pub mod policy;
mod system_env;

pub use context::{
    KeyState, RXGK_CLIENT_ENC_PACKET, RXGK_CLIENT_ENC_RESPONSE, RXGK_CLIENT_MIC_PACKET,
    RXGK_SERVER_ENC_PACKET, RXGK_SERVER_ENC_TOKEN, RXGK_SERVER_MIC_PACKET, Role,
    TransportKeyContext, generate_transport_key,
};
pub use env::{Environment, Timestamp};
pub use error::TransportError;
pub use manager::{ContextManager, Sealed};
pub use policy::RekeyPolicy;
pub use system_env::SystemEnv;
