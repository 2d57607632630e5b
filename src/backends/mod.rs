//! [`BackendApi`](crate::api::BackendApi) implementations.
//!
//! | Feature        | Backend         |
//! |----------------|-----------------|
//! | `backend-http` | [`HttpBackend`] |

#[cfg(feature = "backend-http")]
pub mod http;

#[cfg(feature = "backend-http")]
pub use http::{BackendConfig, HttpBackend};
