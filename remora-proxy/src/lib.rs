//! Remora Proxy - Naming Service Entity Proxies
//!
//! Client-side proxies for remote naming service entities. Reads go through
//! the config cache, updates are applied locally before they are persisted,
//! and watched proxies receive server-pushed changes.
//!
//! The RPC transport is user-supplied through [`MessagingProxy`] and
//! [`ServiceHandle`]; [`NamingClient`] ties it to the cache and the push
//! path.

pub mod client;
pub mod observer;
pub mod proxy;
pub mod rpc;
pub mod subscription;

pub use client::{NamingClient, NamingClientBuilder};
pub use observer::{Observer, ObserverId, ObserverList};
pub use proxy::EntityProxy;
pub use rpc::{MessagingProxy, NamingMethod, NamingRpc, ServiceHandle, TimeoutHandle};
pub use subscription::{UpdateSubscriptions, WatchRegistry};
