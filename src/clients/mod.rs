//! 门户连接层
//!
//! 两种连接方式实现同一个 `PortalConnector` trait：
//! - `DirectConnector` 直接访问门户
//! - `ProxyConnector` 通过中继服务访问

pub mod connector;
pub mod direct_client;
pub mod relay_client;

pub use connector::{PortalConnector, ProbeReport, RemoteChallenge};
pub use direct_client::DirectConnector;
pub use relay_client::{ProxyConnector, RelayHealth};
