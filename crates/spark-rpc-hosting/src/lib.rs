#![doc = "spark-rpc-hosting: 读取 TOML 配置，装配 RPC 服务端、客户端与 HTTP 网关并并发运行。"]

mod config;
pub mod echo;
mod error;
mod host;
pub mod telemetry;

pub use config::AppConfig;
pub use error::HostError;
pub use host::{Host, register_stores};
