#![doc = r#"
# spark-rpc-transport-tcp

## 设计动机（Why）
- **定位**：为 `spark-rpc` 的 [`Connector`](spark_rpc::wire::Connector)/
  [`WireChannel`](spark_rpc::wire::WireChannel) 契约提供基于 Tokio 的 TCP 实现，
  并提供把入站帧交给 [`RpcServer`](spark_rpc::RpcServer) 的监听器；
- **架构角色**：核心管线只面向契约编程，本 crate 负责建连、分帧与连接生命周期。

## 核心契约（What）
- 帧格式见 [`codec`]：长度前缀帧内依次放置头部长度、JSON 头部与原样载荷；
- 客户端调用遵守 [`CallContext`](spark_rpc::CallContext) 的截止时间，超时返回
  `DeadlineExceeded`；
- 所有 IO 失败映射为带稳定错误码的 `RpcError::Transport`，错误码形如
  `rpc.transport.tcp.connect_failed`。

## 风险与考量（Trade-offs）
- 单连接上的调用被互斥锁串行化；需要更高并发时为同一后端配置多个地址。
"#]

pub mod codec;
mod channel;
mod error;
mod listener;

pub use channel::{TcpConnector, TcpWireChannel};
pub use error::FrameError;
pub use listener::TcpServer;
