//! # spark-rpc
//!
//! ## 定位与职责（Why）
//! - RPC 中间件核心：让业务方只编写处理器函数与声明式注册信息，
//!   连接管理、弹性策略、流程关联与载荷转换由框架负责；
//! - 三个紧密耦合的子系统构成主体：动态分发注册表（类型注册表 + 方法绑定 + 服务端分发表）、
//!   客户端调用管线（限流 → 熔断 → 轮询 → 有界重试）、以及供网关复用的宽松类型转换。
//!
//! ## 架构嵌入（Where）
//! - 具体传输由 `spark-rpc-transport-tcp` 实现 [`wire::Connector`]/[`wire::WireChannel`] 契约；
//! - HTTP 网关 `spark-rpc-gateway` 复用 [`client::RpcClient`] 与 [`registry::TypeRegistry`]；
//! - 进程装配由 `spark-rpc-hosting` 完成。
//!
//! ## 生命周期（Trade-offs）
//! - 全部注册表在初始化阶段以 `&mut` 构建，随后以 `Arc` 共享只读；
//!   换取调用热路径无锁，代价是不支持运行期动态重注册。

/// 调用期审计日志。
pub mod audit;

/// 客户端调用管线。
pub mod client;

/// 宽松 JSON 反序列化，用于网关的两步类型转换。
pub mod codec;

/// 声明式注册信息与管线参数。
pub mod config;

/// 调用上下文。
pub mod context;

/// 错误域与稳定错误码。
pub mod error;

/// 流程标识的生成与传播。
pub mod flow;

/// 处理器契约与方法绑定。
pub mod handler;

/// 类型擦除后的消息。
pub mod message;

/// 统一调用约定与中间件契约。
pub mod operation;

/// 类型注册表。
pub mod registry;

/// 弹性阶段：熔断、限流、轮询、重试。
pub mod resilience;

/// 服务端分发表。
pub mod server;

/// 持久化存储连接池的协作契约。
pub mod store;

/// 线上信封与传输契约。
pub mod wire;

pub use client::RpcClient;
pub use config::{ClientInfo, ClientSettings, HttpMapping, InterfaceInfo, ServerInfo, StoreInfo};
pub use context::CallContext;
pub use error::{RpcError, RpcResult};
pub use flow::FlowId;
pub use handler::{Handler, HandlerObject, MethodTable, ServiceContract};
pub use message::{BoxMessage, DynMessage, Message, SharedMessage};
pub use operation::{Layer, Operation};
pub use registry::{TypeDescriptor, TypeKind, TypeRegistry};
pub use server::RpcServer;
