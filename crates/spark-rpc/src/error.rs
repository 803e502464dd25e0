//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为注册期与调用期的全部失败路径提供集中定义，服务端、客户端管线与网关共享同一套错误语义；
//! - 每个变体都映射到稳定的点分错误码（[`RpcError::code`]），跨进程传输时以
//!   [`WireStatus::Failure`](crate::wire::WireStatus) 的形式携带，远端据此重建 [`RpcError::Remote`]。
//!
//! ## 分类（What）
//! - **注册期**：`AlreadyRegistered`、`MethodAlreadyRegistered`、`UnknownRequestType`、
//!   `UnknownResponseType`、`NoAvailableBackend`、`InvalidMethodName`、`InvalidConfig`、
//!   `ContractViolation`，只终止当前这一次注册，不影响已注册的状态；
//! - **调用期**：`MethodNotFound`、`UnknownMethod`、`RateLimited`、`BreakerOpen`、
//!   `DeadlineExceeded`、`Decode`/`Encode`、`Transport`、`Remote`、`Handler`，
//!   一律返回给直接调用方并伴随一条审计日志。

use thiserror::Error;

/// 框架统一的结果别名。
pub type RpcResult<T> = Result<T, RpcError>;

/// RPC 中间件错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“配置不一致”“查找未命中”“瞬时故障”“远端失败”区分开，
///   让上层能够判断是否值得重试、是否应该阻止服务启动；
/// - **契约 (What)**：
///   - 所有变体 `Clone + Send + Sync + 'static`，可以被重试层缓存为“最后一次错误”；
///   - [`RpcError::code`] 返回稳定错误码，与 `Display` 文案解耦，便于告警聚合；
/// - **设计权衡 (Trade-offs)**：上下文字段使用 `String`，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RpcError {
    /// 同名对象已经注册（服务、客户端、类型、网关映射或连接池）。
    #[error("{kind} `{name}` is registered already")]
    AlreadyRegistered { kind: &'static str, name: String },

    /// 按标识查找对象未命中。
    #[error("can not find {kind} `{name}`")]
    NotFound { kind: &'static str, name: String },

    /// 处理器上不存在该方法，或调用了从未注册的远程方法。
    #[error("no matching method `{method}` was found")]
    MethodNotFound { method: String },

    /// 同一方法名在客户端中重复注册。
    #[error("method `{method}` exists already")]
    MethodAlreadyRegistered { method: String },

    /// 网关收到的外部方法名没有映射。
    #[error("can not find method `{method}`")]
    UnknownMethod { method: String },

    /// 声明的请求类型无法通过类型注册表解析。
    #[error("invalid request type `{type_name}`")]
    UnknownRequestType { type_name: String },

    /// 声明的响应类型无法通过类型注册表解析。
    #[error("invalid response type `{type_name}`")]
    UnknownResponseType { type_name: String },

    /// 客户端注册时所有地址均不可达。
    #[error("all of the addresses of client `{client}` are unavailable")]
    NoAvailableBackend { client: String },

    /// 超出接口的限流配额。
    #[error("rate limit exceeded for `{method}`")]
    RateLimited { method: String },

    /// 熔断器处于打开状态，或半开状态下试探名额已满。
    #[error("circuit breaker `{name}` is open")]
    BreakerOpen { name: String },

    /// 调用方截止时间已到。
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// 方法名不满足 `/service/method` 形态。
    #[error("invalid method name `{method}`")]
    InvalidMethodName { method: String },

    /// 配置条目缺失必填字段或取值非法。
    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    /// 处理器没有实现契约要求的方法。
    #[error("handler `{handler}` does not implement `{method}` required by `{contract}`")]
    ContractViolation {
        contract: String,
        handler: String,
        method: String,
    },

    /// 载荷反序列化失败，处理器不会被调用。
    #[error("decode `{context}` failed: {detail}")]
    Decode { context: String, detail: String },

    /// 载荷序列化失败。
    #[error("encode `{context}` failed: {detail}")]
    Encode { context: String, detail: String },

    /// 底层传输失败（连接、读写、分帧）。
    #[error("transport failure `{code}`: {detail}")]
    Transport { code: &'static str, detail: String },

    /// 远端返回的协议级失败。
    #[error("{message}")]
    Remote { code: String, message: String },

    /// 业务处理器返回的失败。
    #[error("{message}")]
    Handler { message: String },
}

impl RpcError {
    /// 业务处理器构造失败结果的便捷入口。
    pub fn handler(message: impl Into<String>) -> Self {
        RpcError::Handler {
            message: message.into(),
        }
    }

    /// 构造配置错误。
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        RpcError::InvalidConfig {
            detail: detail.into(),
        }
    }

    /// 返回稳定错误码。
    ///
    /// - **契约 (What)**：同一变体始终返回同一错误码；`Remote` 原样透传远端错误码，
    ///   保证多跳调用时错误码不被改写。
    pub fn code(&self) -> &str {
        match self {
            RpcError::AlreadyRegistered { .. } => "rpc.registry.exists",
            RpcError::NotFound { .. } => "rpc.registry.missing",
            RpcError::MethodNotFound { .. } => "rpc.method.missing",
            RpcError::MethodAlreadyRegistered { .. } => "rpc.method.exists",
            RpcError::UnknownMethod { .. } => "rpc.gateway.unknown_method",
            RpcError::UnknownRequestType { .. } => "rpc.type.unknown_request",
            RpcError::UnknownResponseType { .. } => "rpc.type.unknown_response",
            RpcError::NoAvailableBackend { .. } => "rpc.client.no_backend",
            RpcError::RateLimited { .. } => "rpc.limiter.rejected",
            RpcError::BreakerOpen { .. } => "rpc.breaker.open",
            RpcError::DeadlineExceeded => "rpc.deadline.exceeded",
            RpcError::InvalidMethodName { .. } => "rpc.method.invalid_name",
            RpcError::InvalidConfig { .. } => "rpc.config.invalid",
            RpcError::ContractViolation { .. } => "rpc.contract.violation",
            RpcError::Decode { .. } => "rpc.codec.decode",
            RpcError::Encode { .. } => "rpc.codec.encode",
            RpcError::Transport { code, .. } => *code,
            RpcError::Remote { code, .. } => code.as_str(),
            RpcError::Handler { .. } => "rpc.handler.failure",
        }
    }

    /// 是否属于瞬时故障（限流、熔断、超时、传输失败）。
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::RateLimited { .. }
                | RpcError::BreakerOpen { .. }
                | RpcError::DeadlineExceeded
                | RpcError::Transport { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_and_remote_code_is_preserved() {
        let err = RpcError::MethodNotFound {
            method: "/svc/echo".to_owned(),
        };
        assert_eq!(err.code(), "rpc.method.missing");
        assert_eq!(err.to_string(), "no matching method `/svc/echo` was found");

        let remote = RpcError::Remote {
            code: "rpc.handler.failure".to_owned(),
            message: "user not found".to_owned(),
        };
        assert_eq!(remote.code(), "rpc.handler.failure");
        assert_eq!(remote.to_string(), "user not found");
    }

    #[test]
    fn transient_classification() {
        assert!(RpcError::DeadlineExceeded.is_transient());
        assert!(
            RpcError::BreakerOpen {
                name: "login".to_owned()
            }
            .is_transient()
        );
        assert!(!RpcError::handler("boom").is_transient());
    }
}
