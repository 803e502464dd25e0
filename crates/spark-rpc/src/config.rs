//! 声明式注册信息。
//!
//! # 教案式说明
//! - **意图 (Why)**：服务、客户端与网关映射都可以纯粹由配置驱动注册；
//!   这里定义的结构体既可以由代码构造，也可以由宿主从 TOML 反序列化；
//! - **契约 (What)**：`validate` 在注册前执行，名称、地址与类型名为空时返回
//!   [`RpcError::InvalidConfig`]，错误在启动期暴露而不是在调用期。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RpcError, RpcResult};

/// 一个可远程调用的方法。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// 客户端侧为完整名称 `/service/method`，服务端侧为方法名。
    pub name: String,
    pub request_type: String,
    pub response_type: String,
}

impl InterfaceInfo {
    pub fn new(
        name: impl Into<String>,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            request_type: request_type.into(),
            response_type: response_type.into(),
        }
    }

    pub fn validate(&self, owner: &str) -> RpcResult<()> {
        if self.name.is_empty() {
            return Err(RpcError::invalid_config(format!("`{owner}` declares a method without name")));
        }
        if self.request_type.is_empty() || self.response_type.is_empty() {
            return Err(RpcError::invalid_config(format!(
                "method `{}` of `{owner}` must declare request and response types",
                self.name
            )));
        }
        Ok(())
    }
}

/// 一个对外暴露的服务。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// 服务名，例如 `/login.LoginService`。
    pub name: String,
    /// 处理器接口的类型标识。
    pub handler_contract: String,
    /// 处理器类的类型标识。
    pub handler_class: String,
    /// 描述文件名，仅作记录。
    #[serde(default)]
    pub proto_name: String,
    #[serde(default)]
    pub methods: Vec<InterfaceInfo>,
}

impl ServerInfo {
    pub fn validate(&self) -> RpcResult<()> {
        if self.name.trim_matches('/').is_empty() {
            return Err(RpcError::invalid_config("service name must not be empty"));
        }
        if self.handler_contract.is_empty() || self.handler_class.is_empty() {
            return Err(RpcError::invalid_config(format!(
                "service `{}` must declare handler contract and class",
                self.name
            )));
        }
        self.methods
            .iter()
            .try_for_each(|method| method.validate(&self.name))
    }
}

/// 一个需要调用的远端服务。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub addr: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<InterfaceInfo>,
}

impl ClientInfo {
    pub fn validate(&self) -> RpcResult<()> {
        if self.name.is_empty() {
            return Err(RpcError::invalid_config("client name must not be empty"));
        }
        if self.addr.is_empty() || self.addr.iter().any(|addr| addr.trim().is_empty()) {
            return Err(RpcError::invalid_config(format!(
                "client `{}` must declare non-empty addresses",
                self.name
            )));
        }
        self.interfaces
            .iter()
            .try_for_each(|interface| interface.validate(&self.name))
    }
}

/// 网关映射：外部方法名 → 内部 RPC 方法名。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMapping {
    pub name: String,
    pub method: String,
}

/// 持久化存储连接参数（由协作方的连接池使用）。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub name: String,
    /// 驱动种类，例如 `mysql`、`redis`。
    pub kind: String,
    pub addr: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub max_idle: u32,
}

fn default_pool_size() -> u32 {
    10
}

/// 客户端管线参数。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// 每秒令牌数。
    pub qps: u32,
    /// 令牌桶容量。
    pub burst: u32,
    pub max_attempts: usize,
    pub max_time_ms: u64,
    /// 端点熔断器打开状态的持续时间。
    pub breaker_open_for_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            qps: 1000,
            burst: 1000,
            max_attempts: 3,
            max_time_ms: 3_000,
            breaker_open_for_ms: 30_000,
            connect_timeout_ms: 3_000,
        }
    }
}

impl ClientSettings {
    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }

    pub fn breaker_open_for(&self) -> Duration {
        Duration::from_millis(self.breaker_open_for_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
