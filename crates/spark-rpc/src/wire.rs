//! # wire 模块说明
//!
//! ## 角色定位（Why）
//! - 定义跨进程调用的信封：`/service/method` 形式的方法名、字符串元数据与不透明载荷；
//! - 以 [`Connector`]/[`WireChannel`] 两个契约隔离具体传输实现，核心管线只面向契约编程，
//!   TCP 传输与进程内回环（[`loopback`]）都是可替换的实现。
//!
//! ## 契约（What）
//! - 失败结果以 [`WireStatus::Failure`] 携带错误码与文案，调用方得以区分“成功的空响应”与“失败调用”；
//! - `WireChannel::call` 必须遵守上下文截止时间，超时返回 `DeadlineExceeded`。

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    context::CallContext,
    error::{RpcError, RpcResult},
};

/// 线上元数据。
pub type Metadata = BTreeMap<String, String>;

/// 承载调用方剩余超时（毫秒）的元数据键。
pub const TIMEOUT_KEY: &str = "timeout_ms";

/// 请求信封。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRequest {
    /// 连接内的关联编号，响应原样带回。
    pub id: u64,
    pub method: String,
    pub metadata: Metadata,
    pub payload: Bytes,
}

/// 响应状态。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WireStatus {
    Success,
    Failure { code: String, message: String },
}

/// 响应信封。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireResponse {
    pub id: u64,
    pub status: WireStatus,
    pub payload: Bytes,
}

impl WireResponse {
    pub fn success(id: u64, payload: Bytes) -> Self {
        Self {
            id,
            status: WireStatus::Success,
            payload,
        }
    }

    pub fn failure(id: u64, error: &RpcError) -> Self {
        Self {
            id,
            status: WireStatus::Failure {
                code: error.code().to_owned(),
                message: error.to_string(),
            },
            payload: Bytes::new(),
        }
    }

    /// 把协议级失败还原为 [`RpcError::Remote`]，成功时返回载荷。
    pub fn into_result(self) -> RpcResult<Bytes> {
        match self.status {
            WireStatus::Success => Ok(self.payload),
            WireStatus::Failure { code, message } => Err(RpcError::Remote { code, message }),
        }
    }
}

/// 拆分 `/service/method`，返回 `(service, method)`。
pub fn split_method_name(full: &str) -> RpcResult<(&str, &str)> {
    let invalid = || RpcError::InvalidMethodName {
        method: full.to_owned(),
    };
    let rest = full.strip_prefix('/').ok_or_else(invalid)?;
    let (service, method) = rest.rsplit_once('/').ok_or_else(invalid)?;
    if service.is_empty() || method.is_empty() {
        return Err(invalid());
    }
    Ok((service, method))
}

/// 一条到后端的逻辑连接。
#[async_trait]
pub trait WireChannel: Send + Sync + 'static {
    /// 对端地址，用于日志。
    fn peer(&self) -> &str;

    async fn call(&self, ctx: &CallContext, request: WireRequest) -> RpcResult<WireResponse>;
}

/// 按地址建立连接。
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, addr: &str) -> RpcResult<Arc<dyn WireChannel>>;
}

impl fmt::Debug for dyn WireChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireChannel").field("peer", &self.peer()).finish()
    }
}

pub mod loopback {
    //! 进程内回环传输：把地址映射到同进程的 [`RpcServer`]，不经过套接字。
    //!
    //! 适用于同进程组合与测试；未登记的地址在连接时返回 `rpc.transport.loopback.unreachable`。

    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    };

    use async_trait::async_trait;

    use super::{Connector, WireChannel, WireRequest, WireResponse};
    use crate::{
        context::CallContext,
        error::{RpcError, RpcResult},
        server::RpcServer,
    };

    /// 地址到服务端实例的映射。
    #[derive(Clone, Default)]
    pub struct LoopbackConnector {
        servers: HashMap<String, Arc<RpcServer>>,
    }

    impl LoopbackConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_server(mut self, addr: impl Into<String>, server: Arc<RpcServer>) -> Self {
            self.servers.insert(addr.into(), server);
            self
        }
    }

    #[async_trait]
    impl Connector for LoopbackConnector {
        async fn connect(&self, addr: &str) -> RpcResult<Arc<dyn WireChannel>> {
            let server = self.servers.get(addr).cloned().ok_or_else(|| RpcError::Transport {
                code: "rpc.transport.loopback.unreachable",
                detail: format!("no server is bound to `{addr}`"),
            })?;
            Ok(Arc::new(LoopbackChannel {
                peer: addr.to_owned(),
                server,
                next_id: AtomicU64::new(1),
            }))
        }
    }

    struct LoopbackChannel {
        peer: String,
        server: Arc<RpcServer>,
        next_id: AtomicU64,
    }

    #[async_trait]
    impl WireChannel for LoopbackChannel {
        fn peer(&self) -> &str {
            &self.peer
        }

        async fn call(&self, ctx: &CallContext, mut request: WireRequest) -> RpcResult<WireResponse> {
            request.id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let dispatch = self.server.dispatch(None, request);
            match ctx.deadline() {
                Some(deadline) => tokio::time::timeout_at(deadline, dispatch)
                    .await
                    .map_err(|_| RpcError::DeadlineExceeded),
                None => Ok(dispatch.await),
            }
        }
    }
}
