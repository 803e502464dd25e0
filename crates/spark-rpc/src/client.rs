//! # client 模块说明
//!
//! ## 角色定位（Why）
//! - 为每个声明的远程方法构建一个可调用操作，在部分后端失败时仍能完成调用；
//! - 组合在注册期一次完成，调用期只做一次哈希查找。
//!
//! ## 构建算法（How）
//! 1. 逐个连接配置的地址；失败的地址记录告警并跳过，全部失败时返回 `NoAvailableBackend`；
//! 2. 对每个连接与每个方法构造原始线上操作，由内到外依次套上：
//!    - 每端点每方法独立的熔断器（以方法名命名）；
//!    - 按方法共享的令牌桶限流器；
//! 3. 同一方法的全部端点操作汇入轮询选择器；
//! 4. 选择器外层套上有界重试；最外层是出站审计。
//!
//! ## 并发（What）
//! - 注册发生在初始化阶段（`&mut self`），之后以 `Arc<RpcClient>` 共享，调用期无锁；
//! - 限流器每接口共享，熔断器每端点每方法独立，轮询游标原子推进。

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    audit::{AuditLayer, Direction},
    config::{ClientInfo, ClientSettings, InterfaceInfo},
    context::CallContext,
    error::{RpcError, RpcResult},
    flow,
    message::{BoxMessage, Message, SharedMessage, downcast_box},
    operation::Operation,
    registry::{TypeDescriptor, TypeKind, TypeRegistry},
    resilience::{BreakerLayer, BreakerSettings, LimiterLayer, RateLimiter, RetryPolicy, RoundRobin},
    wire::{Connector, Metadata, TIMEOUT_KEY, WireChannel, WireRequest, split_method_name},
};

struct InterfaceEntry {
    info: InterfaceInfo,
    operation: Operation,
}

struct Staged {
    info: InterfaceInfo,
    response: Arc<TypeDescriptor>,
}

/// RPC 客户端：按方法名组织的调用管线。
pub struct RpcClient {
    registry: Arc<TypeRegistry>,
    connector: Arc<dyn Connector>,
    settings: ClientSettings,
    clients: HashSet<String>,
    interfaces: HashMap<String, InterfaceEntry>,
}

impl RpcClient {
    pub fn new(registry: Arc<TypeRegistry>, connector: Arc<dyn Connector>, settings: ClientSettings) -> Self {
        Self {
            registry,
            connector,
            settings,
            clients: HashSet::new(),
            interfaces: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// 注册一个远端服务。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 客户端名重复返回 `AlreadyRegistered`；方法名重复（本次声明内或与已注册方法冲突）返回
    ///     `MethodAlreadyRegistered`；方法名不满足 `/service/method` 返回 `InvalidMethodName`；
    ///   - 类型名无法解析返回 `UnknownRequestType`/`UnknownResponseType`；
    ///   - 至少一个地址可达即成功，不可达地址记录 `warn!`；全部不可达返回 `NoAvailableBackend`；
    ///   - 任一失败都不会改变已注册状态；
    /// - **实现 (How)**：先校验声明，再建立连接，最后一次性提交。
    pub async fn register(&mut self, info: &ClientInfo) -> RpcResult<()> {
        info.validate()?;
        if self.clients.contains(&info.name) {
            return Err(RpcError::AlreadyRegistered {
                kind: "client",
                name: info.name.clone(),
            });
        }

        let mut staged = Vec::with_capacity(info.interfaces.len());
        let mut seen = HashSet::new();
        for interface in &info.interfaces {
            split_method_name(&interface.name)?;
            if !seen.insert(interface.name.as_str()) || self.interfaces.contains_key(&interface.name) {
                return Err(RpcError::MethodAlreadyRegistered {
                    method: interface.name.clone(),
                });
            }
            resolve_message(&self.registry, &interface.request_type).ok_or_else(|| {
                RpcError::UnknownRequestType {
                    type_name: interface.request_type.clone(),
                }
            })?;
            let response = resolve_message(&self.registry, &interface.response_type).ok_or_else(|| {
                RpcError::UnknownResponseType {
                    type_name: interface.response_type.clone(),
                }
            })?;
            staged.push(Staged {
                info: interface.clone(),
                response,
            });
        }

        let channels = self.connect_all(info).await?;

        let mut built = Vec::with_capacity(staged.len());
        for Staged { info: interface, response } in staged {
            let limiter = Arc::new(RateLimiter::new(
                &interface.name,
                self.settings.qps,
                self.settings.burst,
            )?);
            let limiter_layer = LimiterLayer::new(limiter);
            let endpoints = channels
                .iter()
                .map(|channel| {
                    wire_operation(channel.clone(), &interface.name, response.clone())
                        .layer(&BreakerLayer::new(
                            BreakerSettings::named(interface.name.clone())
                                .with_open_for(self.settings.breaker_open_for()),
                        ))
                        .layer(&limiter_layer)
                })
                .collect();
            let operation = RoundRobin::new(&interface.name, endpoints)
                .into_operation()
                .layer(&RetryPolicy {
                    max_attempts: self.settings.max_attempts,
                    max_time: self.settings.max_time(),
                })
                .layer(&AuditLayer::new(Direction::Outbound, &interface.name));
            built.push(InterfaceEntry {
                info: interface,
                operation,
            });
        }

        let count = built.len();
        for entry in built {
            self.interfaces.insert(entry.info.name.clone(), entry);
        }
        self.clients.insert(info.name.clone());
        info!(
            client = %info.name,
            endpoints = channels.len(),
            methods = count,
            "client registered"
        );
        Ok(())
    }

    async fn connect_all(&self, info: &ClientInfo) -> RpcResult<Vec<Arc<dyn WireChannel>>> {
        let timeout = self.settings.connect_timeout();
        let mut channels = Vec::with_capacity(info.addr.len());
        for addr in &info.addr {
            match tokio::time::timeout(timeout, self.connector.connect(addr)).await {
                Ok(Ok(channel)) => channels.push(channel),
                Ok(Err(err)) => {
                    warn!(client = %info.name, address = %addr, reason = %err, "connect error");
                }
                Err(_) => {
                    warn!(client = %info.name, address = %addr, reason = "connect timed out", "connect error");
                }
            }
        }
        if channels.is_empty() {
            return Err(RpcError::NoAvailableBackend {
                client: info.name.clone(),
            });
        }
        Ok(channels)
    }

    /// 已注册的方法名（排序后）。
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.interfaces.keys().cloned().collect();
        names.sort();
        names
    }

    /// 方法的声明信息。
    pub fn interface_info(&self, method: &str) -> Option<&InterfaceInfo> {
        self.interfaces.get(method).map(|entry| &entry.info)
    }

    /// 调用远程方法。
    ///
    /// 上下文没有流程标识时补发一个；流程标识由线上操作写入出站元数据。
    pub async fn invoke(&self, ctx: CallContext, method: &str, request: SharedMessage) -> RpcResult<BoxMessage> {
        let entry = self.interfaces.get(method).ok_or_else(|| RpcError::MethodNotFound {
            method: method.to_owned(),
        })?;
        entry.operation.call(flow::ensure_flow(ctx), request).await
    }

    /// 带超时调用；无论成功与否，截止时间都随调用结束而释放。
    pub async fn invoke_with_timeout(
        &self,
        ctx: CallContext,
        method: &str,
        request: SharedMessage,
        timeout: Duration,
    ) -> RpcResult<BoxMessage> {
        let ctx = ctx.with_timeout(timeout);
        match ctx.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, self.invoke(ctx, method, request))
                .await
                .unwrap_or(Err(RpcError::DeadlineExceeded)),
            None => self.invoke(ctx, method, request).await,
        }
    }

    /// 以具体类型调用。
    pub async fn call<Req: Message, Resp: Message>(
        &self,
        ctx: CallContext,
        method: &str,
        request: Req,
    ) -> RpcResult<Resp> {
        let response = self.invoke(ctx, method, Arc::new(request)).await?;
        downcast_box(response)
    }

    /// 以具体类型带超时调用。
    pub async fn call_with_timeout<Req: Message, Resp: Message>(
        &self,
        ctx: CallContext,
        method: &str,
        request: Req,
        timeout: Duration,
    ) -> RpcResult<Resp> {
        let response = self
            .invoke_with_timeout(ctx, method, Arc::new(request), timeout)
            .await?;
        downcast_box(response)
    }
}

fn resolve_message(registry: &TypeRegistry, name: &str) -> Option<Arc<TypeDescriptor>> {
    registry
        .resolve(name)
        .ok()
        .filter(|descriptor| descriptor.kind() == TypeKind::Message)
}

/// 通过一条连接执行线上调用的原始操作。
fn wire_operation(channel: Arc<dyn WireChannel>, method: &str, response: Arc<TypeDescriptor>) -> Operation {
    let method: Arc<str> = Arc::from(method);
    Operation::new(move |ctx: CallContext, request: SharedMessage| {
        let channel = channel.clone();
        let method = method.clone();
        let response = response.clone();
        async move {
            let payload = request.encode()?;
            let mut metadata = Metadata::new();
            flow::inject(&ctx, &mut metadata);
            if let Some(remaining) = ctx.remaining() {
                metadata.insert(TIMEOUT_KEY.to_owned(), remaining.as_millis().to_string());
            }
            let reply = channel
                .call(
                    &ctx,
                    WireRequest {
                        id: 0,
                        method: method.to_string(),
                        metadata,
                        payload,
                    },
                )
                .await?;
            let payload = reply.into_result()?;
            let mut message = response.new_message()?;
            message.decode_in_place(&payload)?;
            Ok::<BoxMessage, RpcError>(message)
        }
    })
}
