//! # server 模块说明
//!
//! ## 角色定位（Why）
//! - 服务端分发表把 `/service/method` 映射到三元组：解码（线上载荷 → 请求实例）、
//!   绑定好的操作、编码（响应 → 线上载荷）；
//! - 传输层对每个入站请求调用 [`RpcServer::dispatch`]，不关心处理器的具体类型。
//!
//! ## 分发流程（How）
//! 1. 从入站元数据恢复流程标识与剩余超时；
//! 2. 按声明的请求类型构造空实例并解码；解码失败直接返回，处理器不会被调用；
//! 3. 调用绑定的操作（熔断 + 审计），错误编码为协议级失败而不是零值响应；
//! 4. 编码响应。
//!
//! ## 生命周期
//! - 注册只发生在初始化阶段（`&mut self`），之后以 `Arc<RpcServer>` 共享，分发不加锁。

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    audit::{self, AuditLayer, AuditRecord, Direction},
    config::{InterfaceInfo, ServerInfo},
    context::CallContext,
    error::{RpcError, RpcResult},
    flow,
    handler::{self, Handler, ServiceContract},
    message::{BoxMessage, DynMessage, SharedMessage},
    operation::Operation,
    registry::{TypeDescriptor, TypeKind, TypeRegistry},
    wire::{TIMEOUT_KEY, WireRequest, WireResponse},
};

/// 分发表中的一条记录。
struct DispatchEntry {
    request: Arc<TypeDescriptor>,
    operation: Operation,
}

impl DispatchEntry {
    fn decode(&self, payload: &[u8]) -> RpcResult<BoxMessage> {
        let mut message = self.request.new_message()?;
        message.decode_in_place(payload)?;
        Ok(message)
    }

    fn encode(response: &BoxMessage) -> RpcResult<Bytes> {
        response.encode()
    }
}

/// RPC 服务端：已注册服务与分发表。
pub struct RpcServer {
    registry: Arc<TypeRegistry>,
    services: HashMap<String, ServerInfo>,
    table: HashMap<String, DispatchEntry>,
}

impl RpcServer {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            services: HashMap::new(),
            table: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// 以具体类型注册服务；处理器与接口必须已登记在类型注册表中。
    pub fn register_service<C, H>(&mut self, name: &str, methods: Vec<InterfaceInfo>) -> RpcResult<()>
    where
        C: ServiceContract,
        H: Handler,
    {
        self.register_by_config(&ServerInfo {
            name: name.to_owned(),
            handler_contract: C::NAME.to_owned(),
            handler_class: H::NAME.to_owned(),
            proto_name: String::new(),
            methods,
        })
    }

    /// 以字符串标识注册服务。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - 服务名重复返回 `AlreadyRegistered`，已注册状态不受影响；
    ///   - 处理器缺少接口要求的方法返回 `ContractViolation`；
    ///   - 声明的方法不在接口中，或处理器上找不到匹配签名的方法，返回 `MethodNotFound`；
    ///   - 请求/响应类型名无法解析返回 `UnknownRequestType`/`UnknownResponseType`；
    /// - **实现 (How)**：先完整构建全部分发记录，全部成功后一次性提交。
    pub fn register_by_config(&mut self, info: &ServerInfo) -> RpcResult<()> {
        info.validate()?;
        let service = normalize_service_name(&info.name);
        if self.services.contains_key(&service) {
            return Err(RpcError::AlreadyRegistered {
                kind: "service",
                name: service,
            });
        }

        let contract = self.registry.resolve(&info.handler_contract)?;
        let required = contract.contract_methods()?;
        let handler = self.registry.instantiate_handler(&info.handler_class)?;
        if let Some(missing) = required.iter().find(|method| !handler.has_method(method)) {
            return Err(RpcError::ContractViolation {
                contract: info.handler_contract.clone(),
                handler: info.handler_class.clone(),
                method: (*missing).to_owned(),
            });
        }

        let mut staged: Vec<(String, DispatchEntry)> = Vec::with_capacity(info.methods.len());
        let mut seen = HashSet::new();
        for method in &info.methods {
            let full_name = format!("{service}/{}", method.name);
            if !required.iter().any(|name| handler::same_name(name, &method.name)) {
                return Err(RpcError::MethodNotFound { method: full_name });
            }
            if !seen.insert(full_name.clone()) || self.table.contains_key(&full_name) {
                return Err(RpcError::MethodAlreadyRegistered { method: full_name });
            }
            let request = resolve_message(&self.registry, &method.request_type).ok_or_else(|| {
                RpcError::UnknownRequestType {
                    type_name: method.request_type.clone(),
                }
            })?;
            let response = resolve_message(&self.registry, &method.response_type).ok_or_else(|| {
                RpcError::UnknownResponseType {
                    type_name: method.response_type.clone(),
                }
            })?;
            let operation = handler::bind_method(handler.as_ref(), &method.name, &request, &response)?
                .layer(&AuditLayer::new(Direction::Inbound, &full_name));
            staged.push((full_name, DispatchEntry { request, operation }));
        }

        let count = staged.len();
        self.table.extend(staged);
        self.services.insert(service.clone(), info.clone());
        info!(service = %service, handler = %handler.handler_name(), methods = count, "service registered");
        Ok(())
    }

    /// 已安装的方法名（排序后）。
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.table.keys().cloned().collect();
        names.sort();
        names
    }

    /// 已注册的服务名（排序后）。
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }

    /// 处理一个入站请求。
    pub async fn dispatch(&self, peer: Option<SocketAddr>, request: WireRequest) -> WireResponse {
        let WireRequest {
            id,
            method,
            metadata,
            payload,
        } = request;
        let mut ctx = flow::restore(CallContext::new().with_peer(peer), &metadata);
        if let Some(timeout) = metadata
            .get(TIMEOUT_KEY)
            .and_then(|value| value.parse::<u64>().ok())
        {
            ctx = ctx.with_timeout(Duration::from_millis(timeout));
        }

        let Some(entry) = self.table.get(&method) else {
            warn!(method = %method, peer = ?peer, "no matching method");
            let err = RpcError::MethodNotFound {
                method: method.clone(),
            };
            audit_rejected(&method, &ctx, String::from_utf8_lossy(&payload).into_owned(), &err, Duration::ZERO);
            return WireResponse::failure(id, &err);
        };

        let decoded = match entry.decode(&payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                audit_rejected(&method, &ctx, String::from_utf8_lossy(&payload).into_owned(), &err, Duration::ZERO);
                return WireResponse::failure(id, &err);
            }
        };
        let request: SharedMessage = Arc::from(decoded);

        let invocation = entry.operation.call(ctx.clone(), request.clone());
        let outcome = match ctx.deadline() {
            Some(deadline) => {
                let started = Instant::now();
                match tokio::time::timeout_at(deadline, invocation).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        // 超时丢弃了带审计层的调用，这里补记一条入站记录。
                        let err = RpcError::DeadlineExceeded;
                        audit_rejected(&method, &ctx, request.to_log_string(), &err, started.elapsed());
                        Err(err)
                    }
                }
            }
            None => invocation.await,
        };
        match outcome.and_then(|response| DispatchEntry::encode(&response)) {
            Ok(payload) => WireResponse::success(id, payload),
            Err(err) => WireResponse::failure(id, &err),
        }
    }
}

/// 未经过审计层就结束的入站调用也要留下记录。
fn audit_rejected(method: &str, ctx: &CallContext, request: String, err: &RpcError, took: Duration) {
    audit::emit(
        Direction::Inbound,
        &AuditRecord {
            ts: audit::timestamp(),
            method,
            ctx,
            request,
            response: String::new(),
            error: Some(err),
            took,
        },
    );
}

fn normalize_service_name(name: &str) -> String {
    format!("/{}", name.trim_matches('/'))
}

fn resolve_message(registry: &TypeRegistry, name: &str) -> Option<Arc<TypeDescriptor>> {
    registry
        .resolve(name)
        .ok()
        .filter(|descriptor| descriptor.kind() == TypeKind::Message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flow::{FLOW_ID_KEY, FlowId},
        handler::MethodTable,
        message::Message,
        wire::{Metadata, WireStatus},
    };
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    static GREETINGS: AtomicU32 = AtomicU32::new(0);

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct HelloRequest {
        name: String,
    }

    impl Message for HelloRequest {
        const NAME: &'static str = "greet.HelloRequest";
    }

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct HelloReply {
        text: String,
        flow: String,
    }

    impl Message for HelloReply {
        const NAME: &'static str = "greet.HelloReply";
    }

    struct GreeterContract;

    impl ServiceContract for GreeterContract {
        const NAME: &'static str = "greet.GreeterServer";
        const METHODS: &'static [&'static str] = &["SayHello"];
    }

    #[derive(Default)]
    struct Greeter;

    impl Greeter {
        async fn say_hello(self: Arc<Self>, ctx: CallContext, req: HelloRequest) -> RpcResult<HelloReply> {
            if ctx.flow().is_some_and(|flow| flow.as_str() == "decode-check") {
                GREETINGS.fetch_add(1, Ordering::SeqCst);
            }
            if req.name.is_empty() {
                return Err(RpcError::handler("name is required"));
            }
            if req.name == "sleepy" {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(HelloReply {
                text: format!("hello {}", req.name),
                flow: ctx.flow().map(|flow| flow.to_string()).unwrap_or_default(),
            })
        }
    }

    impl Handler for Greeter {
        const NAME: &'static str = "greet.Greeter";

        fn methods() -> MethodTable<Self> {
            MethodTable::new().method("SayHello", Self::say_hello)
        }
    }

    fn registry() -> Arc<TypeRegistry> {
        let mut registry = TypeRegistry::new();
        registry.register_message::<HelloRequest>().expect("request");
        registry.register_message::<HelloReply>().expect("reply");
        registry.register_contract::<GreeterContract>().expect("contract");
        registry.register_handler::<Greeter>().expect("handler");
        Arc::new(registry)
    }

    fn methods() -> Vec<InterfaceInfo> {
        vec![InterfaceInfo::new("sayHello", "greet.HelloRequest", "greet.HelloReply")]
    }

    fn request(method: &str, payload: &str, metadata: Metadata) -> WireRequest {
        WireRequest {
            id: 11,
            method: method.to_owned(),
            metadata,
            payload: Bytes::copy_from_slice(payload.as_bytes()),
        }
    }

    #[test]
    fn duplicate_service_name_is_rejected_without_side_effects() {
        let mut server = RpcServer::new(registry());
        server
            .register_service::<GreeterContract, Greeter>("/greet.Greeter", methods())
            .expect("首次注册");
        let err = server
            .register_service::<GreeterContract, Greeter>("greet.Greeter", methods())
            .expect_err("重复注册");
        assert!(matches!(err, RpcError::AlreadyRegistered { kind: "service", .. }));
        assert_eq!(server.methods(), vec!["/greet.Greeter/sayHello".to_owned()]);
    }

    #[test]
    fn unresolvable_types_fail_registration() {
        let mut server = RpcServer::new(registry());
        let err = server
            .register_service::<GreeterContract, Greeter>(
                "/greet.Greeter",
                vec![InterfaceInfo::new("SayHello", "greet.Missing", "greet.HelloReply")],
            )
            .expect_err("未知请求类型");
        assert_eq!(
            err,
            RpcError::UnknownRequestType {
                type_name: "greet.Missing".to_owned()
            }
        );
        let err = server
            .register_service::<GreeterContract, Greeter>(
                "/greet.Greeter",
                vec![InterfaceInfo::new("SayHello", "greet.HelloRequest", "greet.GreeterServer")],
            )
            .expect_err("响应类型不是消息");
        assert!(matches!(err, RpcError::UnknownResponseType { .. }));
        assert!(server.methods().is_empty(), "失败的注册不得留下任何分发记录");
    }

    #[test]
    fn undeclared_method_is_method_not_found() {
        let mut server = RpcServer::new(registry());
        let err = server
            .register_service::<GreeterContract, Greeter>(
                "/greet.Greeter",
                vec![InterfaceInfo::new("Wave", "greet.HelloRequest", "greet.HelloReply")],
            )
            .expect_err("接口中没有该方法");
        assert!(matches!(err, RpcError::MethodNotFound { .. }));
    }

    #[tokio::test]
    #[traced_test]
    async fn dispatch_restores_flow_and_encodes_response() {
        let mut server = RpcServer::new(registry());
        server
            .register_service::<GreeterContract, Greeter>("/greet.Greeter", methods())
            .expect("注册");

        let mut metadata = Metadata::new();
        metadata.insert(FLOW_ID_KEY.to_owned(), "flow-from-caller".to_owned());
        let response = server
            .dispatch(
                "127.0.0.1:9000".parse().ok(),
                request("/greet.Greeter/sayHello", r#"{"name":"ada"}"#, metadata),
            )
            .await;
        assert_eq!(response.id, 11);
        assert_eq!(response.status, WireStatus::Success);
        let reply: HelloReply = serde_json::from_slice(&response.payload).expect("响应可解码");
        assert_eq!(
            reply,
            HelloReply {
                text: "hello ada".to_owned(),
                flow: FlowId::from("flow-from-caller").to_string(),
            }
        );
        assert!(logs_contain("request in"));
        assert!(logs_contain("flow_id=flow-from-caller"));
        assert!(logs_contain("addr=127.0.0.1:9000"));
    }

    #[tokio::test]
    async fn decode_failure_never_reaches_handler_and_errors_are_distinguishable() {
        let mut server = RpcServer::new(registry());
        server
            .register_service::<GreeterContract, Greeter>("/greet.Greeter", methods())
            .expect("注册");

        let mut metadata = Metadata::new();
        metadata.insert(FLOW_ID_KEY.to_owned(), "decode-check".to_owned());
        let response = server
            .dispatch(None, request("/greet.Greeter/sayHello", "{broken", metadata))
            .await;
        assert!(matches!(
            response.status,
            WireStatus::Failure { ref code, .. } if code == "rpc.codec.decode"
        ));
        assert_eq!(GREETINGS.load(Ordering::SeqCst), 0, "解码失败时处理器不得被调用");

        let response = server
            .dispatch(None, request("/greet.Greeter/sayHello", r#"{"name":""}"#, Metadata::new()))
            .await;
        assert_eq!(
            response.status,
            WireStatus::Failure {
                code: "rpc.handler.failure".to_owned(),
                message: "name is required".to_owned(),
            }
        );
        assert!(response.payload.is_empty(), "失败响应不携带零值载荷");

        let response = server
            .dispatch(None, request("/greet.Greeter/missing", "{}", Metadata::new()))
            .await;
        assert!(matches!(
            response.status,
            WireStatus::Failure { ref code, .. } if code == "rpc.method.missing"
        ));
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn timed_out_and_unknown_calls_are_audited() {
        let mut server = RpcServer::new(registry());
        server
            .register_service::<GreeterContract, Greeter>("/greet.Greeter", methods())
            .expect("注册");

        let mut metadata = Metadata::new();
        metadata.insert(FLOW_ID_KEY.to_owned(), "flow-slow-handler".to_owned());
        metadata.insert(TIMEOUT_KEY.to_owned(), "50".to_owned());
        let response = server
            .dispatch(None, request("/greet.Greeter/sayHello", r#"{"name":"sleepy"}"#, metadata))
            .await;
        assert!(matches!(
            response.status,
            WireStatus::Failure { ref code, .. } if code == "rpc.deadline.exceeded"
        ));

        let mut metadata = Metadata::new();
        metadata.insert(FLOW_ID_KEY.to_owned(), "flow-unknown-method".to_owned());
        let response = server
            .dispatch(None, request("/greet.Greeter/wave", "{}", metadata))
            .await;
        assert!(matches!(
            response.status,
            WireStatus::Failure { ref code, .. } if code == "rpc.method.missing"
        ));

        logs_assert(|lines: &[&str]| {
            let audited = |flow: &str, error: &str| {
                lines
                    .iter()
                    .any(|line| line.contains("request in") && line.contains(flow) && line.contains(error))
            };
            if audited("flow_id=flow-slow-handler", "error=deadline exceeded")
                && audited("flow_id=flow-unknown-method", "error=no matching method")
            {
                Ok(())
            } else {
                Err("超时与未知方法的调用都应留下带错误的入站审计".to_owned())
            }
        });
    }
}
