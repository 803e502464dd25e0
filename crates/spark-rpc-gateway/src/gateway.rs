use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use spark_rpc::{
    CallContext, HttpMapping, RpcClient, RpcError, RpcResult, TypeKind,
    audit::{self, AuditRecord, Direction},
    flow,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    decode::{self, METHOD_KEY},
    error::GatewayError,
};

/// 网关调用下游的默认超时。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// 请求体上限。
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// HTTP 到 RPC 的协议网关。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 让不具备 RPC 客户端的调用方（浏览器、脚本）以普通 HTTP 请求触达内部服务；
/// - 外部方法名与内部 `/service/method` 解耦，对外暴露的名字可以独立演进。
///
/// ## 逻辑 (How)
/// 1. 为每个请求生成新的流程标识；
/// 2. 把查询串、表单与 JSON 请求体解码为值袋，读取外部方法名并映射到内部方法；
/// 3. 按内部方法声明的请求类型构造空实例，经宽松 JSON 转换填充；
/// 4. 以固定超时调用客户端管线，响应编码为 JSON；
/// 5. 不论成败都输出一条 `spark_rpc::gateway` 审计记录。
///
/// ## 契约 (What)
/// - 成功：`200`，`application/json; charset=utf-8`；
/// - 失败：`500`，同样的内容类型，载荷为 `{"error": "<message>"}`。
pub struct HttpGateway {
    client: Arc<RpcClient>,
    mappings: HashMap<String, String>,
    timeout: Duration,
    running: AtomicBool,
}

impl HttpGateway {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self {
            client,
            mappings: HashMap::new(),
            timeout: DEFAULT_TIMEOUT,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 安装外部方法名到内部方法的映射。
    ///
    /// 外部名重复（与已安装映射或本批次内部重复）返回 `AlreadyRegistered`；
    /// 内部方法不在客户端中返回 `MethodNotFound`。任一失败都不安装本批次的任何映射。
    pub fn register(&mut self, mappings: &[HttpMapping]) -> RpcResult<()> {
        let mut staged = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            if mapping.name.is_empty() {
                return Err(RpcError::invalid_config("http mapping name must not be empty"));
            }
            if self.mappings.contains_key(&mapping.name) || staged.contains_key(&mapping.name) {
                return Err(RpcError::AlreadyRegistered {
                    kind: "http method",
                    name: mapping.name.clone(),
                });
            }
            if self.client.interface_info(&mapping.method).is_none() {
                return Err(RpcError::MethodNotFound {
                    method: mapping.method.clone(),
                });
            }
            staged.insert(mapping.name.clone(), mapping.method.clone());
        }
        for (name, method) in &staged {
            info!(external = %name, method = %method, "http method mapped");
        }
        self.mappings.extend(staged);
        Ok(())
    }

    /// 已安装的外部方法名（排序后）。
    pub fn external_methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mappings.keys().cloned().collect();
        names.sort();
        names
    }

    /// 以网关为状态的 axum 路由；任意路径与动词都进入同一个处理函数。
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(forward).with_state(self)
    }

    /// 绑定地址并服务，直到进程退出。
    pub async fn serve(self: Arc<Self>, addr: &str) -> Result<(), GatewayError> {
        self.mark_running()?;
        let listener = TcpListener::bind(addr).await.map_err(|source| GatewayError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        self.serve_listener(listener, std::future::pending::<()>()).await
    }

    /// 在已绑定的监听器上服务，直到 `shutdown` 完成。
    pub async fn serve_on<S>(self: Arc<Self>, listener: TcpListener, shutdown: S) -> Result<(), GatewayError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        self.mark_running()?;
        self.serve_listener(listener, shutdown).await
    }

    fn mark_running(&self) -> Result<(), GatewayError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| GatewayError::AlreadyRunning)
    }

    async fn serve_listener<S>(self: Arc<Self>, listener: TcpListener, shutdown: S) -> Result<(), GatewayError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        if let Ok(local) = listener.local_addr() {
            info!(addr = %local, "http gateway started");
        }
        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(GatewayError::Serve)
    }

    /// 处理一个 HTTP 请求。
    pub async fn handle(&self, parts: Parts, body: Bytes) -> Response {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ctx = flow::new_flow().with_peer(peer);
        let ts = audit::timestamp();
        let started = Instant::now();

        let mut label = parts.uri.path().to_owned();
        let mut request_log = String::new();
        let outcome = self.translate(&ctx, &parts, &body, &mut label, &mut request_log).await;

        let (response_log, error) = match &outcome {
            Ok(value) => (value.to_string(), None),
            Err(err) => (String::new(), Some(err)),
        };
        audit::emit(
            Direction::Gateway,
            &AuditRecord {
                ts,
                method: &label,
                ctx: &ctx,
                request: request_log,
                response: response_log,
                error,
                took: started.elapsed(),
            },
        );

        match outcome {
            Ok(value) => json_response(StatusCode::OK, &value),
            Err(err) => json_response(StatusCode::INTERNAL_SERVER_ERROR, &json!({ "error": err.to_string() })),
        }
    }

    async fn translate(
        &self,
        ctx: &CallContext,
        parts: &Parts,
        body: &[u8],
        label: &mut String,
        request_log: &mut String,
    ) -> RpcResult<Value> {
        let mut bag = decode::request_bag(&parts.method, &parts.uri, &parts.headers, body)?;
        *request_log = Value::Object(bag.clone()).to_string();
        let external = decode::method_of(&bag).unwrap_or_default().to_owned();
        label.clone_from(&external);

        let internal = self
            .mappings
            .get(&external)
            .ok_or_else(|| RpcError::UnknownMethod { method: external.clone() })?;
        let info = self
            .client
            .interface_info(internal)
            .ok_or_else(|| RpcError::MethodNotFound {
                method: internal.clone(),
            })?;
        let descriptor = self
            .client
            .registry()
            .resolve(&info.request_type)
            .ok()
            .filter(|descriptor| descriptor.kind() == TypeKind::Message)
            .ok_or_else(|| RpcError::UnknownRequestType {
                type_name: info.request_type.clone(),
            })?;

        bag.remove(METHOD_KEY);
        let mut request = descriptor.new_message()?;
        request.decode_lenient(Value::Object(bag))?;

        let response = self
            .client
            .invoke_with_timeout(ctx.clone(), internal, Arc::from(request), self.timeout)
            .await?;
        response.to_json()
    }
}

fn json_response(status: StatusCode, value: &Value) -> Response {
    let mut response = (status, Body::from(value.to_string())).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

async fn forward(State(gateway): State<Arc<HttpGateway>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => gateway.handle(parts, body).await,
        Err(err) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &json!({ "error": format!("failed to read request body: {err}") }),
        ),
    }
}
