//! 客户端调用管线的端到端行为：多地址注册、轮询、故障转移、限流、超时与流程透传。

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use spark_rpc::{
    CallContext, ClientInfo, ClientSettings, Handler, InterfaceInfo, Message, MethodTable, RpcClient,
    RpcError, RpcResult, RpcServer, ServiceContract, TypeRegistry,
    flow::{self, FLOW_ID_KEY, FlowId},
    wire::{Connector, WireChannel, WireRequest, WireResponse, loopback::LoopbackConnector},
};
use tracing_test::traced_test;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct EchoRequest {
    text: String,
    #[serde(default)]
    delay_ms: u64,
}

impl Message for EchoRequest {
    const NAME: &'static str = "svc.EchoRequest";
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct EchoReply {
    text: String,
    flow: String,
}

impl Message for EchoReply {
    const NAME: &'static str = "svc.EchoReply";
}

struct EchoContract;

impl ServiceContract for EchoContract {
    const NAME: &'static str = "svc.EchoServer";
    const METHODS: &'static [&'static str] = &["Echo"];
}

#[derive(Default)]
struct EchoService;

impl EchoService {
    async fn echo(self: Arc<Self>, ctx: CallContext, req: EchoRequest) -> RpcResult<EchoReply> {
        if req.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(req.delay_ms)).await;
        }
        Ok(EchoReply {
            text: req.text,
            flow: flow::from_context(&ctx).map(FlowId::to_string).unwrap_or_default(),
        })
    }
}

impl Handler for EchoService {
    const NAME: &'static str = "svc.EchoService";

    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("Echo", Self::echo)
    }
}

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_message::<EchoRequest>().expect("request");
    registry.register_message::<EchoReply>().expect("reply");
    registry.register_contract::<EchoContract>().expect("contract");
    registry.register_handler::<EchoService>().expect("handler");
    Arc::new(registry)
}

fn echo_server(registry: &Arc<TypeRegistry>) -> Arc<RpcServer> {
    let mut server = RpcServer::new(registry.clone());
    server
        .register_service::<EchoContract, EchoService>(
            "/svc",
            vec![InterfaceInfo::new("echo", "svc.EchoRequest", "svc.EchoReply")],
        )
        .expect("注册服务");
    Arc::new(server)
}

fn echo_client(name: &str, addrs: &[&str]) -> ClientInfo {
    ClientInfo {
        name: name.to_owned(),
        addr: addrs.iter().map(|addr| (*addr).to_owned()).collect(),
        interfaces: vec![InterfaceInfo::new("/svc/echo", "svc.EchoRequest", "svc.EchoReply")],
    }
}

fn echo(text: &str) -> EchoRequest {
    EchoRequest {
        text: text.to_owned(),
        delay_ms: 0,
    }
}

/// 按地址脚本化的连接器：健康地址回显地址本身，故障地址总是返回传输错误。
#[derive(Default)]
struct ScriptedConnector {
    endpoints: HashMap<String, (bool, Arc<AtomicUsize>)>,
}

impl ScriptedConnector {
    fn endpoint(mut self, addr: &str, healthy: bool) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        self.endpoints
            .insert(addr.to_owned(), (healthy, calls.clone()));
        (self, calls)
    }
}

struct ScriptedChannel {
    addr: String,
    healthy: bool,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, addr: &str) -> RpcResult<Arc<dyn WireChannel>> {
        let (healthy, calls) = self.endpoints.get(addr).cloned().ok_or_else(|| RpcError::Transport {
            code: "test.transport.refused",
            detail: format!("connection refused by {addr}"),
        })?;
        Ok(Arc::new(ScriptedChannel {
            addr: addr.to_owned(),
            healthy,
            calls,
        }))
    }
}

#[async_trait]
impl WireChannel for ScriptedChannel {
    fn peer(&self) -> &str {
        &self.addr
    }

    async fn call(&self, _ctx: &CallContext, request: WireRequest) -> RpcResult<WireResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.healthy {
            return Err(RpcError::Transport {
                code: "test.transport.reset",
                detail: format!("{} reset the connection", self.addr),
            });
        }
        let reply = EchoReply {
            text: self.addr.clone(),
            flow: request.metadata.get(FLOW_ID_KEY).cloned().unwrap_or_default(),
        };
        let payload = serde_json::to_vec(&reply).map_err(|err| RpcError::Encode {
            context: EchoReply::NAME.to_owned(),
            detail: err.to_string(),
        })?;
        Ok(WireResponse::success(request.id, Bytes::from(payload)))
    }
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn unreachable_address_is_skipped_with_warning() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("10.0.0.1:8081", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());

    client
        .register(&echo_client("echo", &["10.0.0.1:8081", "10.0.0.2:8081"]))
        .await
        .expect("至少一个地址可达即可注册");
    assert_eq!(client.methods(), vec!["/svc/echo".to_owned()]);
    assert!(logs_contain("connect error"));
    assert!(logs_contain("10.0.0.2:8081"));

    let reply: EchoReply = client
        .call(CallContext::new(), "/svc/echo", echo("ping"))
        .await
        .expect("调用落在可达地址");
    assert_eq!(reply.text, "ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn all_addresses_unreachable_is_no_available_backend() {
    let registry = registry();
    let mut client = RpcClient::new(registry, Arc::new(LoopbackConnector::new()), ClientSettings::default());
    let err = client
        .register(&echo_client("echo", &["10.0.0.1:1", "10.0.0.2:1"]))
        .await
        .expect_err("没有可达地址");
    assert_eq!(
        err,
        RpcError::NoAvailableBackend {
            client: "echo".to_owned()
        }
    );
    assert!(client.methods().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_registrations_fail_without_touching_existing_state() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("a:1", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect("首次注册");

    let err = client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect_err("重复客户端名");
    assert!(matches!(err, RpcError::AlreadyRegistered { kind: "client", .. }));

    let err = client
        .register(&echo_client("echo-again", &["a:1"]))
        .await
        .expect_err("重复方法名");
    assert_eq!(
        err,
        RpcError::MethodAlreadyRegistered {
            method: "/svc/echo".to_owned()
        }
    );

    let reply: EchoReply = client
        .call(CallContext::new(), "/svc/echo", echo("still works"))
        .await
        .expect("已有注册不受影响");
    assert_eq!(reply.text, "still works");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_types_and_methods_are_rejected() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("a:1", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());

    let mut info = echo_client("echo", &["a:1"]);
    info.interfaces[0].request_type = "svc.Unknown".to_owned();
    assert_eq!(
        client.register(&info).await.expect_err("未知请求类型"),
        RpcError::UnknownRequestType {
            type_name: "svc.Unknown".to_owned()
        }
    );

    let mut info = echo_client("echo", &["a:1"]);
    info.interfaces[0].name = "svc-echo".to_owned();
    assert!(matches!(
        client.register(&info).await,
        Err(RpcError::InvalidMethodName { .. })
    ));

    let err = client
        .call::<EchoRequest, EchoReply>(CallContext::new(), "/svc/missing", echo("x"))
        .await
        .expect_err("未注册方法");
    assert_eq!(
        err,
        RpcError::MethodNotFound {
            method: "/svc/missing".to_owned()
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn round_robin_spreads_calls_evenly() {
    let (connector, first) = ScriptedConnector::default().endpoint("a:1", true);
    let (connector, second) = connector.endpoint("b:1", true);
    let mut client = RpcClient::new(registry(), Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["a:1", "b:1"]))
        .await
        .expect("注册");

    for _ in 0..10 {
        client
            .call::<EchoRequest, EchoReply>(CallContext::new(), "/svc/echo", echo("x"))
            .await
            .expect("调用成功");
    }
    assert_eq!(first.load(Ordering::SeqCst), 5);
    assert_eq!(second.load(Ordering::SeqCst), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn retry_fails_over_to_healthy_endpoint() {
    let (connector, broken) = ScriptedConnector::default().endpoint("bad:1", false);
    let (connector, healthy) = connector.endpoint("good:1", true);
    let mut client = RpcClient::new(registry(), Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["bad:1", "good:1"]))
        .await
        .expect("注册");

    for _ in 0..6 {
        let reply: EchoReply = client
            .call(CallContext::new(), "/svc/echo", echo("x"))
            .await
            .expect("重试会落到健康端点");
        assert_eq!(reply.text, "good:1");
    }
    assert_eq!(healthy.load(Ordering::SeqCst), 6);
    assert!(broken.load(Ordering::SeqCst) >= 1, "故障端点至少被尝试过");
}

#[tokio::test(flavor = "multi_thread")]
async fn all_endpoints_failing_returns_last_error() {
    let (connector, broken) = ScriptedConnector::default().endpoint("bad:1", false);
    let mut client = RpcClient::new(registry(), Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["bad:1"]))
        .await
        .expect("注册");

    let err = client
        .call::<EchoRequest, EchoReply>(CallContext::new(), "/svc/echo", echo("x"))
        .await
        .expect_err("全部失败");
    assert_eq!(err.code(), "test.transport.reset");
    assert_eq!(broken.load(Ordering::SeqCst), 3, "尝试次数受 max_attempts 约束");
}

#[tokio::test(flavor = "multi_thread")]
async fn rate_limiter_rejects_instead_of_blocking() {
    let (connector, calls) = ScriptedConnector::default().endpoint("a:1", true);
    let settings = ClientSettings {
        qps: 1,
        burst: 1,
        ..ClientSettings::default()
    };
    let mut client = RpcClient::new(registry(), Arc::new(connector), settings);
    client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect("注册");

    client
        .call::<EchoRequest, EchoReply>(CallContext::new(), "/svc/echo", echo("x"))
        .await
        .expect("第一个令牌");
    let err = client
        .call::<EchoRequest, EchoReply>(CallContext::new(), "/svc/echo", echo("x"))
        .await
        .expect_err("配额耗尽");
    assert_eq!(
        err,
        RpcError::RateLimited {
            method: "/svc/echo".to_owned()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1, "被限流的尝试不会触达后端");
}

#[tokio::test(flavor = "multi_thread")]
async fn invoke_with_timeout_reports_deadline() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("a:1", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect("注册");

    let err = client
        .call_with_timeout::<EchoRequest, EchoReply>(
            CallContext::new(),
            "/svc/echo",
            EchoRequest {
                text: "slow".to_owned(),
                delay_ms: 2_000,
            },
            Duration::from_millis(50),
        )
        .await
        .expect_err("超时");
    assert_eq!(err, RpcError::DeadlineExceeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn unbounded_timeout_behaves_like_plain_invoke() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("a:1", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect("注册");

    let reply = client
        .call_with_timeout::<EchoRequest, EchoReply>(
            CallContext::new(),
            "/svc/echo",
            echo("forever"),
            Duration::MAX,
        )
        .await
        .expect("超出时钟范围的超时等同于不设截止时间");
    assert_eq!(reply.text, "forever");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn flow_identifier_reaches_server_and_both_audit_logs() {
    let registry = registry();
    let connector = LoopbackConnector::new().with_server("a:1", echo_server(&registry));
    let mut client = RpcClient::new(registry, Arc::new(connector), ClientSettings::default());
    client
        .register(&echo_client("echo", &["a:1"]))
        .await
        .expect("注册");

    let ctx = flow::with_flow(CallContext::new(), FlowId::from("flow-e2e-42"));
    let reply: EchoReply = client
        .call(ctx, "/svc/echo", echo("hello"))
        .await
        .expect("调用成功");
    assert_eq!(reply.flow, "flow-e2e-42", "服务端恢复了同一个流程标识");

    assert!(logs_contain("request in"));
    assert!(logs_contain("request out"));
    logs_assert(|lines: &[&str]| {
        let hits = lines
            .iter()
            .filter(|line| line.contains("flow_id=flow-e2e-42"))
            .count();
        if hits >= 2 {
            Ok(())
        } else {
            Err(format!("期望客户端与服务端各一条审计记录，实际 {hits} 条"))
        }
    });

    let minted: EchoReply = client
        .call(CallContext::new(), "/svc/echo", echo("fresh"))
        .await
        .expect("调用成功");
    assert!(!minted.flow.is_empty(), "没有流程的调用会补发流程标识");
}
