//! 真实套接字上的端到端调用：客户端管线 → TCP → 服务端分发。

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use spark_rpc::{
    CallContext, ClientInfo, ClientSettings, Handler, InterfaceInfo, Message, MethodTable, RpcClient,
    RpcError, RpcResult, RpcServer, ServiceContract, TypeRegistry,
    flow::{self, FlowId},
};
use spark_rpc_transport_tcp::{TcpConnector, TcpServer};
use tokio::sync::oneshot;
use tracing_test::traced_test;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PingRequest {
    text: String,
    #[serde(default)]
    delay_ms: u64,
}

impl Message for PingRequest {
    const NAME: &'static str = "tcp.PingRequest";
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PingReply {
    text: String,
    flow: String,
    peer_seen: bool,
}

impl Message for PingReply {
    const NAME: &'static str = "tcp.PingReply";
}

struct PingContract;

impl ServiceContract for PingContract {
    const NAME: &'static str = "tcp.PingServer";
    const METHODS: &'static [&'static str] = &["Ping"];
}

#[derive(Default)]
struct PingService;

impl PingService {
    async fn ping(self: Arc<Self>, ctx: CallContext, req: PingRequest) -> RpcResult<PingReply> {
        if req.text.is_empty() {
            return Err(RpcError::handler("text is required"));
        }
        if req.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(req.delay_ms)).await;
        }
        Ok(PingReply {
            text: req.text,
            flow: ctx.flow().map(|flow| flow.to_string()).unwrap_or_default(),
            peer_seen: ctx.peer().is_some(),
        })
    }
}

impl Handler for PingService {
    const NAME: &'static str = "tcp.PingService";

    fn methods() -> MethodTable<Self> {
        MethodTable::new().method("Ping", Self::ping)
    }
}

fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::new();
    registry.register_message::<PingRequest>().expect("request");
    registry.register_message::<PingReply>().expect("reply");
    registry.register_contract::<PingContract>().expect("contract");
    registry.register_handler::<PingService>().expect("handler");
    Arc::new(registry)
}

async fn start_server(registry: &Arc<TypeRegistry>) -> (String, oneshot::Sender<()>) {
    let mut server = RpcServer::new(registry.clone());
    server
        .register_service::<PingContract, PingService>(
            "/tcp",
            vec![InterfaceInfo::new("ping", "tcp.PingRequest", "tcp.PingReply")],
        )
        .expect("注册服务");
    let listener = TcpServer::bind("127.0.0.1:0").await.expect("绑定端口");
    let addr = listener.local_addr().to_string();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(listener.serve_with_shutdown(Arc::new(server), async move {
        let _ = stopped.await;
    }));
    (addr, stop)
}

fn ping_client(addrs: Vec<String>) -> ClientInfo {
    ClientInfo {
        name: "ping".to_owned(),
        addr: addrs,
        interfaces: vec![InterfaceInfo::new("/tcp/ping", "tcp.PingRequest", "tcp.PingReply")],
    }
}

fn ping(text: &str, delay_ms: u64) -> PingRequest {
    PingRequest {
        text: text.to_owned(),
        delay_ms,
    }
}

async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("临时端口");
    let addr = listener.local_addr().expect("本地地址").to_string();
    drop(listener);
    addr
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn call_crosses_tcp_with_flow_and_peer() {
    let registry = registry();
    let (addr, _stop) = start_server(&registry).await;
    let mut client = RpcClient::new(registry, Arc::new(TcpConnector::default()), ClientSettings::default());
    client.register(&ping_client(vec![addr])).await.expect("注册客户端");

    let ctx = flow::with_flow(CallContext::new(), FlowId::from("tcp-flow-7"));
    let reply: PingReply = client.call(ctx, "/tcp/ping", ping("hello", 0)).await.expect("调用成功");
    assert_eq!(reply.text, "hello");
    assert_eq!(reply.flow, "tcp-flow-7", "流程标识随元数据到达服务端");
    assert!(reply.peer_seen, "服务端上下文携带对端地址");
    assert!(logs_contain("request out"));
    assert!(logs_contain("flow_id=tcp-flow-7"), "出站审计记录流程标识");

    for round in 0..5 {
        let reply: PingReply = client
            .call(CallContext::new(), "/tcp/ping", ping(&format!("n{round}"), 0))
            .await
            .expect("连接复用");
        assert_eq!(reply.text, format!("n{round}"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_failure_is_a_remote_error() {
    let registry = registry();
    let (addr, _stop) = start_server(&registry).await;
    let mut client = RpcClient::new(registry, Arc::new(TcpConnector::default()), ClientSettings::default());
    client.register(&ping_client(vec![addr])).await.expect("注册客户端");

    let err = client
        .call::<PingRequest, PingReply>(CallContext::new(), "/tcp/ping", ping("", 0))
        .await
        .expect_err("处理器失败");
    assert_eq!(
        err,
        RpcError::Remote {
            code: "rpc.handler.failure".to_owned(),
            message: "text is required".to_owned(),
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn closed_ports_are_skipped_and_all_closed_fails() {
    let registry = registry();
    let (addr, _stop) = start_server(&registry).await;
    let dead = closed_port().await;

    let mut client = RpcClient::new(
        registry.clone(),
        Arc::new(TcpConnector::new(Duration::from_millis(500))),
        ClientSettings::default(),
    );
    client
        .register(&ping_client(vec![dead.clone(), addr]))
        .await
        .expect("一个地址可达即可");
    assert!(logs_contain("connect error"));
    assert!(logs_contain(&format!("address={dead}")), "告警记录不可达地址");
    let reply: PingReply = client
        .call(CallContext::new(), "/tcp/ping", ping("alive", 0))
        .await
        .expect("调用可达地址");
    assert_eq!(reply.text, "alive");

    let mut lonely = RpcClient::new(registry, Arc::new(TcpConnector::default()), ClientSettings::default());
    let err = lonely
        .register(&ping_client(vec![dead]))
        .await
        .expect_err("没有可达地址");
    assert!(matches!(err, RpcError::NoAvailableBackend { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_call_does_not_poison_the_connection() {
    let registry = registry();
    let (addr, _stop) = start_server(&registry).await;
    let mut client = RpcClient::new(registry, Arc::new(TcpConnector::default()), ClientSettings::default());
    client.register(&ping_client(vec![addr])).await.expect("注册客户端");

    let err = client
        .call_with_timeout::<PingRequest, PingReply>(
            CallContext::new(),
            "/tcp/ping",
            ping("slow", 1_000),
            Duration::from_millis(50),
        )
        .await
        .expect_err("超时");
    assert_eq!(err, RpcError::DeadlineExceeded);

    let reply: PingReply = client
        .call(CallContext::new(), "/tcp/ping", ping("after", 0))
        .await
        .expect("超时后的调用拿到自己的响应");
    assert_eq!(reply.text, "after");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_stops_accepting() {
    let registry = registry();
    let (addr, stop) = start_server(&registry).await;
    stop.send(()).expect("发送关停信号");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = RpcClient::new(registry, Arc::new(TcpConnector::default()), ClientSettings::default());
    let err = client
        .register(&ping_client(vec![addr]))
        .await
        .expect_err("监听已关闭");
    assert!(matches!(err, RpcError::NoAvailableBackend { .. }));
}
