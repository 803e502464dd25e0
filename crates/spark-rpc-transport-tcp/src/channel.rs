use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use spark_rpc::{
    CallContext, RpcError, RpcResult,
    wire::{Connector, WireChannel, WireRequest, WireResponse},
};
use tokio::{net::TcpStream, sync::Mutex as AsyncMutex};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::{
    codec::ClientCodec,
    error::{self, closed_error, map_io_error, timeout_error},
};

type ClientFramed = Framed<TcpStream, ClientCodec>;

/// 按地址建立 TCP 连接的连接器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 客户端注册阶段对每个地址立即建连，不可达的地址在注册时就被发现并跳过；
/// - 建连受 `connect_timeout` 约束，黑洞地址不会拖住整个注册流程。
///
/// ## 契约 (What)
/// - `connect` 成功返回的 [`TcpWireChannel`] 已持有一条可用连接；
/// - 失败时返回 `rpc.transport.tcp.connect_failed` 或 `rpc.transport.tcp.timeout`。
#[derive(Clone, Debug)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> RpcResult<Arc<dyn WireChannel>> {
        let framed = open(addr, self.connect_timeout).await?;
        debug!(peer = %addr, "tcp channel established");
        Ok(Arc::new(TcpWireChannel {
            peer: addr.to_owned(),
            connect_timeout: self.connect_timeout,
            stream: AsyncMutex::new(Some(framed)),
            next_id: AtomicU64::new(1),
        }))
    }
}

async fn open(addr: &str, timeout: Duration) -> RpcResult<ClientFramed> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| timeout_error(error::CONNECT))?
        .map_err(|err| map_io_error(error::CONNECT, err))?;
    stream
        .set_nodelay(true)
        .map_err(|err| map_io_error(error::CONNECT, err))?;
    Ok(Framed::new(stream, ClientCodec::default()))
}

/// 一条到后端的 TCP 连接。
///
/// # 教案式注释
///
/// ## 逻辑 (How)
/// - 以 `tokio::sync::Mutex` 串行化“写请求 → 读响应”，同一连接上任一时刻只有一个在途调用；
/// - 调用期间连接从槽位中取出；出错或被截止时间取消时连接随之丢弃，下一次调用惰性重连；
/// - 每个请求分配单调递增的编号；读到编号更小的响应直接丢弃。
///
/// ## 注意事项 (Trade-offs)
/// - 串行化换取实现简单，无法在单连接上流水线化；并发度来自多个后端地址。
pub struct TcpWireChannel {
    peer: String,
    connect_timeout: Duration,
    stream: AsyncMutex<Option<ClientFramed>>,
    next_id: AtomicU64,
}

impl TcpWireChannel {
    async fn exchange(&self, mut request: WireRequest) -> RpcResult<WireResponse> {
        let mut guard = self.stream.lock().await;
        let mut framed = match guard.take() {
            Some(framed) => framed,
            None => {
                debug!(peer = %self.peer, "reconnecting tcp channel");
                open(&self.peer, self.connect_timeout).await?
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        request.id = id;
        let outcome = roundtrip(&mut framed, request, id).await;
        if outcome.is_ok() {
            *guard = Some(framed);
        }
        outcome
    }
}

async fn roundtrip(framed: &mut ClientFramed, request: WireRequest, id: u64) -> RpcResult<WireResponse> {
    framed
        .send(request)
        .await
        .map_err(|err| err.into_rpc(error::WRITE))?;
    loop {
        let response = framed
            .next()
            .await
            .ok_or_else(|| closed_error(error::READ))?
            .map_err(|err| err.into_rpc(error::READ))?;
        if response.id == id {
            return Ok(response);
        }
        if response.id > id {
            return Err(RpcError::Transport {
                code: "rpc.transport.tcp.unexpected_response",
                detail: format!("expected response #{id}, received #{}", response.id),
            });
        }
        debug!(stale = response.id, expected = id, "discarding stale response");
    }
}

#[async_trait]
impl WireChannel for TcpWireChannel {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn call(&self, ctx: &CallContext, request: WireRequest) -> RpcResult<WireResponse> {
        match ctx.deadline() {
            Some(deadline) => tokio::time::timeout_at(deadline, self.exchange(request))
                .await
                .unwrap_or(Err(RpcError::DeadlineExceeded)),
            None => self.exchange(request).await,
        }
    }
}
