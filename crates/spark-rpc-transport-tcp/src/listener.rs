use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use spark_rpc::{RpcResult, RpcServer};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::codec::Framed;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::{
    codec::ServerCodec,
    error::{self, map_io_error},
};

/// 单连接待写响应的队列深度。
const RESPONSE_QUEUE: usize = 64;

/// 连续 accept 失败时的首次退避与退避上限。
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// 第 `failures` 次连续失败后的等待时间：从基础值起逐次翻倍，不超过上限。
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}

/// 对 Tokio `TcpListener` 的封装，把入站帧交给 [`RpcServer::dispatch`]。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 绑定与服务拆成两步：宿主可以先绑定端口拿到实际地址，再注册指向本进程的客户端，
///   最后才开始接受连接；
///
/// ## 逻辑 (How)
/// - 每个入站连接一个任务，任务继承当前 span；
/// - 连接内每个请求帧在独立任务中分发，响应经队列交给唯一的写任务，按完成顺序写回并携带请求编号；
/// - 单个连接的分帧错误只关闭该连接，不影响监听循环。
///
/// ## 契约 (What)
/// - `bind` 失败返回 `rpc.transport.tcp.bind_failed`；
/// - `serve_with_shutdown` 在关停信号完成后停止接受新连接并返回，已建立的连接继续处理到对端关闭。
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpServer {
    /// 绑定到指定地址；端口为 0 时由系统分配。
    pub async fn bind(addr: &str) -> RpcResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        Ok(Self { listener, local_addr })
    }

    /// 实际绑定的地址。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续服务，直到进程退出。
    pub async fn serve(self, server: Arc<RpcServer>) -> RpcResult<()> {
        self.serve_with_shutdown(server, std::future::pending::<()>()).await
    }

    /// 持续服务，直到 `shutdown` 完成。
    pub async fn serve_with_shutdown<S>(self, server: Arc<RpcServer>, shutdown: S) -> RpcResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        info!(addr = %self.local_addr, "rpc listener started");
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(addr = %self.local_addr, "rpc listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        failures = 0;
                        let server = server.clone();
                        tokio::spawn(
                            serve_connection(server, stream, peer)
                                .instrument(info_span!("rpc_connection", peer = %peer)),
                        );
                    }
                    Err(err) => {
                        failures = failures.saturating_add(1);
                        let backoff = accept_backoff(failures);
                        warn!(
                            reason = %map_io_error(error::ACCEPT, err),
                            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                            "accept error"
                        );
                        // 文件描述符耗尽等持续性错误会让 accept 立即返回，退避期间仍响应关停。
                        tokio::select! {
                            _ = &mut shutdown => {
                                info!(addr = %self.local_addr, "rpc listener stopped");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(backoff) => {}
                        }
                    }
                },
            }
        }
    }
}

async fn serve_connection(server: Arc<RpcServer>, stream: TcpStream, peer: SocketAddr) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(reason = %err, "set_nodelay failed");
    }
    let (mut sink, mut frames) = Framed::new(stream, ServerCodec::default()).split();
    let (responses, mut outbox) = mpsc::channel(RESPONSE_QUEUE);

    let writer = tokio::spawn(
        async move {
            while let Some(response) = outbox.recv().await {
                if let Err(err) = sink.send(response).await {
                    warn!(reason = %err.into_rpc(error::WRITE), "failed to write response");
                    return;
                }
            }
        }
        .in_current_span(),
    );

    while let Some(frame) = frames.next().await {
        let request = match frame {
            Ok(request) => request,
            Err(err) => {
                warn!(reason = %err.into_rpc(error::READ), "closing connection after bad frame");
                break;
            }
        };
        let server = server.clone();
        let responses = responses.clone();
        tokio::spawn(
            async move {
                let response = server.dispatch(Some(peer), request).await;
                // 写端已退出说明连接已断开，响应无处可写。
                let _ = responses.send(response).await;
            }
            .in_current_span(),
        );
    }
    drop(responses);
    if writer.await.is_err() {
        warn!("response writer aborted");
    }
    debug!("connection closed");
}
