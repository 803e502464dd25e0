use std::{future::Future, net::SocketAddr, sync::Arc};

use spark_rpc::{
    RpcClient, RpcServer, StoreInfo, TypeRegistry,
    store::{ConnectionProvider, TARGET_STORE},
};
use spark_rpc_gateway::{GatewayError, HttpGateway};
use spark_rpc_transport_tcp::{TcpConnector, TcpServer};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, warn};

use crate::{config::AppConfig, error::HostError};

/// 按配置装配好的进程：RPC 服务端、客户端、HTTP 网关与已绑定的监听端口。
///
/// # 教案式注释
///
/// ## 装配顺序 (How)
/// 1. 登记存储连接池；
/// 2. 绑定 RPC 监听端口（只绑定不服务，指向本进程的客户端因此可以完成建连）；
/// 3. 注册客户端，失败即记录并返回；
/// 4. 注册服务；
/// 5. 安装网关映射并绑定网关端口。
///
/// ## 运行 (What)
/// - [`Host::run_until`] 并发服务 RPC 与 HTTP，任一方退出或关停信号到达时通知另一方并等待其结束。
pub struct Host {
    server: Arc<RpcServer>,
    client: Arc<RpcClient>,
    gateway: Arc<HttpGateway>,
    rpc_listener: TcpServer,
    gateway_listener: TcpListener,
}

impl Host {
    /// 按配置装配；配置中的存储只记录告警，不建立连接。
    pub async fn from_config(config: AppConfig, registry: TypeRegistry) -> Result<Self, HostError> {
        for store in &config.stores {
            warn!(target: TARGET_STORE, store = %store.name, kind = %store.kind, "no store driver installed, store skipped");
        }
        Self::assemble(config, registry).await
    }

    /// 按配置装配，并通过 `stores` 登记配置中的全部存储。
    pub async fn from_config_with_stores<P>(
        config: AppConfig,
        registry: TypeRegistry,
        stores: &P,
    ) -> Result<Self, HostError>
    where
        P: ConnectionProvider,
    {
        register_stores(stores, &config.stores).await?;
        Self::assemble(config, registry).await
    }

    async fn assemble(config: AppConfig, registry: TypeRegistry) -> Result<Self, HostError> {
        let registry = Arc::new(registry);
        let rpc_listener = TcpServer::bind(&config.rpc_addr).await?;

        let connector = Arc::new(TcpConnector::new(config.pipeline.connect_timeout()));
        let mut client = RpcClient::new(registry.clone(), connector, config.pipeline.clone());
        for info in &config.clients {
            if let Err(err) = client.register(info).await {
                error!(client = %info.name, reason = %err, "client registration failed");
                return Err(err.into());
            }
        }

        let mut server = RpcServer::new(registry);
        for info in &config.services {
            server.register_by_config(info)?;
        }

        let client = Arc::new(client);
        let mut gateway = HttpGateway::new(client.clone());
        gateway.register(&config.http)?;
        let gateway_listener = TcpListener::bind(&config.gateway_addr)
            .await
            .map_err(|source| GatewayError::Bind {
                addr: config.gateway_addr.clone(),
                source,
            })?;

        info!(
            rpc_addr = %rpc_listener.local_addr(),
            services = config.services.len(),
            clients = config.clients.len(),
            http = config.http.len(),
            "host assembled"
        );
        Ok(Self {
            server: Arc::new(server),
            client,
            gateway: Arc::new(gateway),
            rpc_listener,
            gateway_listener,
        })
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_listener.local_addr()
    }

    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_listener.local_addr().ok()
    }

    pub fn server(&self) -> &Arc<RpcServer> {
        &self.server
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    /// 服务直到任一方退出。
    pub async fn run(self) -> Result<(), HostError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// 服务直到 `shutdown` 完成或任一方退出。
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), HostError>
    where
        S: Future<Output = ()> + Send,
    {
        let (stop, stopped) = watch::channel(false);
        let mut rpc = tokio::spawn(
            self.rpc_listener
                .serve_with_shutdown(self.server, wait_for_stop(stopped.clone())),
        );
        let mut http = tokio::spawn(
            self.gateway
                .serve_on(self.gateway_listener, wait_for_stop(stopped)),
        );

        tokio::pin!(shutdown);
        let early = tokio::select! {
            _ = &mut shutdown => None,
            joined = &mut rpc => Some(("rpc", flatten("rpc", joined))),
            joined = &mut http => Some(("http", flatten("http", joined))),
        };
        let _ = stop.send(true);

        match early {
            None => {
                info!("shutdown requested");
                flatten("rpc", rpc.await)?;
                flatten("http", http.await)
            }
            Some((role, outcome)) => {
                warn!(role, "serving task exited, stopping the host");
                let other = if role == "rpc" {
                    flatten("http", http.await)
                } else {
                    flatten("rpc", rpc.await)
                };
                outcome.and(other)
            }
        }
    }
}

/// 通过连接池提供者登记存储；重复名称或建连失败即返回。
pub async fn register_stores<P>(provider: &P, stores: &[StoreInfo]) -> Result<(), HostError>
where
    P: ConnectionProvider,
{
    for store in stores {
        provider.register(&store.name, store).await?;
    }
    Ok(())
}

async fn wait_for_stop(mut stopped: watch::Receiver<bool>) {
    let _ = stopped.wait_for(|stop| *stop).await;
}

fn flatten<T, E>(role: &'static str, joined: Result<Result<T, E>, tokio::task::JoinError>) -> Result<(), HostError>
where
    HostError: From<E>,
{
    match joined {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(err) => Err(HostError::Task {
            role,
            detail: err.to_string(),
        }),
    }
}
