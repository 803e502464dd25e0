//! `spark-rpc-node <config.toml>`：按配置启动一个 RPC 节点。
//!
//! 注册表预置内置回显服务的类型，配置中可以直接声明 `spark.EchoService`。

use anyhow::Context;
use spark_rpc::TypeRegistry;
use spark_rpc_hosting::{AppConfig, Host, echo, telemetry};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "spark-rpc.toml".to_owned());
    let config = AppConfig::load(&path).with_context(|| format!("loading config `{path}`"))?;
    telemetry::init_tracing(&config.log_level)?;

    let mut registry = TypeRegistry::new();
    echo::register_types(&mut registry).context("registering builtin types")?;

    let host = Host::from_config(config, registry).await?;
    info!(rpc_addr = %host.rpc_addr(), gateway_addr = ?host.gateway_addr(), "node started");
    host.run_until(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(reason = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    Ok(())
}
