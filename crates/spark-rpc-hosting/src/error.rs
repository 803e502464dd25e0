use std::{io, path::PathBuf};

use spark_rpc::RpcError;
use spark_rpc_gateway::GatewayError;
use thiserror::Error;

/// 宿主装配与运行期错误。
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to read config `{}`: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config `{origin}`: {source}")]
    ParseConfig {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("config `{}` is included more than once", path.display())]
    IncludeCycle { path: PathBuf },
    #[error("failed to install tracing subscriber: {detail}")]
    Telemetry { detail: String },
    #[error("{role} task ended abnormally: {detail}")]
    Task { role: &'static str, detail: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
