use std::io;

use spark_rpc::RpcError;
use thiserror::Error;

/// 网关生命周期错误。
///
/// 请求处理期的失败直接以 [`RpcError`] 表达并写入 HTTP 500 响应，这里只覆盖启动与运行。
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http gateway is already running")]
    AlreadyRunning,
    #[error("failed to bind http gateway on `{addr}`: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("http gateway stopped unexpectedly: {0}")]
    Serve(#[source] io::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl GatewayError {
    /// 稳定错误码。
    pub fn code(&self) -> &str {
        match self {
            GatewayError::AlreadyRunning => "rpc.gateway.already_running",
            GatewayError::Bind { .. } => "rpc.gateway.bind_failed",
            GatewayError::Serve(_) => "rpc.gateway.serve_failed",
            GatewayError::Rpc(err) => err.code(),
        }
    }
}
