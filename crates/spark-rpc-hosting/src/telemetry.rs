use tracing_subscriber::EnvFilter;

use crate::error::HostError;

/// 安装全局 `fmt` 订阅者。
///
/// `RUST_LOG` 存在时优先使用，否则以 `default_level` 构造过滤器。重复安装返回
/// [`HostError::Telemetry`]。
pub fn init_tracing(default_level: &str) -> Result<(), HostError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|err| HostError::Telemetry {
            detail: err.to_string(),
        })?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| HostError::Telemetry {
            detail: err.to_string(),
        })
}
