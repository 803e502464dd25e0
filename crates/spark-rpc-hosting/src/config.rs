//! 进程配置。
//!
//! # 教案式说明
//! - **契约 (What)**：
//!   - 顶层字段均有默认值：`rpc_addr = "0.0.0.0:8081"`、`gateway_addr = "0.0.0.0:80"`、
//!     `log_level = "debug"`；
//!   - `include` 列出的文件按顺序加载并合并：服务、客户端、网关映射与存储列表追加在后；
//!     相对路径以声明它的文件所在目录为基准；
//!   - 同一文件被重复包含（含自包含）返回 [`HostError::IncludeCycle`]；
//! - **实现 (How)**：`serde` + `toml` 反序列化，合并只作用于列表字段，
//!   被包含文件的标量字段不会覆盖主文件。

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use spark_rpc::{ClientInfo, ClientSettings, HttpMapping, ServerInfo, StoreInfo};

use crate::error::HostError;

/// 进程级配置。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rpc_addr: String,
    pub gateway_addr: String,
    pub log_level: String,
    pub include: Vec<String>,
    pub pipeline: ClientSettings,
    pub services: Vec<ServerInfo>,
    pub clients: Vec<ClientInfo>,
    pub http: Vec<HttpMapping>,
    pub stores: Vec<StoreInfo>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rpc_addr: "0.0.0.0:8081".to_owned(),
            gateway_addr: "0.0.0.0:80".to_owned(),
            log_level: "debug".to_owned(),
            include: Vec::new(),
            pipeline: ClientSettings::default(),
            services: Vec::new(),
            clients: Vec::new(),
            http: Vec::new(),
            stores: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文本解析，不处理 `include`。
    pub fn from_toml_str(text: &str) -> Result<Self, HostError> {
        toml::from_str(text).map_err(|source| HostError::ParseConfig {
            origin: "<inline>".to_owned(),
            source,
        })
    }

    /// 加载配置文件并递归合并 `include`。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let mut visited = HashSet::new();
        Self::load_into(path.as_ref(), &mut visited)
    }

    fn load_into(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<Self, HostError> {
        let canonical = fs::canonicalize(path).map_err(|source| HostError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        if !visited.insert(canonical.clone()) {
            return Err(HostError::IncludeCycle { path: canonical });
        }
        let text = fs::read_to_string(&canonical).map_err(|source| HostError::ReadConfig {
            path: canonical.clone(),
            source,
        })?;
        let mut config: AppConfig = toml::from_str(&text).map_err(|source| HostError::ParseConfig {
            origin: canonical.display().to_string(),
            source,
        })?;

        let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in std::mem::take(&mut config.include) {
            let included = Self::load_into(&base.join(&include), visited)?;
            config.merge(included);
        }
        Ok(config)
    }

    /// 追加另一份配置的列表字段。
    pub fn merge(&mut self, other: AppConfig) {
        self.services.extend(other.services);
        self.clients.extend(other.clients);
        self.http.extend(other.http);
        self.stores.extend(other.stores);
    }
}
