//! 持久化存储连接池的协作契约。
//!
//! # 教案式说明
//! - **意图 (Why)**：业务处理器需要按名称取得数据库或缓存连接；具体驱动不属于框架，
//!   框架只约定“给定名称与参数，登记一个健康连接；按名称取回它”；
//! - **契约 (What)**：
//!   - [`ConnectionProvider::register`] 对重复名称返回 `AlreadyRegistered`；
//!   - [`ConnectionProvider::get`] 对未知名称返回 `NotFound`；
//! - **实现 (How)**：[`NamedPools`] 以 `DashMap` 保存句柄，把建立连接委托给 [`PoolFactory`]。

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::info;

use crate::{
    config::StoreInfo,
    error::{RpcError, RpcResult},
};

/// 存储连接池日志目标。
pub const TARGET_STORE: &str = "spark_rpc::store";

/// 驱动侧实现：按参数建立连接池句柄。
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self, params: &StoreInfo) -> RpcResult<Self::Handle>;
}

/// 按名称登记与获取连接。
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    type Handle;

    async fn register(&self, name: &str, params: &StoreInfo) -> RpcResult<()>;

    fn get(&self, name: &str) -> RpcResult<Self::Handle>;
}

/// 基于 `DashMap` 的具名连接池集合。
pub struct NamedPools<F: PoolFactory> {
    factory: F,
    pools: DashMap<String, F::Handle>,
}

impl<F: PoolFactory> NamedPools<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            pools: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[async_trait]
impl<F: PoolFactory> ConnectionProvider for NamedPools<F> {
    type Handle = F::Handle;

    async fn register(&self, name: &str, params: &StoreInfo) -> RpcResult<()> {
        if self.pools.contains_key(name) {
            return Err(RpcError::AlreadyRegistered {
                kind: "store",
                name: name.to_owned(),
            });
        }
        let handle = self.factory.connect(params).await?;
        match self.pools.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(RpcError::AlreadyRegistered {
                kind: "store",
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                info!(target: TARGET_STORE, store = %name, kind = %params.kind, addr = %params.addr, "store registered");
                Ok(())
            }
        }
    }

    fn get(&self, name: &str) -> RpcResult<Self::Handle> {
        self.pools
            .get(name)
            .map(|handle| handle.value().clone())
            .ok_or_else(|| RpcError::NotFound {
                kind: "store",
                name: name.to_owned(),
            })
    }
}
