//! 令牌桶限流：同一接口的全部端点共享一个配额。
//!
//! # 教案式说明
//! - **意图 (Why)**：限制对单个远程接口的总调用速率，保护下游；
//! - **契约 (What)**：配额耗尽时立即返回 [`RpcError::RateLimited`]，从不阻塞等待令牌；
//!   每次重试尝试都会重新申请令牌；
//! - **实现 (How)**：基于 `governor` 的无键内存限流器，`check()` 是无锁的原子操作。

use std::{num::NonZeroU32, sync::Arc};

use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};

use crate::{
    error::{RpcError, RpcResult},
    operation::{Layer, Operation},
};

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// 按接口共享的限流器。
pub struct RateLimiter {
    method: Arc<str>,
    inner: DirectLimiter,
}

impl RateLimiter {
    /// `per_second` 为每秒补充的令牌数，`burst` 为桶容量；任一为 0 视为配置错误。
    pub fn new(method: &str, per_second: u32, burst: u32) -> RpcResult<Self> {
        let rate = NonZeroU32::new(per_second).ok_or_else(|| {
            RpcError::invalid_config(format!("rate limit of `{method}` must be positive"))
        })?;
        let burst = NonZeroU32::new(burst).ok_or_else(|| {
            RpcError::invalid_config(format!("burst of `{method}` must be positive"))
        })?;
        Ok(Self {
            method: Arc::from(method),
            inner: GovernorRateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
        })
    }

    /// 尝试取得一个令牌。
    pub fn try_acquire(&self) -> RpcResult<()> {
        self.inner.check().map_err(|_| RpcError::RateLimited {
            method: self.method.to_string(),
        })
    }
}

/// 在操作外层执行限流检查的中间件。
#[derive(Clone)]
pub struct LimiterLayer {
    limiter: Arc<RateLimiter>,
}

impl LimiterLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Layer for LimiterLayer {
    fn wrap(&self, inner: Operation) -> Operation {
        let limiter = self.limiter.clone();
        Operation::new(move |ctx, request| {
            let admitted = limiter.try_acquire();
            let inner = inner.clone();
            async move {
                admitted?;
                inner.call(ctx, request).await
            }
        })
    }
}
