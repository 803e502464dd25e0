//! 统一调用约定：`(上下文, 请求) -> (响应, 错误)`。
//!
//! # 教案式说明
//! - **意图 (Why)**：处理器方法、线上调用、熔断、限流、负载均衡与重试都需要以同一种形态组合，
//!   把每个中间件建模为“操作 → 操作”的变换，构建期按固定顺序叠加即可得到不可变的中间件栈；
//! - **契约 (What)**：
//!   - [`Operation`] 可廉价克隆，内部是 `Arc` 包裹的闭包，适合被多个任务并发调用；
//!   - [`Layer`] 只在构建期执行一次，运行期不再改变组合结构；
//! - **实现 (How)**：返回 `BoxFuture<'static, _>`，调用方可以把 future 交给任意 Tokio 任务。

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    context::CallContext,
    error::RpcResult,
    message::{BoxMessage, SharedMessage},
};

type OperationFn =
    dyn Fn(CallContext, SharedMessage) -> BoxFuture<'static, RpcResult<BoxMessage>> + Send + Sync;

/// 统一形态的可调用操作。
#[derive(Clone)]
pub struct Operation {
    inner: Arc<OperationFn>,
}

impl Operation {
    /// 由异步闭包构造操作。
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, SharedMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<BoxMessage>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: CallContext, request: SharedMessage| f(ctx, request).boxed()),
        }
    }

    /// 执行一次调用。
    pub fn call(&self, ctx: CallContext, request: SharedMessage) -> BoxFuture<'static, RpcResult<BoxMessage>> {
        (self.inner)(ctx, request)
    }

    /// 叠加一层中间件，返回新的操作。
    pub fn layer<L: Layer + ?Sized>(self, layer: &L) -> Operation {
        layer.wrap(self)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

/// 中间件：把一个操作变换为另一个操作。
pub trait Layer: Send + Sync {
    fn wrap(&self, inner: Operation) -> Operation;
}
