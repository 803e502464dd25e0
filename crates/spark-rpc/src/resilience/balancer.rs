//! 轮询负载均衡。
//!
//! 每次调用原子地推进游标并分发到下一个端点，越界时回绕；选择过程不读取熔断状态，
//! 打开的熔断器只会让那一次调用快速失败，由外层重试补偿。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::{error::RpcError, operation::Operation};

/// 一组端点操作上的轮询选择器。
pub struct RoundRobin {
    method: Arc<str>,
    endpoints: Vec<Operation>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(method: &str, endpoints: Vec<Operation>) -> Self {
        Self {
            method: Arc::from(method),
            endpoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// 选出下一个端点；端点集合为空时返回 `None`。
    pub fn next(&self) -> Option<&Operation> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        self.endpoints.get(index)
    }

    /// 转换为统一操作：每次调用选择一个端点并转发。
    pub fn into_operation(self) -> Operation {
        let selector = Arc::new(self);
        Operation::new(move |ctx, request| {
            let chosen = selector.next().cloned();
            let method = selector.method.clone();
            async move {
                match chosen {
                    Some(endpoint) => endpoint.call(ctx, request).await,
                    None => Err(RpcError::NoAvailableBackend {
                        client: method.to_string(),
                    }),
                }
            }
        })
    }
}
