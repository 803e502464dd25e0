//! 调用上下文：沿调用链按值传递的请求级只读元数据。
//!
//! # 教案式说明
//! - **意图 (Why)**：流程标识、截止时间与对端地址需要穿过服务端、客户端管线的每一层，
//!   显式的上下文对象让这些数据在编译期可见，而不是藏在线程局部变量里；
//! - **契约 (What)**：`CallContext` 为 `Clone` 的轻量值，复制成本只有一次 `Arc` 计数；
//!   所有 `with_*` 方法返回新值，原上下文保持不变；
//! - **实现 (How)**：截止时间使用 `tokio::time::Instant`，测试可借助暂停时钟推进时间。

use std::{net::SocketAddr, time::Duration};

use tokio::time::Instant;

use crate::flow::FlowId;

/// 一次调用的上下文。
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    flow: Option<FlowId>,
    deadline: Option<Instant>,
    peer: Option<SocketAddr>,
}

impl CallContext {
    /// 创建空上下文：无流程标识、无截止时间、无对端地址。
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前流程标识。
    pub fn flow(&self) -> Option<&FlowId> {
        self.flow.as_ref()
    }

    pub(crate) fn set_flow(mut self, flow: FlowId) -> Self {
        self.flow = Some(flow);
        self
    }

    /// 截止时间。
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 设置截止时间；若已存在更早的截止时间则保留更早者。
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// 以当前时刻加 `timeout` 作为截止时间；超出时钟表示范围时视为没有截止时间。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// 距截止时间的剩余预算；没有截止时间时返回 `None`。
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// 截止时间是否已经到达。
    pub fn is_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// 发起方地址（仅服务端可用）。
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn with_peer(mut self, peer: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let now = Instant::now();
        let ctx = CallContext::new()
            .with_deadline(now + Duration::from_secs(1))
            .with_deadline(now + Duration::from_secs(5));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(ctx.is_expired(), "推进时钟后截止时间应当已到");
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_timeout_leaves_deadline_unset() {
        let ctx = CallContext::new().with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(!ctx.is_expired());

        let bounded = CallContext::new()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::MAX);
        assert!(bounded.deadline().is_some(), "已有的截止时间不受影响");
    }

    #[test]
    fn empty_context_never_expires() {
        let ctx = CallContext::new();
        assert!(!ctx.is_expired());
        assert!(ctx.remaining().is_none());
        assert!(ctx.flow().is_none());
    }
}
