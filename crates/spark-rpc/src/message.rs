//! # message 模块说明
//!
//! ## 角色定位（Why）
//! - 服务端分发表、客户端管线与网关只在运行期知道请求/响应的类型名，
//!   需要一种类型擦除后的消息表示在各阶段之间传递；
//! - [`Message`] 是业务消息类型实现的静态契约，[`DynMessage`] 是框架内部流转的擦除形态。
//!
//! ## 契约（What）
//! - 载荷编码为 JSON 字节，线上协议把它当作不透明字节处理；
//! - `decode_in_place` 要求完整覆盖实例内容，空实例 + 解码 = 反序列化结果；
//! - 擦除后可通过 [`downcast_shared`]/[`downcast_box`] 恢复具体类型，类型不符返回 `Decode` 错误。

use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    codec,
    error::{RpcError, RpcResult},
};

/// 业务消息需要实现的静态契约。
///
/// `NAME` 是配置中引用该类型时使用的声明名（例如 `login.LoginRequest`）。
pub trait Message:
    Serialize + DeserializeOwned + Default + Clone + fmt::Debug + Send + Sync + 'static
{
    const NAME: &'static str;
}

/// 类型擦除后的消息。
pub trait DynMessage: Any + Send + Sync + fmt::Debug {
    /// 声明名。
    fn message_name(&self) -> &'static str;

    /// 编码为线上载荷。
    fn encode(&self) -> RpcResult<Bytes>;

    /// 以线上载荷覆盖当前实例。
    fn decode_in_place(&mut self, payload: &[u8]) -> RpcResult<()>;

    /// 以宽松语义把 JSON 值写入当前实例。
    fn decode_lenient(&mut self, value: Value) -> RpcResult<()>;

    /// 转换为 JSON 值。
    fn to_json(&self) -> RpcResult<Value>;

    /// 审计日志使用的单行 JSON 文本；序列化失败时返回占位说明而不是报错。
    fn to_log_string(&self) -> String;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// 在管线各阶段之间共享的请求消息。
pub type SharedMessage = Arc<dyn DynMessage>;

/// 处理器产出的响应消息。
pub type BoxMessage = Box<dyn DynMessage>;

impl<T: Message> DynMessage for T {
    fn message_name(&self) -> &'static str {
        T::NAME
    }

    fn encode(&self) -> RpcResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| RpcError::Encode {
                context: T::NAME.to_owned(),
                detail: err.to_string(),
            })
    }

    fn decode_in_place(&mut self, payload: &[u8]) -> RpcResult<()> {
        *self = serde_json::from_slice(payload).map_err(|err| RpcError::Decode {
            context: T::NAME.to_owned(),
            detail: err.to_string(),
        })?;
        Ok(())
    }

    fn decode_lenient(&mut self, value: Value) -> RpcResult<()> {
        *self = codec::from_value_lenient(value).map_err(|err| RpcError::Decode {
            context: T::NAME.to_owned(),
            detail: err.to_string(),
        })?;
        Ok(())
    }

    fn to_json(&self) -> RpcResult<Value> {
        serde_json::to_value(self).map_err(|err| RpcError::Encode {
            context: T::NAME.to_owned(),
            detail: err.to_string(),
        })
    }

    fn to_log_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| format!("<unserializable: {err}>"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

fn mismatch<T: Message>(found: &str) -> RpcError {
    RpcError::Decode {
        context: T::NAME.to_owned(),
        detail: format!("expected message `{}`, found `{found}`", T::NAME),
    }
}

/// 从共享消息恢复具体类型；引用计数为 1 时不发生复制。
pub fn downcast_shared<T: Message>(message: SharedMessage) -> RpcResult<T> {
    let found = message.message_name();
    message
        .into_any_arc()
        .downcast::<T>()
        .map(Arc::unwrap_or_clone)
        .map_err(|_| mismatch::<T>(found))
}

/// 从独占消息恢复具体类型。
pub fn downcast_box<T: Message>(message: BoxMessage) -> RpcResult<T> {
    let found = message.message_name();
    message
        .into_any()
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| mismatch::<T>(found))
}
