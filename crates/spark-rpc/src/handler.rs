//! # handler 模块说明
//!
//! ## 角色定位（Why）
//! - 业务方只编写处理器方法与声明式注册信息，框架负责按名称把远程方法绑定到处理器方法上；
//! - 绑定在注册期一次完成：方法是否存在、签名是否匹配都在此时检查，
//!   把“运行期找不到方法”转化为“启动期配置错误”。
//!
//! ## 契约（What）
//! - [`Handler`]：处理器类型的静态契约，`methods()` 返回按名称登记的方法表；
//! - [`ServiceContract`]：处理器接口，列出处理器必须提供的方法名；
//! - [`HandlerObject`]：擦除具体类型后的处理器实例，由类型注册表按字符串标识构造；
//! - [`bind_method`]：名称 + 请求/响应类型描述 → 带熔断保护的 [`Operation`]。
//!
//! ## 方法形态
//! ```ignore
//! impl Handler for LoginService {
//!     const NAME: &'static str = "service.login.LoginService";
//!     fn methods() -> MethodTable<Self> {
//!         MethodTable::new().method("Login", Self::login)
//!     }
//! }
//!
//! impl LoginService {
//!     async fn login(self: Arc<Self>, ctx: CallContext, req: LoginRequest) -> RpcResult<LoginReply> { .. }
//! }
//! ```

use std::{any::TypeId, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    context::CallContext,
    error::{RpcError, RpcResult},
    message::{BoxMessage, Message, SharedMessage, downcast_shared},
    operation::Operation,
    registry::TypeDescriptor,
    resilience::{BreakerLayer, BreakerSettings},
};

/// 处理器类型的静态契约。
pub trait Handler: Default + Send + Sync + 'static {
    /// 配置中引用该处理器时使用的声明名。
    const NAME: &'static str;

    /// 处理器对外提供的方法表。
    fn methods() -> MethodTable<Self>;
}

/// 处理器接口：处理器必须提供的方法集合。
pub trait ServiceContract: 'static {
    const NAME: &'static str;
    const METHODS: &'static [&'static str];
}

type ErasedMethod<H> = Arc<
    dyn Fn(Arc<H>, CallContext, SharedMessage) -> BoxFuture<'static, RpcResult<BoxMessage>>
        + Send
        + Sync,
>;

struct MethodEntry<H> {
    name: &'static str,
    request: TypeId,
    response: TypeId,
    call: ErasedMethod<H>,
}

/// 处理器方法表。
pub struct MethodTable<H> {
    entries: Vec<MethodEntry<H>>,
}

impl<H: Handler> Default for MethodTable<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H: Handler> MethodTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一个方法：`f(self: Arc<H>, ctx, req) -> Future<Output = RpcResult<Resp>>`。
    pub fn method<Req, Resp, F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        Req: Message,
        Resp: Message,
        F: Fn(Arc<H>, CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Resp>> + Send + 'static,
    {
        let call: ErasedMethod<H> =
            Arc::new(move |handler: Arc<H>, ctx: CallContext, request: SharedMessage| {
                let future: BoxFuture<'static, RpcResult<BoxMessage>> =
                    match downcast_shared::<Req>(request) {
                        Ok(request) => f(handler, ctx, request)
                            .map(|result| result.map(|response| Box::new(response) as BoxMessage))
                            .boxed(),
                        Err(err) => futures::future::ready(Err(err)).boxed(),
                    };
                future
            });
        self.entries.push(MethodEntry {
            name,
            request: TypeId::of::<Req>(),
            response: TypeId::of::<Resp>(),
            call,
        });
        self
    }

    fn find(&self, wanted: &str) -> Option<&MethodEntry<H>> {
        self.entries
            .iter()
            .find(|entry| entry.name == wanted)
            .or_else(|| self.entries.iter().find(|entry| same_name(entry.name, wanted)))
    }
}

/// 首字母大小写不敏感的方法名比较（`login` 可以绑定 `Login`）。
pub(crate) fn same_name(declared: &str, wanted: &str) -> bool {
    let mut declared_chars = declared.chars();
    let mut wanted_chars = wanted.chars();
    match (declared_chars.next(), wanted_chars.next()) {
        (Some(a), Some(b)) => {
            a.to_lowercase().eq(b.to_lowercase()) && declared_chars.as_str() == wanted_chars.as_str()
        }
        _ => false,
    }
}

/// 擦除具体类型后的处理器实例。
pub trait HandlerObject: Send + Sync {
    fn handler_name(&self) -> &'static str;

    /// 处理器提供的全部方法名。
    fn method_names(&self) -> Vec<&'static str>;

    /// 是否提供该方法（首字母大小写不敏感）。
    fn has_method(&self, method: &str) -> bool;

    /// 按名称与请求/响应类型绑定方法，返回未加熔断的原始操作。
    fn bind_raw(&self, method: &str, request: TypeId, response: TypeId) -> RpcResult<Operation>;
}

struct BoundHandler<H: Handler> {
    instance: Arc<H>,
    table: MethodTable<H>,
}

impl<H: Handler> HandlerObject for BoundHandler<H> {
    fn handler_name(&self) -> &'static str {
        H::NAME
    }

    fn method_names(&self) -> Vec<&'static str> {
        self.table.entries.iter().map(|entry| entry.name).collect()
    }

    fn has_method(&self, method: &str) -> bool {
        self.table.find(method).is_some()
    }

    fn bind_raw(&self, method: &str, request: TypeId, response: TypeId) -> RpcResult<Operation> {
        let entry = self
            .table
            .find(method)
            .filter(|entry| entry.request == request && entry.response == response)
            .ok_or_else(|| RpcError::MethodNotFound {
                method: format!("{}.{method}", H::NAME),
            })?;
        let instance = self.instance.clone();
        let call = entry.call.clone();
        Ok(Operation::new(move |ctx, request| {
            call(instance.clone(), ctx, request)
        }))
    }
}

/// 构造处理器的零值实例并连同方法表一起擦除。
pub fn instantiate<H: Handler>() -> Arc<dyn HandlerObject> {
    Arc::new(BoundHandler {
        instance: Arc::new(H::default()),
        table: H::methods(),
    })
}

/// 绑定方法并套上按方法独立的熔断器（默认配置）。
pub fn bind_method(
    handler: &dyn HandlerObject,
    method: &str,
    request: &TypeDescriptor,
    response: &TypeDescriptor,
) -> RpcResult<Operation> {
    let raw = handler.bind_raw(method, request.type_id(), response.type_id())?;
    Ok(raw.layer(&BreakerLayer::new(BreakerSettings::named(method))))
}
