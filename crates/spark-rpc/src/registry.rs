//! # registry 模块说明
//!
//! ## 角色定位（Why）
//! - 配置只能以字符串引用类型：请求/响应消息、处理器类、处理器接口；
//!   注册表把这些字符串解析为可构造的类型描述；
//! - 服务端注册凭此纯粹从配置实例化处理器与接口契约，网关凭此在调用期构造请求实例。
//!
//! ## 生命周期（What）
//! - 初始化阶段以 `&mut self` 写入，随后以 `Arc<TypeRegistry>` 共享；
//!   此后只读，查找不需要任何锁；
//! - 不提供删除操作。
//!
//! ## 标识规则
//! - 稳定标识为 `std::any::type_name::<T>()`；
//! - 同时登记声明名（`Message::NAME`、`Handler::NAME`、`ServiceContract::NAME`），
//!   `resolve` 接受任意一种；
//! - 同一具体类型或同一名称重复登记返回 `AlreadyRegistered`。

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use crate::{
    error::{RpcError, RpcResult},
    handler::{self, Handler, HandlerObject, ServiceContract},
    message::{BoxMessage, Message},
};

/// 描述的类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Message,
    Handler,
    Contract,
}

#[derive(Clone, Copy)]
enum Constructor {
    Message(fn() -> BoxMessage),
    Handler(fn() -> Arc<dyn HandlerObject>),
    Contract(&'static [&'static str]),
}

fn construct_message<T: Message>() -> BoxMessage {
    Box::new(T::default())
}

/// 可构造的类型描述。
#[derive(Clone)]
pub struct TypeDescriptor {
    id: &'static str,
    declared_name: &'static str,
    type_id: TypeId,
    constructor: Constructor,
}

impl TypeDescriptor {
    /// 消息类型描述。
    pub fn message<T: Message>() -> Self {
        Self {
            id: type_name::<T>(),
            declared_name: T::NAME,
            type_id: TypeId::of::<T>(),
            constructor: Constructor::Message(construct_message::<T>),
        }
    }

    /// 处理器类型描述。
    pub fn handler<H: Handler>() -> Self {
        Self {
            id: type_name::<H>(),
            declared_name: H::NAME,
            type_id: TypeId::of::<H>(),
            constructor: Constructor::Handler(handler::instantiate::<H>),
        }
    }

    /// 处理器接口描述。
    pub fn contract<C: ServiceContract>() -> Self {
        Self {
            id: type_name::<C>(),
            declared_name: C::NAME,
            type_id: TypeId::of::<C>(),
            constructor: Constructor::Contract(C::METHODS),
        }
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn declared_name(&self) -> &'static str {
        self.declared_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn kind(&self) -> TypeKind {
        match self.constructor {
            Constructor::Message(_) => TypeKind::Message,
            Constructor::Handler(_) => TypeKind::Handler,
            Constructor::Contract(_) => TypeKind::Contract,
        }
    }

    /// 构造零值消息。
    pub fn new_message(&self) -> RpcResult<BoxMessage> {
        match self.constructor {
            Constructor::Message(construct) => Ok(construct()),
            _ => Err(self.kind_mismatch("message type")),
        }
    }

    /// 构造处理器实例。
    pub fn new_handler(&self) -> RpcResult<Arc<dyn HandlerObject>> {
        match self.constructor {
            Constructor::Handler(construct) => Ok(construct()),
            _ => Err(self.kind_mismatch("handler")),
        }
    }

    /// 接口要求的方法名。
    pub fn contract_methods(&self) -> RpcResult<&'static [&'static str]> {
        match self.constructor {
            Constructor::Contract(methods) => Ok(methods),
            _ => Err(self.kind_mismatch("handler contract")),
        }
    }

    fn kind_mismatch(&self, kind: &'static str) -> RpcError {
        RpcError::NotFound {
            kind,
            name: self.id.to_owned(),
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("id", &self.id)
            .field("declared_name", &self.declared_name)
            .field("kind", &self.kind())
            .finish()
    }
}

/// 类型注册表。
#[derive(Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, Arc<TypeDescriptor>>,
    by_name: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记类型描述。
    ///
    /// - **契约 (What)**：失败时注册表保持原状；成功返回共享描述。
    pub fn register(&mut self, descriptor: TypeDescriptor) -> RpcResult<Arc<TypeDescriptor>> {
        if self.by_type.contains_key(&descriptor.type_id) {
            return Err(RpcError::AlreadyRegistered {
                kind: "type",
                name: descriptor.id.to_owned(),
            });
        }
        let mut names = vec![descriptor.id];
        if !descriptor.declared_name.is_empty() && descriptor.declared_name != descriptor.id {
            names.push(descriptor.declared_name);
        }
        if let Some(taken) = names.iter().find(|name| self.by_name.contains_key(**name)) {
            return Err(RpcError::AlreadyRegistered {
                kind: "type name",
                name: (*taken).to_owned(),
            });
        }

        let descriptor = Arc::new(descriptor);
        self.by_type.insert(descriptor.type_id, descriptor.clone());
        for name in names {
            self.by_name.insert(name.to_owned(), descriptor.clone());
        }
        Ok(descriptor)
    }

    pub fn register_message<T: Message>(&mut self) -> RpcResult<Arc<TypeDescriptor>> {
        self.register(TypeDescriptor::message::<T>())
    }

    pub fn register_handler<H: Handler>(&mut self) -> RpcResult<Arc<TypeDescriptor>> {
        self.register(TypeDescriptor::handler::<H>())
    }

    pub fn register_contract<C: ServiceContract>(&mut self) -> RpcResult<Arc<TypeDescriptor>> {
        self.register(TypeDescriptor::contract::<C>())
    }

    /// 为已登记的类型追加一个声明名。
    pub fn alias(&mut self, name: &str, target: &str) -> RpcResult<()> {
        if self.by_name.contains_key(name) {
            return Err(RpcError::AlreadyRegistered {
                kind: "type name",
                name: name.to_owned(),
            });
        }
        let descriptor = self.resolve(target)?;
        self.by_name.insert(name.to_owned(), descriptor);
        Ok(())
    }

    /// 按标识或声明名解析。
    pub fn resolve(&self, name: &str) -> RpcResult<Arc<TypeDescriptor>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| RpcError::NotFound {
                kind: "type",
                name: name.to_owned(),
            })
    }

    /// 按具体类型解析。
    pub fn resolve_type<T: 'static>(&self) -> Option<Arc<TypeDescriptor>> {
        self.by_type.get(&TypeId::of::<T>()).cloned()
    }

    /// 按名称构造零值消息实例。
    pub fn instantiate(&self, name: &str) -> RpcResult<BoxMessage> {
        self.resolve(name)?.new_message()
    }

    /// 按名称构造处理器实例。
    pub fn instantiate_handler(&self, name: &str) -> RpcResult<Arc<dyn HandlerObject>> {
        self.resolve(name)?.new_handler()
    }

    /// 已登记的类型数量（不含别名）。
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("names", &names).finish()
    }
}
