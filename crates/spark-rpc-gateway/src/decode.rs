//! HTTP 请求到松散值袋的解码。
//!
//! # 教案式说明
//! - **契约 (What)**：
//!   - 任意动词都解析查询串；非 `GET` 动词额外解析 `application/x-www-form-urlencoded` 请求体；
//!   - `Content-Type` 为 `application/json` 或 `text/json` 时，请求体必须是 JSON 对象，
//!     其键覆盖前两者得到的同名键；
//!   - 单个值记为字符串，重复键记为字符串列表；
//!   - 值袋中没有 [`METHOD_KEY`] 时以 URL 路径补齐；
//! - **实现 (How)**：表单与查询串统一走 `url::form_urlencoded`，保证两者的转义规则一致。

use axum::http::{HeaderMap, Method, Uri, header::CONTENT_TYPE};
use serde_json::{Map, Value};
use spark_rpc::{RpcError, RpcResult};

/// 值袋中承载外部方法名的键。
pub const METHOD_KEY: &str = "method";

/// 松散值袋：字符串或字符串列表，JSON 请求体可以带入任意 JSON 值。
pub type ValueBag = Map<String, Value>;

/// 把一个 HTTP 请求解码为值袋。
pub fn request_bag(method: &Method, uri: &Uri, headers: &HeaderMap, body: &[u8]) -> RpcResult<ValueBag> {
    let mut bag = ValueBag::new();
    if method != Method::GET && content_type_is(headers, &["application/x-www-form-urlencoded"]) {
        merge_pairs(&mut bag, body);
    }
    if let Some(query) = uri.query() {
        merge_pairs(&mut bag, query.as_bytes());
    }

    if method != Method::GET && content_type_is(headers, &["application/json", "text/json"]) && !body.is_empty() {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(object)) => bag.extend(object),
            Ok(other) => {
                return Err(RpcError::Decode {
                    context: "http body".to_owned(),
                    detail: format!("expected a JSON object, found {}", kind_of(&other)),
                });
            }
            Err(err) => {
                return Err(RpcError::Decode {
                    context: "http body".to_owned(),
                    detail: err.to_string(),
                });
            }
        }
    }

    if !bag.contains_key(METHOD_KEY) {
        bag.insert(METHOD_KEY.to_owned(), Value::String(uri.path().to_owned()));
    }
    Ok(bag)
}

/// 读取值袋中的外部方法名；列表取第一个元素。
pub fn method_of(bag: &ValueBag) -> Option<&str> {
    match bag.get(METHOD_KEY)? {
        Value::String(name) => Some(name),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
}

fn merge_pairs(bag: &mut ValueBag, raw: &[u8]) {
    for (key, value) in url::form_urlencoded::parse(raw) {
        let value = Value::String(value.into_owned());
        match bag.get_mut(key.as_ref()) {
            None => {
                bag.insert(key.into_owned(), value);
            }
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
}

fn content_type_is(headers: &HeaderMap, accepted: &[&str]) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .is_some_and(|essence| accepted.contains(&essence.as_str()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
