//! 负载转换（PayloadConverter）
//!
//! 非文本负载在发布时由有序转换器列表转换一次：按注册顺序遍历，首个
//! `supports` 命中的转换器生效；无匹配或转换失败时负载为 `None`，投递照常进行。
//!
use crate::error::{BusError, BusResult};
use crate::event::{Event, Payload};
use std::sync::Arc;
use tracing::warn;

/// 负载转换器
pub trait PayloadConverter: Send + Sync {
    /// 是否支持该事件的负载
    fn supports(&self, event: &Event) -> bool;
    /// 将负载转换为文本
    fn convert(&self, event: &Event) -> BusResult<String>;
}

/// 将 `Payload::Json` 序列化为 JSON 文本
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonConverter;

impl PayloadConverter for JsonConverter {
    fn supports(&self, event: &Event) -> bool {
        matches!(event.payload(), Payload::Json(_))
    }

    fn convert(&self, event: &Event) -> BusResult<String> {
        match event.payload() {
            Payload::Json(value) => Ok(serde_json::to_string(value)?),
            _ => Err(BusError::conversion("payload is not json")),
        }
    }
}

/// 有序转换器链
#[derive(Clone, Default)]
pub struct ConverterChain {
    converters: Vec<Arc<dyn PayloadConverter>>,
}

impl ConverterChain {
    pub fn new(converters: Vec<Arc<dyn PayloadConverter>>) -> Self {
        Self { converters }
    }

    /// 解析事件的出站文本：文本负载原样返回，其余交由首个匹配的转换器
    pub fn resolve(&self, event: &Event) -> Option<String> {
        if let Some(text) = event.payload().as_text() {
            return Some(text.to_string());
        }

        let converter = self.converters.iter().find(|c| c.supports(event))?;
        match converter.convert(event) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(event = %event.name(), error = %err, "payload conversion failed");
                None
            }
        }
    }
}
