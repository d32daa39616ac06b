//! 事件模型
//!
//! - `Event`：发布到总线的事件（名称、负载、定向/排除客户端），发布后不可变；
//! - `Payload`：已序列化文本、JSON 值或需经转换器处理的不透明对象；
//! - `OutboundEvent`：解析后的出站消息（负载已转换为文本），由所有目标客户端共享。
//!
use bon::Builder;
use serde::Serialize;
use std::any::Any;
use std::borrow::Cow;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::Duration;

/// 未指定事件名时使用的默认事件
pub const DEFAULT_EVENT: &str = "message";

/// 事件负载
#[derive(Clone)]
pub enum Payload {
    /// 已序列化的文本，原样投递
    Text(String),
    /// JSON 值，由转换器序列化
    Json(serde_json::Value),
    /// 不透明对象，由匹配的转换器负责转换
    Object(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 尝试以具体类型访问不透明对象
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// 发布到总线的事件
#[derive(Debug, Clone, Builder)]
pub struct Event {
    /// 事件名（订阅粒度）
    #[builder(into, default = DEFAULT_EVENT.to_string())]
    name: String,
    /// 事件负载
    #[builder(into)]
    payload: Payload,
    /// 定向投递的客户端；为空表示广播给该事件的全部订阅者
    #[builder(default)]
    client_ids: Vec<String>,
    /// 广播时排除的客户端（定向投递时忽略）
    #[builder(default)]
    exclude_client_ids: Vec<String>,
    /// 事件 ID（SSE `id:` 字段）
    #[builder(into)]
    id: Option<String>,
    /// 客户端重连间隔提示（SSE `retry:` 字段）
    retry: Option<Duration>,
    /// 注释行（SSE `:` 行）
    #[builder(into)]
    comment: Option<String>,
}

impl Event {
    /// 以事件名与负载快速构造广播事件
    pub fn of(name: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self::builder().name(name).payload(payload).build()
    }

    /// 构造默认事件名（`message`）下的广播事件
    pub fn message(payload: impl Into<Payload>) -> Self {
        Self::builder().payload(payload).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn client_ids(&self) -> &[String] {
        &self.client_ids
    }

    pub fn exclude_client_ids(&self) -> &[String] {
        &self.exclude_client_ids
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// 出站消息：事件元信息加上已解析的文本负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEvent {
    name: String,
    id: Option<String>,
    retry: Option<Duration>,
    comment: Option<String>,
    data: Option<String>,
}

impl OutboundEvent {
    /// 由事件与（已转换的）文本负载构造出站消息
    pub fn from_event(event: &Event, data: Option<String>) -> Self {
        Self {
            name: event.name.clone(),
            id: event.id.clone(),
            retry: event.retry,
            comment: event.comment.clone(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// 文本负载；无匹配转换器时为 `None`
    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    /// 渲染为 `text/event-stream` 帧
    ///
    /// 默认事件名不输出 `event:` 行；负载按 `\r\n`、`\r`、`\n` 逐行输出 `data:`；
    /// `id`、`event` 中的换行符被去除；以空行结尾。
    pub fn to_sse_frame(&self) -> String {
        let mut frame = String::new();
        if let Some(id) = &self.id {
            let _ = writeln!(frame, "id:{}", single_line(id));
        }
        if self.name != DEFAULT_EVENT {
            let _ = writeln!(frame, "event:{}", single_line(&self.name));
        }
        if let Some(retry) = self.retry {
            let _ = writeln!(frame, "retry:{}", retry.as_millis());
        }
        if let Some(comment) = &self.comment {
            for line in frame_lines(comment) {
                let _ = writeln!(frame, ":{line}");
            }
        }
        // 空文本也输出一行 `data:`，否则客户端不会派发该事件
        if let Some(data) = &self.data {
            for line in frame_lines(data) {
                let _ = writeln!(frame, "data:{line}");
            }
        }
        frame.push('\n');
        frame
    }
}

/// 按 SSE 的行结束符（`\r\n`、`\r`、`\n`）切分，保留空行
fn frame_lines(value: &str) -> impl Iterator<Item = &str> {
    value.split("\r\n").flat_map(|part| part.split(['\r', '\n']))
}

/// 单行字段（`id`、`event`）去掉换行符
fn single_line(value: &str) -> Cow<'_, str> {
    if value.contains(['\r', '\n']) {
        Cow::Owned(value.replace(['\r', '\n'], ""))
    } else {
        Cow::Borrowed(value)
    }
}
