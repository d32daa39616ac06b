//! 客户端连接（Connection）
//!
//! 总线只通过 `Connection` 协议与传输层交互：`send` 投递一条出站消息，
//! `close_with_error` 以错误关闭连接。总线从不关心底层传输细节。
//!
//! 本模块同时提供基于 `tokio::sync::mpsc` 的进程内实现：
//! `ChannelConnection` 注册进总线，`EventStream` 交给传输层（HTTP 流式响应、
//! WebSocket 等）消费。`EventStream` 可携带空闲超时，超时后自行关闭，
//! 之后的投递失败并走与普通失败相同的重试/注销路径。
//!
use crate::error::{BusError, BusResult};
use crate::event::OutboundEvent;
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// 一条存活的客户端出站连接
#[async_trait]
pub trait Connection: Send + Sync {
    /// 投递一条消息；任何错误都视为本次投递失败
    async fn send(&self, message: Arc<OutboundEvent>) -> BusResult<()>;

    /// 以错误关闭连接
    fn close_with_error(&self, error: &BusError);
}

/// 连接两端共享的关闭状态
#[derive(Default)]
struct StreamState {
    closed: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl StreamState {
    fn close(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            let mut guard = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            guard.get_or_insert(reason);
        }
        self.closed.cancel();
    }

    fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// 创建一对通道连接：发送端注册到总线，接收端交给传输层
pub fn channel(
    client_id: impl Into<String>,
    buffer: usize,
    idle_timeout: Option<Duration>,
) -> (ChannelConnection, EventStream) {
    let client_id = client_id.into();
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let state = Arc::new(StreamState::default());

    let connection = ChannelConnection {
        client_id: client_id.clone(),
        tx,
        state: state.clone(),
        send_timeout: None,
    };
    let stream = EventStream {
        client_id,
        rx,
        state,
        idle_timeout,
    };
    (connection, stream)
}

/// 通道连接的发送端
///
/// 缓冲区满时等待接收端腾出空间；设置了发送超时则超时视为本次投递失败。
/// 接收端关闭或被丢弃时立即失败。
pub struct ChannelConnection {
    client_id: String,
    tx: mpsc::Sender<Arc<OutboundEvent>>,
    state: Arc<StreamState>,
    send_timeout: Option<Duration>,
}

impl ChannelConnection {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// 等待缓冲区空间的上限；未设置时一直等待到有空间或连接关闭
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = Some(send_timeout);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled() || self.tx.is_closed()
    }

    fn closed_error(&self) -> BusError {
        BusError::ConnectionClosed {
            client_id: self.client_id.clone(),
        }
    }

    async fn send_or_closed(&self, message: Arc<OutboundEvent>) -> BusResult<()> {
        tokio::select! {
            _ = self.state.closed.cancelled() => Err(self.closed_error()),
            sent = self.tx.send(message) => sent.map_err(|_| self.closed_error()),
        }
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn send(&self, message: Arc<OutboundEvent>) -> BusResult<()> {
        if self.state.closed.is_cancelled() {
            return Err(self.closed_error());
        }

        match self.send_timeout {
            Some(limit) => tokio::time::timeout(limit, self.send_or_closed(message))
                .await
                .map_err(|_| BusError::connection(&self.client_id, "send timed out"))?,
            None => self.send_or_closed(message).await,
        }
    }

    fn close_with_error(&self, error: &BusError) {
        self.state.close(Some(error.to_string()));
    }
}

/// 一次接收等待的结果
enum Next {
    Message(Arc<OutboundEvent>),
    Idle,
    Disconnected,
    Closed,
}

/// 通道连接的接收端
pub struct EventStream {
    client_id: String,
    rx: mpsc::Receiver<Arc<OutboundEvent>>,
    state: Arc<StreamState>,
    idle_timeout: Option<Duration>,
}

impl EventStream {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// 接收下一条消息
    ///
    /// 连接被关闭（`close_with_error`、空闲超时或 `close`）后，先交付缓冲区中
    /// 已有的消息，取尽后返回 `None`。
    pub async fn recv(&mut self) -> Option<Arc<OutboundEvent>> {
        if self.state.closed.is_cancelled() {
            return self.drain_closed();
        }

        let closed = self.state.closed.clone();
        let next = tokio::select! {
            msg = Self::recv_idle(&mut self.rx, self.idle_timeout) => msg,
            _ = closed.cancelled() => Next::Closed,
        };

        match next {
            Next::Message(msg) => Some(msg),
            // 空闲超时：正常关闭，不记录错误
            Next::Idle => {
                self.close();
                None
            }
            Next::Disconnected => None,
            Next::Closed => self.drain_closed(),
        }
    }

    async fn recv_idle(
        rx: &mut mpsc::Receiver<Arc<OutboundEvent>>,
        idle_timeout: Option<Duration>,
    ) -> Next {
        let received = match idle_timeout {
            Some(d) => match tokio::time::timeout(d, rx.recv()).await {
                Ok(msg) => msg,
                Err(_elapsed) => return Next::Idle,
            },
            None => rx.recv().await,
        };
        received.map_or(Next::Disconnected, Next::Message)
    }

    // 关闭后拒绝新消息，但已缓冲的消息照常交付
    fn drain_closed(&mut self) -> Option<Arc<OutboundEvent>> {
        self.rx.close();
        self.rx.try_recv().ok()
    }

    /// 由传输层主动关闭（例如检测到客户端断开）
    pub fn close(&mut self) {
        self.state.close(None);
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.is_cancelled()
    }

    /// 以错误关闭时记录的原因
    pub fn close_reason(&self) -> Option<String> {
        self.state.reason()
    }

    /// 转换为 'static 生命周期的消息流，便于交给 HTTP 框架
    pub fn into_stream(self) -> BoxStream<'static, Arc<OutboundEvent>> {
        futures_util::stream::unfold(self, |mut s| async move {
            s.recv().await.map(|msg| (msg, s))
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn msg(data: &str) -> Arc<OutboundEvent> {
        Arc::new(OutboundEvent::from_event(
            &Event::of("news", data),
            Some(data.to_string()),
        ))
    }

    #[tokio::test]
    async fn send_then_recv() {
        let (conn, mut stream) = channel("c1", 4, None);
        conn.send(msg("a")).await.unwrap();
        conn.send(msg("b")).await.unwrap();

        assert_eq!(stream.recv().await.unwrap().data(), Some("a"));
        assert_eq!(stream.recv().await.unwrap().data(), Some("b"));
        assert_eq!(stream.client_id(), "c1");
    }

    #[tokio::test]
    async fn full_buffer_waits_for_reader() {
        let (conn, mut stream) = channel("c1", 1, None);
        conn.send(msg("a")).await.unwrap();

        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(m) = stream.recv().await {
                seen.push(m.data().unwrap_or_default().to_string());
            }
            seen
        });
        conn.send(msg("b")).await.unwrap();
        conn.send(msg("c")).await.unwrap();
        drop(conn);

        assert_eq!(reader.await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_buffer_send_times_out() {
        let (conn, mut stream) = channel("c1", 1, None);
        let conn = conn.with_send_timeout(Duration::from_secs(1));
        conn.send(msg("a")).await.unwrap();

        let err = conn.send(msg("b")).await.unwrap_err();
        assert!(matches!(err, BusError::Connection { .. }));
        // 超时不关闭连接，已缓冲的消息仍可读取
        assert!(!stream.is_closed());
        assert_eq!(stream.recv().await.unwrap().data(), Some("a"));
    }

    #[tokio::test]
    async fn buffered_messages_survive_close() {
        let (conn, mut stream) = channel("c1", 4, None);
        conn.send(msg("a")).await.unwrap();
        conn.send(msg("b")).await.unwrap();
        conn.close_with_error(&BusError::connection("c1", "broken pipe"));

        assert_eq!(stream.recv().await.unwrap().data(), Some("a"));
        assert_eq!(stream.recv().await.unwrap().data(), Some("b"));
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_sender() {
        let (conn, mut stream) = channel("c1", 1, None);
        let conn = Arc::new(conn);
        conn.send(msg("a")).await.unwrap();

        let sender = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.send(msg("b")).await })
        };
        tokio::task::yield_now().await;
        stream.close();

        assert!(matches!(
            sender.await.unwrap(),
            Err(BusError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn close_with_error_ends_stream() {
        let (conn, mut stream) = channel("c1", 4, None);
        conn.close_with_error(&BusError::connection("c1", "broken pipe"));

        assert!(stream.recv().await.is_none());
        assert!(stream.is_closed());
        assert!(stream.close_reason().unwrap().contains("broken pipe"));
        assert!(matches!(
            conn.send(msg("a")).await,
            Err(BusError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_stream_fails_send() {
        let (conn, stream) = channel("c1", 4, None);
        drop(stream);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(msg("a")).await,
            Err(BusError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_closes_gracefully() {
        let (conn, mut stream) = channel("c1", 4, Some(Duration::from_secs(5)));
        conn.send(msg("a")).await.unwrap();
        assert!(stream.recv().await.is_some());

        // 无新消息，超时后关闭
        assert!(stream.recv().await.is_none());
        assert!(stream.close_reason().is_none());
        assert!(conn.send(msg("b")).await.is_err());
    }

    #[tokio::test]
    async fn into_stream_yields_until_closed() {
        let (conn, stream) = channel("c1", 4, None);
        conn.send(msg("a")).await.unwrap();
        conn.send(msg("b")).await.unwrap();
        drop(conn);

        let data: Vec<String> = stream
            .into_stream()
            .map(|m| m.data().unwrap_or_default().to_string())
            .collect()
            .await;
        assert_eq!(data, vec!["a", "b"]);
    }
}
