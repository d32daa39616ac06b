//! 投递任务与工作队列
//!
//! - `DeliveryTask`：一次（事件, 客户端）投递单元，携带已解析的出站消息与失败计数；
//! - `TaskQueue`/`TaskReceiver`：基于 `tokio::sync::mpsc` 的 FIFO，支持无界与有界两种形态；
//!   发送队列与重试队列均由此构造。
//!
use crate::config::QueueKind;
use crate::error::{BusError, BusResult};
use crate::event::OutboundEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

pub const SEND_QUEUE: &str = "send";
pub const RETRY_QUEUE: &str = "retry";

/// 投递任务
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    client_id: String,
    message: Arc<OutboundEvent>,
    attempts: u32,
}

impl DeliveryTask {
    pub fn new(client_id: impl Into<String>, message: Arc<OutboundEvent>) -> Self {
        Self {
            client_id: client_id.into(),
            message,
            attempts: 0,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn event_name(&self) -> &str {
        self.message.name()
    }

    pub fn message(&self) -> &Arc<OutboundEvent> {
        &self.message
    }

    /// 已失败的投递次数
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
}

#[derive(Clone, Debug)]
enum Tx {
    Unbounded(mpsc::UnboundedSender<DeliveryTask>),
    Bounded(mpsc::Sender<DeliveryTask>),
}

#[derive(Debug)]
enum Rx {
    Unbounded(mpsc::UnboundedReceiver<DeliveryTask>),
    Bounded(mpsc::Receiver<DeliveryTask>),
}

/// 创建一条任务队列
pub fn task_queue(name: &'static str, kind: QueueKind) -> (TaskQueue, TaskReceiver) {
    let (tx, rx) = match kind {
        QueueKind::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Tx::Unbounded(tx), Rx::Unbounded(rx))
        }
        QueueKind::Bounded { capacity } => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Tx::Bounded(tx), Rx::Bounded(rx))
        }
    };
    (TaskQueue { name, tx }, TaskReceiver { rx })
}

/// 队列发送端（可克隆）
#[derive(Clone, Debug)]
pub struct TaskQueue {
    name: &'static str,
    tx: Tx,
}

/// `offer` 失败原因
#[derive(Debug)]
pub enum OfferError {
    Full(DeliveryTask),
    Closed(DeliveryTask),
}

impl TaskQueue {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 入队；有界队列满时等待。接收端已关闭（总线停止）时返回 `QueueClosed`
    pub async fn put(&self, task: DeliveryTask) -> BusResult<()> {
        let sent = match &self.tx {
            Tx::Unbounded(tx) => tx.send(task).is_ok(),
            Tx::Bounded(tx) => tx.send(task).await.is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(BusError::QueueClosed { queue: self.name })
        }
    }

    /// 非阻塞入队
    pub fn offer(&self, task: DeliveryTask) -> Result<(), OfferError> {
        match &self.tx {
            Tx::Unbounded(tx) => tx.send(task).map_err(|e| OfferError::Closed(e.0)),
            Tx::Bounded(tx) => tx.try_send(task).map_err(|e| match e {
                TrySendError::Full(t) => OfferError::Full(t),
                TrySendError::Closed(t) => OfferError::Closed(t),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Tx::Unbounded(tx) => tx.is_closed(),
            Tx::Bounded(tx) => tx.is_closed(),
        }
    }
}

/// 队列接收端（单消费者）
#[derive(Debug)]
pub struct TaskReceiver {
    rx: Rx,
}

impl TaskReceiver {
    /// 等待下一个任务；所有发送端释放后返回 `None`
    pub async fn take(&mut self) -> Option<DeliveryTask> {
        match &mut self.rx {
            Rx::Unbounded(rx) => rx.recv().await,
            Rx::Bounded(rx) => rx.recv().await,
        }
    }

    /// 非阻塞取出调用时刻队列中的全部任务
    pub fn drain(&mut self) -> Vec<DeliveryTask> {
        let pending = self.len();
        let mut batch = Vec::with_capacity(pending);
        for _ in 0..pending {
            let next = match &mut self.rx {
                Rx::Unbounded(rx) => rx.try_recv().ok(),
                Rx::Bounded(rx) => rx.try_recv().ok(),
            };
            match next {
                Some(task) => batch.push(task),
                None => break,
            }
        }
        batch
    }

    pub fn len(&self) -> usize {
        match &self.rx {
            Rx::Unbounded(rx) => rx.len(),
            Rx::Bounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
