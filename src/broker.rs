//! 消息 broker 抽象与进程内实现

use crate::error::BrokerError;
use crate::event::Event;
use crate::topic::Message;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// 托管消息服务的客户端能力：提交消息并等待确认
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// 返回 broker 分配的消息ID
    async fn publish(&self, message: Message) -> Result<String, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// 基于有界 mpsc 通道的进程内 broker
///
/// 发布的消息按顺序投递给唯一的 [`Subscription`]，本地运行与测试时替代托管服务。
#[derive(Debug)]
pub struct LocalBroker {
    sender: Mutex<Option<mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl LocalBroker {
    /// # 参数
    /// * `capacity` - 未被消费的消息上限，达到后发布方等待
    pub fn new(capacity: usize) -> (Self, Subscription) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let broker = Self {
            sender: Mutex::new(Some(sender)),
            next_id: AtomicU64::new(1),
        };
        (broker, Subscription { receiver })
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(&self, message: Message) -> Result<String, BrokerError> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| "broker lock poisoned")?
            .clone()
            .ok_or("broker is closed")?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let event = Event::new(id.clone(), message, Utc::now());
        sender
            .send(event)
            .await
            .map_err(|_| "subscription has been dropped")?;
        Ok(id)
    }

    /// 关闭后订阅端读完剩余消息即结束
    async fn close(&self) -> Result<(), BrokerError> {
        self.sender.lock().map_err(|_| "broker lock poisoned")?.take();
        Ok(())
    }
}

#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// 接收下一条消息；broker 关闭且消息读完后返回 `None`
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}
