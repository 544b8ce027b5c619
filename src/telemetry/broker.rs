//! 遥测广播：按会话的发布 / 订阅，带有界历史与每订阅者有界队列
//!
//! - 历史：每会话最多 history_capacity 条，超出淘汰最旧；无订阅者时照样记录，供后来者回放
//! - 背压：订阅者队列满时丢弃其最旧的一条再放入新事件，慢订阅者永远不会阻塞发布方
//! - 全局上限：最多保留 max_conversations 个会话的历史，超出时淘汰最久未发布且无订阅者的会话
//!
//! 订阅表与历史由同一把 std Mutex 保护；publish 不 await，可以在任何同步上下文调用。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::event::TelemetryEvent;
use crate::config::TelemetrySection;

/// 订阅者 ID
pub type SubscriberId = u64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 单个订阅者的待投递队列
#[derive(Debug)]
struct DeliveryQueue {
    capacity: usize,
    events: Mutex<VecDeque<TelemetryEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl DeliveryQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// 放入事件：满了先淘汰最旧的一条；容量为 0 时直接丢弃。返回是否入队
    fn offer(&self, event: TelemetryEvent) -> bool {
        let accepted = {
            let mut events = lock(&self.events);
            if events.len() >= self.capacity && events.pop_front().is_some() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            if events.len() < self.capacity {
                events.push_back(event);
                true
            } else {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        };
        if accepted {
            self.notify.notify_one();
        }
        accepted
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }
}

/// 观察者持有的订阅句柄
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriberId,
    conversation_id: String,
    queue: Arc<DeliveryQueue>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// 等待下一条事件；取消订阅且队列取空后返回 None
    pub async fn recv(&self) -> Option<TelemetryEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<TelemetryEvent> {
        lock(&self.queue.events).pop_front()
    }

    /// 取出当前所有待投递事件
    pub fn drain(&self) -> Vec<TelemetryEvent> {
        lock(&self.queue.events).drain(..).collect()
    }

    /// 待投递事件数
    pub fn len(&self) -> usize {
        lock(&self.queue.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 因队列满而被丢弃的事件数
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct History {
    events: VecDeque<TelemetryEvent>,
    /// 最近一次发布的逻辑时钟，用于全局淘汰
    last_publish: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    subscribers: HashMap<String, Vec<(SubscriberId, Arc<DeliveryQueue>)>>,
    histories: HashMap<String, History>,
    clock: u64,
}

impl BrokerState {
    fn record(&mut self, conversation_id: &str, event: TelemetryEvent, capacity: usize, max_conversations: usize) {
        self.clock += 1;
        let clock = self.clock;
        let history = self.histories.entry(conversation_id.to_string()).or_default();
        history.last_publish = clock;
        if capacity > 0 {
            history.events.push_back(event);
            while history.events.len() > capacity {
                history.events.pop_front();
            }
        }
        self.enforce_global_cap(conversation_id, max_conversations);
    }

    fn enforce_global_cap(&mut self, keep: &str, max_conversations: usize) {
        while self.histories.len() > max_conversations.max(1) {
            let victim = self
                .histories
                .iter()
                .filter(|(id, _)| id.as_str() != keep && !self.subscribers.contains_key(id.as_str()))
                .min_by_key(|(_, h)| h.last_publish)
                .map(|(id, _)| id.clone());
            match victim {
                Some(id) => {
                    tracing::debug!(conversation = %id, "Evicting telemetry history (global cap)");
                    self.histories.remove(&id);
                }
                // 所有会话都有订阅者：只保证每会话上限
                None => break,
            }
        }
    }

    fn deliver(&self, conversation_id: &str, event: &TelemetryEvent) -> usize {
        let Some(subscribers) = self.subscribers.get(conversation_id) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, queue)| queue.offer(event.clone()))
            .count()
    }
}

/// 遥测广播器
#[derive(Debug)]
pub struct TelemetryBroker {
    state: Mutex<BrokerState>,
    next_subscriber: AtomicU64,
    history_capacity: usize,
    subscriber_capacity: usize,
    max_conversations: usize,
}

impl TelemetryBroker {
    pub fn new(config: &TelemetrySection) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            next_subscriber: AtomicU64::new(1),
            history_capacity: config.history_capacity,
            subscriber_capacity: config.subscriber_queue_capacity,
            max_conversations: config.max_conversations,
        }
    }

    /// 为新观察者创建有界投递队列
    pub fn register(&self, conversation_id: &str) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(DeliveryQueue::new(self.subscriber_capacity));
        lock(&self.state)
            .subscribers
            .entry(conversation_id.to_string())
            .or_default()
            .push((id, Arc::clone(&queue)));

        tracing::debug!(conversation = conversation_id, subscriber = id, "Telemetry subscriber registered");
        Subscription {
            id,
            conversation_id: conversation_id.to_string(),
            queue,
        }
    }

    /// 移除订阅；会话没有订阅者后删除整个订阅集合。返回是否确实移除
    pub fn unregister(&self, conversation_id: &str, subscription: &Subscription) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            let Some(subscribers) = state.subscribers.get_mut(conversation_id) else {
                return false;
            };
            let before = subscribers.len();
            subscribers.retain(|(id, _)| *id != subscription.id);
            let removed = subscribers.len() != before;
            if subscribers.is_empty() {
                state.subscribers.remove(conversation_id);
            }
            removed
        };
        if removed {
            subscription.queue.close();
            tracing::debug!(
                conversation = conversation_id,
                subscriber = subscription.id,
                "Telemetry subscriber unregistered"
            );
        }
        removed
    }

    /// 记录历史并投递给该会话当前所有订阅者；返回成功入队的订阅者数
    pub fn publish(&self, conversation_id: &str, event: TelemetryEvent) -> usize {
        let mut state = lock(&self.state);
        let delivered = state.deliver(conversation_id, &event);
        state.record(conversation_id, event, self.history_capacity, self.max_conversations);
        delivered
    }

    /// 广播给所有当前有订阅者的会话（如全局服务状态通知）；返回涉及的会话数
    pub fn publish_to_all_active(&self, event: TelemetryEvent) -> usize {
        let mut state = lock(&self.state);
        let active: Vec<String> = state.subscribers.keys().cloned().collect();
        for conversation_id in &active {
            state.deliver(conversation_id, &event);
            state.record(conversation_id, event.clone(), self.history_capacity, self.max_conversations);
        }
        active.len()
    }

    /// 当前历史（按发布顺序）
    pub fn snapshot(&self, conversation_id: &str) -> Vec<TelemetryEvent> {
        lock(&self.state)
            .histories
            .get(conversation_id)
            .map(|h| h.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, conversation_id: &str) -> usize {
        lock(&self.state)
            .subscribers
            .get(conversation_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 至少有一个订阅者的会话
    pub fn active_conversations(&self) -> Vec<String> {
        lock(&self.state).subscribers.keys().cloned().collect()
    }

    /// 清空会话历史（订阅不受影响）
    pub fn clear_history(&self, conversation_id: &str) {
        lock(&self.state).histories.remove(conversation_id);
    }

    /// 仍保留历史的会话数
    pub fn history_conversations(&self) -> usize {
        lock(&self.state).histories.len()
    }
}

impl Default for TelemetryBroker {
    fn default() -> Self {
        Self::new(&TelemetrySection::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::AgentStatus;

    fn broker(history: usize, queue: usize) -> TelemetryBroker {
        TelemetryBroker::new(&TelemetrySection {
            history_capacity: history,
            subscriber_queue_capacity: queue,
            max_conversations: 16,
        })
    }

    fn event(n: usize) -> TelemetryEvent {
        TelemetryEvent::started(format!("agent-{n}"), "Agent").with_field("n", n)
    }

    #[test]
    fn test_snapshot_keeps_publish_order_within_capacity() {
        let broker = broker(5, 10);
        let sub = broker.register("c1");
        for n in 0..4 {
            broker.publish("c1", event(n));
        }
        let ids: Vec<_> = broker.snapshot("c1").into_iter().map(|e| e.agent_id).collect();
        assert_eq!(ids, vec!["agent-0", "agent-1", "agent-2", "agent-3"]);
        assert_eq!(sub.len(), 4);
    }

    #[test]
    fn test_snapshot_keeps_most_recent_when_over_capacity() {
        let broker = broker(3, 10);
        for n in 0..7 {
            broker.publish("c1", event(n));
        }
        let ids: Vec<_> = broker.snapshot("c1").into_iter().map(|e| e.agent_id).collect();
        assert_eq!(ids, vec!["agent-4", "agent-5", "agent-6"]);
    }

    #[test]
    fn test_publish_without_subscribers_still_records_history() {
        let broker = broker(10, 10);
        assert_eq!(broker.publish("lonely", event(1)), 0);
        assert_eq!(broker.snapshot("lonely").len(), 1);
        assert!(broker.snapshot("unknown").is_empty());
    }

    #[test]
    fn test_full_subscriber_queue_drops_oldest() {
        let broker = broker(10, 2);
        let sub = broker.register("c1");
        broker.publish("c1", event(0));
        broker.publish("c1", event(1));

        // 满了：丢弃 event(0)，新事件仍然送达
        assert_eq!(broker.publish("c1", event(2)), 1);
        assert_eq!(sub.dropped(), 1);

        // 仍然满：每次发布只多丢一条，最新事件总在队尾
        assert_eq!(broker.publish("c1", event(3)), 1);
        assert_eq!(sub.dropped(), 2);
        assert_eq!(sub.len(), 2);
        let pending: Vec<_> = sub.drain().into_iter().map(|e| e.agent_id).collect();
        assert_eq!(pending, vec!["agent-2", "agent-3"]);
    }

    #[test]
    fn test_slow_subscriber_does_not_affect_others() {
        let broker = broker(10, 1);
        let slow = broker.register("c1");
        let fast = broker.register("c1");

        broker.publish("c1", event(0));
        assert_eq!(fast.try_recv().unwrap().agent_id, "agent-0");
        broker.publish("c1", event(1));
        assert_eq!(fast.try_recv().unwrap().agent_id, "agent-1");

        assert_eq!(slow.len(), 1);
        assert_eq!(slow.dropped(), 1);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(slow.try_recv().unwrap().agent_id, "agent-1");
    }

    #[test]
    fn test_two_subscribers_receive_same_event() {
        let broker = broker(10, 10);
        let a = broker.register("C");
        let b = broker.register("C");
        let e = TelemetryEvent::started("orchestrator", "Orchestrator");
        broker.publish("C", e.clone());

        assert_eq!(a.drain(), vec![e.clone()]);
        assert_eq!(b.drain(), vec![e]);
    }

    #[test]
    fn test_unregister_removes_empty_conversation() {
        let broker = broker(10, 10);
        let a = broker.register("c1");
        let b = broker.register("c1");
        assert_eq!(broker.subscriber_count("c1"), 2);

        assert!(broker.unregister("c1", &a));
        assert!(!broker.unregister("c1", &a));
        assert_eq!(broker.active_conversations(), vec!["c1".to_string()]);
        assert!(broker.unregister("c1", &b));
        assert!(broker.active_conversations().is_empty());
        assert!(a.is_closed());
    }

    #[test]
    fn test_publish_to_all_active_reaches_only_subscribed_conversations() {
        let broker = broker(10, 10);
        let a = broker.register("a");
        let b = broker.register("b");
        broker.publish("quiet", event(0));

        let notice = TelemetryEvent::new("system", "System", AgentStatus::Waiting).with_message("degraded");
        assert_eq!(broker.publish_to_all_active(notice), 2);
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(broker.snapshot("quiet").len(), 1);
    }

    #[test]
    fn test_global_cap_evicts_idle_histories_only() {
        let broker = TelemetryBroker::new(&TelemetrySection {
            history_capacity: 10,
            subscriber_queue_capacity: 10,
            max_conversations: 2,
        });
        let _watched = broker.register("watched");
        broker.publish("watched", event(0));
        broker.publish("idle", event(1));
        broker.publish("fresh", event(2));

        assert_eq!(broker.history_conversations(), 2);
        assert!(broker.snapshot("idle").is_empty());
        assert_eq!(broker.snapshot("watched").len(), 1);
        assert_eq!(broker.snapshot("fresh").len(), 1);
    }

    #[tokio::test]
    async fn test_recv_waits_for_publish_and_ends_after_unregister() {
        let broker = Arc::new(broker(10, 10));
        let sub = broker.register("c1");

        let publisher = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish("c1", event(9));
        });

        let received = sub.recv().await.unwrap();
        assert_eq!(received.agent_id, "agent-9");

        broker.unregister("c1", &sub);
        assert!(sub.recv().await.is_none());
    }
}
