use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;

use crate::manager::LinkHandle;
use crate::messages::{ConnectionState, DirectionCode, FeedbackFrame};

/// Bounded queue of direction codes. Pushing into a full queue evicts the oldest code.
#[derive(Clone, Debug)]
pub struct FeedbackChannel {
    queue: Arc<Mutex<VecDeque<DirectionCode>>>,
    capacity: usize,
}

impl FeedbackChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        FeedbackChannel {
            queue: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Never blocks on a full queue. Returns the evicted code, if any.
    pub fn push(&self, code: DirectionCode) -> Option<DirectionCode> {
        let mut queue = self.lock();
        let evicted = if queue.len() >= self.capacity {
            queue.pop_front()
        } else {
            None
        };
        queue.push_back(code);
        evicted
    }

    pub fn pop(&self) -> Option<DirectionCode> {
        self.lock().pop_front()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DirectionCode>> {
        // A panic while holding the lock cannot leave the deque half-updated.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drains the feedback channel into the haptic characteristic while a link is up.
pub struct FeedbackDispatcher {
    channel: FeedbackChannel,
    link: LinkHandle,
    poll_interval: Duration,
}

impl FeedbackDispatcher {
    pub fn new(channel: FeedbackChannel, link: LinkHandle, poll_interval: Duration) -> Self {
        FeedbackDispatcher {
            channel,
            link,
            poll_interval,
        }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.link.status() == ConnectionState::Connected {
                if let Some(code) = self.channel.pop() {
                    self.dispatch(code).await;
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Feedback dispatcher stopped");
    }

    async fn dispatch(&self, code: DirectionCode) {
        let Some(frame) = FeedbackFrame::from_direction(code) else {
            return;
        };
        debug!("Writing haptic feedback {:?}", code);
        // A dropped frame is not retried; a fresher code follows within a frame.
        if let Err(err) = self.link.write(frame).await {
            warn!("Dropped haptic feedback {:?}: {}", code, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, ScanConfig};
    use crate::manager::ConnectionManager;
    use crate::transport::testing::{FakeTransport, advertisement};

    fn drain(channel: &FeedbackChannel) -> Vec<DirectionCode> {
        std::iter::from_fn(|| channel.pop()).collect()
    }

    #[test]
    fn test_push_when_full_evicts_oldest() {
        let channel = FeedbackChannel::new(3);
        assert_eq!(channel.push(DirectionCode::Up), None);
        assert_eq!(channel.push(DirectionCode::Down), None);
        assert_eq!(channel.push(DirectionCode::Left), None);
        assert_eq!(channel.push(DirectionCode::Right), Some(DirectionCode::Up));
        assert_eq!(channel.len(), 3);
        assert_eq!(
            drain(&channel),
            vec![DirectionCode::Down, DirectionCode::Left, DirectionCode::Right]
        );
    }

    #[test]
    fn test_first_right_is_evicted() {
        let channel = FeedbackChannel::new(3);
        for code in [
            DirectionCode::Right,
            DirectionCode::Right,
            DirectionCode::Forward,
            DirectionCode::Left,
        ] {
            channel.push(code);
        }
        assert_eq!(
            drain(&channel),
            vec![DirectionCode::Right, DirectionCode::Forward, DirectionCode::Left]
        );
        assert!(channel.is_empty());
    }

    #[test]
    fn test_fifo_between_clones() {
        let producer = FeedbackChannel::new(3);
        let consumer = producer.clone();
        producer.push(DirectionCode::Left);
        producer.push(DirectionCode::Up);
        assert_eq!(consumer.pop(), Some(DirectionCode::Left));
        producer.push(DirectionCode::Forward);
        assert_eq!(consumer.pop(), Some(DirectionCode::Up));
        assert_eq!(consumer.pop(), Some(DirectionCode::Forward));
        assert_eq!(consumer.pop(), None);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let channel = FeedbackChannel::new(0);
        channel.push(DirectionCode::Left);
        channel.push(DirectionCode::Right);
        assert_eq!(drain(&channel), vec![DirectionCode::Right]);
    }

    fn connected_link() -> (FakeTransport, LinkHandle, watch::Sender<bool>) {
        let transport =
            FakeTransport::advertising(vec![advertisement("C0:CC:BB:AA:AA:AA", "STLB250")]);
        let (manager, link) =
            ConnectionManager::new(transport.clone(), &DeviceConfig::default(), &ScanConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(manager.run(shutdown_rx));
        (transport, link, shutdown_tx)
    }

    fn spawn_dispatcher(
        channel: &FeedbackChannel,
        link: &LinkHandle,
        shutdown: &watch::Sender<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let dispatcher =
            FeedbackDispatcher::new(channel.clone(), link.clone(), Duration::from_secs(1));
        let rx = shutdown.subscribe();
        tokio::spawn(async move { dispatcher.run(rx).await })
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_in_order_when_connected() {
        let (transport, link, shutdown) = connected_link();
        link.subscribe()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let channel = FeedbackChannel::new(3);
        channel.push(DirectionCode::Right);
        channel.push(DirectionCode::Forward);
        channel.push(DirectionCode::None);
        let _dispatcher = spawn_dispatcher(&channel, &link, &shutdown);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(channel.is_empty());
        assert_eq!(transport.link().writes(), vec![1, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_codes_while_disconnected() {
        let transport = FakeTransport::default();
        let (_manager, link) =
            ConnectionManager::new(transport.clone(), &DeviceConfig::default(), &ScanConfig::default());
        let (shutdown, _) = watch::channel(false);

        let channel = FeedbackChannel::new(3);
        channel.push(DirectionCode::Left);
        let _dispatcher = spawn_dispatcher(&channel, &link, &shutdown);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(channel.len(), 1);
        assert!(transport.link().writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_errors_are_absorbed() {
        let (transport, link, shutdown) = connected_link();
        link.subscribe()
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        transport.link().fail_writes(true);

        let channel = FeedbackChannel::new(3);
        channel.push(DirectionCode::Left);
        channel.push(DirectionCode::Down);
        let dispatcher = spawn_dispatcher(&channel, &link, &shutdown);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(channel.is_empty());
        assert!(!dispatcher.is_finished());

        transport.link().fail_writes(false);
        channel.push(DirectionCode::Up);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.link().writes(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let transport = FakeTransport::default();
        let (_manager, link) =
            ConnectionManager::new(transport, &DeviceConfig::default(), &ScanConfig::default());
        let (shutdown, _) = watch::channel(false);
        let dispatcher = spawn_dispatcher(&FeedbackChannel::new(3), &link, &shutdown);

        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.send_replace(true);
        dispatcher.await.unwrap();
    }
}
