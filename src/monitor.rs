use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use chrono::Local;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::classifier::Classifier;
use crate::forward::AlertSink;
use crate::platform::{ChannelInfo, IncomingMessage, MessageSource};

/// Counters kept for the lifetime of the process.
/// `alerts_detected` never exceeds `messages_processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub messages_processed: u64,
    pub alerts_detected: u64,
}

/// Watches one chat, classifies every message and forwards the alerts.
///
/// The monitor is the sole consumer of the source's queue, so messages are
/// handled strictly one after another and the counters need no locking.
pub struct Monitor<S> {
    classifier: Classifier,
    sink: S,
    state: MonitorState,
    /// Set once startup has completed and messages are being handled
    running: bool,
}

impl<S: AlertSink> Monitor<S> {
    pub fn new(classifier: Classifier, sink: S) -> Self {
        Self {
            classifier,
            sink,
            state: MonitorState::default(),
            running: false,
        }
    }

    /// Drive the full lifecycle: start up, process messages until `stop`
    /// resolves or the source disconnects, then shut down. Shutdown runs
    /// exactly once whichever way the monitor ends.
    pub async fn run<Src, F>(mut self, mut source: Src, stop: F) -> Result<MonitorState>
    where
        Src: MessageSource,
        F: Future<Output = ()>,
    {
        let outcome = self.serve(&mut source, stop).await;

        if let Err(e) = &outcome {
            let stage = if self.running {
                "Critical error"
            } else {
                "Startup error"
            };
            error!("{}: {:#}", stage, e);
            self.notify_error(&format!("{}: {:#}", stage, e)).await;
        }

        let state = self.shutdown(source).await;
        outcome.map(|()| state)
    }

    async fn serve<Src, F>(&mut self, source: &mut Src, stop: F) -> Result<()>
    where
        Src: MessageSource,
        F: Future<Output = ()>,
    {
        tokio::pin!(stop);
        info!("Starting alert monitor...");

        let (channel, mut messages) = tokio::select! {
            started = Self::initialize(source) => started?,
            () = &mut stop => {
                info!("Stop requested during startup");
                return Ok(());
            }
        };

        self.notify_startup(&channel).await;
        self.running = true;
        info!(
            "Monitoring active on {} (id {}), alerts will be forwarded",
            channel.title, channel.id
        );

        loop {
            tokio::select! {
                biased;
                () = &mut stop => {
                    info!("Stop requested");
                    break;
                }
                next = messages.recv() => match next {
                    Some(message) => self.handle_isolated(message).await,
                    None => {
                        warn!("Message source disconnected");
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    async fn initialize<Src: MessageSource>(
        source: &mut Src,
    ) -> Result<(ChannelInfo, mpsc::Receiver<IncomingMessage>)> {
        let channel = source.connect().await?;
        let messages = source.subscribe().await?;
        Ok((channel, messages))
    }

    /// Panics raised while handling one message stop at this boundary.
    async fn handle_isolated(&mut self, message: IncomingMessage) {
        let handled = AssertUnwindSafe(self.handle_message(message))
            .catch_unwind()
            .await;
        if let Err(panic) = handled {
            error!("Error while processing message: {}", panic_message(&*panic));
        }
    }

    async fn handle_message(&mut self, message: IncomingMessage) {
        self.state.messages_processed += 1;
        info!(
            "Message #{} from {} (@{})",
            self.state.messages_processed,
            message.sender_name(),
            message.sender_username()
        );

        let text = message.text();
        if !self.classifier.is_alert(text) {
            info!("Message ignored (chatter)");
            return;
        }

        self.state.alerts_detected += 1;
        let index = self.state.alerts_detected;
        info!("Alert #{} detected", index);

        if self.sink.forward(text).await {
            info!("Alert #{} relayed to the destination bot", index);
        } else {
            error!("Forwarding failed, alert #{} lost", index);
            self.notify_error(&format!("Failed to forward alert #{}", index))
                .await;
        }
    }

    async fn notify_startup(&self, channel: &ChannelInfo) {
        let text = format!(
            "🚀 ALERT RELAY STARTED\n\n\
             ✅ Watching {}\n\
             🤖 Alerts are forwarded automatically\n\n\
             📊 Stats:\n\
             Messages processed: {}\n\
             Alerts detected: {}\n\n\
             Time: {}",
            channel.title,
            self.state.messages_processed,
            self.state.alerts_detected,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        if !self.sink.notify(&text).await {
            warn!("Startup notification was not delivered");
        }
    }

    async fn notify_error(&self, detail: &str) {
        let text = format!(
            "🚨 ALERT RELAY ERROR:\n\n{}\n\nCheck the monitor logs.",
            detail
        );
        if !self.sink.notify(&text).await {
            warn!("Error notification was not delivered");
        }
    }

    /// Consumes the monitor, so it can only happen once.
    async fn shutdown<Src: MessageSource>(self, mut source: Src) -> MonitorState {
        let Monitor {
            sink,
            state,
            running,
            ..
        } = self;
        if running {
            info!("Shutting down...");
        } else {
            info!("Shutting down before monitoring started...");
        }

        drop(sink);
        source.close().await;

        info!(
            "Session finished - messages: {}, alerts: {}",
            state.messages_processed, state.alerts_detected
        );
        state
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const ALERT: &str = "Strike Rate %: 76\n\
                         1X2 Pre-Match Odds: 1.36 4.50 6.50\n\
                         Over/Under 6.50 Odds: 1.44 2.63\n\
                         TeamA vs TeamB";

    #[derive(Default)]
    struct Calls {
        forwarded: Vec<String>,
        notified: Vec<String>,
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Delivery {
        Ok,
        Fail,
        Panic,
    }

    struct FakeSink {
        forward: Delivery,
        notify_ok: bool,
        calls: Arc<Mutex<Calls>>,
    }

    impl FakeSink {
        fn new(forward: Delivery) -> (Self, Arc<Mutex<Calls>>) {
            let calls = Arc::new(Mutex::new(Calls::default()));
            let sink = Self {
                forward,
                notify_ok: true,
                calls: calls.clone(),
            };
            (sink, calls)
        }
    }

    #[async_trait]
    impl AlertSink for FakeSink {
        async fn forward(&self, alert: &str) -> bool {
            if self.forward == Delivery::Panic {
                panic!("sink exploded");
            }
            self.calls.lock().unwrap().forwarded.push(alert.to_string());
            self.forward == Delivery::Ok
        }

        async fn notify(&self, text: &str) -> bool {
            self.calls.lock().unwrap().notified.push(text.to_string());
            self.notify_ok
        }
    }

    #[derive(Default)]
    struct FakeSource {
        fail_connect: bool,
        connect_delay: Duration,
        fail_subscribe: bool,
        messages: Vec<IncomingMessage>,
        /// Keep the queue open after the scripted messages
        hold_open: bool,
        sender: Option<mpsc::Sender<IncomingMessage>>,
        closes: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn connect(&mut self) -> Result<ChannelInfo> {
            tokio::time::sleep(self.connect_delay).await;
            if self.fail_connect {
                anyhow::bail!("chat not found");
            }
            Ok(ChannelInfo {
                id: -1001,
                title: "InPlayGuru.com".to_string(),
                is_channel: true,
            })
        }

        async fn subscribe(&mut self) -> Result<mpsc::Receiver<IncomingMessage>> {
            if self.fail_subscribe {
                anyhow::bail!("polling rejected");
            }
            let (tx, rx) = mpsc::channel(self.messages.len() + 1);
            for message in self.messages.drain(..) {
                tx.try_send(message)?;
            }
            if self.hold_open {
                self.sender = Some(tx);
            }
            Ok(rx)
        }

        async fn close(&mut self) {
            self.sender = None;
            *self.closes.lock().unwrap() += 1;
        }
    }

    fn text(body: &str) -> IncomingMessage {
        IncomingMessage {
            text: Some(body.to_string()),
            sender_name: Some("Guru".to_string()),
            sender_username: None,
        }
    }

    fn source(messages: Vec<IncomingMessage>) -> (FakeSource, Arc<Mutex<u32>>) {
        let source = FakeSource {
            messages,
            ..FakeSource::default()
        };
        let closes = source.closes.clone();
        (source, closes)
    }

    fn monitor(sink: FakeSink) -> Monitor<FakeSink> {
        Monitor::new(Classifier::new().unwrap(), sink)
    }

    #[tokio::test]
    async fn test_five_messages_one_alert() {
        let (sink, calls) = FakeSink::new(Delivery::Ok);
        let (source, closes) = source(vec![
            text("hello"),
            IncomingMessage::default(),
            text(ALERT),
            text("good morning everyone, what a match yesterday"),
            text("/start"),
        ]);

        let state = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap();

        assert_eq!(
            state,
            MonitorState {
                messages_processed: 5,
                alerts_detected: 1,
            }
        );
        let calls = calls.lock().unwrap();
        assert_eq!(calls.forwarded, vec![ALERT.to_string()]);
        assert_eq!(calls.notified.len(), 1);
        assert!(calls.notified[0].contains("ALERT RELAY STARTED"));
        assert!(calls.notified[0].contains("InPlayGuru.com"));
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_forward_reports_lost_alert_and_continues() {
        let (sink, calls) = FakeSink::new(Delivery::Fail);
        let (source, _) = source(vec![text(ALERT), text("noise"), text(ALERT)]);

        let state = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap();

        assert_eq!(state.messages_processed, 3);
        assert_eq!(state.alerts_detected, 2);
        let calls = calls.lock().unwrap();
        assert_eq!(calls.forwarded.len(), 2);
        // startup + one error per lost alert
        assert_eq!(calls.notified.len(), 3);
        assert!(calls.notified[1].contains("Failed to forward alert #1"));
        assert!(calls.notified[2].contains("Failed to forward alert #2"));
    }

    #[tokio::test]
    async fn test_panic_in_handler_does_not_stop_monitor() {
        let (sink, calls) = FakeSink::new(Delivery::Panic);
        let (source, closes) = source(vec![text(ALERT), text("after the panic")]);

        let state = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap();

        assert_eq!(state.messages_processed, 2);
        assert_eq!(state.alerts_detected, 1);
        assert!(calls.lock().unwrap().forwarded.is_empty());
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_startup_failure_notifies_and_shuts_down() {
        let (sink, calls) = FakeSink::new(Delivery::Ok);
        let (mut source, closes) = source(vec![text(ALERT)]);
        source.fail_connect = true;

        let err = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("chat not found"));
        let calls = calls.lock().unwrap();
        assert!(calls.forwarded.is_empty());
        assert_eq!(calls.notified.len(), 1);
        assert!(calls.notified[0].contains("Startup error: chat not found"));
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_a_startup_error() {
        let (sink, calls) = FakeSink::new(Delivery::Ok);
        let (mut source, closes) = source(vec![text(ALERT)]);
        source.fail_subscribe = true;

        let err = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("polling rejected"));
        let calls = calls.lock().unwrap();
        assert!(calls.forwarded.is_empty());
        assert_eq!(calls.notified.len(), 1);
        assert!(calls.notified[0].contains("Startup error: polling rejected"));
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stop_signal_during_startup() {
        let (sink, calls) = FakeSink::new(Delivery::Ok);
        let (mut source, closes) = source(vec![text(ALERT)]);
        source.connect_delay = Duration::from_secs(30);

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            monitor(sink).run(source, tokio::time::sleep(Duration::from_millis(20))),
        )
        .await
        .expect("monitor should stop while still connecting")
        .unwrap();

        assert_eq!(state, MonitorState::default());
        let calls = calls.lock().unwrap();
        assert!(calls.notified.is_empty());
        assert!(calls.forwarded.is_empty());
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_undelivered_startup_notification_is_ignored() {
        let (mut sink, _) = FakeSink::new(Delivery::Ok);
        sink.notify_ok = false;
        let (source, _) = source(vec![text(ALERT)]);

        let state = monitor(sink)
            .run(source, std::future::pending())
            .await
            .unwrap();

        assert_eq!(state.alerts_detected, 1);
    }

    #[tokio::test]
    async fn test_stop_signal_ends_running_monitor() {
        let (sink, calls) = FakeSink::new(Delivery::Ok);
        let (mut source, closes) = source(vec![text(ALERT)]);
        source.hold_open = true;

        let state = tokio::time::timeout(
            Duration::from_secs(5),
            monitor(sink).run(source, tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("monitor should stop when signalled")
        .unwrap();

        assert_eq!(state.messages_processed, 1);
        assert_eq!(calls.lock().unwrap().forwarded.len(), 1);
        assert_eq!(*closes.lock().unwrap(), 1);
    }

    #[test]
    fn test_panic_message_extracts_payload() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
