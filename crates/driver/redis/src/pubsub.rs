use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redix_driver::{DedicatedConnection, DriverError, Message};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::convert::map_error;

enum Control {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    PSubscribe(Vec<String>),
    PUnsubscribe(Vec<String>),
}

type Request = (Control, oneshot::Sender<Result<(), DriverError>>);

/// A pub/sub connection owned by a background task.
///
/// The task forwards every delivered message into the sink and applies
/// subscription changes sent over a control channel. Dropping the handle
/// closes the control channel, which ends the task and the connection.
pub(crate) struct RedisDedicated {
    control: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl RedisDedicated {
    pub(crate) fn spawn(pubsub: redis::aio::PubSub, sink: mpsc::Sender<Message>, buffer: usize) -> Self {
        let (control, requests) = mpsc::channel(buffer.max(1));
        let task = tokio::spawn(pump(pubsub, requests, sink));
        Self { control, task }
    }

    async fn request(&self, control: Control) -> Result<(), DriverError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send((control, tx))
            .await
            .map_err(|_| DriverError::Closed)?;
        rx.await.map_err(|_| DriverError::Closed)?
    }
}

async fn apply(pubsub: &mut redis::aio::PubSub, control: Control) -> Result<(), DriverError> {
    let result = match control {
        Control::Subscribe(c) => pubsub.subscribe(c).await,
        Control::Unsubscribe(c) => pubsub.unsubscribe(c).await,
        Control::PSubscribe(p) => pubsub.psubscribe(p).await,
        Control::PUnsubscribe(p) => pubsub.punsubscribe(p).await,
    };
    result.map_err(|e| map_error(&e))
}

fn to_message(msg: &redis::Msg) -> Message {
    Message {
        channel: msg.get_channel_name().to_owned(),
        pattern: if msg.from_pattern() {
            msg.get_pattern::<String>().ok()
        } else {
            None
        },
        payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
    }
}

async fn pump(
    mut pubsub: redis::aio::PubSub,
    mut requests: mpsc::Receiver<Request>,
    sink: mpsc::Sender<Message>,
) {
    loop {
        tokio::select! {
            req = requests.recv() => {
                let Some((control, reply)) = req else { break };
                let _ = reply.send(apply(&mut pubsub, control).await);
            }
            msg = async { pubsub.on_message().next().await } => {
                let Some(msg) = msg else {
                    warn!("pub/sub connection lost");
                    break;
                };
                if sink.send(to_message(&msg)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("pub/sub connection closed");
}

#[async_trait]
impl DedicatedConnection for RedisDedicated {
    async fn subscribe(&mut self, channels: &[String]) -> Result<(), DriverError> {
        self.request(Control::Subscribe(channels.to_vec())).await
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<(), DriverError> {
        self.request(Control::Unsubscribe(channels.to_vec())).await
    }

    async fn psubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError> {
        self.request(Control::PSubscribe(patterns.to_vec())).await
    }

    async fn punsubscribe(&mut self, patterns: &[String]) -> Result<(), DriverError> {
        self.request(Control::PUnsubscribe(patterns.to_vec())).await
    }

    async fn close(self: Box<Self>) {
        let Self { control, task } = *self;
        drop(control);
        let _ = task.await;
    }
}
