// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Single-consumer event streams and the subscriber slots that feed them.

use futures::Stream;
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::registry::ConnectionId;
use super::Inbound;

/// Addressable event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    AdapterState,
    Discovery,
    Read(ConnectionId),
}

impl fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AdapterState => f.write_str("state"),
            Self::Discovery => f.write_str("discovery"),
            Self::Read(id) => write!(f, "read/{id}"),
        }
    }
}

impl FromStr for StreamChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state" => Ok(Self::AdapterState),
            "discovery" => Ok(Self::Discovery),
            _ => s
                .strip_prefix("read/")
                .and_then(|id| id.parse().ok())
                .map(Self::Read)
                .ok_or_else(|| format!("unknown stream '{s}'")),
        }
    }
}

/// Producer side of one subscription.
pub(crate) struct Subscriber<T> {
    token: u64,
    sender: async_channel::Sender<T>,
}

/// Sends the cancellation for a stream back to the bridge.
struct Cancellation {
    inbox: mpsc::UnboundedSender<Inbound>,
    channel: StreamChannel,
    token: u64,
}

pin_project! {
    /// Consumer side of an event stream.
    ///
    /// The stream ends when the bridge closes it. Dropping it, or calling
    /// [`EventStream::cancel`], cancels the subscription.
    pub struct EventStream<T> {
        #[pin]
        receiver: async_channel::Receiver<T>,
        cancellation: Option<Cancellation>,
    }

    impl<T> PinnedDrop for EventStream<T> {
        fn drop(this: Pin<&mut Self>) {
            if let Some(cancellation) = this.project().cancellation.take() {
                let _ = cancellation.inbox.send(Inbound::Cancel {
                    channel: cancellation.channel,
                    token: cancellation.token,
                });
            }
        }
    }
}

impl<T> EventStream<T> {
    /// Create a linked stream and subscriber.
    pub(crate) fn open(
        inbox: mpsc::UnboundedSender<Inbound>,
        channel: StreamChannel,
        token: u64,
    ) -> (Self, Subscriber<T>) {
        let (sender, receiver) = async_channel::unbounded();
        let stream = Self {
            receiver,
            cancellation: Some(Cancellation {
                inbox,
                channel,
                token,
            }),
        };
        (stream, Subscriber { token, sender })
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn recv(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }

    /// Next event if one is already queued.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Whether the producer side has closed the stream.
    pub fn is_ended(&self) -> bool {
        self.receiver.is_closed()
    }

    pub fn channel(&self) -> Option<StreamChannel> {
        self.cancellation.as_ref().map(|c| c.channel)
    }

    /// Cancel the subscription.
    pub fn cancel(self) {}
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.project().receiver.poll_next(cx)
    }
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("channel", &self.channel())
            .field("ended", &self.is_ended())
            .finish()
    }
}

struct SlotInner<T> {
    current: Option<Subscriber<T>>,
    last_token: Option<u64>,
}

/// A nullable single-subscriber register.
pub(crate) struct SubscriberSlot<T> {
    inner: Mutex<SlotInner<T>>,
}

impl<T> SubscriberSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                current: None,
                last_token: None,
            }),
        }
    }

    /// Install a subscriber, ending the stream of any previous one.
    pub(crate) fn attach(&self, subscriber: Subscriber<T>) {
        let mut inner = self.inner.lock();
        inner.last_token = Some(subscriber.token);
        inner.current = Some(subscriber);
    }

    #[cfg(test)]
    pub(crate) fn is_active(&self) -> bool {
        self.inner.lock().current.is_some()
    }

    /// Deliver an event. Returns `false` when nobody is listening.
    pub(crate) fn deliver(&self, event: T) -> bool {
        let inner = self.inner.lock();
        match &inner.current {
            Some(subscriber) => subscriber.sender.try_send(event).is_ok(),
            None => false,
        }
    }

    /// End the current stream and clear the slot.
    pub(crate) fn close(&self) -> bool {
        self.inner.lock().current.take().is_some()
    }

    /// Whether `token` is the subscriber currently in the slot.
    pub(crate) fn holds(&self, token: u64) -> bool {
        self.inner
            .lock()
            .current
            .as_ref()
            .is_some_and(|s| s.token == token)
    }

    /// Whether `token` was the most recent subscriber, even if its stream
    /// has already been closed.
    pub(crate) fn owned_by(&self, token: u64) -> bool {
        self.inner.lock().last_token == Some(token)
    }
}
