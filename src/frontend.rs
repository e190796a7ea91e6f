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

//! Line-delimited JSON front-end.
//!
//! Reads [`Request`] frames, runs them against a [`BridgeHandle`] and writes
//! [`Frame`]s back. Commands run concurrently, so responses can arrive out of
//! order; the request id correlates them. Each listened stream is pumped by
//! its own task until it ends or the client cancels it.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeHandle, EventStream, StreamChannel};
use crate::error::BridgeError;
use crate::protocol::{Frame, Request, RequestId};

/// Serve requests from `input` until it reaches end of file.
pub async fn serve<R, W>(handle: BridgeHandle, input: R, output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let (frames, frame_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(output, frame_rx));
    let mut session = Session {
        handle,
        frames,
        calls: Vec::new(),
        pumps: HashMap::new(),
    };

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Request::from_json(&line) {
            Ok(request) => session.handle(request),
            Err(e) => warn!("Discarding malformed request: {}", e),
        }
    }
    info!("Input closed");

    session.close();
    writer.await??;
    Ok(())
}

async fn write_frames<W>(mut output: W, mut frames: mpsc::UnboundedReceiver<Frame>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let json = frame.to_json()?;
        output.write_all(json.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

struct Session {
    handle: BridgeHandle,
    frames: mpsc::UnboundedSender<Frame>,
    calls: Vec<JoinHandle<()>>,
    pumps: HashMap<StreamChannel, JoinHandle<()>>,
}

impl Session {
    fn handle(&mut self, request: Request) {
        match request {
            Request::Call { id, method, args } => {
                debug!("Call {} (request {})", method, id);
                let handle = self.handle.clone();
                let frames = self.frames.clone();
                self.calls.retain(|call| !call.is_finished());
                self.calls.push(tokio::spawn(async move {
                    let outcome = handle.invoke(&method, &args).await;
                    match Frame::response(id, outcome) {
                        Ok(frame) => {
                            let _ = frames.send(frame);
                        }
                        Err(e) => error!("Failed to encode response {}: {}", id, e),
                    }
                }));
            }
            Request::Listen { id, listen } => {
                if let Some(channel) = self.channel(id, &listen) {
                    self.listen(channel);
                    self.send(Frame::ack(id));
                }
            }
            Request::Cancel { id, cancel } => {
                if let Some(channel) = self.channel(id, &cancel) {
                    // Aborting the pump drops its stream, which cancels it.
                    if let Some(pump) = self.pumps.remove(&channel) {
                        pump.abort();
                    }
                    self.send(Frame::ack(id));
                }
            }
        }
    }

    fn channel(&self, id: RequestId, name: &str) -> Option<StreamChannel> {
        match name.parse() {
            Ok(channel) => Some(channel),
            Err(message) => {
                self.send(Frame::error(id, BridgeError::invalid_argument(message).report()));
                None
            }
        }
    }

    fn listen(&mut self, channel: StreamChannel) {
        // Open the new stream before dropping the old one so the old stream's
        // cancellation arrives after the new subscriber replaced it.
        let pump = match channel {
            StreamChannel::AdapterState => self.pump(channel, self.handle.state_events()),
            StreamChannel::Discovery => self.pump(channel, self.handle.discovery_events()),
            StreamChannel::Read(id) => self.pump(channel, self.handle.read_events(id)),
        };
        self.pumps.retain(|_, pump| !pump.is_finished());
        if let Some(previous) = self.pumps.insert(channel, pump) {
            previous.abort();
        }
    }

    fn pump<T>(&self, channel: StreamChannel, stream: EventStream<T>) -> JoinHandle<()>
    where
        T: Serialize + Send + 'static,
    {
        let frames = self.frames.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                match Frame::event(channel, &event) {
                    Ok(frame) => {
                        let _ = frames.send(frame);
                    }
                    Err(e) => error!("Failed to encode {} event: {}", channel, e),
                }
            }
            debug!("Stream {} ended", channel);
            let _ = frames.send(Frame::end(channel));
        })
    }

    fn send(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }

    /// Abort every task that still holds a frame sender so the writer drains
    /// and stops. Calls parked on a prompt that never answers get no response.
    fn close(self) {
        let pending = self.calls.iter().filter(|call| !call.is_finished()).count();
        if pending > 0 {
            debug!("Dropping {} unanswered call(s)", pending);
        }
        for call in self.calls {
            call.abort();
        }
        for (_, pump) in self.pumps {
            pump.abort();
        }
    }
}
