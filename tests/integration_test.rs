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

//! Integration tests for the full request/response flow over the
//! line-delimited front-end.

mod common;

use common::{eventually, within, Harness, MockAdapter, ADDRESS};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use serial_bridge::bluetooth::{DeviceRecord, DeviceType, HardwareAddress};
use serial_bridge::frontend;

struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    backlog: VecDeque<Value>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Client {
    fn connect(harness: &Harness) -> Self {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let server = tokio::spawn(frontend::serve(
            harness.handle.clone(),
            BufReader::new(server_read),
            server_write,
        ));

        let (read, writer) = tokio::io::split(client);
        Self {
            writer,
            lines: BufReader::new(read).lines(),
            backlog: VecDeque::new(),
            server,
        }
    }

    async fn send(&mut self, frame: Value) {
        let line = format!("{}\n", frame);
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn read_frame(&mut self) -> Value {
        let line = within(self.lines.next_line())
            .await
            .unwrap()
            .expect("server closed the stream");
        serde_json::from_str(&line).unwrap()
    }

    /// Next frame matching `predicate`, keeping the others for later.
    async fn expect(&mut self, predicate: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.backlog.iter().position(|f| predicate(f)) {
            return self.backlog.remove(pos).unwrap();
        }
        loop {
            let frame = self.read_frame().await;
            if predicate(&frame) {
                return frame;
            }
            self.backlog.push_back(frame);
        }
    }

    async fn response(&mut self, id: u64) -> Value {
        self.expect(|f| f["id"] == json!(id)).await
    }

    async fn call(&mut self, id: u64, method: &str, args: Value) -> Value {
        self.send(json!({ "id": id, "method": method, "args": args })).await;
        self.response(id).await
    }

    async fn close(mut self) {
        self.writer.shutdown().await.unwrap();
        within(self.server).await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_connection_flow() {
    let harness = Harness::start();
    let mut client = Client::connect(&harness);

    let frame = client.call(1, "isAvailable", Value::Null).await;
    assert_eq!(frame, json!({ "id": 1, "result": true }));

    let frame = client.call(2, "connect", json!({ "address": ADDRESS })).await;
    assert_eq!(frame, json!({ "id": 2, "result": 1 }));

    client.send(json!({ "id": 3, "listen": "read/1" })).await;
    assert_eq!(client.response(3).await, json!({ "id": 3, "result": null }));
    harness.settle().await;

    harness.adapter.transport(0).receive(b"hi");
    let frame = client.expect(|f| f["stream"] == "read/1").await;
    assert_eq!(frame, json!({ "stream": "read/1", "event": [104, 105] }));

    let frame = client
        .call(4, "write", json!({ "id": 1, "string": "yo" }))
        .await;
    assert_eq!(frame, json!({ "id": 4, "result": null }));
    assert_eq!(*harness.adapter.transport(0).written.lock(), b"yo".to_vec());

    client.send(json!({ "id": 5, "cancel": "read/1" })).await;
    assert_eq!(client.response(5).await, json!({ "id": 5, "result": null }));
    let handle = harness.handle.clone();
    eventually(move || handle.connections().is_empty()).await;

    let frame = client
        .call(6, "write", json!({ "id": 1, "string": "yo" }))
        .await;
    assert_eq!(frame["error"]["code"], "invalid_argument");
    assert_eq!(
        frame["error"]["message"],
        "there is no connection with provided id"
    );

    client.close().await;
    harness.stop().await;
}

#[tokio::test]
async fn test_discovery_flow() {
    let harness = Harness::start();
    let mut client = Client::connect(&harness);

    client.send(json!({ "id": 1, "listen": "discovery" })).await;
    client.response(1).await;
    let frame = client.call(2, "startDiscovery", Value::Null).await;
    assert_eq!(frame, json!({ "id": 2, "result": null }));

    let mut device = DeviceRecord::new(
        HardwareAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
        Some("OBD-II".to_string()),
        DeviceType::Classic,
    );
    device.rssi = Some(-61);
    harness.notifier().device_found(device);

    let frame = client.expect(|f| f["stream"] == "discovery").await;
    assert_eq!(
        frame,
        json!({
            "stream": "discovery",
            "event": {
                "address": "00:11:22:33:44:55",
                "name": "OBD-II",
                "type": 1,
                "bonded": false,
                "rssi": -61
            }
        })
    );

    harness.notifier().discovery_finished();
    let frame = client.expect(|f| f["stream"] == "discovery").await;
    assert_eq!(frame, json!({ "stream": "discovery", "end": true }));

    client.close().await;
    harness.stop().await;
}

#[tokio::test]
async fn test_error_frames() {
    let harness = Harness::start();
    let mut client = Client::connect(&harness);

    let frame = client.call(1, "getAddress", Value::Null).await;
    assert_eq!(frame, json!({ "id": 1, "notImplemented": true }));

    let frame = client.call(2, "connect", json!({})).await;
    assert_eq!(
        frame,
        json!({
            "id": 2,
            "error": { "code": "invalid_argument", "message": "argument 'address' not found" }
        })
    );

    client.send(json!({ "id": 3, "listen": "bogus" })).await;
    let frame = client.response(3).await;
    assert_eq!(frame["error"]["code"], "invalid_argument");

    // Garbage lines are skipped without ending the session.
    client.writer.write_all(b"not json\n\n").await.unwrap();
    let frame = client.call(4, "getState", Value::Null).await;
    assert_eq!(frame, json!({ "id": 4, "result": 12 }));

    client.close().await;
    harness.stop().await;
}

#[tokio::test]
async fn test_state_stream_flow() {
    let harness = Harness::start();
    let mut client = Client::connect(&harness);

    client.send(json!({ "id": 1, "listen": "state" })).await;
    client.response(1).await;
    harness.settle().await;

    harness
        .notifier()
        .adapter_state_changed(serial_bridge::bluetooth::AdapterState::TurningOff);
    let frame = client.expect(|f| f["stream"] == "state").await;
    assert_eq!(frame, json!({ "stream": "state", "event": 13 }));

    client.send(json!({ "id": 2, "cancel": "state" })).await;
    client.response(2).await;

    client.close().await;
    harness.stop().await;
}

#[tokio::test]
async fn test_eof_with_unanswered_call() {
    let harness = Harness::start();
    harness.adapter.permission.store(false, Ordering::SeqCst);
    let mut client = Client::connect(&harness);

    // Nobody answers the permission prompt, so this call never completes.
    client
        .send(json!({ "id": 1, "method": "ensurePermissions" }))
        .await;
    let adapter = harness.adapter.clone();
    eventually(move || MockAdapter::count(&adapter.permission_requests) == 1).await;

    client.close().await;
    harness.stop().await;
}
