// Copyright 2025 jonefeewang@gmail.com
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

mod common;

use std::sync::Arc;

use common::{start_broker, start_broker_with};
use pebblemq::message::Message;
use pebblemq::network::{write_frame, Connection};
use pebblemq::protocol::{
    ApiAction, RequestEnvelope, ResponseEnvelope, PARAM_CONSUMER_ID, PARAM_TOPIC,
    RESPONSE_UNKNOWN_ACTION,
};
use pebblemq::{AppError, ClientService};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn send_receive_ack_over_tcp() {
    let broker = start_broker(&["t1"]).await;
    let service = ClientService::connect(&broker.client_config()).await.unwrap();

    service.subscribe("t1", "c1").await.unwrap();
    let mut offsets = vec![];
    for i in 0..5 {
        offsets.push(service.send("t1", &Message::create(format!("m{}", i))).await.unwrap());
    }
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    let batch = service.batch_receive("t1", "c1", 10).await.unwrap();
    assert_eq!(
        batch.iter().map(|m| m.offset().unwrap()).collect::<Vec<_>>(),
        offsets
    );

    for (i, offset) in offsets.iter().enumerate() {
        let message = service.receive("t1", "c1").await.unwrap().unwrap();
        assert_eq!(message.body, format!("m{}", i));
        assert_eq!(message.offset(), Some(*offset));
        assert!(service.ack("t1", "c1", *offset).await.unwrap());
        assert!(!service.ack("t1", "c1", *offset).await.unwrap());
    }
    assert!(service.receive("t1", "c1").await.unwrap().is_none());

    let stat = service.stat("t1", "c1").await.unwrap();
    assert_eq!(stat.total, 5);
    assert_eq!(stat.subscription.unwrap().offset, *offsets.last().unwrap());

    service.unsubscribe("t1", "c1").await.unwrap();
    assert!(matches!(
        service.receive("t1", "c1").await,
        Err(AppError::RemoteError(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broker_errors_keep_the_connection() {
    let broker = start_broker(&["t1"]).await;
    let mut config = broker.client_config();
    config.pool_max_total = 1;
    config.pool_max_idle = 1;
    let service = ClientService::connect(&config).await.unwrap();

    let err = service.send("missing", &Message::create("x")).await.unwrap_err();
    assert!(matches!(err, AppError::RemoteError(ref text) if text.contains("missing")), "{}", err);
    assert!(!err.is_transport_error());
    assert_eq!(service.pool().idle_count(), 1);
    assert_eq!(service.send("t1", &Message::create("x")).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_connection() {
    let broker = start_broker(&["t1"]).await;
    let mut config = broker.client_config();
    config.pool_max_total = 1;
    config.pool_max_idle = 1;
    let service = Arc::new(ClientService::connect(&config).await.unwrap());
    service.subscribe("t1", "c1").await.unwrap();

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let service = service.clone();
        tasks.spawn(async move { service.send("t1", &Message::create(format!("p{}", i))).await });
    }
    let mut offsets = vec![];
    while let Some(result) = tasks.join_next().await {
        offsets.push(result.unwrap().unwrap());
    }
    offsets.sort_unstable();
    offsets.dedup();
    assert_eq!(offsets.len(), 50);

    let messages = service.batch_receive("t1", "c1", 1000).await.unwrap();
    assert_eq!(messages.len(), 50);
    assert_eq!(broker.queue_manager.stat("t1", "c1").unwrap().total, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_batches_are_split_across_calls() {
    let broker = start_broker_with(&["t1"], |config| {
        config.network.max_frame_length = 4096;
        config.client.max_frame_length = 4096;
        config.client.pool_max_total = 1;
    })
    .await;
    let service = ClientService::connect(&broker.client_config()).await.unwrap();
    service.subscribe("t1", "c1").await.unwrap();
    let mut offsets = vec![];
    for _ in 0..8 {
        offsets.push(service.send("t1", &Message::create("b".repeat(700))).await.unwrap());
    }

    let mut received = vec![];
    while received.len() < offsets.len() {
        let batch = service.batch_receive("t1", "c1", 1000).await.unwrap();
        assert!(!batch.is_empty() && batch.len() < offsets.len());
        // the same batch again: the connection survived and the cursor did not move
        assert_eq!(service.batch_receive("t1", "c1", 1000).await.unwrap(), batch);
        let last = batch.last().unwrap().offset().unwrap();
        assert!(service.ack("t1", "c1", last).await.unwrap());
        received.extend(batch.iter().map(|m| m.offset().unwrap()));
    }
    assert_eq!(received, offsets);
    assert_eq!(service.pool().active_count(), 0);
    assert_eq!(service.pool().idle_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_protocol_edges() {
    let broker = start_broker(&["t1"]).await;
    let address = format!("{}:{}", broker.config.client.host, broker.config.client.port);

    let socket = TcpStream::connect(&address).await.unwrap();
    let (reader, mut writer) = socket.into_split();
    let mut connection = Connection::new(reader, 1024, 1024 * 1024);

    let mut unknown = RequestEnvelope::new(77, ApiAction::Stat)
        .with_param(PARAM_TOPIC, "t1")
        .with_param(PARAM_CONSUMER_ID, "c1");
    unknown.action = "purge".to_string();
    write_frame(&mut writer, &unknown.to_json().unwrap()).await.unwrap();
    let frame = connection.read_frame().await.unwrap().unwrap();
    let response = ResponseEnvelope::from_json(&frame.payload).unwrap();
    assert_eq!(response.trace_id, 77);
    assert_eq!(response.code, RESPONSE_UNKNOWN_ACTION);

    // a frame that is not an envelope closes the connection
    write_frame(&mut writer, "{not json").await.unwrap();
    assert!(matches!(connection.read_frame().await, Ok(None) | Err(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_survive_a_restart() {
    let broker = start_broker(&["t1"]).await;
    let service = ClientService::connect(&broker.client_config()).await.unwrap();
    let body = "r".repeat(200);
    let mut offsets = vec![];
    for _ in 0..12 {
        offsets.push(service.send("t1", &Message::create(body.clone())).await.unwrap());
    }
    // 1024 byte segments, so the log rolled several times
    assert!(*offsets.last().unwrap() >= 1024 * 2);
    broker.queue_manager.flush().unwrap();

    let reopened = pebblemq::QueueManager::startup(&broker.config.log).unwrap();
    reopened
        .subscribe(pebblemq::message::Subscription::new("t1", "c2"))
        .unwrap();
    let replayed = reopened.batch_receive("t1", "c2", 100, usize::MAX).unwrap();
    assert_eq!(
        replayed.iter().map(|m| m.offset().unwrap()).collect::<Vec<_>>(),
        offsets
    );
}
