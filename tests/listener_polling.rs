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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{eventually, start_broker};
use parking_lot::Mutex;
use pebblemq::message::Message;
use pebblemq::{AppError, AppResult, MqBroker};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listener_receives_in_order_and_acks() {
    let broker = start_broker(&["orders"]).await;
    let mq = MqBroker::connect(&broker.client_config(), broker.consumer_config())
        .await
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let consumer = mq
        .register_handler(&["orders"], move |message: &Message| -> AppResult<()> {
            sink.lock().push(message.body.clone());
            Ok(())
        })
        .await
        .unwrap();

    let producer = mq.create_producer();
    let mut offsets = vec![];
    for i in 0..5 {
        offsets.push(producer.send("orders", &Message::create(format!("o{}", i))).await.unwrap());
    }
    let last = *offsets.last().unwrap();

    assert!(eventually(|| seen.lock().len() == 5).await);
    assert_eq!(
        *seen.lock(),
        (0..5).map(|i| format!("o{}", i)).collect::<Vec<_>>()
    );
    assert!(
        eventually(|| {
            broker
                .queue_manager
                .stat("orders", consumer.id())
                .map(|s| s.subscription.map(|s| s.offset) == Some(last))
                .unwrap_or(false)
        })
        .await
    );
    assert!(mq.dead_letters().is_empty());
    mq.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flaky_listener_is_retried() {
    let broker = start_broker(&["orders"]).await;
    let mq = MqBroker::connect(&broker.client_config(), broker.consumer_config())
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    mq.register_handler(&["orders"], move |_: &Message| -> AppResult<()> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(AppError::ListenerFailed("first try fails".to_string()));
        }
        Ok(())
    })
    .await
    .unwrap();

    mq.create_producer()
        .send("orders", &Message::create("once"))
        .await
        .unwrap();
    assert!(eventually(|| calls.load(Ordering::SeqCst) >= 2).await);
    // acked after the retry, nothing more is delivered
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(mq.dead_letters().is_empty());
    mq.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn poison_message_goes_to_dead_letters() {
    let broker = start_broker(&["orders"]).await;
    let mq = MqBroker::connect(&broker.client_config(), broker.consumer_config())
        .await
        .unwrap();

    let delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let consumer = mq
        .register_handler(&["orders"], move |message: &Message| -> AppResult<()> {
            if message.body == "poison" {
                panic!("cannot digest");
            }
            sink.lock().push(message.body.clone());
            Ok(())
        })
        .await
        .unwrap();

    let producer = mq.create_producer();
    let poison = producer.send("orders", &Message::create("poison")).await.unwrap();
    producer.send("orders", &Message::create("fine")).await.unwrap();

    assert!(eventually(|| delivered.lock().len() == 1).await);
    let dead_letters = mq.dead_letters();
    assert_eq!(dead_letters.len(), 1);
    assert_eq!(dead_letters[0].message.offset(), Some(poison));
    assert_eq!(dead_letters[0].attempts, 3);
    assert_eq!(dead_letters[0].consumer_id, consumer.id());
    assert_eq!(*delivered.lock(), vec!["fine".to_string()]);
    mq.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consumers_get_distinct_ids() {
    let broker = start_broker(&["orders"]).await;
    let mq = MqBroker::connect(&broker.client_config(), broker.consumer_config())
        .await
        .unwrap();
    let first = mq.create_consumer("orders").await.unwrap();
    let second = mq.create_consumer("orders").await.unwrap();
    assert_ne!(first.id(), second.id());

    let offset = mq
        .create_producer()
        .send("orders", &Message::create("shared"))
        .await
        .unwrap();
    let message = first.receive("orders").await.unwrap().unwrap();
    assert!(first.ack_message("orders", &message).await.unwrap());
    // cursors are per consumer
    let other = second.receive("orders").await.unwrap().unwrap();
    assert_eq!(other.offset(), Some(offset));
    assert!(first.receive("orders").await.unwrap().is_none());

    assert!(matches!(
        first.ack_message("orders", &Message::create("never stored")).await,
        Err(AppError::InvalidValue(_))
    ));
    mq.shutdown();
}
