//! ABOUTME: lapin-backed implementation of the Bus trait against a real AMQP 0-9-1 broker
//! ABOUTME: Declares the full topology on connect and reconnects with exponential backoff

use crate::reconnect::Backoff;
use crate::topology::{self, dead_letter_routing_key, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE};
use crate::trait_def::{Bus, Consumer, Delivery};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use newsflow_core::NewsflowError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct Inner {
    connection: Connection,
    publish_channel: Channel,
}

/// A durable topic-exchange bus client backed by a single AMQP connection.
///
/// One publish channel is kept open with publisher confirms enabled;
/// `consume` opens a dedicated channel per queue with `prefetch = 1`, so a
/// slow consumer never starves others sharing the connection.
pub struct LapinBus {
    url: String,
    exchange: String,
    inner: Mutex<Option<Inner>>,
}

impl LapinBus {
    /// Connect and declare the full topology: the topic exchange, the
    /// dead-letter exchange/queue, and the four task/completion queues,
    /// each configured to dead-letter into `tasks.dead` once the broker
    /// exhausts redelivery.
    ///
    /// # Errors
    /// `BusUnavailable` if the initial connection or topology declaration
    /// fails.
    pub async fn connect(url: &str, exchange: &str) -> Result<Self, NewsflowError> {
        let bus = Self {
            url: url.to_string(),
            exchange: exchange.to_string(),
            inner: Mutex::new(None),
        };
        bus.ensure_connected().await?;
        Ok(bus)
    }

    async fn dial(&self) -> Result<Inner, NewsflowError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("connect failed: {e}"),
            })?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("channel creation failed: {e}"),
            })?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("confirm_select failed: {e}"),
            })?;

        declare_topology(&channel, &self.exchange).await?;

        Ok(Inner {
            connection,
            publish_channel: channel,
        })
    }

    /// Returns a healthy publish channel, reconnecting with exponential
    /// backoff if the current connection has dropped.
    async fn ensure_connected(&self) -> Result<Channel, NewsflowError> {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.as_ref() {
            if inner.connection.status().connected() {
                return Ok(inner.publish_channel.clone());
            }
            warn!("amqp connection lost, reconnecting");
        }

        let mut backoff = Backoff::new();
        loop {
            match self.dial().await {
                Ok(inner) => {
                    let channel = inner.publish_channel.clone();
                    *guard = Some(inner);
                    info!("amqp connection established");
                    return Ok(channel);
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "amqp reconnect attempt failed");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Health check used by `GET /healthz`: true iff the connection is live.
    pub async fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .await
            .as_ref()
            .is_some_and(|inner| inner.connection.status().connected())
    }
}

async fn declare_topology(channel: &Channel, exchange: &str) -> Result<(), NewsflowError> {
    let wrap = |e: lapin::Error| NewsflowError::BusUnavailable {
        message: format!("topology declaration failed: {e}"),
    };

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Topic,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(wrap)?;

    channel
        .exchange_declare(
            DEAD_LETTER_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(wrap)?;

    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(wrap)?;
    channel
        .queue_bind(
            DEAD_LETTER_QUEUE,
            DEAD_LETTER_EXCHANGE,
            dead_letter_routing_key(),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(wrap)?;

    // Every queue -- task queues and the completion queue alike -- dead-letters
    // a nacked-without-requeue message into tasks.dead; poison bodies can land
    // on any of them, not just the task queues.
    for binding in topology::TASK_QUEUES
        .iter()
        .chain(std::iter::once(&topology::COMPLETION))
    {
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(dead_letter_routing_key().into()),
        );
        channel
            .queue_declare(
                binding.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(wrap)?;
        channel
            .queue_bind(
                binding.queue,
                exchange,
                binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(wrap)?;
    }

    debug!("amqp topology declared");
    Ok(())
}

#[async_trait]
impl Bus for LapinBus {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), NewsflowError> {
        self.publish_with_headers(routing_key, body, &[]).await
    }

    async fn publish_with_headers(
        &self,
        routing_key: &str,
        body: &[u8],
        headers: &[(&str, String)],
    ) -> Result<(), NewsflowError> {
        let channel = self.ensure_connected().await?;
        let mut props = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_content_encoding("utf-8".into())
            .with_delivery_mode(2); // persistent

        if !headers.is_empty() {
            let mut table = FieldTable::default();
            for (key, value) in headers {
                table.insert((*key).into(), AMQPValue::LongString(value.clone().into()));
            }
            props = props.with_headers(table);
        }

        let confirm = channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                props,
            )
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("publish failed: {e}"),
            })?;

        confirm
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("publisher confirm failed: {e}"),
            })?;
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, NewsflowError> {
        // Independent channel per consumer so prefetch=1 applies to exactly
        // one in-flight task for this consumer, not shared with publishing.
        let _ = self.ensure_connected().await?;
        let guard = self.inner.lock().await;
        let connection = &guard
            .as_ref()
            .expect("ensure_connected populates inner")
            .connection;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("consumer channel creation failed: {e}"),
            })?;
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("basic_qos failed: {e}"),
            })?;

        let consumer = channel
            .basic_consume(
                queue,
                &format!("newsflow-{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("basic_consume failed: {e}"),
            })?;

        Ok(Box::new(LapinConsumer { consumer }))
    }

    async fn is_healthy(&self) -> bool {
        self.is_connected().await
    }
}

struct LapinConsumer {
    consumer: lapin::Consumer,
}

#[async_trait]
impl Consumer for LapinConsumer {
    async fn next(&mut self) -> Option<Box<dyn Delivery>> {
        loop {
            match self.consumer.next().await {
                Some(Ok(delivery)) => return Some(Box::new(LapinDelivery { delivery })),
                Some(Err(err)) => {
                    warn!(error = %err, "amqp delivery error, continuing");
                }
                None => return None,
            }
        }
    }
}

struct LapinDelivery {
    delivery: lapin::message::Delivery,
}

#[async_trait]
impl Delivery for LapinDelivery {
    fn body(&self) -> &[u8] {
        &self.delivery.data
    }

    fn routing_key(&self) -> &str {
        self.delivery.routing_key.as_str()
    }

    fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    async fn ack(self: Box<Self>) -> Result<(), NewsflowError> {
        self.delivery
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("ack failed: {e}"),
            })
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), NewsflowError> {
        self.delivery
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
            .map_err(|e| NewsflowError::BusUnavailable {
                message: format!("nack failed: {e}"),
            })
    }
}
