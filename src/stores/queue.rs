//! Bulk upload metadata queue.
use std::future::Future;

use aws_sdk_sqs::Client;

use crate::error::StoreError;

pub trait MessageQueue {
    fn send_message(&self, body: &str, delay_seconds: i32) -> impl Future<Output = Result<(), StoreError>> + Send;
}

#[derive(Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self { client, queue_url: queue_url.into() }
    }
}

impl MessageQueue for SqsQueue {
    async fn send_message(&self, body: &str, delay_seconds: i32) -> Result<(), StoreError> {
        // SQS caps message delays at 15 minutes
        let delay_seconds = delay_seconds.clamp(0, 900);

        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .delay_seconds(delay_seconds)
            .send()
            .await
            .map_err(|e| StoreError::Sqs(format!("Failed to send message: {}", e.into_service_error())))?;
        Ok(())
    }
}
