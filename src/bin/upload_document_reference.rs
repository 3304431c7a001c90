use aws_config::BehaviorVersion;
use aws_lambda_events::event::s3::S3Event;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::Error;
use lambda_http::lambda_runtime::{LambdaEvent, run, service_fn};

use lloyd_george_records::config::Config;
use lloyd_george_records::events::handle_s3_event;
use lloyd_george_records::services::UploadDocumentReferenceService;
use lloyd_george_records::stores::{DynamoDocumentStore, S3ObjectStore};

type FinaliserService = UploadDocumentReferenceService<DynamoDocumentStore, S3ObjectStore>;

/// A failed record fails the invocation so the notification is redelivered.
async fn function_handler(event: LambdaEvent<S3Event>, service: &FinaliserService) -> Result<(), Error> {
    handle_s3_event(event.payload, service).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_http::tracing::init_default_subscriber();

    let config = Config::from_env()?;

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let service = UploadDocumentReferenceService::new(
        config.clone(),
        DynamoDocumentStore::new(DynamoDbClient::new(&aws), &config.lloyd_george_table),
        S3ObjectStore::new(S3Client::new(&aws)),
    );

    run(service_fn(|event: LambdaEvent<S3Event>| function_handler(event, &service))).await
}
