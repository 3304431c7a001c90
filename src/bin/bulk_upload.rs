use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_lambda_events::event::sqs::{SqsBatchResponse, SqsEvent};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sqs::Client as SqsClient;
use lambda_http::Error;
use lambda_http::lambda_runtime::{LambdaEvent, run, service_fn};
use tracing::info;

use lloyd_george_records::config::Config;
use lloyd_george_records::events::handle_sqs_event;
use lloyd_george_records::services::BulkUploadService;
use lloyd_george_records::stores::{DynamoDocumentStore, DynamoReportStore, PdsClient, S3ObjectStore, SqsQueue};

type WorkerService = BulkUploadService<DynamoDocumentStore, S3ObjectStore, PdsClient, SqsQueue, DynamoReportStore>;

async fn function_handler(event: LambdaEvent<SqsEvent>, service: &WorkerService) -> Result<SqsBatchResponse, Error> {
    info!(records = event.payload.records.len(), "Received bulk upload batch");
    Ok(handle_sqs_event(event.payload, service).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_http::tracing::init_default_subscriber();

    let config = Config::from_env()?;
    let report_table = config.require_report_table()?.to_string();
    let queue_url = config.require_queue_url()?.to_string();
    let pds = PdsClient::new(
        config.require_pds_endpoint()?,
        config.pds_access_token.clone(),
        Duration::from_secs(config.pds_timeout_seconds),
    )?;

    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let dynamodb = DynamoDbClient::new(&aws);
    let service = BulkUploadService::new(
        config.clone(),
        DynamoDocumentStore::new(dynamodb.clone(), &config.lloyd_george_table),
        S3ObjectStore::new(S3Client::new(&aws)),
        pds,
        SqsQueue::new(SqsClient::new(&aws), queue_url),
        DynamoReportStore::new(dynamodb, report_table),
    );

    run(service_fn(|event: LambdaEvent<SqsEvent>| function_handler(event, &service))).await
}
