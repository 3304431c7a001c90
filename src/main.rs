use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::Client as DynamoDbClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{Body, Error, Request, Response, run, service_fn};
use tracing::info;

use lloyd_george_records::config::Config;
use lloyd_george_records::router::handle_lambda_event;
use lloyd_george_records::services::DocumentReferenceService;
use lloyd_george_records::stores::{DynamoDocumentStore, S3ObjectStore};

type ApiService = DocumentReferenceService<DynamoDocumentStore, S3ObjectStore>;

async fn function_handler(event: Request, service: &ApiService) -> Result<Response<Body>, Error> {
    Ok(handle_lambda_event(event, service).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    lambda_http::tracing::init_default_subscriber();

    let config = Config::from_env()?;

    // Clients are built once per cold start and shared across invocations
    let aws = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let service = DocumentReferenceService::new(
        config.clone(),
        DynamoDocumentStore::new(DynamoDbClient::new(&aws), &config.lloyd_george_table),
        S3ObjectStore::new(S3Client::new(&aws)),
    );

    info!(table = %config.lloyd_george_table, "Document reference API ready");

    run(service_fn(|event: Request| function_handler(event, &service))).await
}
