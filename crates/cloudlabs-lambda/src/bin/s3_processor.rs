use cloudlabs_lambda::{
    s3_processor::{self, ObjectCreatedEvent},
    store::S3Store,
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};

async fn function_handler(
    store: &S3Store,
    event: LambdaEvent<ObjectCreatedEvent>,
) -> Result<(), Error> {
    let request_id = event.context.request_id.clone();
    if let Err(e) = s3_processor::handle(store, event.payload).await {
        tracing::error!(%request_id, "processing failed: {e:#}");
        return Err(e.into());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        // disable printing the name of the module in every log line.
        .with_target(false)
        // disabling time is handy because CloudWatch will add the ingestion time.
        .without_time()
        .init();
    let cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let store = S3Store::new(&cfg);
    run(service_fn(|event| function_handler(&store, event))).await
}
