use aws_lambda_events::event::dynamodb::Event;
use cloudlabs_lambda::{
    store::S3Store,
    stream_processor::{self, HISTORY_BUCKET_ENV},
};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};

async fn function_handler(store: &S3Store, event: LambdaEvent<Event>) -> Result<(), Error> {
    let request_id = event.context.request_id.clone();
    let bucket = std::env::var(HISTORY_BUCKET_ENV).ok();
    let now = chrono::Utc::now();
    match stream_processor::handle(store, bucket.as_deref(), event.payload, now).await {
        Ok(Some(key)) => tracing::info!(%request_id, "history written to {key}"),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(%request_id, "processing failed: {e:#}");
            return Err(e.into());
        }
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
