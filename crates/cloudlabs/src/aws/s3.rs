//! S3 labs.
//!
//! Two flows live here: the SDK walkthrough (create a bucket, upload, list,
//! download, verify) and the capstone bucket that serves the ship photos.
use std::path::Path;

use anyhow::Context;
use aws_sdk_s3::{
    operation::create_bucket::builders::CreateBucketFluentBuilder, primitives::ByteStream,
    types as aws, Client,
};

use crate::{config::LabConfig, console, utils};

/// `us-east-1` is the one region that rejects an explicit location
/// constraint.
fn create_bucket_request(client: &Client, bucket: &str, region: &str) -> CreateBucketFluentBuilder {
    let request = client.create_bucket().bucket(bucket);
    if region == "us-east-1" {
        return request;
    }
    request.create_bucket_configuration(
        aws::CreateBucketConfiguration::builder()
            .location_constraint(aws::BucketLocationConstraint::from(region))
            .build(),
    )
}

/// Creates a bucket in the given region.
pub async fn create_bucket(client: &Client, bucket: &str, region: &str) -> anyhow::Result<()> {
    create_bucket_request(client, bucket, region)
        .send()
        .await
        .with_context(|| format!("could not create bucket {bucket}"))?;
    log::info!("created bucket {bucket} in {region}");
    Ok(())
}

/// Whether the bucket was created now or was already ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketCreation {
    Created,
    AlreadyOwned,
}

/// Creates a bucket, tolerating one we already own.
///
/// A bucket name taken by another account is still an error.
pub async fn ensure_bucket(
    client: &Client,
    bucket: &str,
    region: &str,
) -> anyhow::Result<BucketCreation> {
    match create_bucket_request(client, bucket, region).send().await {
        Ok(_) => Ok(BucketCreation::Created),
        Err(e)
            if e.as_service_error()
                .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
        {
            log::info!("bucket {bucket} already exists and is ours");
            Ok(BucketCreation::AlreadyOwned)
        }
        Err(e) => {
            if e.as_service_error()
                .is_some_and(|e| e.is_bucket_already_exists())
            {
                log::error!("bucket name {bucket} belongs to someone else");
            }
            Err(e).with_context(|| format!("could not create bucket {bucket}"))
        }
    }
}

pub async fn upload(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
    content_type: &str,
) -> anyhow::Result<()> {
    log::debug!("uploading {} bytes to s3://{bucket}/{key}", body.len());
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(content_type)
        .send()
        .await
        .with_context(|| format!("could not upload s3://{bucket}/{key}"))?;
    Ok(())
}

pub async fn upload_file(
    client: &Client,
    bucket: &str,
    key: &str,
    path: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let body = std::fs::read(path).with_context(|| format!("could not read {path:?}"))?;
    upload(client, bucket, key, body, utils::content_type_for(key)).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<String>,
}

/// Lists every object in the bucket, following pagination.
pub async fn list_objects(client: &Client, bucket: &str) -> anyhow::Result<Vec<ObjectSummary>> {
    let mut objects = vec![];
    let mut token = None;
    loop {
        let out = client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(token)
            .send()
            .await
            .with_context(|| format!("could not list s3://{bucket}"))?;
        objects.extend(out.contents().iter().map(|object| ObjectSummary {
            key: object.key().unwrap_or_default().to_string(),
            size: object.size().unwrap_or_default(),
            last_modified: object.last_modified().map(|t| t.to_string()),
        }));
        token = out.next_continuation_token;
        if token.is_none() {
            break;
        }
    }
    Ok(objects)
}

pub async fn download(client: &Client, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
    let out = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .with_context(|| format!("could not get s3://{bucket}/{key}"))?;
    let bytes = out
        .body
        .collect()
        .await
        .with_context(|| format!("could not read body of s3://{bucket}/{key}"))?;
    Ok(bytes.into_bytes().to_vec())
}

/// Deletes every object in the bucket and then the bucket itself.
pub async fn empty_and_delete_bucket(client: &Client, bucket: &str) -> anyhow::Result<()> {
    for object in list_objects(client, bucket).await? {
        client
            .delete_object()
            .bucket(bucket)
            .key(&object.key)
            .send()
            .await
            .with_context(|| format!("could not delete s3://{bucket}/{}", object.key))?;
        log::debug!("deleted s3://{bucket}/{}", object.key);
    }
    client
        .delete_bucket()
        .bucket(bucket)
        .send()
        .await
        .with_context(|| format!("could not delete bucket {bucket}"))?;
    log::info!("deleted bucket {bucket}");
    Ok(())
}

/// Lets a browser app read and write the bucket from any origin.
pub fn cors_configuration() -> anyhow::Result<aws::CorsConfiguration> {
    let rule = aws::CorsRule::builder()
        .allowed_headers("*")
        .allowed_methods("GET")
        .allowed_methods("HEAD")
        .allowed_methods("PUT")
        .allowed_methods("POST")
        .allowed_origins("*")
        .expose_headers("ETag")
        .max_age_seconds(3000)
        .build()?;
    Ok(aws::CorsConfiguration::builder().cors_rules(rule).build()?)
}

/// Bucket policy granting anonymous `s3:GetObject` on every key.
pub fn public_read_policy(bucket: &str) -> serde_json::Value {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [
            {
                "Sid": "PublicReadGetObject",
                "Effect": "Allow",
                "Principal": "*",
                "Action": "s3:GetObject",
                "Resource": format!("arn:aws:s3:::{bucket}/*"),
            }
        ]
    })
}

pub fn object_url(bucket: &str, region: &str, key: &str) -> String {
    format!("https://{bucket}.s3.{region}.amazonaws.com/{key}")
}

/// Creates and configures the bucket holding the ship photos, then uploads
/// them.
pub async fn setup_capstone_bucket(
    cfg: &LabConfig,
    sdk: &aws_config::SdkConfig,
    bucket: &str,
) -> anyhow::Result<()> {
    let client = Client::new(sdk);
    console::heading("Ships API bucket");
    console::info(format!("bucket: {bucket}"));

    console::step(1, "Creating bucket");
    match ensure_bucket(&client, bucket, &cfg.region).await? {
        BucketCreation::Created => console::ok("bucket created"),
        BucketCreation::AlreadyOwned => console::info("bucket already exists and is yours"),
    }

    console::step(2, "Configuring CORS");
    client
        .put_bucket_cors()
        .bucket(bucket)
        .cors_configuration(cors_configuration()?)
        .send()
        .await
        .context("could not configure CORS")?;
    console::ok("CORS configured");

    console::step(3, "Allowing public access");
    client
        .put_public_access_block()
        .bucket(bucket)
        .public_access_block_configuration(
            aws::PublicAccessBlockConfiguration::builder()
                .block_public_acls(false)
                .ignore_public_acls(false)
                .block_public_policy(false)
                .restrict_public_buckets(false)
                .build(),
        )
        .send()
        .await
        .context("could not configure the public access block")?;
    console::ok("public access block disabled");

    console::step(4, "Setting the bucket policy");
    client
        .put_bucket_policy()
        .bucket(bucket)
        .policy(public_read_policy(bucket).to_string())
        .send()
        .await
        .context("could not set the bucket policy")?;
    console::ok("bucket policy set");

    console::step(5, "Uploading assets");
    for asset in &cfg.s3.assets {
        let path = cfg.s3.assets_dir.join(asset);
        upload_file(&client, bucket, asset, &path).await?;
        console::ok(format!("{asset} uploaded"));
    }

    console::heading("Bucket ready");
    console::info(format!("region: {}", cfg.region));
    console::info(format!("url: {}", object_url(bucket, &cfg.region, "")));
    for asset in &cfg.s3.assets {
        console::info(object_url(bucket, &cfg.region, asset));
    }
    Ok(())
}

/// Checks that downloaded bytes are the ones uploaded, returning their sha256.
pub fn verify_download(uploaded: &[u8], downloaded: &[u8]) -> anyhow::Result<String> {
    let expected = utils::sha256_hex(uploaded);
    let actual = utils::sha256_hex(downloaded);
    anyhow::ensure!(
        expected == actual,
        "downloaded content differs: sha256 {actual} != {expected}"
    );
    Ok(actual)
}

/// Runs the SDK walkthrough: create, upload, list, download, verify.
pub async fn run_sdk_lab(
    cfg: &LabConfig,
    sdk: &aws_config::SdkConfig,
    cleanup: bool,
) -> anyhow::Result<()> {
    let client = Client::new(sdk);
    let bucket = format!("{}-{}", cfg.s3.bucket_prefix, utils::unique_suffix());
    let key = "test-sdk.txt";
    let local_path = cfg.work_dir.join(key);
    let downloaded_path = cfg.work_dir.join("test-sdk-downloaded.txt");

    console::heading("S3 operations with the Rust SDK");
    console::info(format!("bucket: {bucket}"));

    console::step(1, "Creating bucket");
    create_bucket(&client, &bucket, &cfg.region).await?;
    console::ok("bucket created");

    console::step(2, "Creating local file");
    let contents = format!(
        "Hello from the Rust SDK!\n\
         This file was created at {}\n\
         Operation: upload via the AWS SDK\n\
         Bucket: {bucket}\n",
        chrono::Utc::now().to_rfc3339()
    );
    std::fs::write(&local_path, &contents)
        .with_context(|| format!("could not write {local_path:?}"))?;
    console::ok(format!("wrote {}", local_path.display()));

    console::step(3, "Uploading file");
    upload_file(&client, &bucket, key, &local_path).await?;
    console::ok(format!("uploaded s3://{bucket}/{key}"));

    console::step(4, "Listing objects");
    let objects = list_objects(&client, &bucket).await?;
    if objects.is_empty() {
        console::info("no objects found");
    }
    for object in &objects {
        console::info(format!(
            "{} ({} bytes, modified {})",
            object.key,
            object.size,
            object.last_modified.as_deref().unwrap_or("unknown")
        ));
    }

    console::step(5, "Downloading file");
    let bytes = download(&client, &bucket, key).await?;
    std::fs::write(&downloaded_path, &bytes)
        .with_context(|| format!("could not write {downloaded_path:?}"))?;
    console::ok(format!("downloaded to {}", downloaded_path.display()));

    console::step(6, "Verifying content");
    let digest = verify_download(contents.as_bytes(), &bytes)?;
    console::ok(format!("sha256 {digest} matches"));
    println!("{}", String::from_utf8_lossy(&bytes));

    if cleanup {
        console::step(7, "Cleaning up");
        empty_and_delete_bucket(&client, &bucket).await?;
        console::ok(format!("bucket {bucket} deleted"));
    } else {
        console::warn(format!("remember to clean up the bucket {bucket}"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn policy_targets_every_key() {
        let policy = public_read_policy("ships");
        assert_eq!(
            "arn:aws:s3:::ships/*",
            policy["Statement"][0]["Resource"].as_str().unwrap()
        );
        assert_eq!("s3:GetObject", policy["Statement"][0]["Action"]);
        assert_eq!("*", policy["Statement"][0]["Principal"]);
    }

    #[test]
    fn cors_rule() {
        let cors = cors_configuration().unwrap();
        let rule = &cors.cors_rules()[0];
        assert_eq!(
            vec!["GET", "HEAD", "PUT", "POST"],
            rule.allowed_methods().to_vec()
        );
        assert_eq!(vec!["*"], rule.allowed_origins().to_vec());
        assert_eq!(Some(3000), rule.max_age_seconds());
    }

    #[test]
    fn download_verification() {
        let contents = "Hello from the Rust SDK!\nBucket: s3-lab-sdk-1\n";
        assert_eq!(
            utils::sha256_hex(contents),
            verify_download(contents.as_bytes(), contents.as_bytes()).unwrap()
        );
        let err = verify_download(contents.as_bytes(), b"Hello from the Rust SDK!\n").unwrap_err();
        assert!(err.to_string().starts_with("downloaded content differs"), "{err}");
    }

    #[test]
    fn urls() {
        assert_eq!(
            "https://ships.s3.eu-west-1.amazonaws.com/fisher.jpg",
            object_url("ships", "eu-west-1", "fisher.jpg")
        );
    }
}
