//! Labs for AWS.

pub use aws_config::SdkConfig;
pub mod apigateway;
pub mod dynamodb;
pub mod ecs;
pub mod iam;
pub mod s3;
pub mod validate;
