//! # Cloud labs
//!
//! Hands-on labs for the AWS SDK for Rust. Each lab is a short, sequential
//! program: create a resource, wait for it, use it, read it back and tear it
//! down, printing its progress as it goes.
//!
//! ## Labs
//!
//! - **S3** ([`aws::s3`]): buckets, uploads, listings and downloads, plus the
//!   public bucket serving the capstone's ship photos.
//! - **DynamoDB** ([`aws::dynamodb`]): a table of coffees, from creation to
//!   deletion.
//! - **API Gateway** ([`aws::apigateway`]): a REST API reading ships straight
//!   out of DynamoDB and S3, protected by an API key.
//! - **ECS** ([`aws::ecs`]): a one-off Fargate task classifying an image.
//!
//! The Lambda handlers live in the `cloudlabs-lambda` crate.
//!
//! ## Waiting on the cloud
//!
//! Most AWS resources are not usable the moment they are created. The
//! [`poll`] module holds the one reusable piece of machinery in the labs: a
//! poller that checks a remote status on an interval and tells apart success,
//! explicit failure and giving up.
//!
//! ## Error Handling
//!
//! The poller and the configuration expose their own error enums
//! ([`poll::PollError`], [`config::ConfigError`]). Lab operations return
//! `anyhow::Result`, with context naming the resource involved.

pub mod aws;
pub mod config;
pub mod console;
pub mod poll;
pub mod utils;

pub use config::LabConfig;
pub use poll::{Check, PollError, Poller, Ready};
