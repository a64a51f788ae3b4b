//! Lambda handlers for the serverless labs.
//!
//! - [`s3_processor`] reacts to EventBridge "Object Created" events and logs
//!   the content of uploaded `data.json` files.
//! - [`stream_processor`] turns DynamoDB stream records into a change history
//!   written back to S3.
//!
//! Handlers talk to S3 through [`store::ObjectStore`] so they can be tested
//! without AWS. The `src/bin` entry points wire them to the Lambda runtime.

pub mod s3_processor;
pub mod store;
pub mod stream_processor;
