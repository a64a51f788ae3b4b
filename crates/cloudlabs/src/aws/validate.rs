//! Checks that credentials and permissions are in place before running labs.
use anyhow::Context;

use crate::{config::LabConfig, console};

/// Who the configured credentials belong to.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub account: String,
    pub arn: String,
}

impl Identity {
    /// The last path segment of the ARN, ie the user or session name.
    pub fn user(&self) -> &str {
        self.arn.rsplit('/').next().unwrap_or(&self.arn)
    }

    /// For assumed-role ARNs, the role name.
    pub fn role(&self) -> Option<&str> {
        let mut parts = self.arn.split('/');
        let kind = parts.next()?;
        if !kind.ends_with(":assumed-role") {
            return None;
        }
        parts.next()
    }
}

async fn caller_identity(sdk: &aws_config::SdkConfig) -> anyhow::Result<Identity> {
    let out = aws_sdk_sts::Client::new(sdk)
        .get_caller_identity()
        .send()
        .await
        .context("credentials are missing or expired")?;
    Ok(Identity {
        account: out.account().unwrap_or_default().to_string(),
        arn: out.arn().unwrap_or_default().to_string(),
    })
}

/// Runs every check and prints a report. Returns `true` when all passed.
pub async fn run(cfg: &LabConfig, sdk: &aws_config::SdkConfig) -> bool {
    let mut passed = 0;
    let mut failed = 0;
    let mut record = |result: anyhow::Result<String>| match result {
        Ok(msg) => {
            console::ok(msg);
            passed += 1;
        }
        Err(e) => {
            console::fail(format!("{e:#}"));
            failed += 1;
        }
    };

    console::heading("Validating AWS setup");

    console::step(1, "Credentials");
    record(caller_identity(sdk).await.map(|identity| {
        console::info(format!("account: {}", identity.account));
        console::info(format!("user: {}", identity.user()));
        if let Some(role) = identity.role() {
            console::info(format!("role: {role}"));
        }
        "session is active".to_string()
    }));

    console::step(2, "Region");
    record(
        sdk.region()
            .map(|region| format!("region is {region}"))
            .context("no region configured"),
    );
    if let Some(profile) = &cfg.profile {
        console::info(format!("profile: {profile}"));
    }

    console::step(3, "S3 access");
    record(
        aws_sdk_s3::Client::new(sdk)
            .list_buckets()
            .send()
            .await
            .map(|out| format!("can list buckets ({} found)", out.buckets().len()))
            .context("cannot list S3 buckets"),
    );

    console::step(4, "DynamoDB access");
    record(
        aws_sdk_dynamodb::Client::new(sdk)
            .list_tables()
            .send()
            .await
            .map(|out| format!("can list tables ({} found)", out.table_names().len()))
            .context("cannot list DynamoDB tables"),
    );

    console::heading(format!("{passed} passed, {failed} failed"));
    if failed == 0 {
        console::ok("ready for the labs");
    } else {
        console::warn("fix the failures above before running the labs");
    }
    failed == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_from_assumed_role() {
        let identity = Identity {
            account: "123456789012".to_string(),
            arn: "arn:aws:sts::123456789012:assumed-role/AWSReservedSSO_Labs/student".to_string(),
        };
        assert_eq!("student", identity.user());
        assert_eq!(Some("AWSReservedSSO_Labs"), identity.role());
    }

    #[test]
    fn identity_from_iam_user() {
        let identity = Identity {
            account: "123456789012".to_string(),
            arn: "arn:aws:iam::123456789012:user/alice".to_string(),
        };
        assert_eq!("alice", identity.user());
        assert_eq!(None, identity.role());
    }
}
