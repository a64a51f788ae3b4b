//! IAM lookups.
use anyhow::Context;

/// Looks up the ARN of an existing role.
pub async fn role_arn(client: &aws_sdk_iam::Client, role_name: &str) -> anyhow::Result<String> {
    let role = client
        .get_role()
        .role_name(role_name)
        .send()
        .await
        .with_context(|| format!("could not get role {role_name}"))?
        .role
        .with_context(|| format!("no role named {role_name}"))?;
    log::debug!("role {role_name} is {}", role.arn);
    Ok(role.arn)
}
