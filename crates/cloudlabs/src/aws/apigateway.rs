//! Ships API: an API Gateway REST API fronting DynamoDB and S3 directly,
//! without any Lambda in between.
//!
//! ```text
//! GET /ships                -> DynamoDB Scan
//! GET /ships/profile/{key}  -> DynamoDB GetItem
//! GET /ships/photo/{key}    -> S3 GetObject
//! ```
//!
//! Every `GET` requires an API key, which is attached to a usage plan.
use std::collections::HashMap;

use anyhow::Context;
use aws_sdk_apigateway::{types as aws, Client};

use crate::{aws::iam, config::LabConfig, console};

/// Attributes of a ship item, with their DynamoDB type descriptor.
pub const SHIP_FIELDS: &[(&str, &str)] = &[
    ("id", "S"),
    ("nom", "S"),
    ("type", "S"),
    ("pavillon", "S"),
    ("taille", "N"),
    ("nombre_marins", "N"),
    ("s3_image_key", "S"),
];

const JSON: &str = "application/json";
const ALLOW_ORIGIN: &str = "method.response.header.Access-Control-Allow-Origin";
const ALLOW_HEADERS: &str = "method.response.header.Access-Control-Allow-Headers";
const ALLOW_METHODS: &str = "method.response.header.Access-Control-Allow-Methods";
const CONTENT_TYPE: &str = "method.response.header.Content-Type";

pub fn dynamodb_action_uri(region: &str, action: &str) -> String {
    format!("arn:aws:apigateway:{region}:dynamodb:action/{action}")
}

pub fn s3_object_uri(region: &str, bucket: &str) -> String {
    format!("arn:aws:apigateway:{region}:s3:path/{bucket}/{{key}}")
}

pub fn invoke_url(api_id: &str, region: &str, stage: &str) -> String {
    format!("https://{api_id}.execute-api.{region}.amazonaws.com/{stage}")
}

pub fn scan_request_template(table: &str) -> String {
    serde_json::json!({ "TableName": table }).to_string()
}

pub fn get_item_request_template(table: &str) -> String {
    serde_json::json!({
        "TableName": table,
        "Key": { "id": { "S": "$input.params('key')" } }
    })
    .to_string()
}

fn ship_fields(var: &str, indent: &str) -> String {
    SHIP_FIELDS
        .iter()
        .map(|(name, ty)| format!("{indent}\"{name}\": \"${var}.{name}.{ty}\""))
        .collect::<Vec<_>>()
        .join(",\n")
}

/// VTL turning a `Scan` response into `{"ships": [...]}`.
pub fn ships_response_template() -> String {
    format!(
        "#set($inputRoot = $input.path('$'))\n\
         {{\n  \"ships\": [\n    #foreach($item in $inputRoot.Items)\n    {{\n\
         {}\n    }}#if($foreach.hasNext),#end\n    #end\n  ]\n}}",
        ship_fields("item", "      ")
    )
}

/// VTL turning a `GetItem` response into a single ship.
pub fn ship_response_template() -> String {
    format!(
        "#set($item = $input.path('$.Item'))\n{{\n{}\n}}",
        ship_fields("item", "  ")
    )
}

/// A `GET` method backed by an AWS service integration.
struct ServiceMethod<'a> {
    resource_id: &'a str,
    /// Whether the resource path ends in `{key}`.
    keyed: bool,
    integration_http_method: &'a str,
    uri: String,
    credentials: &'a str,
    request_template: Option<String>,
    response_template: Option<String>,
    /// Forward the service's `Content-Type` to the caller.
    pass_content_type: bool,
}

async fn put_service_method(
    client: &Client,
    api_id: &str,
    method: ServiceMethod<'_>,
) -> anyhow::Result<()> {
    let ServiceMethod {
        resource_id,
        keyed,
        integration_http_method,
        uri,
        credentials,
        request_template,
        response_template,
        pass_content_type,
    } = method;

    client
        .put_method()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("GET")
        .authorization_type("NONE")
        .api_key_required(true)
        .set_request_parameters(
            keyed.then(|| HashMap::from([("method.request.path.key".to_string(), true)])),
        )
        .send()
        .await
        .context("could not put method")?;

    client
        .put_integration()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("GET")
        .r#type(aws::IntegrationType::Aws)
        .integration_http_method(integration_http_method)
        .uri(&uri)
        .credentials(credentials)
        .set_request_parameters(keyed.then(|| {
            HashMap::from([(
                "integration.request.path.key".to_string(),
                "method.request.path.key".to_string(),
            )])
        }))
        .set_request_templates(request_template.map(|t| HashMap::from([(JSON.to_string(), t)])))
        .send()
        .await
        .with_context(|| format!("could not integrate {uri}"))?;

    let mut method_response = client
        .put_method_response()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("GET")
        .status_code("200")
        .response_parameters(ALLOW_ORIGIN, true);
    if pass_content_type {
        method_response = method_response.response_parameters(CONTENT_TYPE, true);
    }
    if response_template.is_some() {
        method_response = method_response.response_models(JSON, "Empty");
    }
    method_response
        .send()
        .await
        .context("could not put method response")?;

    let mut integration_response = client
        .put_integration_response()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("GET")
        .status_code("200")
        .response_parameters(ALLOW_ORIGIN, "'*'");
    if pass_content_type {
        integration_response = integration_response
            .response_parameters(CONTENT_TYPE, "integration.response.header.Content-Type");
    }
    if let Some(template) = response_template {
        integration_response = integration_response.response_templates(JSON, template);
    }
    integration_response
        .send()
        .await
        .context("could not put integration response")?;
    Ok(())
}

/// Answers CORS preflight requests with a MOCK integration.
async fn enable_cors(client: &Client, api_id: &str, resource_id: &str) -> anyhow::Result<()> {
    client
        .put_method()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("OPTIONS")
        .authorization_type("NONE")
        .send()
        .await?;
    client
        .put_integration()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("OPTIONS")
        .r#type(aws::IntegrationType::Mock)
        .request_templates(JSON, r#"{"statusCode": 200}"#)
        .send()
        .await?;
    client
        .put_method_response()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("OPTIONS")
        .status_code("200")
        .response_parameters(ALLOW_HEADERS, true)
        .response_parameters(ALLOW_METHODS, true)
        .response_parameters(ALLOW_ORIGIN, true)
        .send()
        .await?;
    client
        .put_integration_response()
        .rest_api_id(api_id)
        .resource_id(resource_id)
        .http_method("OPTIONS")
        .status_code("200")
        .response_parameters(
            ALLOW_HEADERS,
            "'Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token'",
        )
        .response_parameters(ALLOW_METHODS, "'GET,OPTIONS'")
        .response_parameters(ALLOW_ORIGIN, "'*'")
        .send()
        .await?;
    Ok(())
}

async fn create_resource(
    client: &Client,
    api_id: &str,
    parent_id: &str,
    path_part: &str,
) -> anyhow::Result<String> {
    let out = client
        .create_resource()
        .rest_api_id(api_id)
        .parent_id(parent_id)
        .path_part(path_part)
        .send()
        .await
        .with_context(|| format!("could not create resource {path_part}"))?;
    console::ok(format!(
        "resource {} created",
        out.path().unwrap_or(path_part)
    ));
    out.id.context("missing resource id")
}

async fn root_resource_id(client: &Client, api_id: &str) -> anyhow::Result<String> {
    let out = client
        .get_resources()
        .rest_api_id(api_id)
        .send()
        .await
        .context("could not get resources")?;
    out.items()
        .iter()
        .find(|r| r.path() == Some("/"))
        .and_then(|r| r.id().map(str::to_string))
        .context("root resource not found")
}

/// What a caller needs to use the deployed API.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedApi {
    pub api_id: String,
    pub invoke_url: String,
    pub api_key: String,
}

/// Creates, wires and deploys the Ships API.
pub async fn deploy(cfg: &LabConfig, sdk: &aws_config::SdkConfig) -> anyhow::Result<DeployedApi> {
    let client = Client::new(sdk);
    let iam_client = aws_sdk_iam::Client::new(sdk);
    let api = &cfg.api;
    let region = cfg.region.as_str();

    console::heading("API Gateway");

    console::step(1, "Looking up IAM roles");
    let s3_role = iam::role_arn(&iam_client, &api.s3_role).await?;
    let dynamodb_role = iam::role_arn(&iam_client, &api.dynamodb_role).await?;
    console::ok(format!("S3 role: {s3_role}"));
    console::ok(format!("DynamoDB role: {dynamodb_role}"));

    console::step(2, "Creating REST API");
    let api_id = client
        .create_rest_api()
        .name(&api.name)
        .description("Ships capstone API")
        .endpoint_configuration(
            aws::EndpointConfiguration::builder()
                .types(aws::EndpointType::Regional)
                .build(),
        )
        .send()
        .await
        .context("could not create REST API")?
        .id
        .context("missing api id")?;
    console::ok(format!("API {api_id} created"));

    console::step(3, "Creating resources");
    let root = root_resource_id(&client, &api_id).await?;
    let ships = create_resource(&client, &api_id, &root, "ships").await?;
    let profile = create_resource(&client, &api_id, &ships, "profile").await?;
    let profile_key = create_resource(&client, &api_id, &profile, "{key}").await?;
    let photo = create_resource(&client, &api_id, &ships, "photo").await?;
    let photo_key = create_resource(&client, &api_id, &photo, "{key}").await?;

    console::step(4, "Configuring methods");
    put_service_method(
        &client,
        &api_id,
        ServiceMethod {
            resource_id: &ships,
            keyed: false,
            integration_http_method: "POST",
            uri: dynamodb_action_uri(region, "Scan"),
            credentials: &dynamodb_role,
            request_template: Some(scan_request_template(&api.table)),
            response_template: Some(ships_response_template()),
            pass_content_type: false,
        },
    )
    .await?;
    console::ok("GET /ships (DynamoDB Scan)");
    put_service_method(
        &client,
        &api_id,
        ServiceMethod {
            resource_id: &profile_key,
            keyed: true,
            integration_http_method: "POST",
            uri: dynamodb_action_uri(region, "GetItem"),
            credentials: &dynamodb_role,
            request_template: Some(get_item_request_template(&api.table)),
            response_template: Some(ship_response_template()),
            pass_content_type: false,
        },
    )
    .await?;
    console::ok("GET /ships/profile/{key} (DynamoDB GetItem)");
    put_service_method(
        &client,
        &api_id,
        ServiceMethod {
            resource_id: &photo_key,
            keyed: true,
            integration_http_method: "GET",
            uri: s3_object_uri(region, &api.bucket),
            credentials: &s3_role,
            request_template: None,
            response_template: None,
            pass_content_type: true,
        },
    )
    .await?;
    console::ok("GET /ships/photo/{key} (S3 GetObject)");

    console::step(5, "Enabling CORS");
    for resource_id in [&ships, &profile_key, &photo_key] {
        enable_cors(&client, &api_id, resource_id)
            .await
            .with_context(|| format!("could not enable CORS on {resource_id}"))?;
    }
    console::ok("CORS enabled");

    console::step(6, format!("Deploying to stage '{}'", api.stage));
    client
        .create_deployment()
        .rest_api_id(&api_id)
        .stage_name(&api.stage)
        .description(format!("Deployment of {}", chrono::Utc::now().to_rfc3339()))
        .send()
        .await
        .context("could not deploy")?;
    let invoke_url = invoke_url(&api_id, region, &api.stage);
    console::ok(format!("deployed at {invoke_url}"));

    console::step(7, "Creating API key and usage plan");
    let key = client
        .create_api_key()
        .name(format!("{}-key", api.name))
        .description("Ships capstone API key")
        .enabled(true)
        .send()
        .await
        .context("could not create api key")?;
    let key_id = key.id.context("missing api key id")?;
    let api_key = key.value.context("missing api key value")?;
    let plan_id = client
        .create_usage_plan()
        .name(format!("{}-usage-plan", api.name))
        .description("Ships capstone usage plan")
        .api_stages(
            aws::ApiStage::builder()
                .api_id(&api_id)
                .stage(&api.stage)
                .build(),
        )
        .throttle(
            aws::ThrottleSettings::builder()
                .rate_limit(100.0)
                .burst_limit(200)
                .build(),
        )
        .quota(
            aws::QuotaSettings::builder()
                .limit(10_000)
                .period(aws::QuotaPeriodType::Month)
                .build(),
        )
        .send()
        .await
        .context("could not create usage plan")?
        .id
        .context("missing usage plan id")?;
    client
        .create_usage_plan_key()
        .usage_plan_id(&plan_id)
        .key_id(&key_id)
        .key_type("API_KEY")
        .send()
        .await
        .context("could not attach api key to usage plan")?;
    console::ok(format!("usage plan {plan_id} with key {key_id}"));

    console::heading("Ships API deployed");
    console::info(format!("url: {invoke_url}"));
    console::info(format!("api key: {api_key}"));
    for path in ["/ships", "/ships/profile/{key}", "/ships/photo/{key}"] {
        console::info(format!("GET {invoke_url}{path}"));
    }

    Ok(DeployedApi {
        api_id,
        invoke_url,
        api_key,
    })
}

/// Removes the usage plans, API keys and REST APIs created by [`deploy`].
///
/// Returns the number of resources deleted. With `apply` false nothing is
/// deleted and the resources that would be are only listed.
pub async fn destroy(
    cfg: &LabConfig,
    sdk: &aws_config::SdkConfig,
    apply: bool,
) -> anyhow::Result<usize> {
    let client = Client::new(sdk);
    let api = &cfg.api;
    let plan_name = format!("{}-usage-plan", api.name);
    let key_name = format!("{}-key", api.name);
    let mut deleted = 0;

    let plans = client
        .get_usage_plans()
        .limit(500)
        .send()
        .await
        .context("could not list usage plans")?;
    for plan in plans.items().iter().filter(|p| p.name() == Some(&plan_name)) {
        let Some(plan_id) = plan.id() else { continue };
        console::info(format!("usage plan {plan_name} ({plan_id})"));
        if !apply {
            continue;
        }
        // stages must be detached before the plan can go
        for stage in plan.api_stages() {
            let (Some(api_id), Some(stage_name)) = (stage.api_id(), stage.stage()) else {
                continue;
            };
            client
                .update_usage_plan()
                .usage_plan_id(plan_id)
                .patch_operations(
                    aws::PatchOperation::builder()
                        .op(aws::Op::Remove)
                        .path("/apiStages")
                        .value(format!("{api_id}:{stage_name}"))
                        .build(),
                )
                .send()
                .await
                .with_context(|| format!("could not detach {api_id}:{stage_name}"))?;
        }
        client
            .delete_usage_plan()
            .usage_plan_id(plan_id)
            .send()
            .await
            .with_context(|| format!("could not delete usage plan {plan_id}"))?;
        deleted += 1;
    }

    let keys = client
        .get_api_keys()
        .name_query(&key_name)
        .limit(500)
        .send()
        .await
        .context("could not list api keys")?;
    for key in keys.items().iter().filter(|k| k.name() == Some(&key_name)) {
        let Some(key_id) = key.id() else { continue };
        console::info(format!("api key {key_name} ({key_id})"));
        if apply {
            client
                .delete_api_key()
                .api_key(key_id)
                .send()
                .await
                .with_context(|| format!("could not delete api key {key_id}"))?;
            deleted += 1;
        }
    }

    let apis = client
        .get_rest_apis()
        .limit(500)
        .send()
        .await
        .context("could not list REST APIs")?;
    for rest_api in apis.items().iter().filter(|a| a.name() == Some(&api.name)) {
        let Some(api_id) = rest_api.id() else { continue };
        console::info(format!("REST API {} ({api_id})", api.name));
        if apply {
            client
                .delete_rest_api()
                .rest_api_id(api_id)
                .send()
                .await
                .with_context(|| format!("could not delete REST API {api_id}"))?;
            deleted += 1;
        }
    }

    if deleted == 0 && apply {
        log::warn!("nothing named {} to delete", api.name);
    }
    Ok(deleted)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn integration_uris() {
        assert_eq!(
            "arn:aws:apigateway:eu-west-1:dynamodb:action/Scan",
            dynamodb_action_uri("eu-west-1", "Scan")
        );
        assert_eq!(
            "arn:aws:apigateway:eu-west-1:s3:path/ships/{key}",
            s3_object_uri("eu-west-1", "ships")
        );
        assert_eq!(
            "https://abc123.execute-api.eu-west-1.amazonaws.com/dev",
            invoke_url("abc123", "eu-west-1", "dev")
        );
    }

    #[test]
    fn request_templates_are_json() {
        let scan: serde_json::Value =
            serde_json::from_str(&scan_request_template("ENM-VerifMaritime")).unwrap();
        assert_eq!(serde_json::json!({"TableName": "ENM-VerifMaritime"}), scan);

        let get: serde_json::Value =
            serde_json::from_str(&get_item_request_template("ships")).unwrap();
        assert_eq!("$input.params('key')", get["Key"]["id"]["S"]);
    }

    #[test]
    fn single_ship_template() {
        let expected = "#set($item = $input.path('$.Item'))\n\
{
  \"id\": \"$item.id.S\",
  \"nom\": \"$item.nom.S\",
  \"type\": \"$item.type.S\",
  \"pavillon\": \"$item.pavillon.S\",
  \"taille\": \"$item.taille.N\",
  \"nombre_marins\": \"$item.nombre_marins.N\",
  \"s3_image_key\": \"$item.s3_image_key.S\"
}";
        assert_eq!(expected, ship_response_template());
    }

    #[test]
    fn ship_list_template() {
        let template = ships_response_template();
        assert!(template.starts_with("#set($inputRoot = $input.path('$'))\n{\n  \"ships\": ["));
        assert!(template.contains("#foreach($item in $inputRoot.Items)"));
        assert!(template.contains("      \"taille\": \"$item.taille.N\",\n"));
        assert!(template.contains("}#if($foreach.hasNext),#end"));
        assert!(template.ends_with("#end\n  ]\n}"));
    }
}
