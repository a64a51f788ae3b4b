//! ECS image classification lab.
//!
//! The network, cluster, repository and roles come from two CloudFormation
//! stacks deployed beforehand. This module registers a Fargate task
//! definition for the classifier container, runs it once against an image
//! URL and watches it until it stops.
use std::{cell::RefCell, collections::BTreeMap};

use anyhow::Context;
use aws_sdk_cloudformation as cfn;
use aws_sdk_ecs::{types as aws, Client};

use crate::{
    config::LabConfig,
    console,
    poll::{Check, PollError, Poller, Ready},
};

pub const TASK_FAMILY: &str = "image-classifier";
pub const CONTAINER_NAME: &str = "image-classifier";

pub const STATUS_STOPPED: &str = "STOPPED";
pub const STATUS_RUNNING: &str = "RUNNING";

pub const OUTPUT_REPOSITORY: &str = "ClassifierECRRepository";
pub const OUTPUT_TASK_ROLE: &str = "ImageClassifierTaskRoleArn";
pub const OUTPUT_EXECUTION_ROLE: &str = "ECSTaskExecutionRoleArn";
pub const OUTPUT_SUBNETS: &str = "SubnetIds";
pub const OUTPUT_SECURITY_GROUP: &str = "ECSSecurityGroup";

fn lab_tags() -> Vec<aws::Tag> {
    [
        ("project", "ecs-lab"),
        ("environment", "development"),
        ("managed-by", "aws-sdk"),
    ]
    .into_iter()
    .map(|(key, value)| aws::Tag::builder().key(key).value(value).build())
    .collect()
}

/// Adds a stack's outputs to `into`. Later stacks win on key collisions.
pub fn collect_outputs(outputs: &[cfn::types::Output], into: &mut BTreeMap<String, String>) {
    for output in outputs {
        if let (Some(key), Some(value)) = (output.output_key(), output.output_value()) {
            into.insert(key.to_string(), value.to_string());
        }
    }
}

/// Merged outputs of the infrastructure and IAM stacks.
pub async fn stack_outputs(
    client: &cfn::Client,
    stacks: &[&str],
) -> anyhow::Result<BTreeMap<String, String>> {
    let mut outputs = BTreeMap::default();
    for stack_name in stacks {
        let described = client
            .describe_stacks()
            .stack_name(*stack_name)
            .send()
            .await
            .with_context(|| format!("could not describe stack {stack_name}"))?;
        let stack = described
            .stacks()
            .first()
            .with_context(|| format!("stack {stack_name} not found"))?;
        anyhow::ensure!(
            !stack.outputs().is_empty(),
            "stack {stack_name} has no outputs"
        );
        collect_outputs(stack.outputs(), &mut outputs);
    }
    Ok(outputs)
}

pub fn require_output<'a>(
    outputs: &'a BTreeMap<String, String>,
    key: &str,
) -> anyhow::Result<&'a str> {
    outputs
        .get(key)
        .map(String::as_str)
        .with_context(|| format!("{key} output not found in the CloudFormation stacks"))
}

/// Splits the comma separated `SubnetIds` output.
pub fn split_subnets(subnets: &str) -> Vec<String> {
    subnets
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct TaskDefinitionSpec<'a> {
    pub image: String,
    pub task_role_arn: &'a str,
    pub execution_role_arn: &'a str,
    pub log_group: &'a str,
    pub region: &'a str,
}

/// Registers the classifier task definition and returns its ARN.
pub async fn register_task_definition(
    client: &Client,
    spec: TaskDefinitionSpec<'_>,
) -> anyhow::Result<String> {
    let log_configuration = aws::LogConfiguration::builder()
        .log_driver(aws::LogDriver::Awslogs)
        .options("awslogs-group", spec.log_group)
        .options("awslogs-region", spec.region)
        .options("awslogs-stream-prefix", "ecs")
        .build()?;
    let container = aws::ContainerDefinition::builder()
        .name(CONTAINER_NAME)
        .image(&spec.image)
        .essential(true)
        .command("node")
        .command("classifier.js")
        .log_configuration(log_configuration)
        .environment(
            aws::KeyValuePair::builder()
                .name("NODE_ENV")
                .value("production")
                .build(),
        )
        .build();
    let out = client
        .register_task_definition()
        .family(TASK_FAMILY)
        .network_mode(aws::NetworkMode::Awsvpc)
        .requires_compatibilities(aws::Compatibility::Fargate)
        .cpu("1024")
        .memory("2048")
        .task_role_arn(spec.task_role_arn)
        .execution_role_arn(spec.execution_role_arn)
        .container_definitions(container)
        .set_tags(Some(lab_tags()))
        .send()
        .await
        .context("could not register task definition")?;
    let arn = out
        .task_definition()
        .and_then(|td| td.task_definition_arn())
        .context("missing task definition arn")?;
    Ok(arn.to_string())
}

/// Runs the classifier once against `image_url` and returns the task ARN.
pub async fn run_task(
    client: &Client,
    cluster: &str,
    task_definition_arn: &str,
    subnets: Vec<String>,
    security_group: &str,
    image_url: &str,
) -> anyhow::Result<String> {
    let vpc = aws::AwsVpcConfiguration::builder()
        .set_subnets(Some(subnets))
        .security_groups(security_group)
        // the container downloads its model from the internet
        .assign_public_ip(aws::AssignPublicIp::Enabled)
        .build()?;
    let overrides = aws::TaskOverride::builder()
        .container_overrides(
            aws::ContainerOverride::builder()
                .name(CONTAINER_NAME)
                .command("node")
                .command("classifier.js")
                .command(image_url)
                .build(),
        )
        .build();
    let out = client
        .run_task()
        .cluster(cluster)
        .task_definition(task_definition_arn)
        .launch_type(aws::LaunchType::Fargate)
        .network_configuration(
            aws::NetworkConfiguration::builder()
                .awsvpc_configuration(vpc)
                .build(),
        )
        .overrides(overrides)
        .set_tags(Some(lab_tags()))
        .send()
        .await
        .context("could not run task")?;
    if let Some(failure) = out.failures().first() {
        anyhow::bail!(
            "task was not started: {}",
            failure.reason().unwrap_or("unknown reason")
        );
    }
    let arn = out
        .tasks()
        .first()
        .and_then(|task| task.task_arn())
        .context("no task was created")?;
    Ok(arn.to_string())
}

/// The parts of a described task the lab cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskSnapshot {
    pub last_status: String,
    pub exit_code: Option<i32>,
    pub stopped_reason: Option<String>,
}

impl From<&aws::Task> for TaskSnapshot {
    fn from(task: &aws::Task) -> Self {
        TaskSnapshot {
            last_status: task.last_status().unwrap_or_default().to_string(),
            exit_code: task.containers().first().and_then(|c| c.exit_code()),
            stopped_reason: task.stopped_reason().map(str::to_string),
        }
    }
}

/// Why a stopped task is considered failed.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskFailure {
    pub exit_code: Option<i32>,
    pub stopped_reason: Option<String>,
}

impl core::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "task failed with exit code {code}")?,
            None => f.write_str("task failed without an exit code")?,
        }
        if let Some(reason) = &self.stopped_reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

/// A stopped task succeeded only if its container exited with 0.
pub fn classify_task(task: TaskSnapshot) -> Check<TaskSnapshot, TaskFailure> {
    if task.last_status != STATUS_STOPPED {
        return Check::Continue;
    }
    if task.exit_code == Some(0) {
        Check::Success(task)
    } else {
        Check::Failure(TaskFailure {
            exit_code: task.exit_code,
            stopped_reason: task.stopped_reason,
        })
    }
}

/// Remembers the last task status seen, so each change is reported once.
#[derive(Debug, Default)]
pub struct StatusChanges {
    last: RefCell<Option<String>>,
}

impl StatusChanges {
    /// `true` when `status` differs from the previously observed one.
    pub fn observe(&self, status: &str) -> bool {
        if self.last.borrow().as_deref() == Some(status) {
            return false;
        }
        self.last.replace(Some(status.to_string()));
        true
    }
}

async fn describe_task(client: &Client, cluster: &str, task_arn: &str) -> anyhow::Result<TaskSnapshot> {
    let out = client
        .describe_tasks()
        .cluster(cluster)
        .tasks(task_arn)
        .send()
        .await?;
    let task = out
        .tasks()
        .first()
        .with_context(|| format!("task {task_arn} not found"))?;
    Ok(TaskSnapshot::from(task))
}

/// Waits for the task to stop, printing each status change once.
pub async fn monitor_task(
    client: &Client,
    cluster: &str,
    task_arn: &str,
    poller: &Poller,
) -> Result<Ready<TaskSnapshot>, PollError<TaskFailure, anyhow::Error>> {
    let changes = StatusChanges::default();
    poller
        .poll(
            || describe_task(client, cluster, task_arn),
            |task: TaskSnapshot| {
                if changes.observe(&task.last_status) {
                    console::info(format!("task status: {}", task.last_status));
                    if task.last_status == STATUS_RUNNING {
                        console::info("classifying...");
                    }
                }
                classify_task(task)
            },
        )
        .await
}

/// Stops the task if it is still going. Errors are reported, not returned.
pub async fn cleanup(client: &Client, cluster: &str, task_arn: &str) {
    let task = match describe_task(client, cluster, task_arn).await {
        Ok(task) => task,
        Err(e) => {
            console::fail(format!("could not describe task for cleanup: {e:#}"));
            return;
        }
    };
    if task.last_status == STATUS_STOPPED {
        log::debug!("task {task_arn} already stopped");
        return;
    }
    match client
        .stop_task()
        .cluster(cluster)
        .task(task_arn)
        .reason("lab cleanup")
        .send()
        .await
    {
        Ok(_) => console::ok("task stopped"),
        Err(e) => console::fail(format!("could not stop task: {e}")),
    }
}

pub async fn run_lab(
    cfg: &LabConfig,
    sdk: &aws_config::SdkConfig,
    image_url: Option<&str>,
) -> anyhow::Result<()> {
    let ecs = &cfg.ecs;
    let client = Client::new(sdk);
    let cfn_client = cfn::Client::new(sdk);
    let image_url = image_url.unwrap_or(&ecs.image_url);

    console::heading("ECS image classification");

    console::step(1, "Reading CloudFormation outputs");
    let outputs = stack_outputs(
        &cfn_client,
        &[ecs.infrastructure_stack.as_str(), ecs.iam_stack.as_str()],
    )
    .await?;
    for (key, value) in outputs.iter() {
        console::info(format!("{key} = {value}"));
    }

    console::step(2, "Registering task definition");
    let repository = require_output(&outputs, OUTPUT_REPOSITORY)?;
    let task_definition_arn = register_task_definition(
        &client,
        TaskDefinitionSpec {
            image: format!("{repository}:latest"),
            task_role_arn: require_output(&outputs, OUTPUT_TASK_ROLE)?,
            execution_role_arn: require_output(&outputs, OUTPUT_EXECUTION_ROLE)?,
            log_group: &ecs.log_group,
            region: &cfg.region,
        },
    )
    .await?;
    console::ok(format!("task definition {task_definition_arn}"));

    console::step(3, format!("Classifying {image_url}"));
    let subnets = split_subnets(require_output(&outputs, OUTPUT_SUBNETS)?);
    let security_group = require_output(&outputs, OUTPUT_SECURITY_GROUP)?;
    let task_arn = run_task(
        &client,
        &ecs.cluster,
        &task_definition_arn,
        subnets,
        security_group,
        image_url,
    )
    .await?;
    console::ok(format!("task {task_arn} started"));

    console::step(4, "Monitoring task");
    match monitor_task(&client, &ecs.cluster, &task_arn, &ecs.poller("classifier task")).await {
        Ok(ready) => {
            console::ok(format!(
                "task finished successfully after {} check(s)",
                ready.attempts()
            ));
            console::info(format!(
                "results are in CloudWatch: aws logs tail {} --follow",
                ecs.log_group
            ));
            Ok(())
        }
        Err(e) => {
            console::fail(&e);
            if e.is_timeout() {
                cleanup(&client, &ecs.cluster, &task_arn).await;
            }
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn snapshot(status: &str, exit_code: Option<i32>) -> TaskSnapshot {
        TaskSnapshot {
            last_status: status.to_string(),
            exit_code,
            stopped_reason: None,
        }
    }

    #[test]
    fn running_tasks_continue() {
        for status in ["PROVISIONING", "PENDING", "RUNNING", "DEPROVISIONING", ""] {
            assert_eq!(Check::Continue, classify_task(snapshot(status, None)));
        }
    }

    #[test]
    fn stopped_task_outcome_follows_exit_code() {
        let ok = snapshot(STATUS_STOPPED, Some(0));
        assert_eq!(Check::Success(ok.clone()), classify_task(ok));

        let failed = TaskSnapshot {
            stopped_reason: Some("Essential container in task exited".to_string()),
            ..snapshot(STATUS_STOPPED, Some(1))
        };
        match classify_task(failed) {
            Check::Failure(failure) => assert_eq!(
                "task failed with exit code 1 (Essential container in task exited)",
                failure.to_string()
            ),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            Check::Failure(TaskFailure {
                exit_code: None,
                stopped_reason: None
            }),
            classify_task(snapshot(STATUS_STOPPED, None))
        );
    }

    #[test]
    fn snapshot_from_described_task() {
        let task = aws::Task::builder()
            .last_status("STOPPED")
            .stopped_reason("done")
            .containers(aws::Container::builder().exit_code(0).build())
            .build();
        assert_eq!(
            TaskSnapshot {
                last_status: "STOPPED".to_string(),
                exit_code: Some(0),
                stopped_reason: Some("done".to_string()),
            },
            TaskSnapshot::from(&task)
        );
    }

    #[test]
    fn outputs_merge_and_require() {
        let output = |k: &str, v: &str| {
            cfn::types::Output::builder()
                .output_key(k)
                .output_value(v)
                .build()
        };
        let mut merged = BTreeMap::default();
        collect_outputs(
            &[
                output(OUTPUT_SUBNETS, "subnet-a, subnet-b"),
                output(OUTPUT_SECURITY_GROUP, "sg-1"),
                cfn::types::Output::builder().output_key("Dangling").build(),
            ],
            &mut merged,
        );
        collect_outputs(&[output(OUTPUT_TASK_ROLE, "arn:role")], &mut merged);

        assert_eq!(3, merged.len());
        assert_eq!("sg-1", require_output(&merged, OUTPUT_SECURITY_GROUP).unwrap());
        let err = require_output(&merged, OUTPUT_REPOSITORY).unwrap_err();
        assert!(err.to_string().contains(OUTPUT_REPOSITORY), "{err}");
        assert_eq!(
            vec!["subnet-a".to_string(), "subnet-b".to_string()],
            split_subnets(require_output(&merged, OUTPUT_SUBNETS).unwrap())
        );
    }

    #[test]
    fn default_monitoring_budget_is_fifteen_minutes() {
        let poller = LabConfig::default().ecs.poller("task");
        assert_eq!(30, poller.max_attempts());
        assert!(poller.max_total_wait() <= Duration::from_secs(15 * 60));
    }

    #[test]
    fn status_changes_are_reported_once() {
        let changes = StatusChanges::default();
        let reported = [
            "PROVISIONING",
            "PROVISIONING",
            "PENDING",
            "RUNNING",
            "RUNNING",
            "RUNNING",
            "STOPPED",
        ]
        .into_iter()
        .filter(|status| changes.observe(status))
        .collect::<Vec<_>>();
        assert_eq!(vec!["PROVISIONING", "PENDING", "RUNNING", "STOPPED"], reported);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_statuses_while_polling_are_reported_once() {
        let statuses = RefCell::new(
            ["PENDING", "PENDING", "RUNNING", "RUNNING"]
                .map(|s| snapshot(s, None))
                .into_iter()
                .chain(Some(snapshot(STATUS_STOPPED, Some(0)))),
        );
        let changes = StatusChanges::default();
        let reported = RefCell::new(vec![]);
        let ready = Poller::new(Duration::from_secs(30), 30)
            .poll(
                || {
                    let next = statuses.borrow_mut().next();
                    async move { next.context("no more statuses") }
                },
                |task: TaskSnapshot| {
                    if changes.observe(&task.last_status) {
                        reported.borrow_mut().push(task.last_status.clone());
                    }
                    classify_task(task)
                },
            )
            .await
            .unwrap();
        assert_eq!(5, ready.attempts());
        assert_eq!(
            vec!["PENDING", "RUNNING", STATUS_STOPPED],
            reported.into_inner()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn classifier_run_through_poller() {
        let statuses = RefCell::new(
            vec![
                snapshot("PROVISIONING", None),
                snapshot("RUNNING", None),
                snapshot(STATUS_STOPPED, Some(0)),
            ]
            .into_iter(),
        );
        let ready = Poller::new(Duration::from_secs(30), 30)
            .poll(
                || {
                    let next = statuses.borrow_mut().next();
                    async move { next.context("no more statuses") }
                },
                classify_task,
            )
            .await
            .unwrap();
        assert_eq!(3, ready.attempts());
        assert_eq!(Duration::from_secs(60), ready.elapsed);
    }
}
