//! DynamoDB lab: create a table, wait for it, fill it, read it back, tear it
//! down.
use std::collections::HashMap;

use anyhow::Context;
use aws_sdk_dynamodb::{error::BuildError, types as aws, Client};

use crate::{
    config::LabConfig,
    console,
    poll::{Check, PollError, Poller, Ready},
    utils,
};

/// How the table is paid for. Provisioned tables are also given their
/// capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BillingMode {
    #[default]
    PayPerRequest,
    Provisioned {
        read_capacity_units: i64,
        write_capacity_units: i64,
    },
}

impl From<BillingMode> for aws::BillingMode {
    fn from(value: BillingMode) -> Self {
        match value {
            BillingMode::PayPerRequest => aws::BillingMode::PayPerRequest,
            BillingMode::Provisioned { .. } => aws::BillingMode::Provisioned,
        }
    }
}

impl BillingMode {
    fn provisioned_throughput(self) -> Result<Option<aws::ProvisionedThroughput>, BuildError> {
        match self {
            BillingMode::PayPerRequest => Ok(None),
            BillingMode::Provisioned {
                read_capacity_units,
                write_capacity_units,
            } => aws::ProvisionedThroughput::builder()
                .read_capacity_units(read_capacity_units)
                .write_capacity_units(write_capacity_units)
                .build()
                .map(Some),
        }
    }
}

/// A table keyed by a single string partition key.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub table_name: String,
    pub partition_key: String,
    pub billing_mode: BillingMode,
}

impl TableSpec {
    /// The lab's coffee table, keyed by `id`.
    pub fn coffees(table_name: impl Into<String>, billing_mode: BillingMode) -> Self {
        TableSpec {
            table_name: table_name.into(),
            partition_key: "id".to_string(),
            billing_mode,
        }
    }

    fn key_schema(&self) -> Result<aws::KeySchemaElement, BuildError> {
        aws::KeySchemaElement::builder()
            .attribute_name(&self.partition_key)
            .key_type(aws::KeyType::Hash)
            .build()
    }

    fn attribute_definition(&self) -> Result<aws::AttributeDefinition, BuildError> {
        aws::AttributeDefinition::builder()
            .attribute_name(&self.partition_key)
            .attribute_type(aws::ScalarAttributeType::S)
            .build()
    }
}

pub async fn create_table(client: &Client, spec: &TableSpec) -> anyhow::Result<String> {
    let out = client
        .create_table()
        .table_name(&spec.table_name)
        .billing_mode(spec.billing_mode.into())
        .set_provisioned_throughput(spec.billing_mode.provisioned_throughput()?)
        .key_schema(spec.key_schema()?)
        .attribute_definitions(spec.attribute_definition()?)
        .send()
        .await
        .with_context(|| format!("could not create table {}", spec.table_name))?;
    let description = out.table_description.context("missing table description")?;
    let arn = description.table_arn.context("table missing arn")?;
    log::info!(
        "table {} ({arn}) creation started, it must become active before adding items",
        spec.table_name
    );
    Ok(arn)
}

/// Classifies a table's status while waiting for it to become usable.
pub fn classify_table_status(
    status: Option<&aws::TableStatus>,
) -> Check<(), String> {
    match status {
        Some(aws::TableStatus::Active) => Check::Success(()),
        None | Some(aws::TableStatus::Creating) | Some(aws::TableStatus::Updating) => {
            Check::Continue
        }
        Some(other) => Check::Failure(format!("table status is {}", other.as_str())),
    }
}

/// Classifies a table's status while waiting for it to go away. `None`
/// means the table no longer exists.
pub fn classify_table_deletion(status: Option<aws::TableStatus>) -> Check<(), String> {
    match status {
        None => Check::Success(()),
        Some(aws::TableStatus::Deleting) => Check::Continue,
        Some(other) => Check::Failure(format!(
            "table is {} instead of being deleted",
            other.as_str()
        )),
    }
}

/// Polls until the table is `ACTIVE`, returning its description.
pub async fn wait_for_table_active(
    client: &Client,
    table_name: &str,
    poller: &Poller,
) -> Result<Ready<aws::TableDescription>, PollError<String, anyhow::Error>> {
    log::info!("awaiting table {table_name} activation");
    poller
        .poll(
            || async {
                let out = client
                    .describe_table()
                    .table_name(table_name)
                    .send()
                    .await?;
                out.table.context("missing table description")
            },
            |table: aws::TableDescription| match classify_table_status(table.table_status()) {
                Check::Success(()) => Check::Success(table),
                Check::Continue => Check::Continue,
                Check::Failure(reason) => Check::Failure(reason),
            },
        )
        .await
}

/// Polls until describing the table reports that it no longer exists.
pub async fn wait_for_table_deleted(
    client: &Client,
    table_name: &str,
    poller: &Poller,
) -> Result<Ready<()>, PollError<String, anyhow::Error>> {
    log::info!("awaiting table {table_name} deletion");
    poller
        .poll(
            || async {
                match client.describe_table().table_name(table_name).send().await {
                    Ok(out) => Ok(out.table.and_then(|t| t.table_status)),
                    Err(e)
                        if e.as_service_error()
                            .is_some_and(|e| e.is_resource_not_found_exception()) =>
                    {
                        Ok(None)
                    }
                    Err(e) => Err(anyhow::Error::from(e)),
                }
            },
            classify_table_deletion,
        )
        .await
}

pub async fn delete_table(client: &Client, table_name: &str) -> anyhow::Result<()> {
    client
        .delete_table()
        .table_name(table_name)
        .send()
        .await
        .with_context(|| format!("could not delete table {table_name}"))?;
    Ok(())
}

/// An item of the coffee table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coffee {
    pub id: String,
    pub name: String,
    pub size: String,
    pub price: f64,
}

impl Coffee {
    pub fn to_item(&self) -> HashMap<String, aws::AttributeValue> {
        HashMap::from([
            ("id".to_string(), aws::AttributeValue::S(self.id.clone())),
            ("name".to_string(), aws::AttributeValue::S(self.name.clone())),
            ("size".to_string(), aws::AttributeValue::S(self.size.clone())),
            (
                "price".to_string(),
                aws::AttributeValue::N(self.price.to_string()),
            ),
        ])
    }

    pub fn from_item(item: &HashMap<String, aws::AttributeValue>) -> anyhow::Result<Self> {
        fn string(
            item: &HashMap<String, aws::AttributeValue>,
            name: &str,
        ) -> anyhow::Result<String> {
            let value = item
                .get(name)
                .with_context(|| format!("no such attribute '{name}'"))?;
            let s = value
                .as_s()
                .ok()
                .with_context(|| format!("'{name}' is not a string"))?;
            Ok(s.clone())
        }

        let price = item
            .get("price")
            .context("no such attribute 'price'")?
            .as_n()
            .ok()
            .context("'price' is not a number")?
            .parse::<f64>()
            .context("cannot parse 'price'")?;
        Ok(Coffee {
            id: string(item, "id")?,
            name: string(item, "name")?,
            size: string(item, "size")?,
            price,
        })
    }
}

impl core::fmt::Display for Coffee {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}, {:.2}) [{}]", self.name, self.size, self.price, self.id)
    }
}

/// The three drinks the lab inserts.
pub fn starbucks_coffees() -> Vec<Coffee> {
    [
        ("1", "Caffè Latte", "Grande", 4.45),
        ("2", "Caramel Macchiato", "Tall", 4.75),
        ("3", "Pumpkin Spice Latte", "Venti", 5.95),
    ]
    .into_iter()
    .map(|(id, name, size, price)| Coffee {
        id: id.to_string(),
        name: name.to_string(),
        size: size.to_string(),
        price,
    })
    .collect()
}

pub async fn put_coffee(client: &Client, table_name: &str, coffee: &Coffee) -> anyhow::Result<()> {
    client
        .put_item()
        .table_name(table_name)
        .set_item(Some(coffee.to_item()))
        .send()
        .await
        .with_context(|| format!("could not put coffee {}", coffee.id))?;
    Ok(())
}

/// Reads every coffee in the table, following scan pagination.
pub async fn scan_coffees(client: &Client, table_name: &str) -> anyhow::Result<Vec<Coffee>> {
    let mut coffees = vec![];
    let mut start_key = None;
    loop {
        let out = client
            .scan()
            .table_name(table_name)
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .with_context(|| format!("could not scan {table_name}"))?;
        for item in out.items() {
            coffees.push(Coffee::from_item(item)?);
        }
        start_key = out.last_evaluated_key;
        if start_key.is_none() {
            break;
        }
    }
    coffees.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(coffees)
}

pub async fn delete_coffee(client: &Client, table_name: &str, id: &str) -> anyhow::Result<()> {
    client
        .delete_item()
        .table_name(table_name)
        .key("id", aws::AttributeValue::S(id.to_string()))
        .send()
        .await
        .with_context(|| format!("could not delete coffee {id}"))?;
    Ok(())
}

/// Runs the whole DynamoDB lab.
pub async fn run_lab(cfg: &LabConfig, sdk: &aws_config::SdkConfig) -> anyhow::Result<()> {
    let client = Client::new(sdk);
    let table_name = format!("{}-{}", cfg.dynamodb.table_prefix, utils::unique_suffix());
    let spec = TableSpec::coffees(&table_name, cfg.dynamodb.billing_mode);

    console::heading("DynamoDB operations");
    console::info(format!("table: {table_name}"));

    console::step(1, "Creating table");
    create_table(&client, &spec).await?;
    let ready =
        wait_for_table_active(&client, &table_name, &cfg.dynamodb.poller("table activation"))
            .await?;
    console::ok(format!(
        "table is active after {} check(s), {:.1?}",
        ready.attempts(),
        ready.elapsed
    ));

    console::step(2, "Inserting coffees");
    for coffee in starbucks_coffees() {
        put_coffee(&client, &table_name, &coffee).await?;
        console::ok(format!("inserted {coffee}"));
    }

    console::step(3, "Reading all coffees");
    let coffees = scan_coffees(&client, &table_name).await?;
    for coffee in &coffees {
        console::info(coffee);
    }
    console::ok(format!("{} item(s) found", coffees.len()));

    console::step(4, "Deleting one coffee");
    delete_coffee(&client, &table_name, "2").await?;
    let remaining = scan_coffees(&client, &table_name).await?;
    console::ok(format!("{} item(s) remain", remaining.len()));

    console::step(5, "Deleting table");
    delete_table(&client, &table_name).await?;
    wait_for_table_deleted(&client, &table_name, &cfg.dynamodb.poller("table deletion")).await?;
    console::ok(format!("table {table_name} deleted"));

    Ok(())
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn table_status_classification() {
        assert_eq!(
            Check::Success(()),
            classify_table_status(Some(&aws::TableStatus::Active))
        );
        assert_eq!(
            Check::Continue,
            classify_table_status(Some(&aws::TableStatus::Creating))
        );
        assert_eq!(Check::Continue, classify_table_status(None));
        assert_eq!(
            Check::Failure("table status is DELETING".to_string()),
            classify_table_status(Some(&aws::TableStatus::Deleting))
        );
    }

    #[test]
    fn coffee_items() {
        let coffees = starbucks_coffees();
        assert_eq!(3, coffees.len());
        for coffee in coffees {
            let item = coffee.to_item();
            assert_eq!(Some(&aws::AttributeValue::S(coffee.id.clone())), item.get("id"));
            assert_eq!(coffee, Coffee::from_item(&item).unwrap());
        }
    }

    #[test]
    fn coffee_item_missing_price() {
        let mut item = starbucks_coffees()[0].to_item();
        item.remove("price");
        let err = Coffee::from_item(&item).unwrap_err();
        assert_eq!("no such attribute 'price'", err.to_string());
    }

    #[test]
    fn table_deletion_classification() {
        assert_eq!(Check::Success(()), classify_table_deletion(None));
        assert_eq!(
            Check::Continue,
            classify_table_deletion(Some(aws::TableStatus::Deleting))
        );
        assert_eq!(
            Check::Failure("table is ACTIVE instead of being deleted".to_string()),
            classify_table_deletion(Some(aws::TableStatus::Active))
        );
    }

    #[test]
    fn coffee_table_key() {
        let spec = TableSpec::coffees("coffees", BillingMode::PayPerRequest);
        let key = spec.key_schema().unwrap();
        assert_eq!("id", key.attribute_name());
        assert_eq!(&aws::KeyType::Hash, key.key_type());
        let def = spec.attribute_definition().unwrap();
        assert_eq!("id", def.attribute_name());
        assert_eq!(&aws::ScalarAttributeType::S, def.attribute_type());
    }

    #[test]
    fn billing_mode_throughput() {
        assert_eq!(None, BillingMode::PayPerRequest.provisioned_throughput().unwrap());
        let provisioned = BillingMode::Provisioned {
            read_capacity_units: 5,
            write_capacity_units: 2,
        };
        assert_eq!(
            aws::BillingMode::Provisioned,
            aws::BillingMode::from(provisioned)
        );
        let expected = aws::ProvisionedThroughput::builder()
            .read_capacity_units(5)
            .write_capacity_units(2)
            .build()
            .unwrap();
        assert_eq!(
            Some(expected),
            provisioned.provisioned_throughput().unwrap()
        );
    }
}
