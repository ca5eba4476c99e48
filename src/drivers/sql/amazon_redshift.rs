//! SQL driver for Amazon Redshift via the Redshift Data API.
//!
//! Statements run asynchronously on the service side:
//!
//! ```text
//! ExecuteStatement ──► DescribeStatement (poll while SUBMITTED/PICKED/STARTED)
//!                              │
//!                 FINISHED ────┴──── FAILED / ABORTED ──► None
//!                    │
//!        GetStatementResult (follow NextToken) ──► rows
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Row, SqlDriver};
use crate::error::{Error, Result};

const DRIVER: &str = "amazon-redshift";

/// `ExecuteStatement` input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecuteStatementRequest {
    pub sql: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecuteStatementResponse {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeStatementResponse {
    #[serde(default)]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(default)]
    pub type_name: Option<String>,
}

/// One typed cell of a Data API record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    StringValue(String),
    LongValue(i64),
    DoubleValue(f64),
    BooleanValue(bool),
    IsNull(bool),
    /// Base64-encoded bytes.
    BlobValue(String),
}

impl Field {
    pub fn to_value(&self) -> Value {
        match self {
            Field::StringValue(s) | Field::BlobValue(s) => Value::String(s.clone()),
            Field::LongValue(n) => Value::from(*n),
            Field::DoubleValue(n) => Value::from(*n),
            Field::BooleanValue(b) => Value::Bool(*b),
            Field::IsNull(_) => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetStatementResultResponse {
    #[serde(default)]
    pub records: Vec<Vec<Field>>,
    #[serde(default)]
    pub column_metadata: Vec<ColumnMetadata>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// `DescribeTable` input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTableRequest {
    pub database: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workgroup_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DescribeTableResponse {
    #[serde(default)]
    pub column_list: Vec<ColumnMetadata>,
    #[serde(default)]
    pub next_token: Option<String>,
}

/// The Redshift Data API operations the driver uses.
///
/// Implement it over the AWS SDK client of your choice; the request and
/// response types mirror the service's JSON shapes, so a plain JSON-over-HTTP
/// client works too.
#[async_trait]
pub trait RedshiftDataClient: Send + Sync {
    async fn execute_statement(
        &self,
        request: ExecuteStatementRequest,
    ) -> anyhow::Result<ExecuteStatementResponse>;

    async fn describe_statement(&self, id: &str) -> anyhow::Result<DescribeStatementResponse>;

    async fn get_statement_result(
        &self,
        id: &str,
        next_token: Option<&str>,
    ) -> anyhow::Result<GetStatementResultResponse>;

    async fn describe_table(
        &self,
        request: DescribeTableRequest,
    ) -> anyhow::Result<DescribeTableResponse>;
}

fn upstream(err: anyhow::Error) -> Error {
    Error::Upstream {
        driver: DRIVER,
        message: format!("{:#}", err),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    Cluster(String),
    Workgroup(String),
}

/// SQL driver backed by the Redshift Data API.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use llm_structures::drivers::sql::*;
/// # fn client() -> Arc<dyn RedshiftDataClient> { unimplemented!() }
/// let driver = AmazonRedshiftSqlDriver::builder("dev", client())
///     .workgroup_name("analytics")
///     .build()
///     .unwrap();
/// ```
pub struct AmazonRedshiftSqlDriver {
    database: String,
    client: Arc<dyn RedshiftDataClient>,
    destination: Destination,
    db_user: Option<String>,
    database_credentials_secret_arn: Option<String>,
    wait_for_query_completion: Duration,
    max_poll_duration: Duration,
}

impl std::fmt::Debug for AmazonRedshiftSqlDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmazonRedshiftSqlDriver")
            .field("database", &self.database)
            .field("destination", &self.destination)
            .field("db_user", &self.db_user)
            .field("wait_for_query_completion", &self.wait_for_query_completion)
            .field("max_poll_duration", &self.max_poll_duration)
            .finish()
    }
}

/// Builder for [`AmazonRedshiftSqlDriver`].
pub struct AmazonRedshiftSqlDriverBuilder {
    database: String,
    client: Arc<dyn RedshiftDataClient>,
    cluster_identifier: Option<String>,
    workgroup_name: Option<String>,
    db_user: Option<String>,
    database_credentials_secret_arn: Option<String>,
    wait_for_query_completion: Duration,
    max_poll_duration: Duration,
}

impl AmazonRedshiftSqlDriverBuilder {
    /// Target a provisioned cluster. Mutually exclusive with
    /// [`workgroup_name`](Self::workgroup_name).
    pub fn cluster_identifier(mut self, id: impl Into<String>) -> Self {
        self.cluster_identifier = Some(id.into());
        self
    }

    /// Target a Redshift Serverless workgroup.
    pub fn workgroup_name(mut self, name: impl Into<String>) -> Self {
        self.workgroup_name = Some(name.into());
        self
    }

    pub fn db_user(mut self, user: impl Into<String>) -> Self {
        self.db_user = Some(user.into());
        self
    }

    pub fn database_credentials_secret_arn(mut self, arn: impl Into<String>) -> Self {
        self.database_credentials_secret_arn = Some(arn.into());
        self
    }

    /// Interval between status polls. Default: 300ms.
    pub fn wait_for_query_completion(mut self, interval: Duration) -> Self {
        self.wait_for_query_completion = interval;
        self
    }

    /// Upper bound on how long a statement may stay pending. Default: 10 minutes.
    pub fn max_poll_duration(mut self, limit: Duration) -> Self {
        self.max_poll_duration = limit;
        self
    }

    pub fn build(self) -> Result<AmazonRedshiftSqlDriver> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let destination = match (
            non_empty(self.cluster_identifier),
            non_empty(self.workgroup_name),
        ) {
            (Some(cluster), None) => Destination::Cluster(cluster),
            (None, Some(workgroup)) => Destination::Workgroup(workgroup),
            (None, None) => {
                return Err(Error::InvalidConfig(
                    "Provide a value for one of `cluster_identifier` or `workgroup_name`".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfig(
                    "Provide a value for either `cluster_identifier` or `workgroup_name`, but not both"
                        .into(),
                ))
            }
        };
        Ok(AmazonRedshiftSqlDriver {
            database: self.database,
            client: self.client,
            destination,
            db_user: self.db_user,
            database_credentials_secret_arn: self.database_credentials_secret_arn,
            wait_for_query_completion: self.wait_for_query_completion,
            max_poll_duration: self.max_poll_duration,
        })
    }
}

impl AmazonRedshiftSqlDriver {
    pub fn builder(
        database: impl Into<String>,
        client: Arc<dyn RedshiftDataClient>,
    ) -> AmazonRedshiftSqlDriverBuilder {
        AmazonRedshiftSqlDriverBuilder {
            database: database.into(),
            client,
            cluster_identifier: None,
            workgroup_name: None,
            db_user: None,
            database_credentials_secret_arn: None,
            wait_for_query_completion: Duration::from_millis(300),
            max_poll_duration: Duration::from_secs(600),
        }
    }

    fn cluster_identifier(&self) -> Option<String> {
        match &self.destination {
            Destination::Cluster(c) => Some(c.clone()),
            Destination::Workgroup(_) => None,
        }
    }

    fn workgroup_name(&self) -> Option<String> {
        match &self.destination {
            Destination::Workgroup(w) => Some(w.clone()),
            Destination::Cluster(_) => None,
        }
    }

    /// Poll until the statement leaves the pending states.
    async fn wait_for_statement(&self, id: &str) -> Result<DescribeStatementResponse> {
        let started = Instant::now();
        let mut statement = self.client.describe_statement(id).await.map_err(upstream)?;

        while matches!(statement.status.as_str(), "SUBMITTED" | "PICKED" | "STARTED") {
            let elapsed = started.elapsed();
            if elapsed >= self.max_poll_duration {
                return Err(Error::PollTimeout {
                    statement_id: id.to_string(),
                    elapsed,
                });
            }
            tracing::trace!(statement_id = id, status = %statement.status, "statement pending");
            tokio::time::sleep(self.wait_for_query_completion).await;
            statement = self.client.describe_statement(id).await.map_err(upstream)?;
        }

        Ok(statement)
    }

    /// Fetch every result page and merge their records.
    async fn fetch_results(&self, id: &str) -> Result<(Vec<ColumnMetadata>, Vec<Vec<Field>>)> {
        let mut page = self
            .client
            .get_statement_result(id, None)
            .await
            .map_err(upstream)?;
        let mut columns = std::mem::take(&mut page.column_metadata);
        let mut records = std::mem::take(&mut page.records);

        while let Some(token) = page.next_token.take() {
            page = self
                .client
                .get_statement_result(id, Some(&token))
                .await
                .map_err(upstream)?;
            if columns.is_empty() {
                columns = std::mem::take(&mut page.column_metadata);
            }
            records.append(&mut page.records);
        }

        Ok((columns, records))
    }

    /// Every record must carry exactly one field per column.
    fn rows_from_records(columns: &[ColumnMetadata], records: Vec<Vec<Field>>) -> Result<Vec<Row>> {
        records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                if record.len() != columns.len() {
                    return Err(Error::MalformedResponse {
                        driver: DRIVER,
                        message: format!(
                            "record {} has {} fields for {} columns",
                            index,
                            record.len(),
                            columns.len()
                        ),
                    });
                }
                Ok(columns
                    .iter()
                    .zip(record.iter())
                    .map(|(column, field)| (column.name.clone(), field.to_value()))
                    .collect())
            })
            .collect()
    }
}

#[async_trait]
impl SqlDriver for AmazonRedshiftSqlDriver {
    async fn execute_query_raw(&self, query: &str) -> Result<Option<Vec<Row>>> {
        let response = self
            .client
            .execute_statement(ExecuteStatementRequest {
                sql: query.to_string(),
                database: self.database.clone(),
                cluster_identifier: self.cluster_identifier(),
                workgroup_name: self.workgroup_name(),
                db_user: self.db_user.clone(),
                secret_arn: self.database_credentials_secret_arn.clone(),
            })
            .await
            .map_err(upstream)?;
        tracing::debug!(statement_id = %response.id, database = %self.database, "statement submitted");

        let statement = self.wait_for_statement(&response.id).await?;
        match statement.status.as_str() {
            "FINISHED" => {
                let (columns, records) = self.fetch_results(&response.id).await?;
                tracing::debug!(
                    statement_id = %response.id,
                    rows = records.len(),
                    "statement finished"
                );
                Ok(Some(Self::rows_from_records(&columns, records)?))
            }
            "FAILED" | "ABORTED" => {
                tracing::warn!(
                    statement_id = %response.id,
                    status = %statement.status,
                    error = statement.error.as_deref().unwrap_or(""),
                    "statement did not complete"
                );
                Ok(None)
            }
            other => Err(Error::MalformedResponse {
                driver: DRIVER,
                message: format!("unknown statement status '{}'", other),
            }),
        }
    }

    async fn get_table_schema(&self, table: &str, schema: Option<&str>) -> Result<Vec<String>> {
        let mut request = DescribeTableRequest {
            database: self.database.clone(),
            table: table.to_string(),
            schema: schema.map(str::to_string),
            cluster_identifier: self.cluster_identifier(),
            workgroup_name: self.workgroup_name(),
            db_user: self.db_user.clone(),
            secret_arn: self.database_credentials_secret_arn.clone(),
            next_token: None,
        };

        let mut names = Vec::new();
        loop {
            let response = self
                .client
                .describe_table(request.clone())
                .await
                .map_err(upstream)?;
            names.extend(response.column_list.into_iter().map(|c| c.name));
            match response.next_token {
                Some(token) => request.next_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted statuses and result pages.
    #[derive(Default)]
    struct ScriptedClient {
        statuses: Mutex<VecDeque<&'static str>>,
        pages: Mutex<VecDeque<GetStatementResultResponse>>,
        executed: Mutex<Vec<ExecuteStatementRequest>>,
        tokens: Mutex<Vec<Option<String>>>,
        describe_calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(statuses: &[&'static str], pages: Vec<GetStatementResultResponse>) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                pages: Mutex::new(pages.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl RedshiftDataClient for ScriptedClient {
        async fn execute_statement(
            &self,
            request: ExecuteStatementRequest,
        ) -> anyhow::Result<ExecuteStatementResponse> {
            self.executed.lock().unwrap().push(request);
            Ok(ExecuteStatementResponse { id: "stmt-1".into() })
        }

        async fn describe_statement(&self, id: &str) -> anyhow::Result<DescribeStatementResponse> {
            *self.describe_calls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap()
            } else {
                *statuses.front().unwrap()
            };
            Ok(DescribeStatementResponse {
                id: id.to_string(),
                status: status.to_string(),
                error: None,
            })
        }

        async fn get_statement_result(
            &self,
            _id: &str,
            next_token: Option<&str>,
        ) -> anyhow::Result<GetStatementResultResponse> {
            self.tokens.lock().unwrap().push(next_token.map(str::to_string));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no more pages"))
        }

        async fn describe_table(
            &self,
            request: DescribeTableRequest,
        ) -> anyhow::Result<DescribeTableResponse> {
            if request.next_token.is_none() {
                Ok(DescribeTableResponse {
                    column_list: vec![ColumnMetadata {
                        name: "id".into(),
                        type_name: Some("int4".into()),
                    }],
                    next_token: Some("more".into()),
                })
            } else {
                Ok(DescribeTableResponse {
                    column_list: vec![ColumnMetadata {
                        name: "name".into(),
                        type_name: Some("varchar".into()),
                    }],
                    next_token: None,
                })
            }
        }
    }

    fn page(json: Value) -> GetStatementResultResponse {
        serde_json::from_value(json).unwrap()
    }

    fn driver(client: Arc<ScriptedClient>) -> AmazonRedshiftSqlDriver {
        AmazonRedshiftSqlDriver::builder("dev", client)
            .cluster_identifier("cluster-1")
            .wait_for_query_completion(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    #[test]
    fn test_requires_exactly_one_destination() {
        let client = ScriptedClient::new(&["FINISHED"], vec![]);
        let neither = AmazonRedshiftSqlDriver::builder("dev", client.clone()).build();
        assert!(matches!(neither, Err(Error::InvalidConfig(_))));

        let both = AmazonRedshiftSqlDriver::builder("dev", client.clone())
            .cluster_identifier("c")
            .workgroup_name("w")
            .build();
        assert!(matches!(both, Err(Error::InvalidConfig(_))));

        assert!(AmazonRedshiftSqlDriver::builder("dev", client)
            .workgroup_name("w")
            .build()
            .is_ok());
    }

    #[test]
    fn test_field_deserialization() {
        let record: Vec<Field> = serde_json::from_value(json!([
            {"stringValue": "a"},
            {"longValue": 7},
            {"doubleValue": 1.5},
            {"booleanValue": true},
            {"isNull": true}
        ]))
        .unwrap();
        let values: Vec<Value> = record.iter().map(Field::to_value).collect();
        assert_eq!(values, vec![json!("a"), json!(7), json!(1.5), json!(true), Value::Null]);
    }

    #[tokio::test]
    async fn test_polls_then_merges_all_pages() {
        let client = ScriptedClient::new(
            &["SUBMITTED", "STARTED", "FINISHED"],
            vec![
                page(json!({
                    "ColumnMetadata": [{"name": "id"}, {"name": "name"}],
                    "Records": [[{"longValue": 1}, {"stringValue": "ada"}]],
                    "NextToken": "page-2"
                })),
                page(json!({
                    "Records": [[{"longValue": 2}, {"stringValue": "grace"}]]
                })),
            ],
        );
        let rows = driver(client.clone())
            .execute_query("SELECT id, name FROM people")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
        assert_eq!(rows[0].get("name"), Some(&json!("ada")));
        assert_eq!(rows[1].get("id"), Some(&json!(2)));
        assert_eq!(rows[1].get("name"), Some(&json!("grace")));

        assert_eq!(*client.describe_calls.lock().unwrap(), 3);
        assert_eq!(
            *client.tokens.lock().unwrap(),
            vec![None, Some("page-2".to_string())]
        );

        let executed = client.executed.lock().unwrap();
        assert_eq!(executed[0].sql, "SELECT id, name FROM people");
        assert_eq!(executed[0].cluster_identifier.as_deref(), Some("cluster-1"));
        assert!(executed[0].workgroup_name.is_none());
    }

    #[tokio::test]
    async fn test_failed_statement_is_none() {
        let client = ScriptedClient::new(&["PICKED", "FAILED"], vec![]);
        let result = driver(client.clone()).execute_query_raw("SELECT 1").await.unwrap();
        assert!(result.is_none());
        assert!(client.tokens.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_result_is_none() {
        let client = ScriptedClient::new(
            &["FINISHED"],
            vec![page(json!({"ColumnMetadata": [{"name": "id"}], "Records": []}))],
        );
        assert!(driver(client).execute_query("SELECT 1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_width_mismatch_is_malformed() {
        let client = ScriptedClient::new(
            &["FINISHED"],
            vec![page(json!({
                "ColumnMetadata": [{"name": "id"}, {"name": "name"}],
                "Records": [
                    [{"longValue": 1}, {"stringValue": "ada"}],
                    [{"longValue": 2}]
                ]
            }))],
        );
        let err = driver(client).execute_query_raw("SELECT id, name FROM people").await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { ref message, .. } if message.contains("record 1 has 1 fields for 2 columns")));
    }

    #[tokio::test]
    async fn test_unknown_status_is_malformed() {
        let client = ScriptedClient::new(&["EXPLODED"], vec![]);
        let err = driver(client).execute_query_raw("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_poll_timeout() {
        let client = ScriptedClient::new(&["STARTED"], vec![]);
        let driver = AmazonRedshiftSqlDriver::builder("dev", client)
            .workgroup_name("w")
            .wait_for_query_completion(Duration::from_millis(2))
            .max_poll_duration(Duration::from_millis(10))
            .build()
            .unwrap();
        let err = driver.execute_query_raw("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::PollTimeout { ref statement_id, .. } if statement_id == "stmt-1"));
    }

    #[tokio::test]
    async fn test_get_table_schema_follows_pages() {
        let client = ScriptedClient::new(&["FINISHED"], vec![]);
        let columns = driver(client)
            .get_table_schema("people", Some("public"))
            .await
            .unwrap();
        assert_eq!(columns, vec!["id", "name"]);
    }

    #[test]
    fn test_execute_request_wire_shape() {
        let request = ExecuteStatementRequest {
            sql: "SELECT 1".into(),
            database: "dev".into(),
            workgroup_name: Some("w".into()),
            secret_arn: Some("arn:secret".into()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"Sql": "SELECT 1", "Database": "dev", "WorkgroupName": "w", "SecretArn": "arn:secret"})
        );
    }
}
