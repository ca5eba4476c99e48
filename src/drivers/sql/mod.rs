//! SQL drivers.
//!
//! Query results are normalized to rows of JSON cells keyed by column name,
//! whatever the wire format of the underlying service.

pub mod amazon_redshift;

pub use amazon_redshift::{AmazonRedshiftSqlDriver, RedshiftDataClient};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One result row: column name to cell value.
pub type Row = Map<String, Value>;

/// A result row as handed to tools and tasks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowResult {
    pub cells: Row,
}

impl RowResult {
    pub fn new(cells: Row) -> Self {
        Self { cells }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.get(column)
    }
}

impl From<Row> for RowResult {
    fn from(cells: Row) -> Self {
        Self { cells }
    }
}

#[async_trait]
pub trait SqlDriver: Send + Sync {
    /// Rows of the query result, or `None` when the query produced no rows
    /// or did not complete.
    async fn execute_query(&self, query: &str) -> Result<Option<Vec<RowResult>>> {
        Ok(self
            .execute_query_raw(query)
            .await?
            .filter(|rows| !rows.is_empty())
            .map(|rows| rows.into_iter().map(RowResult::from).collect()))
    }

    /// Raw rows; `None` when the query did not complete.
    async fn execute_query_raw(&self, query: &str) -> Result<Option<Vec<Row>>>;

    /// Column names of `table`, optionally qualified by `schema`.
    async fn get_table_schema(&self, table: &str, schema: Option<&str>) -> Result<Vec<String>>;
}
