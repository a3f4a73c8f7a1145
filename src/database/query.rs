use derive_new::new;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use surrealdb::engine::any::Any;
use surrealdb::opt::QueryResult;
use surrealdb::Surreal;

use super::{DatabaseDeserializeSnafu, DatabaseQuerySnafu, EmptyQuerySnafu, Result};

/// An extension trait that allows you to execute raw SurrealQL. Parameters are bound with
/// [Bindings::bind], which takes any serializable `(name, value)` pair.
///
/// # Example
/// ```ignore
/// let video: Option<VideoRow> = database
///     .sql("SELECT * FROM type::thing('videos', $id)")
///     .bind(("id", "v1"))
///     .fetch_first()
///     .await?;
/// ```
pub(super) trait Sql {
    fn sql(&self, query: &str) -> Bindings<'_>;
}

impl Sql for Surreal<Any> {
    fn sql(&self, query: &str) -> Bindings<'_> {
        Bindings::new(self.query(query))
    }
}

#[derive(Debug, new)]
pub(super) struct Bindings<'a> {
    query: surrealdb::method::Query<'a, Any>,
}

impl Bindings<'_> {
    pub fn bind(mut self, params: impl serde::Serialize) -> Self {
        let query = self.query;
        self.query = query.bind(params);
        self
    }

    /// Execute the query and return SurrealDB's list of statement results. Statement errors are
    /// surfaced here rather than on [surrealdb::Response::take].
    pub async fn execute(self) -> Result<surrealdb::Response> {
        let response = self.query.await.context(DatabaseQuerySnafu)?;
        let response = response.check().context(DatabaseQuerySnafu)?;
        tracing::trace!(statements = response.num_statements(), "executed query");
        Ok(response)
    }

    /// Execute the query and deserialize the result of the first statement.
    pub async fn fetch_first<T: DeserializeOwned>(self) -> Result<T>
    where
        usize: QueryResult<T>,
    {
        let mut statements = self.execute().await?;
        statements.take::<T>(0).context(DatabaseDeserializeSnafu)
    }

    /// Execute a script and deserialize the result of its last statement, usually a `RETURN`.
    pub async fn fetch_last<T: DeserializeOwned>(self) -> Result<T>
    where
        usize: QueryResult<T>,
    {
        let mut statements = self.execute().await?;
        let Some(last) = statements.num_statements().checked_sub(1) else {
            return EmptyQuerySnafu.fail();
        };

        statements.take::<T>(last).context(DatabaseDeserializeSnafu)
    }
}
