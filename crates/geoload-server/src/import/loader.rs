//! Server-side bulk load from object storage
//!
//! Rows are pulled by the database itself through the `aws_s3` extension; the
//! worker only issues the call and relays the status line it returns.

use tracing::{info, instrument};

use crate::db::{DbError, SqlExecutor};
use crate::jobs::model::{CsvFormat, ImportObject};
use crate::sql::{Identifier, SqlQuery, SqlStatement, SqlValue, TemplateError};

/// COPY options matching the CSV the upload path produces.
const COPY_OPTIONS: &str = "DELIMITER ',' CSV ENCODING 'UTF8' QUOTE '\"' ESCAPE ''''";

/// One object to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub size_hint: u64,
}

impl From<&ImportObject> for LoadRequest {
    fn from(object: &ImportObject) -> Self {
        Self {
            bucket: object.bucket.clone(),
            key: object.s3_key.clone(),
            region: object.region.clone(),
            size_hint: object.filesize.unwrap_or(0),
        }
    }
}

/// Where the rows land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget {
    /// Straight into the table, whose write trigger derives the other columns.
    Table,
    /// Into the `(data, geo)` view of the staging facade.
    View,
}

/// Target columns. GeoJSON rows carry their geometry inside the document.
pub fn columns_for(csv_format: Option<CsvFormat>, target: LoadTarget) -> &'static str {
    let geojson = matches!(csv_format, Some(CsvFormat::Geojson));
    match (target, geojson) {
        (LoadTarget::Table, true) => "jsondata",
        (LoadTarget::Table, false) => "jsondata,geo",
        (LoadTarget::View, true) => "data",
        (LoadTarget::View, false) => "data,geo",
    }
}

pub fn load_statement(
    schema: &Identifier,
    relation: &Identifier,
    csv_format: Option<CsvFormat>,
    target: LoadTarget,
    request: &LoadRequest,
) -> Result<SqlStatement, TemplateError> {
    SqlQuery::new(
        "SELECT aws_s3.table_import_from_s3(${relation}, ${columns}, ${options}, \
         aws_commons.create_s3_uri(${bucket}, ${key}, ${region})), ${hint} as iml_import_hint",
    )
    .with_variable(
        "relation",
        SqlValue::literal(format!("{}.{}", schema.quoted(), relation.quoted())),
    )
    .with_variable("columns", SqlValue::literal(columns_for(csv_format, target)))
    .with_variable("options", SqlValue::literal(COPY_OPTIONS))
    .with_variable("bucket", SqlValue::literal(request.bucket.as_str()))
    .with_variable("key", SqlValue::literal(request.key.as_str()))
    .with_variable("region", SqlValue::literal(request.region.as_str()))
    .with_variable(
        "hint",
        SqlValue::literal(format!("{}:{}", request.key, request.size_hint)),
    )
    .substitute()
}

pub struct BulkLoader;

impl BulkLoader {
    /// Load into `schema.table` and return the extension's status line as-is.
    #[instrument(skip_all, fields(table = %table, key = %request.key))]
    pub async fn load(
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        table: &Identifier,
        csv_format: Option<CsvFormat>,
        request: &LoadRequest,
    ) -> Result<String, DbError> {
        Self::run(executor, schema, table, csv_format, LoadTarget::Table, request).await
    }

    /// Load through the facade view `view`.
    #[instrument(skip_all, fields(view = %view, key = %request.key))]
    pub async fn load_into_view(
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        view: &Identifier,
        csv_format: Option<CsvFormat>,
        request: &LoadRequest,
    ) -> Result<String, DbError> {
        Self::run(executor, schema, view, csv_format, LoadTarget::View, request).await
    }

    async fn run(
        executor: &dyn SqlExecutor,
        schema: &Identifier,
        relation: &Identifier,
        csv_format: Option<CsvFormat>,
        target: LoadTarget,
        request: &LoadRequest,
    ) -> Result<String, DbError> {
        let statement = load_statement(schema, relation, csv_format, target, request)
            .map_err(|e| DbError::unexpected(e.to_string()))?;
        let status = executor.fetch_string(&statement).await?;
        info!(size = request.size_hint, status = %status, "S3 import finished");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LoadRequest {
        LoadRequest {
            bucket: "uploads".to_string(),
            key: "job-1/part_1.csv".to_string(),
            region: "eu-west-1".to_string(),
            size_hint: 2048,
        }
    }

    #[test]
    fn test_columns_follow_format() {
        assert_eq!(columns_for(Some(CsvFormat::Geojson), LoadTarget::Table), "jsondata");
        assert_eq!(columns_for(Some(CsvFormat::JsonWkb), LoadTarget::Table), "jsondata,geo");
        assert_eq!(columns_for(Some(CsvFormat::JsonWkt), LoadTarget::Table), "jsondata,geo");
        assert_eq!(columns_for(None, LoadTarget::Table), "jsondata,geo");
        assert_eq!(columns_for(Some(CsvFormat::Geojson), LoadTarget::View), "data");
    }

    #[test]
    fn test_load_statement() {
        let statement = load_statement(
            &Identifier::new("public").unwrap(),
            &Identifier::new("t1").unwrap(),
            Some(CsvFormat::Geojson),
            LoadTarget::Table,
            &request(),
        )
        .unwrap();

        assert_eq!(
            statement.text(),
            "SELECT aws_s3.table_import_from_s3('\"public\".\"t1\"', 'jsondata', \
             'DELIMITER '','' CSV ENCODING ''UTF8'' QUOTE ''\"'' ESCAPE ''''''''', \
             aws_commons.create_s3_uri('uploads', 'job-1/part_1.csv', 'eu-west-1')), \
             'job-1/part_1.csv:2048' as iml_import_hint"
        );
    }

    #[test]
    fn test_keys_are_escaped() {
        let mut request = request();
        request.key = "it's.csv".to_string();
        let statement = load_statement(
            &Identifier::new("public").unwrap(),
            &Identifier::new("t1").unwrap(),
            Some(CsvFormat::JsonWkb),
            LoadTarget::Table,
            &request,
        )
        .unwrap();
        assert!(statement.text().contains("'it''s.csv'"));
        assert!(statement.text().contains("'it''s.csv:2048'"));
    }
}
