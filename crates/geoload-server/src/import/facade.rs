//! Staging facade installed on the target table while a load runs
//!
//! The bulk loader only writes raw columns. A `BEFORE INSERT` trigger on the
//! table fills in the derived columns (version, author, uuid). With the view
//! facade enabled, loads go through `<table>_view` instead, whose `INSTEAD OF`
//! trigger converts the narrow `(data, geo)` rows. Both are removed again in
//! finalize; the drops are `IF EXISTS` and safe to repeat.

use tracing::{info, instrument};

use super::catalog::IndexLayout;
use crate::db::SqlExecutor;
use crate::error::{ImportError, ImportResult, ImportStage};
use crate::jobs::model::CsvFormat;
use crate::sql::{Identifier, IdentifierError, SqlQuery, SqlStatement, SqlValue, TemplateError};

/// Lower case form of the unquoted `insertTrigger` that earlier imports left
/// on tables.
pub const TRIGGER_NAME: &str = "inserttrigger";

/// Resource tag passed to the trigger functions.
const TRIGGER_HRN: &str = "TBD";

const VIEW_SUFFIX: &str = "_view";

fn trigger_name() -> Result<Identifier, IdentifierError> {
    Identifier::new(TRIGGER_NAME)
}

/// `<table>_view`
pub fn view_name(table: &Identifier) -> Result<Identifier, IdentifierError> {
    table.with_suffix(VIEW_SUFFIX)
}

/// Settings the write trigger stamps onto every inserted row
#[derive(Debug, Clone)]
pub struct TriggerSettings<'a> {
    pub csv_format: Option<CsvFormat>,
    pub space_version: i64,
    pub enable_uuid: bool,
    pub layout: IndexLayout,
    pub author: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error(transparent)]
    Identifier(#[from] IdentifierError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl From<FacadeError> for ImportError {
    fn from(err: FacadeError) -> Self {
        match err {
            FacadeError::Identifier(e) => ImportError::during(ImportStage::Preparation, e),
            FacadeError::Template(e) => ImportError::during(ImportStage::Preparation, e),
        }
    }
}

pub fn write_trigger_statement(
    schema: &Identifier,
    table: &Identifier,
    settings: &TriggerSettings<'_>,
) -> Result<SqlStatement, FacadeError> {
    // The trigger derives the table name from the row when asked; imports
    // never want that.
    let add_table_name = false;

    let statement = SqlQuery::new(
        "CREATE OR REPLACE TRIGGER ${trigger} BEFORE INSERT ON ${schema}.${table} \
         FOR EACH ROW EXECUTE PROCEDURE ${schema}.xyz_import_trigger(\
         ${hrn}, ${add_table_name}, ${enable_uuid}, ${space_version}, ${author}, ${old_layout})",
    )
    .with_variable("trigger", trigger_name()?)
    .with_variable("schema", schema)
    .with_variable("table", table)
    .with_variable("hrn", SqlValue::literal(TRIGGER_HRN))
    .with_variable("add_table_name", add_table_name)
    .with_variable("enable_uuid", settings.enable_uuid)
    .with_variable("space_version", settings.space_version)
    .with_variable("author", SqlValue::literal(settings.author))
    .with_variable("old_layout", settings.layout.is_legacy())
    .substitute()?;

    Ok(statement)
}

pub fn view_with_trigger_statement(
    schema: &Identifier,
    table: &Identifier,
) -> Result<SqlStatement, FacadeError> {
    let create_view = SqlQuery::new(
        "CREATE OR REPLACE VIEW ${schema}.${view} AS \
         SELECT t.jsondata AS data, t.geo AS geo FROM ${schema}.${table} t;",
    );
    let create_trigger = SqlQuery::new(
        "CREATE OR REPLACE TRIGGER ${trigger} INSTEAD OF INSERT ON ${schema}.${view} \
         FOR EACH ROW EXECUTE PROCEDURE xyz_viewTrigger_wkbv2(${hrn}, ${schema_name}, ${table_name});",
    );

    let statement = SqlQuery::new("${{create_view}} ${{create_trigger}}")
        .with_fragment("create_view", create_view)
        .with_fragment("create_trigger", create_trigger)
        .with_variable("trigger", trigger_name()?)
        .with_variable("schema", schema)
        .with_variable("table", table)
        .with_variable("view", view_name(table)?)
        .with_variable("hrn", SqlValue::literal(TRIGGER_HRN))
        .with_variable("schema_name", SqlValue::literal(schema.as_str()))
        .with_variable("table_name", SqlValue::literal(table.as_str()))
        .substitute()?;

    Ok(statement)
}

pub fn drop_trigger_statement(
    schema: &Identifier,
    table: &Identifier,
) -> Result<SqlStatement, FacadeError> {
    let statement = SqlQuery::new("DROP TRIGGER IF EXISTS ${trigger} ON ${schema}.${table}")
        .with_variable("trigger", trigger_name()?)
        .with_variable("schema", schema)
        .with_variable("table", table)
        .substitute()?;
    Ok(statement)
}

pub fn drop_view_statement(
    schema: &Identifier,
    table: &Identifier,
) -> Result<SqlStatement, FacadeError> {
    let statement = SqlQuery::new("DROP VIEW IF EXISTS ${schema}.${view}")
        .with_variable("schema", schema)
        .with_variable("view", view_name(table)?)
        .substitute()?;
    Ok(statement)
}

/// Installs and removes the staging facade on one connector
pub struct StagingFacade<'a> {
    executor: &'a dyn SqlExecutor,
    schema: &'a Identifier,
}

impl<'a> StagingFacade<'a> {
    pub fn new(executor: &'a dyn SqlExecutor, schema: &'a Identifier) -> Self {
        Self { executor, schema }
    }

    #[instrument(skip_all, fields(table = %table, version = settings.space_version, csv_format = ?settings.csv_format))]
    pub async fn create_write_trigger(
        &self,
        table: &Identifier,
        settings: &TriggerSettings<'_>,
    ) -> ImportResult<()> {
        let statement = write_trigger_statement(self.schema, table, settings)?;
        self.run(ImportStage::Preparation, &statement).await?;
        info!("Import trigger installed");
        Ok(())
    }

    /// Returns the name of the view loads should target.
    #[instrument(skip_all, fields(table = %table))]
    pub async fn create_view_with_instead_of_trigger(
        &self,
        table: &Identifier,
    ) -> ImportResult<Identifier> {
        let statement = view_with_trigger_statement(self.schema, table)?;
        self.run(ImportStage::Preparation, &statement).await?;
        let view = view_name(table).map_err(|e| ImportError::during(ImportStage::Preparation, e))?;
        info!(view = %view, "Import view installed");
        Ok(view)
    }

    #[instrument(skip_all, fields(table = %table))]
    pub async fn drop_trigger(&self, table: &Identifier) -> ImportResult<()> {
        let statement = drop_trigger_statement(self.schema, table).map_err(finalization)?;
        self.run(ImportStage::Finalization, &statement).await
    }

    #[instrument(skip_all, fields(table = %table))]
    pub async fn drop_view(&self, table: &Identifier) -> ImportResult<()> {
        let statement = drop_view_statement(self.schema, table).map_err(finalization)?;
        self.run(ImportStage::Finalization, &statement).await
    }

    async fn run(&self, stage: ImportStage, statement: &SqlStatement) -> ImportResult<()> {
        self.executor
            .execute(statement)
            .await
            .map(|_| ())
            .map_err(|e| ImportError::during(stage, e))
    }
}

fn finalization(err: FacadeError) -> ImportError {
    match err {
        FacadeError::Identifier(e) => ImportError::during(ImportStage::Finalization, e),
        FacadeError::Template(e) => ImportError::during(ImportStage::Finalization, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    #[test]
    fn test_write_trigger_statement() {
        let settings = TriggerSettings {
            csv_format: Some(CsvFormat::Geojson),
            space_version: 1,
            enable_uuid: true,
            layout: IndexLayout::Legacy,
            author: "O'Brien",
        };
        let statement = write_trigger_statement(&ident("public"), &ident("t1"), &settings).unwrap();
        assert_eq!(
            statement.text(),
            "CREATE OR REPLACE TRIGGER \"inserttrigger\" BEFORE INSERT ON \"public\".\"t1\" \
             FOR EACH ROW EXECUTE PROCEDURE \"public\".xyz_import_trigger(\
             'TBD', false, true, 1, 'O''Brien', true)"
        );
    }

    #[test]
    fn test_view_with_trigger_statement() {
        let statement = view_with_trigger_statement(&ident("public"), &ident("t1")).unwrap();
        let text = statement.text();
        assert!(text.starts_with("CREATE OR REPLACE VIEW \"public\".\"t1_view\" AS"));
        assert!(text.contains("t.jsondata AS data, t.geo AS geo FROM \"public\".\"t1\" t;"));
        assert!(text.contains(
            "INSTEAD OF INSERT ON \"public\".\"t1_view\" FOR EACH ROW EXECUTE PROCEDURE \
             xyz_viewTrigger_wkbv2('TBD', 'public', 't1');"
        ));
    }

    #[test]
    fn test_drop_statements_are_idempotent_forms() {
        let schema = ident("public");
        let table = ident("t1");
        assert_eq!(
            drop_trigger_statement(&schema, &table).unwrap().text(),
            "DROP TRIGGER IF EXISTS \"inserttrigger\" ON \"public\".\"t1\""
        );
        assert_eq!(
            drop_view_statement(&schema, &table).unwrap().text(),
            "DROP VIEW IF EXISTS \"public\".\"t1_view\""
        );
    }
}
