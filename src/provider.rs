use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::Result as DFResult;
use datafusion::logical_expr::Expr;
use datafusion::logical_expr::TableType;
use datafusion::physical_plan::memory::MemoryExec;
use datafusion::physical_plan::ExecutionPlan;
use datafusion_catalog::{Session, TableProvider};

use crate::table::Table;

/// Serves the rows of a decoded [`Table`] to DataFusion. The rows are
/// materialized once, when the provider is built.
#[derive(Debug)]
pub struct DecodedTableProvider {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl DecodedTableProvider {
    pub fn new(batch: RecordBatch) -> Self {
        Self {
            schema: batch.schema(),
            batches: vec![batch],
        }
    }

    pub fn try_from_table(table: &Table) -> anyhow::Result<Self> {
        Ok(Self::new(table.record_batch()?))
    }
}

#[async_trait]
impl TableProvider for DecodedTableProvider {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }
    fn table_type(&self) -> TableType {
        TableType::Base
    }

    async fn scan(
        &self,
        _state: &dyn Session,
        projection: Option<&Vec<usize>>,
        _filters: &[Expr],
        _limit: Option<usize>,
    ) -> DFResult<Arc<dyn ExecutionPlan>> {
        let exec = MemoryExec::try_new(
            &[self.batches.clone()],
            Arc::clone(&self.schema),
            projection.cloned(),
        )?;
        Ok(Arc::new(exec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datafusion::arrow::array::{Array, Int32Array, StringArray};
    use datafusion::arrow::compute::concat_batches;
    use datafusion::arrow::datatypes::{DataType, Field, Schema};
    use datafusion::prelude::SessionContext;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, true),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(vec![Some(1), Some(2), None])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .expect("batch")
    }

    #[tokio::test]
    async fn test_projection_and_filter() -> anyhow::Result<()> {
        let ctx = SessionContext::new();
        ctx.register_table("heap", Arc::new(DecodedTableProvider::new(batch())))?;
        let batches = ctx
            .sql("SELECT name FROM heap WHERE id >= 1 ORDER BY id")
            .await?
            .collect()
            .await?;
        let batch = concat_batches(&batches[0].schema(), &batches)?;
        assert_eq!(batch.num_rows(), 2);
        let names = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8 column");
        assert_eq!(names.value(0), "a");
        assert!(names.is_null(1));
        Ok(())
    }

    #[tokio::test]
    async fn test_count_all() -> anyhow::Result<()> {
        let ctx = SessionContext::new();
        ctx.register_table("heap", Arc::new(DecodedTableProvider::new(batch())))?;
        let batches = ctx.sql("SELECT count(*) FROM heap").await?.collect().await?;
        let counts = batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<datafusion::arrow::array::Int64Array>()
            .expect("int64 column");
        assert_eq!(counts.value(0), 3);
        Ok(())
    }
}
