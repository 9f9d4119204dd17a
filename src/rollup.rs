use std::sync::Arc;

use datafusion::arrow::array::{
    Array, ArrayRef, Float64Array, Float64Builder, RecordBatch, StringArray, StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::common::ScalarValue;
use datafusion::functions_aggregate::sum::sum;
use datafusion::prelude::{col, SessionContext};

use crate::error::Error;
use crate::row::{self, MetricRow, Value};

/// Where a rollup group column takes its values from.
pub enum GroupSource {
    /// An existing key or value column, copied through.
    Column(String),
    /// A label derived from a naming column.
    Category(CategoryRule),
}

pub struct GroupColumn {
    pub name: String,
    pub source: GroupSource,
}

/// Classifies rows by a case-insensitive substring match against a naming
/// column: rows containing the marker get `matched`, the rest `fallback`.
pub struct CategoryRule {
    pub source: String,
    pub marker: String,
    pub matched: String,
    pub fallback: String,
}

impl CategoryRule {
    fn label(&self, row: &MetricRow) -> String {
        let name = row.cell(&self.source).unwrap_or_default();
        if name.to_lowercase().contains(&self.marker.to_lowercase()) {
            self.matched.clone()
        } else {
            self.fallback.clone()
        }
    }
}

/// A metric to sum, resolved against the first candidate column present in
/// the table. Candidates absorb column-name drift across older historical
/// entries.
pub struct SumColumn {
    pub name: String,
    pub candidates: Vec<String>,
}

/// Builds a grouped rollup of the historical table: group columns (copied or
/// derived), summed metrics, sorted ascending by `sort_by`.
///
/// Metric cells absent from a row count as zero here, since a rollup must
/// always produce a total. Columns absent from the whole table are an
/// error, and every missing one is reported at once.
///
/// # Returns
/// A Result containing either the rollup as a rectangular grid (header row
/// first, ready for publishing) or an [`Error`].
pub async fn build_rollup(
    table: &[MetricRow],
    groups: &[GroupColumn],
    sums: &[SumColumn],
    sort_by: &[&str],
) -> Result<Vec<Vec<String>>, Error> {
    let present = row::columns(table);

    let mut missing = Vec::new();
    for group in groups {
        let source = match &group.source {
            GroupSource::Column(column) => column,
            GroupSource::Category(rule) => &rule.source,
        };
        if !present.contains(source) {
            missing.push(source.clone());
        }
    }
    let mut resolved: Vec<(String, String)> = Vec::new();
    for sum_column in sums {
        match sum_column
            .candidates
            .iter()
            .find(|candidate| present.contains(*candidate))
        {
            Some(candidate) => resolved.push((sum_column.name.clone(), candidate.clone())),
            None => missing.push(sum_column.name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(Error::MissingColumns { columns: missing });
    }

    let batch = to_batch(table, groups, &resolved)?;
    let ctx = SessionContext::new();
    let df = ctx.read_batch(batch)?;

    // Unreported metrics arrive as nulls; a sum needs them to count as zero
    let df = df.fill_null(
        ScalarValue::from(0.0_f64),
        resolved.iter().map(|(name, _)| name.clone()).collect(),
    )?;

    let df = df.aggregate(
        groups.iter().map(|group| col(group.name.as_str())).collect(),
        resolved
            .iter()
            .map(|(name, _)| sum(col(name.as_str())).alias(name.as_str()))
            .collect(),
    )?;
    let df = df.sort(
        sort_by
            .iter()
            .map(|column| col(*column).sort(true, false))
            .collect(),
    )?;

    let batches = df.collect().await?;

    let mut header: Vec<String> = groups.iter().map(|group| group.name.clone()).collect();
    header.extend(resolved.iter().map(|(name, _)| name.clone()));

    let mut grid = vec![header];
    for batch in &batches {
        for row_idx in 0..batch.num_rows() {
            let mut cells = Vec::with_capacity(batch.num_columns());
            for column in batch.columns() {
                cells.push(render_cell(column, row_idx));
            }
            grid.push(cells);
        }
    }
    Ok(grid)
}

/// Converts metric rows into a record batch: group columns as strings, sum
/// columns as nullable floats resolved from their source column.
fn to_batch(
    table: &[MetricRow],
    groups: &[GroupColumn],
    resolved: &[(String, String)],
) -> Result<RecordBatch, Error> {
    let mut group_builders: Vec<StringBuilder> =
        groups.iter().map(|_| StringBuilder::new()).collect();
    let mut sum_builders: Vec<Float64Builder> =
        resolved.iter().map(|_| Float64Builder::new()).collect();

    for row in table {
        for (group, builder) in groups.iter().zip(group_builders.iter_mut()) {
            let value = match &group.source {
                GroupSource::Column(column) => row.cell(column).unwrap_or_default(),
                GroupSource::Category(rule) => rule.label(row),
            };
            builder.append_value(value);
        }
        for ((_, source), builder) in resolved.iter().zip(sum_builders.iter_mut()) {
            builder.append_option(row.values.get(source).and_then(Value::as_f64));
        }
    }

    let mut fields: Vec<Field> = groups
        .iter()
        .map(|group| Field::new(group.name.as_str(), DataType::Utf8, false))
        .collect();
    fields.extend(
        resolved
            .iter()
            .map(|(name, _)| Field::new(name.as_str(), DataType::Float64, true)),
    );

    let mut arrays: Vec<ArrayRef> = group_builders
        .into_iter()
        .map(|mut builder| Arc::new(builder.finish()) as ArrayRef)
        .collect();
    arrays.extend(
        sum_builders
            .into_iter()
            .map(|mut builder| Arc::new(builder.finish()) as ArrayRef),
    );

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn render_cell(column: &ArrayRef, row_idx: usize) -> String {
    if column.is_null(row_idx) {
        return String::new();
    }
    if let Some(strings) = column.as_any().downcast_ref::<StringArray>() {
        return strings.value(row_idx).to_string();
    }
    if let Some(floats) = column.as_any().downcast_ref::<Float64Array>() {
        return floats.value(row_idx).to_string();
    }
    String::new()
}
