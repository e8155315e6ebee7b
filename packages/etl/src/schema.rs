//! Primary and foreign key wiring.
//!
//! Tables are loaded unconstrained and keyed afterwards, in dependency
//! order: dimensions (natural-key PK), then surrogate tables (surrogate PK
//! plus FK to their dimension), then the fact table (composite PK plus an FK
//! to each surrogate table). Every FK cascades on delete. Each table's
//! constraints are applied in one transaction.

use std::collections::BTreeSet;

use crime_warehouse_database::{
    WarehouseSink, execute_atomically,
    models::{Constraint, ForeignKey, OnDelete, Statement, TableDef},
    tables,
};

use crate::error::EtlError;

/// Constraints for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePlan {
    pub table: &'static TableDef,
    /// Primary key first, then foreign keys.
    pub constraints: Vec<Constraint>,
}

impl TablePlan {
    /// Tables this plan's foreign keys reference.
    pub fn references(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constraints.iter().filter_map(Constraint::referenced_table)
    }
}

fn cascade(
    table: &TableDef,
    columns: &[&'static str],
    references: &'static TableDef,
    referenced_columns: &[&'static str],
) -> Constraint {
    Constraint::ForeignKey(ForeignKey {
        name: format!("{}_{}_fk", table.name, references.name),
        columns: columns.to_vec(),
        references: references.name,
        referenced_columns: referenced_columns.to_vec(),
        on_delete: OnDelete::Cascade,
    })
}

fn surrogate_plan(
    surrogate: &'static TableDef,
    surrogate_key: &'static str,
    dimension: &'static TableDef,
    natural_key: &[&'static str],
) -> TablePlan {
    TablePlan {
        table: surrogate,
        constraints: vec![
            Constraint::PrimaryKey(vec![surrogate_key]),
            cascade(surrogate, natural_key, dimension, natural_key),
        ],
    }
}

const DATE_KEY: &[&str] = &["year", "month", "day"];

/// The warehouse's constraint plan, in application order.
#[must_use]
pub fn warehouse_plan() -> Vec<TablePlan> {
    let dimension = |table: &'static TableDef, key: &[&'static str]| TablePlan {
        table,
        constraints: vec![Constraint::PrimaryKey(key.to_vec())],
    };

    let fact_keys = [
        ("date_surrogate_key", &tables::DATE_SURROGATE),
        ("event_surrogate_key", &tables::CRIME_EVENT_SURROGATE),
        ("climate_surrogate_key", &tables::CLIMATE_SURROGATE),
        ("neighbourhood_surrogate_key", &tables::NEIGHBOURHOOD_SURROGATE),
    ];
    let mut fact_constraints = vec![Constraint::PrimaryKey(
        fact_keys.iter().map(|(column, _)| *column).collect(),
    )];
    fact_constraints.extend(
        fact_keys
            .iter()
            .map(|&(column, surrogate)| cascade(&tables::FACT, &[column], surrogate, &[column])),
    );

    vec![
        dimension(&tables::DATE_DIMENSION, DATE_KEY),
        dimension(&tables::CRIME_EVENT_DIMENSION, &["event_id"]),
        dimension(&tables::CLIMATE_DIMENSION, DATE_KEY),
        dimension(&tables::NEIGHBOURHOOD_DIMENSION, &["hood_id"]),
        surrogate_plan(
            &tables::DATE_SURROGATE,
            "date_surrogate_key",
            &tables::DATE_DIMENSION,
            DATE_KEY,
        ),
        surrogate_plan(
            &tables::CRIME_EVENT_SURROGATE,
            "event_surrogate_key",
            &tables::CRIME_EVENT_DIMENSION,
            &["event_id"],
        ),
        surrogate_plan(
            &tables::CLIMATE_SURROGATE,
            "climate_surrogate_key",
            &tables::CLIMATE_DIMENSION,
            DATE_KEY,
        ),
        surrogate_plan(
            &tables::NEIGHBOURHOOD_SURROGATE,
            "neighbourhood_surrogate_key",
            &tables::NEIGHBOURHOOD_DIMENSION,
            &["hood_id"],
        ),
        TablePlan {
            table: &tables::FACT,
            constraints: fact_constraints,
        },
    ]
}

/// Applies `plan` in order.
///
/// Before touching a table, checks that every table it references was keyed
/// earlier in the plan; a violation stops wiring with
/// [`EtlError::OutOfOrderConstraint`] and leaves that table unconstrained.
/// Tables keyed before the failure stay keyed.
///
/// # Errors
///
/// Returns [`EtlError::OutOfOrderConstraint`] for a misordered plan, or
/// [`EtlError::Sink`] if the sink rejects a constraint (for example because
/// loaded rows violate it).
pub async fn apply_plan(sink: &dyn WarehouseSink, plan: &[TablePlan]) -> Result<usize, EtlError> {
    let mut keyed: BTreeSet<&'static str> = BTreeSet::new();

    for step in plan {
        if let Some(missing) = step.references().find(|r| !keyed.contains(r)) {
            return Err(EtlError::OutOfOrderConstraint {
                table: step.table.name.to_string(),
                references: missing.to_string(),
            });
        }

        execute_atomically(
            sink,
            &[Statement::ApplyConstraints {
                table: step.table,
                constraints: &step.constraints,
            }],
        )
        .await?;

        log::debug!(
            "Applied {} constraints to {}",
            step.constraints.len(),
            step.table.name
        );
        keyed.insert(step.table.name);
    }

    Ok(keyed.len())
}

#[cfg(test)]
mod tests {
    use crime_warehouse_database::{Connector, memory::MemoryConnector, models::Value};

    use super::*;

    #[test]
    fn plan_keys_dimensions_then_surrogates_then_fact() {
        let plan = warehouse_plan();
        let names: Vec<_> = plan.iter().map(|p| p.table.name).collect();
        assert_eq!(names[..4], [
            "date_dimension_table",
            "crime_event_dimension_table",
            "climate_dimension_table",
            "neighbourhood_dimension_table",
        ]);
        assert_eq!(names[8], "fact_table");

        let fact = &plan[8];
        assert_eq!(fact.constraints.len(), 5);
        assert_eq!(
            fact.constraints[0],
            Constraint::PrimaryKey(vec![
                "date_surrogate_key",
                "event_surrogate_key",
                "climate_surrogate_key",
                "neighbourhood_surrogate_key",
            ])
        );
        assert!(fact.constraints[1..].iter().all(|c| matches!(
            c,
            Constraint::ForeignKey(fk) if fk.on_delete == OnDelete::Cascade
        )));
    }

    #[test]
    fn every_reference_precedes_its_user() {
        let plan = warehouse_plan();
        for (i, step) in plan.iter().enumerate() {
            for reference in step.references() {
                let target = plan.iter().position(|p| p.table.name == reference).unwrap();
                assert!(target < i, "{} references later {reference}", step.table.name);
            }
        }
    }

    async fn loaded_sink(connector: &MemoryConnector) -> Box<dyn WarehouseSink> {
        let sink = connector.connect().await.unwrap();
        let date = vec![Value::from(2018), Value::from(5), Value::from(1)];
        let rows: [(&TableDef, Vec<Vec<Value>>); 2] = [
            (
                &tables::DATE_DIMENSION,
                vec![[date.clone(), vec![Value::from(121), Value::from("tuesday")]].concat()],
            ),
            (
                &tables::DATE_SURROGATE,
                vec![[vec![Value::from(1)], date].concat()],
            ),
        ];
        for (table, rows) in &rows {
            crime_warehouse_database::replace_and_load(sink.as_ref(), table, rows)
                .await
                .unwrap();
        }
        sink
    }

    #[tokio::test]
    async fn out_of_order_plan_fails_before_touching_table() {
        let connector = MemoryConnector::new();
        let sink = loaded_sink(&connector).await;

        let plan = warehouse_plan();
        // Surrogate table scheduled before its dimension.
        let misordered = vec![plan[4].clone(), plan[0].clone()];
        let err = apply_plan(sink.as_ref(), &misordered).await.unwrap_err();

        assert!(matches!(
            err,
            EtlError::OutOfOrderConstraint { ref table, ref references }
                if table == "date_surrogate_table" && references == "date_dimension_table"
        ));
        assert!(connector.primary_key("date_surrogate_table").is_none());
        assert!(connector.primary_key("date_dimension_table").is_none());
    }

    #[tokio::test]
    async fn applies_in_order() {
        let connector = MemoryConnector::new();
        let sink = loaded_sink(&connector).await;

        let plan = warehouse_plan();
        let applied = apply_plan(sink.as_ref(), &[plan[0].clone(), plan[4].clone()])
            .await
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(
            connector.primary_key("date_surrogate_table"),
            Some(vec!["date_surrogate_key"])
        );
        assert_eq!(connector.foreign_keys("date_surrogate_table").len(), 1);
    }
}
