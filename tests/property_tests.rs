//! Property-based tests for rendering and field encoding.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Placeholders and bound parameters line up
//! - Identifiers outside the plain grammar are always rejected
//! - List encoding round-trips when elements avoid the delimiter
//! - Reads through the store agree with an in-memory model

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use recstore::storage::driver::SqliteDriver;
use recstore::storage::{Dialect, is_identifier};
use recstore::{
    ConnectParams, ConnectionManager, Fields, Filter, Query, RecordStore, Statement,
    StatementSource, TableRef, Value, decode_field_list, encode_field_value,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn column() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,12}"
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<i64>().prop_map(Value::Integer),
        "[ -~]{0,16}".prop_map(Value::Text),
    ]
}

proptest! {
    /// Property: a filtered select binds one parameter per filter entry and
    /// numbers its placeholders 1..=n in filter order.
    #[test]
    fn prop_select_placeholders_match_params(
        entries in prop::collection::btree_map(column(), scalar(), 0..6)
    ) {
        let filter: Filter = entries.clone().into_iter().collect();
        let query = Query::Select {
            table: TableRef::new(None, "t").unwrap(),
            filter,
        };

        for dialect in [Dialect::Sqlite, Dialect::Postgres] {
            let stmt = query.render(dialect).unwrap();
            prop_assert_eq!(stmt.params().len(), entries.len());
            for (i, column) in entries.keys().enumerate() {
                let predicate = format!("{column} = {}", dialect.placeholder(i + 1));
                prop_assert!(stmt.sql().contains(&predicate));
            }
            prop_assert!(!stmt.sql().contains(&dialect.placeholder(entries.len() + 1)));
        }
    }

    /// Property: update binds the id after every field.
    #[test]
    fn prop_update_binds_id_last(
        entries in prop::collection::btree_map(column(), scalar(), 1..6),
        id in any::<i64>()
    ) {
        let query = Query::Update {
            table: TableRef::new(None, "t").unwrap(),
            id,
            fields: entries.into_iter().collect::<Fields>(),
        };
        let stmt = query.render(Dialect::Postgres).unwrap();
        prop_assert_eq!(stmt.params().last(), Some(&Value::Integer(id)));
        let id_clause = format!("WHERE id = ${}", stmt.params().len());
        prop_assert!(stmt.sql().ends_with(&id_clause));
    }

    /// Property: anything containing a non-identifier character is rejected.
    #[test]
    fn prop_identifier_rejects_punctuation(
        prefix in "[a-z]{0,5}",
        bad in "[ ;.'\"()=*-]",
        suffix in "[a-z]{0,5}"
    ) {
        let name = format!("{prefix}{bad}{suffix}");
        prop_assert!(!is_identifier(&name));
        prop_assert!(TableRef::new(None, &name).is_err());
    }

    /// Property: encoding then decoding a comma-free list is lossless.
    #[test]
    fn prop_list_encoding_roundtrip(items in prop::collection::vec("[a-z0-9 ]{1,8}", 1..8)) {
        let encoded = encode_field_value(Value::from(items.clone()));
        let text = encoded.as_str().unwrap().to_string();
        prop_assert_eq!(decode_field_list(&text), items);
    }

    /// Property: scalars pass through encoding unchanged.
    #[test]
    fn prop_scalar_encoding_is_identity(value in scalar()) {
        prop_assert_eq!(encode_field_value(value.clone()), value);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: filtered reads return exactly the rows a model predicts.
    #[test]
    fn prop_filtered_reads_match_model(
        rows in prop::collection::vec((0..3i64, 0..3i64), 0..12),
        filter_a in prop::option::of(0..3i64),
        filter_b in prop::option::of(0..3i64)
    ) {
        let manager = Arc::new(ConnectionManager::new(
            Box::new(SqliteDriver::new()),
            ConnectParams::new(":memory:"),
        ));
        manager
            .execute_with_recovery(&Statement::new(
                "CREATE TABLE t (id INTEGER PRIMARY KEY, a INTEGER, b INTEGER)",
            ))
            .unwrap();
        let store = RecordStore::new(manager);

        let mut model = BTreeMap::new();
        for (a, b) in &rows {
            let id = store
                .create_object("t", &Fields::new().with("a", *a).with("b", *b))
                .unwrap();
            model.insert(id, (*a, *b));
        }

        let mut filter = Filter::new();
        if let Some(a) = filter_a {
            filter.insert("a", a);
        }
        if let Some(b) = filter_b {
            filter.insert("b", b);
        }

        let mut got: Vec<i64> = store
            .get_objects("t", Some(&filter))
            .unwrap()
            .iter()
            .filter_map(recstore::Record::id)
            .collect();
        got.sort_unstable();

        let expected: Vec<i64> = model
            .iter()
            .filter(|(_, (a, b))| {
                filter_a.is_none_or(|fa| fa == *a) && filter_b.is_none_or(|fb| fb == *b)
            })
            .map(|(id, _)| *id)
            .collect();

        prop_assert_eq!(got, expected);
        prop_assert_eq!(
            store.get_object_count("t"),
            Some(i64::try_from(rows.len()).unwrap())
        );
    }
}
