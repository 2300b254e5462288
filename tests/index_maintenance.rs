use proptest::prelude::*;
use relcore::catalog::schema::{
    ColumnDef, IndexColumn, IndexDescriptor, IndexState, TableDescriptor,
};
use relcore::catalog::types::{ColumnType, Value};
use relcore::config::RelConfig;
use relcore::storage::backend::RowState;
use relcore::storage::encoded_key::EncodedKey;
use relcore::storage::index::{index_table_name, lookup_index};
use relcore::storage::keyspace::MemoryBackend;
use relcore::{CoreServices, Session};
use std::collections::BTreeMap;
use std::sync::Arc;

fn setup() -> (Arc<MemoryBackend>, CoreServices) {
    let backend = Arc::new(MemoryBackend::new());
    let services =
        CoreServices::new(RelConfig::development(), backend.clone()).expect("services");
    (backend, services)
}

fn base_table() -> TableDescriptor {
    TableDescriptor::new(
        "t",
        vec![
            ColumnDef::new("k", ColumnType::Text, false),
            ColumnDef::new("v1", ColumnType::Text, true),
            ColumnDef::new("v2", ColumnType::Integer, true),
        ],
        &["k"],
        10,
    )
    .with_index(IndexDescriptor::new("i", vec![IndexColumn::asc("v1")]).including(&["v2"]))
}

fn index_rows(backend: &MemoryBackend, index: &str) -> Vec<RowState> {
    backend
        .snapshot()
        .scan(&index_table_name("t", index))
        .into_iter()
        .map(|(_, row)| row)
        .collect()
}

fn index_tuple(row: &RowState) -> (Value, Value, Value) {
    (
        row.get("v1").cloned().unwrap_or(Value::Null),
        row.get("k").cloned().unwrap_or(Value::Null),
        row.get("v2").cloned().unwrap_or(Value::Null),
    )
}

#[test]
fn covered_column_set_to_null_is_reflected_in_index() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");

    session
        .upsert(
            "t",
            vec![Value::from("a")],
            vec![("v1", Value::from("x")), ("v2", Value::from(1))],
        )
        .expect("stage insert");
    session.commit().expect("commit insert");
    let rows = index_rows(&backend, "i");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        index_tuple(&rows[0]),
        (Value::from("x"), Value::from("a"), Value::from(1))
    );

    session
        .upsert("t", vec![Value::from("a")], vec![("v2", Value::Null)])
        .expect("stage update");
    session.commit().expect("commit update");
    let rows = index_rows(&backend, "i");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        index_tuple(&rows[0]),
        (Value::from("x"), Value::from("a"), Value::Null)
    );
}

#[test]
fn multiple_updates_to_one_row_commit_only_the_final_state() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    session
        .upsert(
            "t",
            vec![Value::from("a")],
            vec![("v1", Value::from("x")), ("v2", Value::from(1))],
        )
        .expect("seed");
    session.commit().expect("seed commit");

    let pk = vec![Value::from("a")];
    session
        .upsert("t", pk.clone(), vec![("v1", Value::from("y"))])
        .expect("set v1");
    session
        .upsert("t", pk.clone(), vec![("v2", Value::Null)])
        .expect("null v2");
    session.delete("t", pk.clone()).expect("delete");
    session
        .upsert("t", pk.clone(), vec![("v1", Value::from("z"))])
        .expect("reinsert");
    let outcome = session.commit().expect("commit");
    assert_eq!(outcome.rows, 1);

    let rows = index_rows(&backend, "i");
    assert_eq!(rows.len(), 1, "no transient index rows survive: {rows:?}");
    assert_eq!(
        index_tuple(&rows[0]),
        (Value::from("z"), Value::from("a"), Value::Null)
    );

    let stored = backend
        .snapshot()
        .row("t", &EncodedKey::from_values(&pk))
        .cloned()
        .expect("row");
    assert_eq!(stored.get("v1"), Some(&Value::from("z")));
    assert_eq!(stored.get("v2"), None);
}

#[test]
fn duplicate_indexed_values_stay_distinct_by_primary_key() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    for k in ["b", "a", "c"] {
        session
            .upsert("t", vec![Value::from(k)], vec![("v1", Value::from("same"))])
            .expect("stage");
    }
    session.commit().expect("commit");
    let keys: Vec<Value> = index_rows(&backend, "i")
        .iter()
        .map(|row| row.get("k").cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(keys, vec![Value::from("a"), Value::from("b"), Value::from("c")]);
}

#[test]
fn lookup_through_index_sees_committed_updates() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    for (k, v1, v2) in [("a", "red", 1), ("b", "blue", 2), ("c", "red", 3)] {
        session
            .upsert(
                "t",
                vec![Value::from(k)],
                vec![("v1", Value::from(v1)), ("v2", Value::from(v2))],
            )
            .expect("stage");
    }
    session.commit().expect("commit");

    let table = Arc::clone(session.metadata().get_table("t").expect("t"));
    let covered = |backend: &MemoryBackend, color: &str| -> Vec<Value> {
        lookup_index(&backend.snapshot(), &table, "i", &[Value::from(color)])
            .expect("lookup")
            .iter()
            .map(|row| row.get("v2").cloned().unwrap_or(Value::Null))
            .collect()
    };
    assert_eq!(covered(&backend, "red"), vec![Value::from(1), Value::from(3)]);

    session
        .upsert("t", vec![Value::from("a")], vec![("v1", Value::from("blue"))])
        .expect("recolor");
    session.delete("t", vec![Value::from("c")]).expect("delete");
    session.commit().expect("commit");
    assert!(covered(&backend, "red").is_empty());
    assert_eq!(covered(&backend, "blue"), vec![Value::from(1), Value::from(2)]);
}

#[test]
fn descending_index_orders_rows_in_reverse() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    let table = TableDescriptor::new(
        "t",
        vec![
            ColumnDef::new("k", ColumnType::Integer, false),
            ColumnDef::new("score", ColumnType::Integer, true),
        ],
        &["k"],
        10,
    )
    .with_index(IndexDescriptor::new(
        "by_score",
        vec![IndexColumn::desc("score").nulls_last()],
    ));
    session.add_table(table).expect("create table");
    for (k, score) in [(1, Value::from(5)), (2, Value::Null), (3, Value::from(9))] {
        session
            .upsert("t", vec![Value::from(k)], vec![("score", score)])
            .expect("stage");
    }
    session.commit().expect("commit");
    let scores: Vec<Value> = index_rows(&backend, "by_score")
        .iter()
        .map(|row| row.get("score").cloned().unwrap_or(Value::Null))
        .collect();
    assert_eq!(scores, vec![Value::from(9), Value::from(5), Value::Null]);
}

#[test]
fn disabled_index_receives_no_writes() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    session
        .update_index_state("t", "i", IndexState::Disabled)
        .expect("disable");
    session
        .upsert("t", vec![Value::from("a")], vec![("v1", Value::from("x"))])
        .expect("stage");
    let outcome = session.commit().expect("commit");
    assert_eq!(outcome.index_mutations, 0);
    assert!(index_rows(&backend, "i").is_empty());
    assert_eq!(backend.read_calls(), 0);
}

#[test]
fn unreadable_base_table_aborts_commit_and_keeps_batch() {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    backend.set_unreadable("t", true);
    session
        .upsert("t", vec![Value::from("a")], vec![("v1", Value::from("x"))])
        .expect("stage");
    let err = session.commit().expect_err("prior state unavailable");
    assert_eq!(err.code_str(), "index_inconsistent");
    assert_eq!(session.pending_changes(), 1);
    assert_eq!(backend.apply_calls(), 0);

    backend.set_unreadable("t", false);
    session.commit().expect("commit after recovery");
    assert_eq!(index_rows(&backend, "i").len(), 1);
}

const KEYS: [&str; 3] = ["a", "b", "c"];

type Cells = Vec<(&'static str, Value)>;

#[derive(Debug, Clone)]
enum Step {
    Upsert(usize, Cells),
    Delete(usize),
}

fn arb_cell() -> impl Strategy<Value = (&'static str, Value)> {
    (prop::sample::select(vec!["v1", "v2"]), prop::option::of(0i64..3)).prop_map(
        |(column, n)| {
            let value = match (column, n) {
                (_, None) => Value::Null,
                ("v1", Some(n)) => Value::from(format!("s{n}").as_str()),
                (_, Some(n)) => Value::from(n),
            };
            (column, value)
        },
    )
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        1 => (0usize..3).prop_map(Step::Delete),
        3 => (0usize..3, prop::collection::vec(arb_cell(), 0..3))
            .prop_map(|(k, cells)| Step::Upsert(k, cells)),
    ]
}

fn stage(session: &mut Session, step: &Step) {
    match step {
        Step::Upsert(k, cells) => session
            .upsert("t", vec![Value::from(KEYS[*k])], cells.clone())
            .expect("stage upsert"),
        Step::Delete(k) => session
            .delete("t", vec![Value::from(KEYS[*k])])
            .expect("stage delete"),
    }
}

fn seeded(seeds: &[Option<Cells>]) -> (Arc<MemoryBackend>, Session) {
    let (backend, services) = setup();
    let mut session = services.connect(None, None);
    session.add_table(base_table()).expect("create table");
    for (k, seed) in seeds.iter().enumerate() {
        if let Some(cells) = seed {
            stage(&mut session, &Step::Upsert(k, cells.clone()));
        }
    }
    session.commit().expect("seed commit");
    (backend, session)
}

/// Rows each key ends up with when the seeds and steps land one at a time.
fn final_rows(seeds: &[Option<Cells>], steps: &[Step]) -> Vec<Option<BTreeMap<&'static str, Value>>> {
    let mut rows: Vec<_> = seeds
        .iter()
        .map(|seed| seed.as_ref().map(|cells| cells.iter().cloned().collect::<BTreeMap<_, _>>()))
        .collect();
    for step in steps {
        match step {
            Step::Upsert(k, cells) => rows[*k]
                .get_or_insert_with(BTreeMap::new)
                .extend(cells.iter().cloned()),
            Step::Delete(k) => rows[*k] = None,
        }
    }
    rows
}

proptest! {
    #[test]
    fn folded_commit_matches_one_change_per_key(
        seeds in prop::collection::vec(prop::option::of(prop::collection::vec(arb_cell(), 0..3)), 3),
        steps in prop::collection::vec(arb_step(), 1..12),
    ) {
        let (batched, mut session) = seeded(&seeds);
        for step in &steps {
            stage(&mut session, step);
        }
        session.commit().expect("batched commit");

        let (one_by_one, mut session) = seeded(&seeds);
        for step in &steps {
            stage(&mut session, step);
            session.commit().expect("single change commit");
        }

        // Each key's net effect written as one change against an empty store.
        let (composed, mut session) = seeded(&[None, None, None]);
        for (k, row) in final_rows(&seeds, &steps).into_iter().enumerate() {
            if let Some(cells) = row {
                stage(&mut session, &Step::Upsert(k, cells.into_iter().collect()));
            }
        }
        session.commit().expect("composed commit");

        let index = index_table_name("t", "i");
        let expected = composed.snapshot();
        for backend in [&batched, &one_by_one] {
            let actual = backend.snapshot();
            prop_assert_eq!(actual.scan(&index), expected.scan(&index));
            prop_assert_eq!(actual.scan("t"), expected.scan("t"));
        }
    }
}
