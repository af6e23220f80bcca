//! End-to-end round-trip tests driving a [`Field`] tree against the
//! in-memory page store, exercising the scenarios named in the design
//! notes: flat records, variable-length collections, variants, nullable
//! values, masked bulk reads, and schema evolution.

use ntuple_fields::column::mem::MemPageStore;
use ntuple_fields::column::WriteOptions;
use ntuple_fields::reflect::{MemberDescriptor, Registry, TypeDescriptor};
use ntuple_fields::value::{BulkHandle, Value, BULK_ALL};
use ntuple_fields::Field;
use std::cell::RefCell;
use std::rc::Rc;

fn point_descriptor() -> TypeDescriptor {
    TypeDescriptor {
        members: vec![
            MemberDescriptor { name: "x".to_string(), type_name: "float64".to_string(), is_base_class: false },
            MemberDescriptor { name: "y".to_string(), type_name: "float64".to_string(), is_base_class: false },
        ],
        enum_underlying: None,
    }
}

/// Writes `values` through a freshly connected `write_tree`, commits one
/// cluster, then connects a freshly created `read_tree` of the same
/// shape over the same store and returns it, ready to read back.
fn write_then_reconnect(
    type_name: &str,
    reflection: &Registry,
    values: &[Value],
) -> (Field, Rc<RefCell<MemPageStore>>) {
    let store = Rc::new(RefCell::new(MemPageStore::new()));
    let mut write_tree = Field::create(type_name, "root", reflection).unwrap();
    let mut next_id = 0u64;
    write_tree.connect_to_sink(store.clone(), WriteOptions::default(), &mut next_id).unwrap();
    for v in values {
        write_tree.append(v).unwrap();
    }
    write_tree.commit_cluster().unwrap();

    let mut bindings = Vec::new();
    write_tree.collect_column_bindings(&mut bindings);
    for (id, handles) in &bindings {
        store.borrow_mut().adopt(*id, handles);
    }

    let mut read_tree = Field::create(type_name, "root", reflection).unwrap();
    read_tree.copy_on_disk_ids_from(&write_tree);
    let source: Rc<dyn ntuple_fields::column::PageSource> = store.clone();
    read_tree.connect_to_source(source, 1, reflection).unwrap();
    (read_tree, store)
}

#[test]
fn flat_record_round_trip_preserves_nan() {
    let _ = env_logger::try_init();
    let mut reflection = Registry::new();
    reflection.register("Point", point_descriptor());

    let values = vec![
        Value::Record(vec![Value::Float64(1.5), Value::Float64(f64::NAN)]),
        Value::Record(vec![Value::Float64(-2.0), Value::Float64(0.0)]),
    ];
    let (read_tree, _store) = write_then_reconnect("Point", &reflection, &values);

    for (i, expected) in values.iter().enumerate() {
        let got = read_tree.read(i as u64).unwrap();
        assert!(got.is_nan_aware_eq(expected), "entry {i}: {got:?} != {expected:?}");
    }
}

#[test]
fn vector_of_int32_offsets_are_cumulative() {
    let reflection = Registry::new();
    let values = vec![
        Value::Collection(vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]),
        Value::Collection(vec![]),
        Value::Collection(vec![Value::Int32(4)]),
        Value::Collection(vec![Value::Int32(5), Value::Int32(6)]),
    ];
    let (read_tree, _store) = write_then_reconnect("vector<int32>", &reflection, &values);

    for (i, expected) in values.iter().enumerate() {
        let got = read_tree.read(i as u64).unwrap();
        assert_eq!(&got, expected);
    }
}

#[test]
fn variant_round_trip_and_split() {
    let reflection = Registry::new();
    let values = vec![
        Value::Variant { tag: 1, value: Some(Box::new(Value::Int32(7))) },
        Value::Variant { tag: 2, value: Some(Box::new(Value::Float64(3.25))) },
        Value::Variant { tag: 1, value: Some(Box::new(Value::Int32(9))) },
        Value::Variant { tag: 0, value: None },
    ];
    let (read_tree, _store) = write_then_reconnect("variant<int32,float64>", &reflection, &values);

    for (i, expected) in values.iter().enumerate() {
        let got = read_tree.read(i as u64).unwrap();
        assert_eq!(&got, expected);
    }

    assert_eq!(read_tree.split(&values[1]), vec![&Value::Float64(3.25)]);
    assert_eq!(read_tree.split(&values[2]), vec![&Value::Int32(9)]);
    assert!(read_tree.split(&values[3]).is_empty());
}

#[test]
fn dense_nullable_round_trip() {
    let reflection = Registry::new();
    let values = vec![
        Value::Nullable(Some(Box::new(Value::Int32(42)))),
        Value::Nullable(None),
        Value::Nullable(Some(Box::new(Value::Int32(-1)))),
    ];
    let (read_tree, _store) = write_then_reconnect("optional<int32>", &reflection, &values);

    for (i, expected) in values.iter().enumerate() {
        let got = read_tree.read(i as u64).unwrap();
        assert_eq!(&got, expected);
    }
}

#[test]
fn masked_bulk_read_fills_only_requested_slots_then_completes() {
    let reflection = Registry::new();
    let values: Vec<Value> =
        (0..8u32).map(|i| Value::Collection(vec![Value::Float32(i as f32)])).collect();
    let (read_tree, _store) = write_then_reconnect("vector<float32>", &reflection, &values);

    let mut bulk = BulkHandle::new();
    let mask1 = vec![true, false, true, true, false, false, true, false];
    let filled = read_tree.bulk_read(0, &mask1, &mut bulk).unwrap();
    assert_eq!(filled, 4);
    for i in [0, 2, 3, 6] {
        assert!(bulk.available[i], "slot {i} should be filled");
    }
    for i in [1, 4, 5, 7] {
        assert!(!bulk.available[i], "slot {i} should not be filled yet");
    }

    let mask2 = vec![false, true, false, false, false, true, false, true];
    let filled = read_tree.bulk_read(0, &mask2, &mut bulk).unwrap();
    assert_eq!(filled, 3);
    let expect_available = [true, true, true, true, false, true, true, true];
    for (i, &want) in expect_available.iter().enumerate() {
        assert_eq!(bulk.available[i], want, "slot {i}");
    }
    for i in [0, 1, 2, 3, 5, 6, 7] {
        assert_eq!(&bulk.values[i], &values[i]);
    }
}

#[test]
fn simple_field_bulk_read_vectorizes_and_ignores_mask() {
    let reflection = Registry::new();
    let values: Vec<Value> = (0..5).map(Value::Int32).collect();
    let (read_tree, _store) = write_then_reconnect("int32", &reflection, &values);

    let mut bulk = BulkHandle::new();
    let mask = vec![true, false, false, false, false];
    let filled = read_tree.bulk_read(0, &mask, &mut bulk).unwrap();
    assert_eq!(filled, BULK_ALL);
    assert!(bulk.available.iter().all(|&a| a));
    assert_eq!(bulk.valid_count, 5);
    for (i, v) in values.iter().enumerate() {
        assert_eq!(&bulk.values[i], v);
    }
}

#[test]
fn cardinality_bulk_read_always_fills_everything_regardless_of_mask() {
    let mut reflection = Registry::new();
    reflection.register(
        "Basket",
        TypeDescriptor {
            members: vec![MemberDescriptor {
                name: "items".to_string(),
                type_name: "vector<int32>".to_string(),
                is_base_class: false,
            }],
            enum_underlying: None,
        },
    );
    let values = vec![
        Value::Record(vec![Value::Collection(vec![Value::Int32(1), Value::Int32(2)])]),
        Value::Record(vec![Value::Collection(vec![])]),
        Value::Record(vec![Value::Collection(vec![Value::Int32(3)])]),
    ];
    let (read_tree, store) = write_then_reconnect("Basket", &reflection, &values);

    let mut card = Field::create("cardinality<items>", "card", &reflection).unwrap();
    card.set_on_disk_id(read_tree.children()[0].on_disk_id().unwrap());
    let source: Rc<dyn ntuple_fields::column::PageSource> = store.clone();
    card.connect_to_source(source, 1, &reflection).unwrap();

    let mut bulk = BulkHandle::new();
    let mask = vec![true, false, false];
    let filled = card.bulk_read(0, &mask, &mut bulk).unwrap();
    assert_eq!(filled, BULK_ALL);
    assert_eq!(bulk.values, vec![Value::Index64(2), Value::Index64(0), Value::Index64(1)]);
}

#[test]
fn clone_as_resets_state_but_preserves_schema_and_on_disk_id() {
    let mut reflection = Registry::new();
    reflection.register("Point", point_descriptor());
    let store = Rc::new(RefCell::new(MemPageStore::new()));
    let mut write_tree = Field::create("Point", "root", &reflection).unwrap();
    let mut next_id = 0u64;
    write_tree.connect_to_sink(store.clone(), WriteOptions::default(), &mut next_id).unwrap();

    let cloned = write_tree.clone_as("root_copy");
    assert_eq!(cloned.name(), "root_copy");
    assert_eq!(cloned.type_name(), write_tree.type_name());
    assert_eq!(cloned.on_disk_id(), write_tree.on_disk_id());
    assert_eq!(cloned.state(), ntuple_fields::FieldState::Unconnected);
    assert_eq!(cloned.children().len(), write_tree.children().len());
    for (c, orig) in cloned.children().iter().zip(write_tree.children()) {
        assert_eq!(c.name(), orig.name());
        assert_eq!(c.on_disk_id(), orig.on_disk_id());
        assert_eq!(c.state(), ntuple_fields::FieldState::Unconnected);
    }
}

#[test]
fn sparse_nullable_round_trip_across_multiple_clusters() {
    let reflection = Registry::new();
    let store = Rc::new(RefCell::new(MemPageStore::new()));
    let mut write_tree = Field::create("optional<int64>", "root", &reflection).unwrap();
    let mut next_id = 0u64;
    write_tree.connect_to_sink(store.clone(), WriteOptions::default(), &mut next_id).unwrap();

    let cluster0 = vec![Value::Nullable(Some(Box::new(Value::Int64(10)))), Value::Nullable(None)];
    let cluster1 =
        vec![Value::Nullable(Some(Box::new(Value::Int64(20)))), Value::Nullable(Some(Box::new(Value::Int64(30))))];
    for v in &cluster0 {
        write_tree.append(v).unwrap();
    }
    write_tree.commit_cluster().unwrap();
    for v in &cluster1 {
        write_tree.append(v).unwrap();
    }
    write_tree.commit_cluster().unwrap();

    let mut bindings = Vec::new();
    write_tree.collect_column_bindings(&mut bindings);
    for (id, handles) in &bindings {
        store.borrow_mut().adopt(*id, handles);
    }

    let mut read_tree = Field::create("optional<int64>", "root", &reflection).unwrap();
    read_tree.copy_on_disk_ids_from(&write_tree);
    let source: Rc<dyn ntuple_fields::column::PageSource> = store.clone();
    read_tree.connect_to_source(source, 1, &reflection).unwrap();

    let all: Vec<Value> = cluster0.into_iter().chain(cluster1).collect();
    for (i, expected) in all.iter().enumerate() {
        let got = read_tree.read(i as u64).unwrap();
        assert_eq!(&got, expected, "entry {i}");
    }
}

#[test]
fn schema_evolution_rule_runs_on_a_new_member() {
    let mut reflection = Registry::new();
    reflection.register(
        "Versioned",
        TypeDescriptor {
            members: vec![MemberDescriptor { name: "a".to_string(), type_name: "int32".to_string(), is_base_class: false }],
            enum_underlying: None,
        },
    );
    reflection.register_evolution(
        "Versioned",
        1,
        Rc::new(|children: &mut Vec<Value>| {
            let derived = match children.first() {
                Some(Value::Int32(a)) => *a * 2,
                _ => 0,
            };
            if let Some(b) = children.get_mut(1) {
                *b = Value::Int32(derived);
            }
        }),
    );

    let store = Rc::new(RefCell::new(MemPageStore::new()));
    let mut write_tree = Field::create("Versioned", "root", &reflection).unwrap();
    let mut next_id = 0u64;
    write_tree.connect_to_sink(store.clone(), WriteOptions::default(), &mut next_id).unwrap();
    write_tree.append(&Value::Record(vec![Value::Int32(5)])).unwrap();
    write_tree.commit_cluster().unwrap();
    let mut bindings = Vec::new();
    write_tree.collect_column_bindings(&mut bindings);
    for (id, handles) in &bindings {
        store.borrow_mut().adopt(*id, handles);
    }

    reflection.register(
        "Versioned",
        TypeDescriptor {
            members: vec![
                MemberDescriptor { name: "a".to_string(), type_name: "int32".to_string(), is_base_class: false },
                MemberDescriptor { name: "b".to_string(), type_name: "int32".to_string(), is_base_class: false },
            ],
            enum_underlying: None,
        },
    );
    let mut read_tree = Field::create("Versioned", "root", &reflection).unwrap();
    read_tree.set_type_version(2);
    read_tree.copy_on_disk_ids_from(&write_tree);
    let source: Rc<dyn ntuple_fields::column::PageSource> = store.clone();
    read_tree.connect_to_source(source, 1, &reflection).unwrap();

    let got = read_tree.read(0).unwrap();
    assert_eq!(got, Value::Record(vec![Value::Int32(5), Value::Int32(10)]));
}
