//! End-to-end tests: find an application on a fake bus, then drive its
//! widget tree through proxy objects.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use std::sync::Arc;
use widgetprobe::fake::{FakeAddress, FakeBus, FakeProcess, FakeProcessTable, FakeQt};
use widgetprobe::prelude::*;
use widgetprobe::Row;

#[derive(CustomProxy)]
struct Calculator;

#[derive(CustomProxy)]
#[proxy(name = "Key")]
struct CalculatorKey;

fn calculator_tree() -> Arc<FakeAddress> {
    let qt = FakeQt::new()
        .with_signals(3, &["clicked()"])
        .with_methods(3, &["click()"]);
    Arc::new(
        FakeAddress::tree(vec![
            Row::new("/Calculator", json!({"id": [0, 1], "title": [0, "Calc"]})),
            Row::new("/Calculator/Display", json!({"id": [0, 2], "text": [0, "0"]})),
            Row::new(
                "/Calculator/Keypad/Key",
                json!({"id": [0, 3], "text": [0, "7"], "column": [0, 0]}),
            ),
            Row::new(
                "/Calculator/Keypad/Key",
                json!({"id": [0, 4], "text": [0, "8"], "column": [0, 1]}),
            ),
            Row::new(
                "/Calculator/Keypad/Key",
                json!({"id": [0, 5], "text": [0, "9"], "column": [0, 2]}),
            ),
            Row::new("/Calculator/Keypad", json!({"id": [0, 6]})),
        ])
        .with_qt(qt),
    )
}

fn environment() -> (ProcessSearch, Arc<FakeAddress>, Arc<FakeBus>) {
    let address = calculator_tree();
    let bus = Arc::new(
        FakeBus::new()
            .with_connection(":1.3", 300, None)
            .with_connection(":1.5", 500, Some(Arc::clone(&address))),
    );
    let processes = FakeProcessTable::new(1)
        .with_named("calculator", 500)
        .with_pid(300);
    let search = ProcessSearch::new(
        ProbeContext::new_mocked(),
        Arc::clone(&bus) as _,
        Arc::new(processes),
    );
    (search, address, bus)
}

#[test]
fn test_search_by_name_and_navigate() {
    let (search, _, _) = environment();
    let root = search.get_proxy_object_by_name("calculator", None).unwrap();
    assert_eq!(root.class_name(), "Calculator");
    assert_eq!(root.pid().unwrap(), 500);

    let keys = root
        .select_many("Key", Filters::new(), Some(&["column"]))
        .unwrap();
    let labels: Vec<String> = keys
        .iter()
        .map(|key| key.get("text").unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["7", "8", "9"]);

    let keypad = keys[0].get_parent().unwrap();
    assert_eq!(keypad.id(), 6);
    assert_eq!(keypad.get_children().unwrap().len(), 3);
    assert_eq!(keys[2].get_root_instance().unwrap().id(), root.id());
}

#[test]
fn test_search_with_launched_process() {
    let (search, _, _) = environment();
    let process = Arc::new(FakeProcess::new(500));
    let root = search
        .get_proxy_object(
            SearchRequest::new(SearchParams::new().application_name("Calculator"))
                .process(process),
        )
        .unwrap();
    assert_eq!(root.process().unwrap().unwrap().pid(), 500);
}

#[test]
fn test_custom_classes_resolve_under_their_base() {
    let (search, _, _) = environment();
    let registry = search.context().registry();
    let base = registry.define(ClassSpec::new("CalculatorBase").extends(registry.custom_proxy_base()));
    let calculator = registry.define_custom::<Calculator>(&base);
    let key = registry.define_custom::<CalculatorKey>(&base);

    let root = search
        .get_proxy_object(SearchRequest::new(SearchParams::new().pid(500)).emulator_base(&base))
        .unwrap();
    assert!(Arc::ptr_eq(root.class(), &calculator));
    assert!(root.class().has_capability(Capability::Application));
    assert!(root.class().has_capability(Capability::Qt));

    let seven = root.select_single(&key, filters! { "text" => "7" }).unwrap();
    assert!(Arc::ptr_eq(seven.class(), &key));
    assert!(seven.is_instance_of(&base));
    assert_eq!(seven.get_all_instances().unwrap().len(), 3);
}

#[test]
fn test_qt_signals_through_search() {
    let (search, address, _) = environment();
    let root = search.get_proxy_object_by_name("calculator", None).unwrap();
    let seven = root.select_single("Key", filters! { "text" => "7" }).unwrap();
    let qt = seven.qt().unwrap();
    let watcher = qt.watch_signal("clicked()").unwrap();
    qt.invoke_slot("click", &[]).unwrap();
    address.fake_qt().unwrap().emit(3, "clicked()");
    assert!(watcher.was_emitted().unwrap());
}

#[test]
fn test_state_follows_application() {
    let (search, address, _) = environment();
    let root = search.get_proxy_object_by_name("calculator", None).unwrap();
    let display = root.select_single("Display", Filters::new()).unwrap();
    assert_eq!(display.get("text").unwrap().as_str(), Some("0"));

    address.set_attribute("/Calculator/Display", "text", json!([0, "42"]));
    {
        let _frozen = display.no_automatic_refreshing();
        assert_eq!(display.get("text").unwrap().as_str(), Some("0"));
    }
    display.wait_for("text", "42", 5.0).unwrap();
    assert_eq!(display.get("text").unwrap().as_str(), Some("42"));

    address.remove_subtree("/Calculator/Display");
    display.wait_until_destroyed(5).unwrap();
    let err = root.select_single("Display", Filters::new()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_search_gives_up_after_default_timeout() {
    let (search, _, bus) = environment();
    let err = search
        .get_proxy_object(SearchRequest::new(SearchParams::new().application_name("Editor")))
        .unwrap_err();
    assert!(matches!(err, ProbeError::ProcessSearch { .. }));
    assert!(err.to_string().contains("application name = 'Editor'"));
    assert_eq!(bus.list_calls(), 11);
    assert!((search.context().sleeper().total_secs_slept() - 10.0).abs() < f64::EPSILON);
}
