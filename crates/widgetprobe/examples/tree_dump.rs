//! Tree Dump Example
//!
//! Finds an application on an in-memory bus and prints its widget tree,
//! the way you would when writing selectors for a new application.
//!
//! # Running
//!
//! ```bash
//! cargo run --example tree_dump
//! cargo run --example tree_dump -- 1    # limit to one level below the root
//! ```

#![allow(clippy::unwrap_used)]

use serde_json::json;
use std::sync::Arc;
use widgetprobe::fake::{FakeAddress, FakeBus, FakeProcessTable};
use widgetprobe::prelude::*;
use widgetprobe::{init_logging, LogConfig, Row};

fn main() -> ProbeResult<()> {
    init_logging(&LogConfig::default().with_level("info"));

    let maxdepth = std::env::args().nth(1).and_then(|arg| arg.parse().ok());

    println!("=== widgetprobe Tree Dump Example ===\n");

    let address = Arc::new(FakeAddress::tree(vec![
        Row::new("/TextEditor", json!({"id": [0, 1], "title": [0, "untitled.txt"]})),
        Row::new(
            "/TextEditor/MainWindow",
            json!({"id": [0, 2], "globalRect": [1, 0, 0, 1024, 768], "visible": [0, true]}),
        ),
        Row::new(
            "/TextEditor/MainWindow/ToolBar/ToolButton",
            json!({"id": [0, 4], "objectName": [0, "saveButton"], "enabled": [0, false]}),
        ),
        Row::new("/TextEditor/MainWindow/ToolBar", json!({"id": [0, 3]})),
        Row::new(
            "/TextEditor/MainWindow/TextArea",
            json!({"id": [0, 5], "text": [0, "hello"], "cursor": [2, 5, 0]}),
        ),
    ]));
    let bus = FakeBus::new().with_connection(":1.42", 4242, Some(address));
    let processes = FakeProcessTable::new(1).with_named("text-editor", 4242);
    let search = ProcessSearch::new(ProbeContext::new(ProbeConfig::new()), Arc::new(bus), Arc::new(processes));

    println!("1. Searching for 'text-editor'...");
    let root = search.get_proxy_object_by_name("text-editor", None)?;
    println!("   Found {} (pid {})\n", root.class_name(), root.pid()?);

    println!("2. Dumping the tree:\n");
    root.print_tree_stdout(maxdepth)?;

    println!("\n3. Selecting the save button...");
    let save = root.select_single("ToolButton", filters! { "objectName" => "saveButton" })?;
    println!("   enabled: {}", save.get("enabled")?);
    println!("   parent:  {}", save.get_parent()?.get_path());

    println!("\n=== Example Complete ===");
    Ok(())
}
