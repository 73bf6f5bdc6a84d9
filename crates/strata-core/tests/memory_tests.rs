//! Peak heap use of the streaming notebook interpreter.
//!
//! The allocator below counts every allocation in this test binary, so the
//! tests serialize on `LOCK` and measure their own window.

use std::alloc::{GlobalAlloc, Layout, System};
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Map;
use strata_core::interpreter::{Budget, InterpretContext, NotebookInterpreter};
use strata_core::{FileDescriptor, Interpreter};

struct Counting;

static CURRENT: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);
static LOCK: Mutex<()> = Mutex::new(());

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            let now = CURRENT.fetch_add(layout.size(), Ordering::SeqCst) + layout.size();
            PEAK.fetch_max(now, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        CURRENT.fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

#[global_allocator]
static ALLOCATOR: Counting = Counting;

/// Bytes allocated above the starting level while `f` runs.
fn peak_during<T>(f: impl FnOnce() -> T) -> (T, usize) {
    let base = CURRENT.load(Ordering::SeqCst);
    PEAK.store(base, Ordering::SeqCst);
    let out = f();
    let peak = PEAK.load(Ordering::SeqCst).saturating_sub(base);
    (out, peak)
}

/// A notebook with `cells` code cells, streamed to disk.
fn write_notebook(path: &Path, cells: usize) -> u64 {
    let mut out = std::io::BufWriter::new(File::create(path).unwrap());
    write!(out, r#"{{"cells": ["#).unwrap();
    for i in 0..cells {
        if i > 0 {
            write!(out, ",").unwrap();
        }
        write!(
            out,
            r#"{{"cell_type": "{}", "metadata": {{}}, "source": ["import numpy\n", "total = {} * 2\n"], "outputs": [{{"output_type": "stream", "text": ["{}\n"]}}]}}"#,
            if i % 10 == 0 { "markdown" } else { "code" },
            i,
            "y".repeat(400)
        )
        .unwrap();
    }
    write!(
        out,
        r#"], "metadata": {{"kernelspec": {{"language": "python"}}}}, "nbformat": 4, "nbformat_minor": 5}}"#
    )
    .unwrap();
    out.flush().unwrap();
    drop(out);
    std::fs::metadata(path).unwrap().len()
}

fn stream(path: &Path, size: u64) -> serde_json::Value {
    let fd = FileDescriptor::new(path.to_string_lossy(), size, 0);
    let config = Map::new();
    let budget = Budget::unbounded();
    let ctx = InterpretContext::new(&fd, &config, &budget);
    let mut reader = BufReader::new(File::open(path).unwrap());
    let extracted = NotebookInterpreter::new()
        .interpret(&mut reader, &ctx)
        .unwrap();
    serde_json::Value::Object(extracted.data)
}

#[test]
fn test_streaming_peak_stays_flat() {
    let _guard = LOCK.lock().unwrap_or_else(|p| p.into_inner());
    let dir = tempfile::tempdir().unwrap();

    let small = dir.path().join("small.ipynb");
    let small_size = write_notebook(&small, 500);
    let large = dir.path().join("large.ipynb");
    let large_size = write_notebook(&large, 5_000);
    assert!(large_size > 2 * 1024 * 1024);

    let (small_data, small_peak) = peak_during(|| stream(&small, small_size));
    let (large_data, large_peak) = peak_during(|| stream(&large, large_size));
    assert_eq!(small_data["cell_count"], 500);
    assert_eq!(large_data["cell_count"], 5_000);
    assert_eq!(large_data["cell_types"]["markdown"], 500);
    assert_eq!(large_data["cell_types"]["code"], 4_500);

    assert!(large_peak < 2 * 1024 * 1024, "streaming peak {} bytes", large_peak);
    // Ten times the cells must not mean anywhere near ten times the memory.
    assert!(large_peak < small_peak * 2 + 64 * 1024, "{} vs {}", large_peak, small_peak);

    let (materialized, full_peak) = peak_during(|| {
        let reader = BufReader::new(File::open(&large).unwrap());
        serde_json::from_reader::<_, serde_json::Value>(reader).unwrap()
    });
    assert_eq!(materialized["cells"].as_array().unwrap().len(), 5_000);
    assert!(full_peak > large_peak * 4, "{} vs {}", full_peak, large_peak);
}

#[tokio::test(flavor = "current_thread")]
async fn test_scenario_peak_for_the_notebook() {
    let _guard = LOCK.lock().unwrap_or_else(|p| p.into_inner());
    let dir = tempfile::tempdir().unwrap();

    let python: String = (0..10).map(|i| format!("print({})\n", i)).collect();
    std::fs::write(dir.path().join("a.py"), python).unwrap();
    std::fs::write(dir.path().join("b.csv"), "k,v\n1,2\n3,4\n5,6\n").unwrap();
    let huge = dir.path().join("huge.ipynb");
    let huge_size = write_notebook(&huge, 5_000);

    let config: strata_core::Config = toml::from_str(
        r#"
[[rules]]
id = "big-notebooks"
priority = 10
target = "notebook"
extension = "ipynb"
config = { max_size_bytes = 52428800 }
"#,
    )
    .unwrap();
    let ctx = strata_core::PipelineContext::in_memory(config).unwrap();
    let report = ctx
        .scan(&strata_core::ScanRequest::new(dir.path().to_string_lossy()).interpret(true))
        .await
        .unwrap();
    let outcome = report.interpretation.unwrap();
    assert_eq!(outcome.processed_count, 3);
    assert_eq!(outcome.error_count, 0);

    let cells: u64 = ctx
        .store()
        .rows_after(&report.session.id, 0, 10)
        .unwrap()
        .iter()
        .filter_map(|r| r.interpretation.as_ref())
        .filter_map(|i| i.data.get("cell_count").and_then(|v| v.as_u64()))
        .sum();
    assert_eq!(cells, 5_000);

    // The same interpretation measured on its own.
    let (data, peak) = peak_during(|| stream(&huge, huge_size));
    assert_eq!(data["cell_count"], 5_000);
    assert!(peak < 2 * 1024 * 1024, "notebook peak {} bytes", peak);
}
