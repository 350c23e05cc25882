//! End-to-end scenario: a three-phase out-of-core computation combining
//! phases, memory budgeting, shared datastructures, metadata forwarding,
//! progress accounting, and evacuation.

use millrace::testing::{CollectingProgress, Journal, ProgressEvent, RecordingNode};
use millrace::{NodeMap, Runner, share};
use std::sync::{Arc, Mutex};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn three_phase_pipeline_end_to_end() {
    init_logging();
    let map = NodeMap::new();
    let journal = Journal::new();
    let collector = CollectingProgress::new();
    let written = Arc::new(Mutex::new(None));

    // Phase 1: reader pushes raw records into the tokenizer, which buffers
    // them for the sorter. Reader and tokenizer share a vocabulary table.
    let reader = RecordingNode::new(&map, "reader", &journal)
        .with_steps(100)
        .with_memory(4, 64, 1.0)
        .on_prepare(|core| {
            core.register_datastructure_usage("vocabulary", 2.0);
            core.set_datastructure_memory_limits("vocabulary", 8, 32)?;
            core.set_datastructure("vocabulary", vec!["the".to_string(), "a".to_string()])?;
            Ok(())
        })
        .on_propagate(|core| {
            core.forward("n_records", 1_000u64);
            Ok(())
        })
        .on_go(|core| {
            core.step(100);
            Ok(())
        });
    let tokenizer = RecordingNode::new(&map, "tokenizer", &journal)
        .with_steps(50)
        .with_memory(4, 64, 3.0)
        .with_evacuation()
        .on_prepare(|core| {
            core.register_datastructure_usage("vocabulary", 1.0);
            Ok(())
        })
        .on_end(|core| {
            let words: Vec<String> = core.datastructure("vocabulary")?;
            assert_eq!(words.len(), 2);
            core.step(50);
            Ok(())
        });
    reader.core().add_push_destination(tokenizer.core().token());

    // Phase 2: the sorter pulls the buffered tokens and spills sorted runs.
    let sorter = RecordingNode::new(&map, "sorter", &journal)
        .with_steps(10)
        .with_memory(16, 128, 1.0)
        .with_evacuation()
        .on_go(|core| {
            assert_eq!(core.fetch::<u64>("n_records")?, 1_000);
            let mut proxy = core.proxy_progress(5);
            for _ in 0..5 {
                proxy.step(1);
            }
            Ok(())
        });
    sorter.core().add_buffered_pull_source(tokenizer.core().token());

    // Phase 3: the writer drains the sorted runs.
    let writer = {
        let written = Arc::clone(&written);
        RecordingNode::new(&map, "writer", &journal)
            .with_steps(10)
            .on_go(move |core| {
                *written.lock().unwrap() = Some(core.fetch::<u64>("n_records")?);
                core.step(10);
                Ok(())
            })
    };
    writer.core().add_buffered_pull_source(sorter.core().token());

    let report = Runner::new(100)
        .with_progress(share(collector.clone()))
        .run(vec![
            reader.boxed(),
            tokenizer.boxed(),
            sorter.boxed(),
            writer.boxed(),
        ])
        .unwrap();

    // Three phases, in producer-first order.
    assert_eq!(report.phases.len(), 3);
    assert_eq!(report.phases[0].steps_declared, 150);
    assert_eq!(report.phases[1].steps_declared, 10);
    assert_eq!(report.phases[2].steps_declared, 10);
    assert!(report.overflows.is_empty());

    // Lifecycle ordering across phase boundaries.
    journal.assert_before("tokenizer:end", "tokenizer:evacuate");
    journal.assert_before("tokenizer:evacuate", "sorter:prepare");
    journal.assert_before("sorter:end", "writer:prepare");
    journal.assert_before("sorter:evacuate", "writer:begin");

    // Within phase 1: consumer begins first, producer ends first.
    journal.assert_before("tokenizer:begin", "reader:begin");
    journal.assert_before("reader:end", "tokenizer:end");

    // The metadata forwarded by the reader crossed both buffered edges.
    assert_eq!(*written.lock().unwrap(), Some(1_000));

    // Memory: phase 1 splits 100 between reader (w1), tokenizer (w3), and
    // the shared vocabulary slot (w2, clamped at 32).
    let phase1 = &report.phases[0];
    let get = |name: &str| {
        phase1
            .nodes
            .iter()
            .chain(phase1.datastructures.iter())
            .find(|a| a.consumer == name)
            .map(|a| a.bytes)
            .unwrap()
    };
    assert_eq!(get("vocabulary"), 32);
    assert!(get("reader") >= 4 && get("reader") <= 64);
    assert!(get("tokenizer") >= 4 && get("tokenizer") <= 64);
    let total: u64 = phase1
        .nodes
        .iter()
        .chain(phase1.datastructures.iter())
        .map(|a| a.bytes)
        .sum();
    assert!(total <= 100);
    // The heavier tokenizer outweighs the reader.
    assert!(get("tokenizer") > get("reader"));

    // Progress: one init per phase, full budgets charged.
    let inits: Vec<u64> = collector
        .events()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Init(total) => Some(*total),
            _ => None,
        })
        .collect();
    assert_eq!(inits, vec![150, 10, 10]);
    assert_eq!(collector.total_steps(), 170);
    assert_eq!(
        collector
            .events()
            .iter()
            .filter(|e| **e == ProgressEvent::Done)
            .count(),
        3
    );
}

#[test]
fn dot_export_reflects_plot_options() {
    use millrace::PlotOptions;

    let map = NodeMap::new();
    let journal = Journal::new();

    let a = RecordingNode::new(&map, "reader", &journal);
    let b = RecordingNode::new(&map, "buffer", &journal);
    let hidden = RecordingNode::new(&map, "scratch", &journal);
    a.core().add_buffered_push_destination(b.core().token());
    a.core().add_push_destination(hidden.core().token());
    b.core().set_plot_options(PlotOptions::BUFFERED);
    hidden.core().set_plot_options(PlotOptions::SIMPLIFIED_HIDE);

    let dot = map.to_dot();

    assert!(dot.contains("digraph pipeline"));
    assert!(dot.contains("label=\"reader\""));
    assert!(dot.contains("peripheries=2"));
    assert!(dot.contains("style=dashed"));
    assert!(!dot.contains("scratch"));
}

#[test]
fn breadcrumbs_combine_prefix_and_highest_priority_name() {
    use millrace::{NamePriority, NodeCore};

    let map = NodeMap::new();
    let core = NodeCore::new(&map);

    core.set_name("sorter", NamePriority::Hint);
    core.set_name("ignored", NamePriority::Default);
    assert_eq!(core.name(), "sorter");

    core.set_name("merge-sorter", NamePriority::User);
    core.set_breadcrumb("job42");
    assert_eq!(core.breadcrumb(), "job42/merge-sorter");
}
