use millrace::testing::{Journal, RecordingNode};
use millrace::{NodeMap, PipelineError, Runner};
use std::sync::{Arc, Mutex};

type Seen<T> = Arc<Mutex<Option<T>>>;

fn seen<T>() -> Seen<T> {
    Arc::new(Mutex::new(None))
}

#[test]
fn explicit_value_reaches_all_descendants() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let got = seen::<u64>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("n_items", 100u64);
            Ok(())
        });
    let b = RecordingNode::new(&map, "b", &journal);
    let c = {
        let got = Arc::clone(&got);
        RecordingNode::new(&map, "c", &journal).on_begin(move |core| {
            *got.lock().unwrap() = Some(core.fetch::<u64>("n_items")?);
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());
    b.core().add_push_destination(c.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed(), c.boxed()]).unwrap();

    assert_eq!(*got.lock().unwrap(), Some(100));
}

#[test]
fn implicit_write_loses_to_an_upstream_explicit_value() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let got = seen::<u64>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("n_items", 100u64);
            Ok(())
        });
    let b = RecordingNode::new(&map, "b", &journal).on_propagate(|core| {
        core.forward_implicit("n_items", 50u64);
        Ok(())
    });
    let c = {
        let got = Arc::clone(&got);
        RecordingNode::new(&map, "c", &journal).on_begin(move |core| {
            *got.lock().unwrap() = Some(core.fetch::<u64>("n_items")?);
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());
    b.core().add_push_destination(c.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed(), c.boxed()]).unwrap();

    // The downstream reader sees the explicit 100, not the implicit 50.
    assert_eq!(*got.lock().unwrap(), Some(100));
}

#[test]
fn explicit_holder_is_a_propagation_sink() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let got = seen::<u64>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("n_items", 100u64);
            Ok(())
        });
    // b knows better than its producer and says so explicitly.
    let b = RecordingNode::new(&map, "b", &journal).on_propagate(|core| {
        core.forward("n_items", 50u64);
        Ok(())
    });
    let c = {
        let got = Arc::clone(&got);
        RecordingNode::new(&map, "c", &journal).on_begin(move |core| {
            *got.lock().unwrap() = Some(core.fetch::<u64>("n_items")?);
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());
    b.core().add_push_destination(c.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed(), c.boxed()]).unwrap();

    assert_eq!(*got.lock().unwrap(), Some(50));
}

#[test]
fn values_cross_buffered_edges() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let got = seen::<String>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("sort_order", "ascending".to_string());
            Ok(())
        });
    let b = {
        let got = Arc::clone(&got);
        RecordingNode::new(&map, "b", &journal)
            .as_initiator()
            .on_begin(move |core| {
                *got.lock().unwrap() = Some(core.fetch::<String>("sort_order")?);
                Ok(())
            })
    };
    a.core().add_buffered_push_destination(b.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed()]).unwrap();

    assert_eq!(got.lock().unwrap().as_deref(), Some("ascending"));
}

#[test]
fn fetch_of_missing_key_fails() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let outcome = seen::<bool>();

    let a = {
        let outcome = Arc::clone(&outcome);
        RecordingNode::new(&map, "a", &journal)
            .as_initiator()
            .on_begin(move |core| {
                let err = core.fetch::<u64>("never_forwarded").unwrap_err();
                *outcome.lock().unwrap() =
                    Some(matches!(err, PipelineError::UnknownKey { .. }));
                Ok(())
            })
    };

    Runner::new(0).run(vec![a.boxed()]).unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some(true));
}

#[test]
fn fetch_of_wrong_type_fails() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let outcome = seen::<bool>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("n_items", 100u64);
            Ok(())
        });
    let b = {
        let outcome = Arc::clone(&outcome);
        RecordingNode::new(&map, "b", &journal).on_begin(move |core| {
            let err = core.fetch::<String>("n_items").unwrap_err();
            *outcome.lock().unwrap() =
                Some(matches!(err, PipelineError::TypeMismatch { .. }));
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed()]).unwrap();
    assert_eq!(*outcome.lock().unwrap(), Some(true));
}

#[test]
fn can_fetch_probes_without_failing() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let probes = Arc::new(Mutex::new((false, true)));

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_propagate(|core| {
            core.forward("ready", true);
            Ok(())
        });
    let b = {
        let probes = Arc::clone(&probes);
        RecordingNode::new(&map, "b", &journal).on_begin(move |core| {
            let mut p = probes.lock().unwrap();
            p.0 = core.can_fetch("ready");
            p.1 = core.can_fetch("missing");
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed()]).unwrap();

    let p = probes.lock().unwrap();
    assert!(p.0);
    assert!(!p.1);
}

#[test]
fn values_written_in_prepare_flow_during_propagate() {
    let map = NodeMap::new();
    let journal = Journal::new();
    let got = seen::<i32>();

    let a = RecordingNode::new(&map, "a", &journal)
        .as_initiator()
        .on_prepare(|core| {
            core.forward("epoch", 3i32);
            Ok(())
        });
    let b = {
        let got = Arc::clone(&got);
        // Downstream propagate already sees the upstream value.
        RecordingNode::new(&map, "b", &journal).on_propagate(move |core| {
            *got.lock().unwrap() = Some(core.fetch::<i32>("epoch")?);
            Ok(())
        })
    };
    a.core().add_push_destination(b.core().token());

    Runner::new(0).run(vec![a.boxed(), b.boxed()]).unwrap();
    assert_eq!(*got.lock().unwrap(), Some(3));
}
