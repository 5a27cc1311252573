// tests/scenarios.rs

mod common;
use crate::common::{chain, init_tracing, limits, prefixes, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use staledag::dag::{analyze, build_graph, reduce};
use staledag::engine::{build_and_run, RunOptions};
use staledag::errors::StaledagError;
use staledag::exec::{LocalExecutor, ThreadedExecutor};
use staledag::task::{Identity, TaskNode};
use staledag_test_utils::{FakeTaskBuilder, FakeWorld, RecordingExecutor};

type TestResult = Result<(), Box<dyn Error>>;

fn id(name: &str) -> Identity {
    Identity::new("fake", name)
}

#[test]
fn missing_result_at_the_head_of_a_chain_cascades() -> TestResult {
    init_tracing();
    let world = FakeWorld::new();
    world.set_stamp("B", 20);
    world.set_stamp("C", 30);
    let tasks = chain(&world, &["A", "B", "C"], &[]);

    let mut graph = build_graph([Arc::clone(&tasks[2])])?;
    let report = analyze(&mut graph, true)?;

    assert_eq!(report.stale, 3);
    for name in ["A", "B", "C"] {
        let idx = graph.index_of(&id(name)).unwrap();
        assert!(graph.node(idx).unwrap().to_update, "{name} should be stale");
    }
    Ok(())
}

#[test]
fn diamond_with_shortcut_loses_only_the_shortcut() -> TestResult {
    init_tracing();
    let world = FakeWorld::new();
    for (name, at) in [("B", 20), ("C", 20), ("D", 30)] {
        world.set_stamp(name, at);
    }
    let a = FakeTaskBuilder::new(&world, "A").build();
    let b = FakeTaskBuilder::new(&world, "B").after(&a).build();
    let c = FakeTaskBuilder::new(&world, "C").after(&a).build();
    let d = FakeTaskBuilder::new(&world, "D")
        .after(&b)
        .after(&c)
        .after(&a)
        .build();

    let mut graph = build_graph([d])?;
    assert_eq!(graph.edge_count(), 5);

    let report = analyze(&mut graph, true)?;
    assert_eq!(report.stale, 4);

    let reduction = reduce(&mut graph)?;
    assert_eq!(reduction.pruned_nodes, 0);
    assert_eq!(reduction.redundant_edges, 1);

    let ix = |n: &str| graph.index_of(&id(n)).unwrap();
    assert!(!graph.has_edge(ix("A"), ix("D")));
    assert!(graph.has_edge(ix("A"), ix("B")));
    assert!(graph.has_edge(ix("A"), ix("C")));
    assert!(graph.has_edge(ix("B"), ix("D")));
    assert!(graph.has_edge(ix("C"), ix("D")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn budgeted_channel_runs_sequentially_while_others_overlap() -> TestResult {
    init_tracing();
    let world = FakeWorld::new();
    let slow = Duration::from_millis(100);

    let a1 = FakeTaskBuilder::new(&world, "a1").labels(&["channel1"]).takes(slow).build();
    let a2 = FakeTaskBuilder::new(&world, "a2").labels(&["channel1"]).takes(slow).after(&a1).build();
    let b1 = FakeTaskBuilder::new(&world, "b1").labels(&["channel2"]).takes(slow).build();
    let b2 = FakeTaskBuilder::new(&world, "b2").labels(&["channel2"]).takes(slow).after(&b1).build();
    // A second, independent channel1 root competing for the budget.
    let a3 = FakeTaskBuilder::new(&world, "a3").labels(&["channel1"]).takes(slow).build();

    let options = RunOptions {
        rate_limits: limits(&[("channel1", 1)]),
        ..RunOptions::default()
    };
    let mut executor = ThreadedExecutor::new(4);
    let summary = with_timeout(build_and_run([a2, b2, a3], &mut executor, &options)).await?;

    assert_eq!(summary.completed, 5);
    assert_eq!(world.max_running("channel1"), 1);
    assert!(world.max_running_total() >= 2, "channel2 should overlap channel1");
    assert!(world.violations().is_empty(), "{:?}", world.violations());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_carries_identity_and_description_after_siblings_drain() -> TestResult {
    init_tracing();
    let world = FakeWorld::new();

    let bad = FakeTaskBuilder::new(&world, "bad").fails().build();
    let after_bad = FakeTaskBuilder::new(&world, "after_bad").after(&bad).build();
    let sibling = FakeTaskBuilder::new(&world, "sibling")
        .takes(Duration::from_millis(200))
        .build();
    let after_sibling = FakeTaskBuilder::new(&world, "after_sibling").after(&sibling).build();

    let mut executor = ThreadedExecutor::new(4);
    let err = with_timeout(build_and_run(
        [after_bad, after_sibling],
        &mut executor,
        &RunOptions::default(),
    ))
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("fake[bad]"), "{message}");
    assert!(message.contains("fake task 'bad'"), "{message}");
    assert_eq!(err.failed_task(), Some(&id("bad")));

    let cause = err.source().map(|s| s.to_string()).unwrap_or_default();
    assert!(cause.contains("simulated failure in bad"), "{cause}");

    // The sibling was already running and finished; nothing new started.
    assert!(world.stamp("sibling").is_some());
    assert_eq!(world.run_count("after_bad"), 0);
    assert_eq!(world.run_count("after_sibling"), 0);
    Ok(())
}

#[tokio::test]
async fn first_failure_wins() -> TestResult {
    let world = FakeWorld::new();
    let first = FakeTaskBuilder::new(&world, "first").fails().build();
    let second = FakeTaskBuilder::new(&world, "second").fails().build();

    let mut executor = LocalExecutor::new();
    let err = build_and_run([first, second], &mut executor, &RunOptions::default())
        .await
        .unwrap_err();

    // Both were submitted before the first wait; the local executor
    // completes them in submission order.
    assert_eq!(world.run_count("second"), 1);
    match err {
        StaledagError::TaskFailed { identity, generations, .. } => {
            assert_eq!(identity, id("first"));
            assert!(generations.is_empty());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn failure_keeps_graph_snapshots_when_requested() -> TestResult {
    let world = FakeWorld::new();
    let ok = FakeTaskBuilder::new(&world, "ok").build();
    let bad = FakeTaskBuilder::new(&world, "bad").after(&ok).fails().build();

    let options = RunOptions {
        dump_graphs: true,
        ..RunOptions::default()
    };
    let err = build_and_run([bad], &mut LocalExecutor::new(), &options)
        .await
        .unwrap_err();

    match err {
        StaledagError::TaskFailed { generations, .. } => {
            assert!(!generations.is_empty());
            assert_eq!(generations[0].remaining_by_kind.get("fake"), Some(&2));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn second_run_is_a_no_op() -> TestResult {
    let world = FakeWorld::new();
    let tasks = chain(&world, &["x", "y", "z"], &[]);
    let sink: Arc<dyn TaskNode> = Arc::clone(&tasks[2]);

    let first = build_and_run([Arc::clone(&sink)], &mut LocalExecutor::new(), &RunOptions::default()).await?;
    assert_eq!(first.completed, 3);
    assert_eq!(world.runs(), vec!["x", "y", "z"]);

    let second = build_and_run([sink], &mut LocalExecutor::new(), &RunOptions::default()).await?;
    assert!(second.is_noop());
    assert_eq!(world.runs().len(), 3);
    Ok(())
}

#[tokio::test]
async fn newer_sources_only_matter_with_detection_on() -> TestResult {
    let world = FakeWorld::new();
    world.set_stamp("gen", 10);
    let gen_task = FakeTaskBuilder::new(&world, "gen").fresh_at(50).build();

    let ignore = RunOptions {
        detect_source_change: false,
        ..RunOptions::default()
    };
    let summary = build_and_run([Arc::clone(&gen_task)], &mut LocalExecutor::new(), &ignore).await?;
    assert!(summary.is_noop());

    let summary = build_and_run([gen_task], &mut LocalExecutor::new(), &RunOptions::default()).await?;
    assert_eq!(summary.completed, 1);
    Ok(())
}

#[tokio::test]
async fn prefix_command_follows_first_prefixed_label() -> TestResult {
    let world = FakeWorld::new();
    let t = FakeTaskBuilder::new(&world, "t").labels(&["cpu", "gpu", "net"]).build();

    let options = RunOptions {
        prefix_commands: prefixes(&[("net", "netns exec lab"), ("gpu", "nice -n 5")]),
        ..RunOptions::default()
    };
    let mut executor = RecordingExecutor::new(LocalExecutor::new());
    build_and_run([t], &mut executor, &options).await?;

    assert_eq!(world.prefix_of("t").as_deref(), Some("nice -n 5"));
    let submitted = executor.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].channel, "cpu+gpu+net");
    Ok(())
}

#[tokio::test]
async fn zero_budget_is_a_config_error() {
    let world = FakeWorld::new();
    let t = FakeTaskBuilder::new(&world, "t").labels(&["gpu"]).build();
    let options = RunOptions {
        rate_limits: limits(&[("gpu", 0)]),
        ..RunOptions::default()
    };

    let err = build_and_run([t], &mut LocalExecutor::new(), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, StaledagError::ConfigError(_)));
    assert_eq!(world.runs().len(), 0);
}
