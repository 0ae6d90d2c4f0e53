use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use filetracker_core::executor::{CommandError, CommandRequest};
use filetracker_core::poller::{ChangeScanner, Checkpoint};
use filetracker_core::sink::{LogRecord, LogSink, MemoryLogSink, SinkError, SinkResult};
use filetracker_core::source::{
    ChangeEvent, ChangeFilter, ChangeSource, QueryOutcome, SourceError, SourceResult,
};
use proptest::prelude::*;

const WATCHED: &str = "/srv/watched";

#[derive(Debug, Clone)]
enum Cycle {
    Empty,
    QueryFails,
    Rows(Vec<Row>),
}

#[derive(Debug, Clone)]
struct Row {
    time: Option<i64>,
    write_fails: bool,
}

#[derive(Debug)]
struct ScriptedSource(Mutex<VecDeque<Cycle>>);

#[async_trait::async_trait]
impl ChangeSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query(&self, _filter: &ChangeFilter) -> SourceResult<QueryOutcome> {
        match self.0.lock().unwrap().pop_front() {
            None | Some(Cycle::Empty) => Ok(QueryOutcome::Empty),
            Some(Cycle::QueryFails) => Err(SourceError::query("unavailable")),
            Some(Cycle::Rows(rows)) => Ok(QueryOutcome::from_rows(
                rows.into_iter()
                    .enumerate()
                    .map(|(i, row)| {
                        let time = row
                            .time
                            .map(|t| t.to_string())
                            .unwrap_or_else(|| "n/a".to_string());
                        ChangeEvent::new(format!("{WATCHED}/{i}"), time)
                            .with_field("fail", row.write_fails.to_string())
                    })
                    .collect(),
            )),
        }
    }
}

/// Rejects rows flagged with `fail=true`
#[derive(Debug, Default)]
struct SelectiveSink(MemoryLogSink);

#[async_trait::async_trait]
impl LogSink for SelectiveSink {
    async fn write(&self, event: &ChangeEvent) -> SinkResult<LogRecord> {
        if event.get("fail") == Some("true") {
            return Err(SinkError::storage("rejected"));
        }
        self.0.write(event).await
    }

    async fn read_paginated(&self, limit: usize, offset: usize) -> SinkResult<Vec<LogRecord>> {
        self.0.read_paginated(limit, offset).await
    }
}

fn row() -> impl Strategy<Value = Row> {
    (proptest::option::weighted(0.8, 0_i64..10_000), proptest::bool::weighted(0.1))
        .prop_map(|(time, write_fails)| Row { time, write_fails })
}

fn cycle() -> impl Strategy<Value = Cycle> {
    prop_oneof![
        1 => Just(Cycle::Empty),
        1 => Just(Cycle::QueryFails),
        4 => proptest::collection::vec(row(), 1..8).prop_map(Cycle::Rows),
    ]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #[test]
    fn checkpoint_never_decreases(start in 0_i64..5_000, cycles in proptest::collection::vec(cycle(), 1..12)) {
        let count = cycles.len();
        let source = Arc::new(ScriptedSource(Mutex::new(cycles.into())));
        let mut scanner = ChangeScanner::new(WATCHED, source, Arc::new(SelectiveSink::default()))
            .with_checkpoint(Checkpoint::new(start));

        let history = block_on(async {
            let mut history = vec![scanner.checkpoint()];
            for _ in 0..count {
                let _ = scanner.scan().await;
                history.push(scanner.checkpoint());
            }
            history
        });

        for pair in history.windows(2) {
            prop_assert!(pair[0] <= pair[1], "checkpoint moved back: {:?}", history);
        }
    }

    #[test]
    fn filter_excludes_events_at_or_before_checkpoint(checkpoint in -1_000_i64..1_000_000, time in -1_000_i64..1_000_000) {
        let filter = ChangeFilter::new(WATCHED, checkpoint);
        let event = ChangeEvent::new(format!("{WATCHED}/file"), time);
        prop_assert_eq!(filter.matches(&event), time > checkpoint);
        let expected_suffix = format!("AND time > {checkpoint};");
        prop_assert!(filter.to_sql().ends_with(&expected_suffix));
    }

    #[test]
    fn whitelisted_commands_accept_any_arguments(
        program in prop_oneof![Just("touch"), Just("mkdir")],
        sudo in prop_oneof![Just(""), Just("sudo "), Just("SUDO "), Just("Sudo ")],
        args in proptest::collection::vec("[a-zA-Z0-9_./-]{1,12}", 0..4),
    ) {
        let raw = format!("{sudo}{program} {}", args.join(" "));
        let command = CommandRequest::parse(&raw).and_then(CommandRequest::authorize);
        prop_assert!(command.is_ok(), "{} was rejected", raw);
        let command = command.unwrap();
        prop_assert_eq!(command.program(), program);
        prop_assert_eq!(command.args(), args.as_slice());
    }

    #[test]
    fn other_executables_are_rejected(
        program in prop_oneof![Just("rm"), Just("mkdirp"), Just("TOUCH"), Just("bash"), Just("touch2")],
        args in proptest::collection::vec("[a-z]{1,6}", 0..3),
    ) {
        let raw = format!("sudo {program} {}", args.join(" "));
        let result = CommandRequest::parse(&raw).and_then(CommandRequest::authorize);
        prop_assert!(matches!(result, Err(CommandError::NotWhitelisted(_))));
    }
}
