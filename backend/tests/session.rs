//! End-to-end behavior of a session: select, run, undo, reset.

use fieldshift::session::ChangeReason;
use fieldshift::{
    Backend, Dataset, EngineConfig, EngineError, MappingCatalog, RunOutcome, SandboxError,
    Session, TransformOutcome, UndoOutcome,
};
use serde_json::{json, Value};
use std::time::Duration;

const CATALOG: &str = r#"{
  "version": "test",
  "mappings": [
    {
      "key": "B → X",
      "sourceConcepts": [{ "name": "B", "type": "integer" }],
      "targetConcepts": [{ "name": "X", "type": "integer" }]
    },
    {
      "key": "H → H_cm",
      "sourceConcepts": [{ "name": "H", "type": "number", "unit": "in" }],
      "targetConcepts": [{ "name": "H_cm", "type": "number", "unit": "cm" }]
    },
    {
      "key": "S1 + S2 → T",
      "sourceConcepts": [
        { "name": "S1", "type": "integer" },
        { "name": "S2", "type": "integer" }
      ],
      "targetConcepts": [{ "name": "T", "type": "integer" }]
    }
  ]
}"#;

fn rows(value: Value) -> Dataset {
    value
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r.as_object().cloned().unwrap())
        .collect()
}

fn session(data: Value) -> Session {
    Session::new(
        MappingCatalog::from_json(CATALOG).unwrap(),
        rows(data),
        &EngineConfig::default(),
    )
    .unwrap()
}

async fn completed(session: &Session, code: &str, backend: Backend) -> TransformOutcome {
    match session.run_transform_with(code, backend).await.unwrap() {
        RunOutcome::Completed(outcome) => outcome,
        RunOutcome::NotApplicable { notice } => panic!("not applicable: {}", notice),
    }
}

async fn ready_embedded(session: &Session) {
    session.executor().bootstrap_embedded().await.unwrap();
}

#[tokio::test]
async fn test_splices_target_where_source_was() {
    let session = session(json!([{"A": 1, "B": 2, "C": 3}]));
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        "fn transform(row) { row.B * 10 }",
        Backend::Native,
    )
    .await;

    let keys: Vec<&str> = outcome.data[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["A", "X", "C"]);
    assert_eq!(outcome.data[0]["X"], 20);
}

#[tokio::test]
async fn test_height_conversion_and_undo() {
    for backend in [Backend::Native, Backend::Embedded] {
        let session = session(json!([{"H": 70}]));
        ready_embedded(&session).await;
        session.select_mapping("H → H_cm").unwrap();

        let code = match backend {
            Backend::Native => "fn transform(row) { #{ H_cm: row.H * 2.54 } }",
            Backend::Embedded => "function transform(row) return { H_cm = row.H * 2.54 } end",
        };
        let outcome = completed(&session, code, backend).await;

        assert_eq!(outcome.stats.succeeded, 1);
        let row = &session.current_data()[0];
        assert_eq!(row.len(), 1);
        let cm = row["H_cm"].as_f64().unwrap();
        assert!((cm - 177.8).abs() < 1e-9, "{} gave {}", backend, cm);

        assert_eq!(session.undo().unwrap(), UndoOutcome::Undone);
        assert_eq!(session.current_data(), rows(json!([{"H": 70}])));
        assert_eq!(session.undo().unwrap(), UndoOutcome::NothingToUndo);
        assert_eq!(session.current_data(), rows(json!([{"H": 70}])));
    }
}

#[tokio::test]
async fn test_many_to_one_with_nulls() {
    let native = r#"
        fn transform(row) {
            if is_null(row.S1) && is_null(row.S2) { return #{ T: () }; }
            #{ T: row.S1 + row.S2 }
        }
    "#;
    let embedded = r#"
        function transform(row)
          if is_na(row.S1) and is_na(row.S2) then return { T = null } end
          return { T = row.S1 + row.S2 }
        end
    "#;

    for (backend, code) in [(Backend::Native, native), (Backend::Embedded, embedded)] {
        let session = session(json!([{"S1": 1, "S2": 2}, {"S1": null, "S2": null}]));
        ready_embedded(&session).await;
        session.select_mapping("S1 + S2 → T").unwrap();

        let outcome = completed(&session, code, backend).await;
        assert_eq!(outcome.data, rows(json!([{"T": 3}, {"T": null}])));
        assert_eq!(outcome.stats.succeeded, 2);
        assert_eq!(outcome.stats.failed, 0);
    }
}

#[tokio::test]
async fn test_one_failing_row_is_isolated() {
    let session = session(json!([
        {"id": 0, "B": 1}, {"id": 1, "B": 2}, {"id": 2, "B": 0}, {"id": 3, "B": 4}
    ]));
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        r#"fn transform(row) { if row.B == 0 { throw "B is zero"; } 100 / row.B }"#,
        Backend::Native,
    )
    .await;

    assert_eq!(outcome.stats.total, 4);
    assert_eq!(outcome.stats.succeeded, 3);
    assert_eq!(outcome.stats.failed, 1);
    assert_eq!(outcome.row_errors[0].row_index, 2);
    assert!(outcome.row_errors[0].message.contains("B is zero"));
    assert_eq!(outcome.data[2], rows(json!([{"id": 2, "B": 0}]))[0]);
    assert_eq!(outcome.data[3]["X"], 25);
}

#[tokio::test]
async fn test_identity_keeps_rows_in_place() {
    let data = json!([
        {"id": "a", "B": 5, "z": true},
        {"id": "b", "B": 6, "z": false},
        {"id": "c", "B": 7, "z": null}
    ]);
    let session = session(data);
    session.select_mapping("B → X").unwrap();

    let outcome = completed(&session, "fn transform(row) { row.B }", Backend::Native).await;

    let expected = rows(json!([
        {"id": "a", "X": 5, "z": true},
        {"id": "b", "X": 6, "z": false},
        {"id": "c", "X": 7, "z": null}
    ]));
    assert_eq!(outcome.data, expected);
}

#[tokio::test]
async fn test_stops_after_eleven_failures() {
    let data: Vec<Value> = (0..15).map(|i| json!({"B": i})).collect();
    let original = rows(Value::Array(data.clone()));
    let session = session(Value::Array(data));
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        r#"fn transform(row) { throw "nope"; }"#,
        Backend::Native,
    )
    .await;

    assert_eq!(outcome.stats.failed, 11);
    assert_eq!(outcome.stats.succeeded, 0);
    assert_eq!(outcome.data, original);
    assert_eq!(outcome.row_errors.last().unwrap().row_index, 10);
    assert!(outcome
        .console_lines
        .iter()
        .any(|line| line.text.contains("4 remaining")));
}

#[tokio::test]
async fn test_target_present_is_not_applicable() {
    let session = session(json!([{"B": 1, "X": 9}]));
    let selection = session.select_mapping("B → X").unwrap();
    assert!(!selection.applicable);

    let outcome = session
        .run_transform_with("fn transform(row) { 1 }", Backend::Native)
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::NotApplicable { .. }));
    assert_eq!(session.current_data(), session.original_data());
}

#[tokio::test]
async fn test_failed_compile_does_not_commit() {
    let session = session(json!([{"B": 1}]));
    session.select_mapping("B → X").unwrap();

    let err = session
        .run_transform_with("let x = 1;", Backend::Native)
        .await
        .unwrap_err();
    assert!(err.is_compilation());

    let err = session
        .run_transform_with("function transform(row", Backend::Embedded)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Sandbox(SandboxError::BackendNotReady(_))
    ));

    assert!(!session.undo_available());
    assert_eq!(session.current_data(), rows(json!([{"B": 1}])));
}

#[tokio::test]
async fn test_console_output_is_returned_in_order() {
    let session = session(json!([{"B": 1}, {"B": 2}]));
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        r#"
            log("compiled");
            fn transform(row) { info(`row ${row.B}`); row.B }
        "#,
        Backend::Native,
    )
    .await;

    let texts: Vec<&str> = outcome.console_lines.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["compiled", "row 1", "row 2"]);
}

#[tokio::test]
async fn test_reset_discards_commits() {
    let session = session(json!([{"B": 1}]));
    let mut events = session.subscribe();
    session.select_mapping("B → X").unwrap();
    completed(&session, "fn transform(row) { 2 }", Backend::Native).await;

    session.reset_to_original().unwrap();
    assert_eq!(session.current_data(), rows(json!([{"B": 1}])));
    assert!(!session.undo_available());

    let commit = events.recv().await.unwrap();
    let reset = events.recv().await.unwrap();
    assert_eq!(commit.reason, ChangeReason::Commit);
    assert_eq!(reset.reason, ChangeReason::Reset);
    assert_eq!(reset.data, session.original_data());
}

#[tokio::test]
async fn test_echoed_row_keeps_column_order() {
    let session = session(json!([{"A": 1, "B": 2, "C": 3}]));
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        r#"fn transform(row) { row.X = row.B * 10; row.remove("B"); row }"#,
        Backend::Native,
    )
    .await;

    assert_eq!(outcome.stats.failed, 0);
    let keys: Vec<&str> = outcome.data[0].keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["A", "X", "C"]);
    assert_eq!(outcome.data[0]["X"], 20);
}

#[tokio::test]
async fn test_dropped_run_keeps_session_busy() {
    let session = session(json!([{"B": 7}]));
    session.select_mapping("B → X").unwrap();
    let slow = r#"
        fn transform(row) {
            let n = 0;
            for i in 0..2000000 { n += 1; }
            row.B
        }
    "#;

    let first = tokio::time::timeout(
        Duration::from_millis(20),
        session.run_transform_with(slow, Backend::Native),
    )
    .await;
    assert!(first.is_err());
    assert!(session.is_running());

    let second = session
        .run_transform_with("fn transform(row) { 1 }", Backend::Native)
        .await;
    assert!(matches!(second, Err(EngineError::Busy)));

    while session.is_running() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(session.current_data(), rows(json!([{"B": 7}])));
    assert!(!session.undo_available());
    completed(&session, "fn transform(row) { 1 }", Backend::Native).await;
}

#[tokio::test]
async fn test_embedded_stops_after_eleven_failures() {
    let data: Vec<Value> = (0..15).map(|i| json!({"B": i})).collect();
    let original = rows(Value::Array(data.clone()));
    let session = session(Value::Array(data));
    ready_embedded(&session).await;
    session.select_mapping("B → X").unwrap();

    let outcome = completed(
        &session,
        r#"function transform(row) error("nope") end"#,
        Backend::Embedded,
    )
    .await;

    assert_eq!(outcome.stats.failed, 11);
    assert_eq!(outcome.stats.succeeded, 0);
    assert_eq!(outcome.data, original);
    assert!(outcome.row_errors[0].message.contains("nope"));
    assert!(outcome
        .console_lines
        .iter()
        .any(|line| line.text.contains("4 remaining")));
}

#[tokio::test]
async fn test_embedded_second_undo_is_a_no_op() {
    let session = session(json!([{"B": 4}]));
    ready_embedded(&session).await;
    session.select_mapping("B → X").unwrap();

    completed(
        &session,
        "function transform(row) return row.B * 2 end",
        Backend::Embedded,
    )
    .await;
    assert_eq!(session.current_data(), rows(json!([{"X": 8}])));

    assert_eq!(session.undo().unwrap(), UndoOutcome::Undone);
    let after_first = session.current_data();
    assert_eq!(session.undo().unwrap(), UndoOutcome::NothingToUndo);
    assert_eq!(session.current_data(), after_first);
    assert_eq!(session.current_data(), session.original_data());
    assert!(!session.undo_available());
}
