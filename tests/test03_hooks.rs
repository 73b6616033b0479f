use serde_json::json;
use sqlite_scheduler::{
    ChangeKind, Database, DatabaseEvent, DatabaseOptions, EVENT_BACKLOG, RowChange,
    SchedulerDbError,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<DatabaseEvent>) -> Vec<DatabaseEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    seen
}

async fn open() -> Result<(Database, UnboundedReceiver<DatabaseEvent>), SchedulerDbError> {
    let db = Database::connect(DatabaseOptions::new(":memory:")).await?;
    let mut events = db.events().expect("event stream");
    assert_eq!(drain(&mut events), vec![DatabaseEvent::Open]);
    Ok((db, events))
}

#[tokio::test(flavor = "current_thread")]
async fn trace_toggles_on_and_off() -> Result<(), SchedulerDbError> {
    let (db, mut events) = open().await?;

    db.configure("trace", json!(true))?;
    db.exec("CREATE TABLE t(x)").await?;
    let traced: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DatabaseEvent::Trace(sql) => Some(sql),
            _ => None,
        })
        .collect();
    assert!(
        traced.iter().any(|sql| sql.contains("CREATE TABLE t(x)")),
        "{traced:?}"
    );

    // A second registration removes the bridge.
    db.configure("trace", json!(true))?;
    db.exec("INSERT INTO t VALUES (1)").await?;
    db.wait().await?;
    assert!(drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn events_without_a_listener_are_not_retained() -> Result<(), SchedulerDbError> {
    let db = Database::connect(DatabaseOptions::new(":memory:")).await?;
    db.configure("trace", json!(true))?;
    db.exec("CREATE TABLE t(x)").await?;
    for n in 0..500_i64 {
        db.run("INSERT INTO t VALUES (?1)", vec![n.into()]).await?;
    }

    let mut events = db.events().expect("event stream");
    let held = drain(&mut events);
    assert_eq!(held.len(), EVENT_BACKLOG);
    assert_eq!(held[0], DatabaseEvent::Open);

    // Once taken, the stream gets everything.
    db.run("INSERT INTO t VALUES (-1)", Vec::new()).await?;
    let traced = drain(&mut events);
    assert!(
        traced
            .iter()
            .any(|event| matches!(event, DatabaseEvent::Trace(sql) if sql.contains("-1"))),
        "{traced:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn profile_reports_statement_timing() -> Result<(), SchedulerDbError> {
    let (db, mut events) = open().await?;

    db.configure("profile", json!(null))?;
    db.exec("CREATE TABLE t(x)").await?;
    db.run("INSERT INTO t VALUES (?1)", vec![1_i64.into()]).await?;

    let profiled: Vec<(String, f64)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            DatabaseEvent::Profile { sql, millis } => Some((sql, millis)),
            _ => None,
        })
        .collect();
    assert!(profiled.iter().any(|(sql, _)| sql.contains("CREATE TABLE")), "{profiled:?}");
    assert!(profiled.iter().any(|(sql, _)| sql.contains("INSERT INTO t")), "{profiled:?}");
    assert!(profiled.iter().all(|(_, millis)| *millis >= 0.0));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn row_changes_are_named() -> Result<(), SchedulerDbError> {
    let (db, mut events) = open().await?;
    db.exec("CREATE TABLE t(x)").await?;

    assert!(db.watch_changes().await?);
    db.run("INSERT INTO t VALUES (1)", Vec::new()).await?;
    db.run("UPDATE t SET x = 2", Vec::new()).await?;
    db.run("DELETE FROM t", Vec::new()).await?;

    let seen = drain(&mut events);
    let names: Vec<&str> = seen.iter().map(DatabaseEvent::name).collect();
    assert_eq!(names, vec!["insert", "update", "delete"]);
    assert_eq!(
        seen[0],
        DatabaseEvent::Change(RowChange {
            kind: ChangeKind::Insert,
            database: "main".into(),
            table: "t".into(),
            row_id: 1,
        })
    );

    assert!(!db.watch_changes().await?);
    db.run("INSERT INTO t VALUES (3)", Vec::new()).await?;
    assert!(drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn close_removes_every_hook() -> Result<(), SchedulerDbError> {
    let (db, mut events) = open().await?;
    db.configure("trace", json!(true))?;
    db.configure("profile", json!(true))?;
    assert!(db.watch_changes().await?);

    db.close().await?;
    assert_eq!(drain(&mut events), vec![DatabaseEvent::Close(None)]);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn bad_configuration_fails_at_the_call() -> Result<(), SchedulerDbError> {
    let (db, mut events) = open().await?;

    let err = db.configure("cache", json!(1)).unwrap_err();
    assert_eq!(
        err,
        SchedulerDbError::InvalidArgument("cache is not a valid configuration option".into())
    );
    let err = db.configure("busyTimeout", json!("soon")).unwrap_err();
    assert_eq!(err, SchedulerDbError::InvalidArgument("Value must be an integer".into()));

    db.configure("busyTimeout", json!(250))?;
    db.wait().await?;
    assert!(drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn missing_extension_is_an_engine_error() -> Result<(), SchedulerDbError> {
    let (db, _events) = open().await?;
    let dir = tempfile::tempdir().map_err(|e| SchedulerDbError::ExecutionError(e.to_string()))?;

    let err = db
        .load_extension(dir.path().join("no_such_extension"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerDbError::Engine { .. }), "{err:?}");

    // Extension loading is switched off again and the connection stays usable.
    db.exec("CREATE TABLE t(x)").await?;
    let err = db
        .query("SELECT load_extension('anything')", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerDbError::Engine { .. }), "{err:?}");
    Ok(())
}
