use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use sqlite_scheduler::{Database, DatabaseEvent, DatabaseOptions, Request, SchedulerDbError};

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

fn position(log: &[String], entry: &str) -> usize {
    log.iter()
        .position(|seen| seen == entry)
        .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
}

async fn memory_db() -> Result<Database, SchedulerDbError> {
    Database::connect(DatabaseOptions::new(":memory:")).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exclusive_request_is_a_barrier() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let log: Log = Arc::default();

    let mut replies = Vec::new();
    for (name, exclusive, pause) in [("x", false, 30), ("y", false, 5), ("e", true, 5), ("z", false, 0)] {
        let log = Arc::clone(&log);
        replies.push(db.schedule(exclusive, move |_conn| {
            record(&log, format!("{name}:start"));
            thread::sleep(Duration::from_millis(pause));
            record(&log, format!("{name}:end"));
            Ok(())
        }));
    }
    for reply in replies {
        reply.await?;
    }

    let log = log.lock().unwrap().clone();
    let e_start = position(&log, "e:start");
    let e_end = position(&log, "e:end");
    assert!(position(&log, "x:end") < e_start, "{log:?}");
    assert!(position(&log, "y:end") < e_start, "{log:?}");
    assert!(e_end < position(&log, "z:start"), "{log:?}");
    Ok(())
}

// `wait` needs no connection, so an early dispatch shows up as an early reply
// even though statement bodies queue on the connection.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exclusive_request_waits_for_running_statements() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let (release, gate) = std_mpsc::channel::<()>();

    let running = db.schedule(false, move |_conn| {
        let _ = gate.recv();
        Ok(())
    });
    let mut barrier = db.wait();
    let after = db.query("SELECT 1", Vec::new());

    let early = tokio::time::timeout(Duration::from_millis(100), &mut barrier).await;
    assert!(early.is_err(), "barrier resolved while a statement was running");

    release.send(()).unwrap();
    running.await?;
    barrier.await?;
    assert_eq!(after.await?.len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exclusive_requests_run_in_submission_order() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let replies: Vec<_> = (0..16)
        .map(|n| {
            let order = Arc::clone(&order);
            db.schedule(true, move |_conn| {
                order.lock().unwrap().push(n);
                Ok(n)
            })
        })
        .collect();
    for (n, reply) in replies.into_iter().enumerate() {
        assert_eq!(reply.await?, n);
    }
    assert_eq!(*order.lock().unwrap(), (0..16).collect::<Vec<_>>());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exec_reads_then_close() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let log: Log = Arc::default();

    let exec = {
        let log = Arc::clone(&log);
        db.schedule(true, move |conn| {
            record(&log, "exec:start");
            conn.execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (1), (2);")?;
            record(&log, "exec:end");
            Ok(())
        })
    };
    let reads: Vec<_> = ["r1", "r2"]
        .into_iter()
        .map(|name| {
            let log = Arc::clone(&log);
            db.schedule(false, move |conn| {
                record(&log, format!("{name}:start"));
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?;
                record(&log, format!("{name}:end"));
                Ok(count)
            })
        })
        .collect();
    let closed = {
        let log = Arc::clone(&log);
        let close = db.close();
        async move {
            let outcome = close.await;
            record(&log, "close:done");
            outcome
        }
    };

    exec.await?;
    for read in reads {
        assert_eq!(read.await?, 2);
    }
    closed.await?;

    let log = log.lock().unwrap().clone();
    let exec_end = position(&log, "exec:end");
    assert!(exec_end < position(&log, "r1:start"), "{log:?}");
    assert!(exec_end < position(&log, "r2:start"), "{log:?}");
    assert!(position(&log, "r1:end") < position(&log, "close:done"));
    assert!(position(&log, "r2:end") < position(&log, "close:done"));

    let err = db.schedule(false, |_conn| Ok(())).await.unwrap_err();
    assert!(err.is_closed());
    Ok(())
}

/// Parks the connection on an exclusive request until the returned sender fires.
fn hold_connection(db: &Database) -> std_mpsc::Sender<()> {
    let (release, gate) = std_mpsc::channel::<()>();
    db.submit(Request::new(true, move |_conn| {
        let _ = gate.recv();
        Ok(())
    }));
    release
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_fails_every_request_queued_behind_it() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let failures = Arc::new(Mutex::new(Vec::new()));

    let release = hold_connection(&db);
    let close = db.close();
    for _ in 0..3 {
        let failures = Arc::clone(&failures);
        db.submit(Request::with_callback(
            false,
            |_conn| Ok(()),
            move |outcome: Result<(), SchedulerDbError>| {
                failures.lock().unwrap().push(outcome.unwrap_err());
            },
        ));
    }
    release.send(()).unwrap();

    close.await?;
    assert!(db.wait().await.unwrap_err().is_closed());

    let failures = failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 3);
    for err in failures {
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "Database handle is closed");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stranded_requests_without_callbacks_raise_one_error() -> Result<(), SchedulerDbError> {
    let db = memory_db().await?;
    let mut events = db.events().expect("event stream");

    let release = hold_connection(&db);
    let close = db.close();
    for _ in 0..3 {
        db.submit(Request::new(false, |_conn| Ok(())));
    }
    release.send(()).unwrap();
    close.await?;
    assert!(db.wait().await.unwrap_err().is_closed());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    let errors: Vec<_> = seen
        .iter()
        .filter(|event| matches!(event, DatabaseEvent::Error(_)))
        .collect();
    assert_eq!(errors.len(), 1, "{seen:?}");
    assert_eq!(
        errors[0],
        &DatabaseEvent::Error(SchedulerDbError::ResourceClosed(
            "Database handle is closed".into()
        ))
    );
    Ok(())
}
