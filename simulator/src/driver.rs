use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use sqlite_scheduler::{Database, DatabaseOptions, Reply};
use tokio::task::JoinHandle;

use crate::oracle::{Mark, Oracle, Submitted};
use crate::plan::{Action, Plan};

type Marks = Arc<Mutex<Vec<Mark>>>;

fn push(marks: &Marks, mark: Mark) {
    marks.lock().unwrap_or_else(PoisonError::into_inner).push(mark);
}

/// Submits a plan's actions in order and remembers what it handed out.
struct Submitter<'a> {
    db: &'a Database,
    marks: Marks,
    submitted: Vec<Submitted>,
    replies: Vec<Reply<()>>,
    waits: Vec<JoinHandle<Result<(), String>>>,
}

impl Submitter<'_> {
    fn submit_all(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::Request { exclusive, hold_us } => self.request(*exclusive, *hold_us),
                Action::Wait => self.wait(),
                Action::Serialize => self.db.serialize(),
                Action::Parallelize => self.db.parallelize(),
                Action::Scope { serialize, actions } => {
                    let db = self.db;
                    if *serialize {
                        db.serialized(|| self.submit_all(actions));
                    } else {
                        db.parallelized(|| self.submit_all(actions));
                    }
                }
            }
        }
    }

    fn request(&mut self, exclusive: bool, hold_us: u64) {
        let id = self.submitted.len();
        self.submitted.push(Submitted::Request {
            exclusive: exclusive || self.db.is_serialized(),
        });
        let marks = Arc::clone(&self.marks);
        self.replies.push(self.db.schedule(exclusive, move |_conn| {
            push(&marks, Mark::Start(id));
            if hold_us > 0 {
                std::thread::sleep(Duration::from_micros(hold_us));
            }
            push(&marks, Mark::End(id));
            Ok(())
        }));
    }

    fn wait(&mut self) {
        let id = self.submitted.len();
        self.submitted.push(Submitted::Wait);
        let marks = Arc::clone(&self.marks);
        let reply = self.db.wait();
        self.waits.push(tokio::spawn(async move {
            reply.await.map_err(|err| format!("wait {id} failed: {err}"))?;
            push(&marks, Mark::WaitDone(id));
            Ok(())
        }));
    }
}

/// Outcome of one plan run, for the iteration log.
pub(crate) struct RunSummary {
    pub(crate) submissions: usize,
    pub(crate) marks: usize,
}

/// Run `plan` against a fresh in-memory database and check the oracle.
pub(crate) async fn run_plan(plan: &Plan) -> Result<RunSummary, String> {
    let db = Database::connect(DatabaseOptions::new(":memory:"))
        .await
        .map_err(|err| format!("open failed: {err}"))?;

    let mut submitter = Submitter {
        db: &db,
        marks: Marks::default(),
        submitted: Vec::with_capacity(plan.submissions()),
        replies: Vec::new(),
        waits: Vec::new(),
    };
    submitter.submit_all(&plan.actions);
    let Submitter {
        marks,
        submitted,
        replies,
        waits,
        ..
    } = submitter;

    for reply in replies {
        reply.await.map_err(|err| format!("request failed: {err}"))?;
    }
    for wait in waits {
        wait.await.map_err(|err| format!("wait task failed: {err}"))??;
    }
    db.close().await.map_err(|err| format!("close failed: {err}"))?;

    let marks = marks.lock().unwrap_or_else(PoisonError::into_inner).clone();
    Oracle::check(&submitted, &marks)?;
    tracing::debug!(submissions = submitted.len(), marks = marks.len(), "plan passed");
    Ok(RunSummary {
        submissions: submitted.len(),
        marks: marks.len(),
    })
}
