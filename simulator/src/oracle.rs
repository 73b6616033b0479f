/// What the driver observed while a plan ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mark {
    Start(usize),
    End(usize),
    WaitDone(usize),
}

/// One submission, with the exclusivity it was admitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submitted {
    Request { exclusive: bool },
    Wait,
}

pub(crate) struct Oracle;

impl Oracle {
    /// Check mutual exclusion, FIFO among exclusive requests, the barrier
    /// property and that waits resolve after everything before them.
    pub(crate) fn check(submitted: &[Submitted], marks: &[Mark]) -> Result<(), String> {
        let body: Vec<Mark> = marks
            .iter()
            .copied()
            .filter(|mark| !matches!(mark, Mark::WaitDone(_)))
            .collect();
        let at = |list: &[Mark], mark: Mark| {
            list.iter()
                .position(|seen| *seen == mark)
                .ok_or_else(|| format!("{mark:?} was never recorded"))
        };

        for (id, entry) in submitted.iter().enumerate() {
            match entry {
                Submitted::Request { exclusive } => {
                    let start = at(&body, Mark::Start(id))?;
                    let end = at(&body, Mark::End(id))?;
                    if end < start {
                        return Err(format!("request {id} ended before it started"));
                    }
                    if !exclusive {
                        continue;
                    }
                    if end != start + 1 {
                        return Err(format!("exclusive request {id} overlapped other work"));
                    }
                    for (earlier, prior) in submitted[..id].iter().enumerate() {
                        if matches!(prior, Submitted::Request { .. })
                            && at(&body, Mark::End(earlier))? > start
                        {
                            return Err(format!("request {earlier} still running when {id} started"));
                        }
                    }
                    for (offset, next) in submitted[id + 1..].iter().enumerate() {
                        let later = id + 1 + offset;
                        if matches!(next, Submitted::Request { .. })
                            && at(&body, Mark::Start(later))? < end
                        {
                            return Err(format!("request {later} overtook exclusive request {id}"));
                        }
                    }
                }
                Submitted::Wait => {
                    let done = at(marks, Mark::WaitDone(id))?;
                    for (earlier, prior) in submitted[..id].iter().enumerate() {
                        if matches!(prior, Submitted::Request { .. })
                            && at(marks, Mark::End(earlier))? > done
                        {
                            return Err(format!("wait {id} resolved before request {earlier}"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
