use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::args::SimConfig;
use crate::plan::{Action, Plan};

/// Draw a workload of roughly `config.steps` submissions.
pub(crate) fn generate_plan(config: &SimConfig, rng: &mut ChaCha8Rng) -> Plan {
    let mut plan = Plan::default();
    let mut submitted = 0;

    while submitted < config.steps {
        let roll = rng.random::<f64>();
        if roll < config.toggle_rate {
            plan.actions.push(if rng.random_bool(0.5) {
                Action::Serialize
            } else {
                Action::Parallelize
            });
        } else if roll < config.toggle_rate + config.scope_rate {
            let len = rng.random_range(1..=4);
            let actions: Vec<Action> = (0..len).map(|_| submission(config, rng)).collect();
            submitted += actions.len();
            plan.actions.push(Action::Scope {
                serialize: rng.random_bool(0.5),
                actions,
            });
        } else {
            plan.actions.push(submission(config, rng));
            submitted += 1;
        }
    }

    plan
}

fn submission(config: &SimConfig, rng: &mut ChaCha8Rng) -> Action {
    if rng.random::<f64>() < config.wait_rate {
        return Action::Wait;
    }
    Action::Request {
        exclusive: rng.random_bool(config.exclusive_rate),
        hold_us: rng.random_range(0..=config.max_hold_us),
    }
}
