use tracing::{debug, error, info};

use crate::accessor::RecordAccessor;
use crate::commands::batch_result;
use crate::commands::records::schema_cache;
use crate::config::Config;
use crate::error::Result;
use crate::output::{self, Format};
use crate::tracker::Tracker;

#[derive(Debug, Clone)]
pub struct TransitionArgs {
    /// Transition name, e.g. `Close`.
    pub to: String,
    pub resolution: Option<String>,
    pub comment: Option<String>,
    pub target: Option<String>,
}

pub fn run(
    tracker: &dyn Tracker,
    config: &Config,
    keys: &[String],
    args: &TransitionArgs,
    format: Format,
) -> Result<()> {
    let cache = schema_cache(tracker, config);
    let mut accessor =
        RecordAccessor::new(tracker, &cache).with_resolution_field(&config.tracker.resolution_field);

    let mut succeeded = 0;
    for key in keys {
        let ok = transition_one(&mut accessor, key, args);
        let detail = accessor.status().map(|s| s.name.clone()).unwrap_or_default();
        if ok {
            succeeded += 1;
        } else {
            error!(key = %key, transition = %args.to, "failed to transition");
        }
        output::print_step(key, ok, &detail, format)?;
    }
    output::print_tally(succeeded, keys.len(), "records", format)?;
    batch_result(succeeded, keys.len())
}

fn transition_one(accessor: &mut RecordAccessor<'_>, key: &str, args: &TransitionArgs) -> bool {
    if !accessor.fetch(key) || !accessor.transitions() {
        return false;
    }
    let from = accessor.status().map(|s| s.name.clone()).unwrap_or_default();
    let Some(t_id) = accessor.transition_id(&args.to) else {
        return false;
    };
    let r_id = match &args.resolution {
        Some(resolution) => match accessor.resolution_id(&t_id, resolution) {
            Some(id) => Some(id),
            None => return false,
        },
        None => None,
    };
    debug!(key, from = %from, transition = %t_id, resolution = ?r_id);
    let ok = accessor.transition(
        &t_id,
        r_id.as_deref(),
        args.comment.as_deref(),
        args.target.as_deref(),
    );
    if ok {
        info!(key, from = %from, to = %args.to, "moved");
    }
    ok
}
