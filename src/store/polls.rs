//! Poll-specific record rules: option normalisation and voting.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{find_index, generate_id, Record, ID, UPDATED_AT};

use super::dispatcher::{ActionOutcome, Applied};

pub const OPTIONS: &str = "options";
pub const TOTAL_VOTES: &str = "totalVotes";
pub const VOTED_USER_IDS: &str = "votedUserIds";
const VOTES: &str = "votes";
const STATUS: &str = "status";

/// Prepare a new poll: option ids and counts, an empty voter set and a matching total.
pub fn prepare_new(poll: &mut Record) {
    if let Some(Value::Array(options)) = poll.get_mut(OPTIONS) {
        for option in options.iter_mut().filter_map(Value::as_object_mut) {
            if option.get(ID).and_then(Value::as_str).map_or(true, str::is_empty) {
                option.insert(ID.to_string(), Value::String(generate_id()));
            }
            let votes = option.get(VOTES).and_then(Value::as_u64).unwrap_or(0);
            option.insert(VOTES.to_string(), json!(votes));
        }
    } else {
        poll.set(OPTIONS, Value::Array(Vec::new()));
    }

    if !matches!(poll.get(VOTED_USER_IDS), Some(Value::Array(_))) {
        poll.set(VOTED_USER_IDS, Value::Array(Vec::new()));
    }
    dedupe_voters(poll);
    recompute_total(poll);
}

/// Keep each voter id once, in first-seen order. Non-string entries are dropped.
pub fn dedupe_voters(poll: &mut Record) {
    match poll.get_mut(VOTED_USER_IDS) {
        Some(Value::Array(ids)) => {
            let mut seen = HashSet::new();
            ids.retain(|v| v.as_str().is_some_and(|id| seen.insert(id.to_string())));
        }
        Some(_) => poll.set(VOTED_USER_IDS, Value::Array(Vec::new())),
        None => {}
    }
}

/// Sum of `options[].votes`.
pub fn option_vote_sum(poll: &Record) -> u64 {
    poll.get(OPTIONS)
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|o| o.get(VOTES).and_then(Value::as_u64))
                .sum()
        })
        .unwrap_or(0)
}

/// Restore `totalVotes == sum(options[].votes)`.
pub fn recompute_total(poll: &mut Record) {
    let total = option_vote_sum(poll);
    poll.set(TOTAL_VOTES, total);
}

fn has_voted(poll: &Record, voter_id: &str) -> bool {
    poll.get(VOTED_USER_IDS)
        .and_then(Value::as_array)
        .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(voter_id)))
}

/// Cast one vote for `option_id`. A voter id, when given, may vote once per poll.
pub fn vote(
    polls: &mut [Record],
    id: &str,
    option_id: &str,
    voter_id: Option<&str>,
) -> Result<Applied, AppError> {
    let index =
        find_index(polls, id).ok_or_else(|| AppError::NotFound(format!("Poll {} not found", id)))?;
    let poll = &mut polls[index];

    if let Some(voter) = voter_id {
        if has_voted(poll, voter) {
            return Err(AppError::AlreadyVoted(format!(
                "{} has already voted on poll {}",
                voter, id
            )));
        }
    }

    let option = poll
        .get_mut(OPTIONS)
        .and_then(Value::as_array_mut)
        .and_then(|options| {
            options
                .iter_mut()
                .find(|o| o.get(ID).and_then(Value::as_str) == Some(option_id))
        })
        .and_then(Value::as_object_mut)
        .ok_or_else(|| {
            AppError::OptionNotFound(format!("Option {} not found in poll {}", option_id, id))
        })?;

    let votes = option.get(VOTES).and_then(Value::as_u64).unwrap_or(0);
    option.insert(VOTES.to_string(), json!(votes + 1));

    if let Some(voter) = voter_id {
        match poll.get_mut(VOTED_USER_IDS) {
            Some(Value::Array(ids)) => ids.push(Value::String(voter.to_string())),
            _ => poll.set(VOTED_USER_IDS, json!([voter])),
        }
    }
    recompute_total(poll);

    Ok(Applied::changed(ActionOutcome::Done))
}

/// Set the poll's `status` field.
pub fn update_status(
    polls: &mut [Record],
    id: &str,
    status: Value,
    now: &str,
) -> Result<Applied, AppError> {
    let index =
        find_index(polls, id).ok_or_else(|| AppError::NotFound(format!("Poll {} not found", id)))?;
    let poll = &mut polls[index];
    poll.set(STATUS, status);
    poll.set(UPDATED_AT, now);

    Ok(Applied::changed(ActionOutcome::Record(poll.clone())))
}
