//! Channel and live-link rules: upsert by url, single default, flag toggles, match votes.

use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::{find_index, upsert_by_predicate, Placement, Record, Team, UPDATED_AT};

use super::dispatcher::{ActionOutcome, Applied};
use super::polls::VOTED_USER_IDS;

pub const IS_DEFAULT: &str = "isDefault";
/// Secondary natural key for channel upserts.
pub const URL: &str = "url";
const POLL: &str = "poll";

/// Update the channel matching by id or url, else create it.
pub fn upsert(channels: &mut Vec<Record>, channel: Record, now: &str) -> Applied {
    let id = channel.id().map(str::to_string);
    let url = channel.get_str(URL).map(str::to_string);

    let upserted = upsert_by_predicate(
        channels,
        |existing| {
            let same_id = id.is_some() && existing.id() == id.as_deref();
            let same_url = url.is_some() && existing.get_str(URL) == url.as_deref();
            same_id || same_url
        },
        channel,
        Placement::Prepend,
        now,
    );
    keep_single_default(channels, upserted.index);

    Applied::changed(ActionOutcome::Record(channels[upserted.index].clone()))
}

/// Make `id` the only default. A missing target changes nothing.
pub fn set_default(records: &mut [Record], id: &str) -> Applied {
    if find_index(records, id).is_none() {
        tracing::debug!("setDefault target {} not found; nothing to do", id);
        return Applied::unchanged(ActionOutcome::Done);
    }

    for record in records.iter_mut() {
        let is_target = record.id() == Some(id);
        record.set(IS_DEFAULT, is_target);
    }

    Applied::changed(ActionOutcome::Done)
}

/// When the record at `index` is the default, clear `isDefault` everywhere else.
pub fn keep_single_default(records: &mut [Record], index: usize) {
    if !records.get(index).is_some_and(|r| r.flag(IS_DEFAULT)) {
        return;
    }

    for (i, record) in records.iter_mut().enumerate() {
        if i != index && record.flag(IS_DEFAULT) {
            record.set(IS_DEFAULT, false);
        }
    }
}

/// Invert a boolean field on the target. Absent counts as false.
pub fn toggle_flag(
    records: &mut [Record],
    id: &str,
    flag: &str,
    now: &str,
) -> Result<Applied, AppError> {
    let index = find_index(records, id)
        .ok_or_else(|| AppError::NotFound(format!("Channel {} not found", id)))?;
    let record = &mut records[index];

    let current = record.flag(flag);
    record.set(flag, !current);
    record.set(UPDATED_AT, now);

    Ok(Applied::changed(ActionOutcome::Record(record.clone())))
}

/// Record a vote for one side of the match poll attached to a live link.
pub fn team_vote(
    links: &mut [Record],
    id: &str,
    team: Team,
    voter_id: &str,
) -> Result<Applied, AppError> {
    let index = find_index(links, id)
        .ok_or_else(|| AppError::NotFound(format!("Live link {} not found", id)))?;
    let link = &mut links[index];

    let poll = link
        .get_mut(POLL)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| AppError::Validation(format!("No poll associated with link {}", id)))?;

    let voters = poll
        .entry(VOTED_USER_IDS)
        .or_insert_with(|| Value::Array(Vec::new()));
    if !voters.is_array() {
        *voters = Value::Array(Vec::new());
    }
    if voters
        .as_array()
        .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(voter_id)))
    {
        return Err(AppError::AlreadyVoted(format!(
            "{} has already voted on link {}",
            voter_id, id
        )));
    }
    if let Some(ids) = voters.as_array_mut() {
        ids.push(Value::String(voter_id.to_string()));
    }

    let field = team.votes_field();
    let votes = poll.get(field).and_then(Value::as_u64).unwrap_or(0);
    poll.insert(field.to_string(), json!(votes + 1));

    Ok(Applied::changed(ActionOutcome::Record(link.clone())))
}
