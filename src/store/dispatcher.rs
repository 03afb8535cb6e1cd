//! Action dispatcher.
//!
//! Each dispatch is one `load`, an in-memory mutation, and at most one `save`. There is no
//! lock around that cycle: under last-write-wins two overlapping dispatches against the same
//! collection can lose one writer's change. Optimistic mode turns that into a `Conflict`.

use crate::errors::AppError;
use crate::models::{
    apply_patch, find_index, insert, remove_by_id, stamp_new, timestamp_now, Action,
    CollectionKind, Record,
};

use super::repository::CollectionRepository;
use super::{channels, polls};

const KEYWORD_NAME: &str = "name";
const COUNT: &str = "count";

/// What an action returns to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// The created or modified record
    Record(Record),
    /// Success flag only
    Done,
}

impl ActionOutcome {
    pub fn into_record(self) -> Option<Record> {
        match self {
            ActionOutcome::Record(record) => Some(record),
            ActionOutcome::Done => None,
        }
    }
}

/// Result of applying an action in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub outcome: ActionOutcome,
    /// Whether the collection must be written back
    pub changed: bool,
}

impl Applied {
    pub fn changed(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            changed: true,
        }
    }

    pub fn unchanged(outcome: ActionOutcome) -> Self {
        Self {
            outcome,
            changed: false,
        }
    }
}

/// Routes actions to their collection's rules and persists the result.
#[derive(Clone)]
pub struct Dispatcher {
    repo: CollectionRepository,
}

impl Dispatcher {
    pub fn new(repo: CollectionRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &CollectionRepository {
        &self.repo
    }

    /// Current records of a collection.
    pub async fn list(&self, kind: CollectionKind) -> Vec<Record> {
        self.repo.get(kind).await
    }

    /// Run one action against a collection.
    pub async fn dispatch(
        &self,
        kind: CollectionKind,
        action: Action,
    ) -> Result<ActionOutcome, AppError> {
        let action_name = action.name();
        let target = action.target_id().map(str::to_string);

        let mut snapshot = self.repo.load(kind).await;
        let applied = apply(kind, &mut snapshot.records, action, &timestamp_now())?;

        if applied.changed {
            self.repo.save_snapshot(kind, &snapshot).await?;
        }

        tracing::info!(
            collection = %kind,
            action = action_name,
            id = target.as_deref().unwrap_or("-"),
            changed = applied.changed,
            "Applied action"
        );

        Ok(applied.outcome)
    }
}

/// Apply an action to an in-memory collection.
///
/// On error the records are left as they were.
pub fn apply(
    kind: CollectionKind,
    records: &mut Vec<Record>,
    action: Action,
    now: &str,
) -> Result<Applied, AppError> {
    if !kind.supports(&action) {
        return Err(AppError::InvalidAction(format!(
            "Invalid action for {}: {}",
            kind,
            action.name()
        )));
    }

    match action {
        Action::Create(record) if kind == CollectionKind::Channels => {
            Ok(channels::upsert(records, record, now))
        }
        Action::Create(record) => create(kind, records, record, now),
        Action::Update { id, patch } => update(kind, records, &id, patch, now),
        Action::Delete { id } => {
            if remove_by_id(records, &id) {
                Ok(Applied::changed(ActionOutcome::Done))
            } else {
                tracing::debug!("Delete of missing {} {}; nothing to do", kind, id);
                Ok(Applied::unchanged(ActionOutcome::Done))
            }
        }
        Action::Upsert(record) => Ok(channels::upsert(records, record, now)),
        Action::Vote {
            id,
            option_id,
            voter_id,
        } => polls::vote(records, &id, &option_id, voter_id.as_deref()),
        Action::UpdateStatus { id, status } => polls::update_status(records, &id, status, now),
        Action::SetDefault { id } => Ok(channels::set_default(records, &id)),
        Action::ToggleFlag { id, flag } => channels::toggle_flag(records, &id, &flag, now),
        Action::TeamVote { id, team, voter_id } => {
            channels::team_vote(records, &id, team, &voter_id)
        }
    }
}

fn create(
    kind: CollectionKind,
    records: &mut Vec<Record>,
    mut record: Record,
    now: &str,
) -> Result<Applied, AppError> {
    if let Some(id) = record.id().filter(|id| !id.is_empty()) {
        if find_index(records, id).is_some() {
            return Err(AppError::Conflict(format!(
                "{} already contains a record with id {}",
                kind, id
            )));
        }
    }

    match kind {
        CollectionKind::Polls => polls::prepare_new(&mut record),
        CollectionKind::Categories => {
            if !record.contains(COUNT) {
                record.set(COUNT, 0);
            }
        }
        CollectionKind::Keywords => prepare_keyword(records, &mut record)?,
        CollectionKind::Posts
        | CollectionKind::Highlights
        | CollectionKind::Channels
        | CollectionKind::LiveLinks => {}
    }

    stamp_new(&mut record, now);
    let index = insert(records, record, kind.placement());
    if has_default(kind) {
        channels::keep_single_default(records, index);
    }
    Ok(Applied::changed(ActionOutcome::Record(records[index].clone())))
}

/// Keywords are stored trimmed and lower-cased, unique by name.
fn prepare_keyword(existing: &[Record], record: &mut Record) -> Result<(), AppError> {
    let name = record
        .get_str(KEYWORD_NAME)
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("Keyword name is required".to_string()))?;

    let taken = existing.iter().any(|k| {
        k.get_str(KEYWORD_NAME)
            .is_some_and(|other| other.to_lowercase() == name)
    });
    if taken {
        return Err(AppError::Validation(format!(
            "Keyword {} already exists",
            name
        )));
    }

    record.set(KEYWORD_NAME, name);
    record.set(COUNT, 1);
    Ok(())
}

fn update(
    kind: CollectionKind,
    records: &mut [Record],
    id: &str,
    patch: Record,
    now: &str,
) -> Result<Applied, AppError> {
    let index = find_index(records, id)
        .ok_or_else(|| AppError::NotFound(format!("Record {} not found in {}", id, kind)))?;

    apply_patch(&mut records[index], patch, now);
    if kind == CollectionKind::Polls {
        polls::dedupe_voters(&mut records[index]);
        polls::recompute_total(&mut records[index]);
    } else if has_default(kind) {
        channels::keep_single_default(records, index);
    }

    Ok(Applied::changed(ActionOutcome::Record(records[index].clone())))
}

/// Kinds where at most one record carries `isDefault`.
fn has_default(kind: CollectionKind) -> bool {
    matches!(kind, CollectionKind::Channels | CollectionKind::LiveLinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CREATED_AT, UPDATED_AT};
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    const T0: &str = "2024-01-01T00:00:00.000Z";
    const T1: &str = "2024-01-01T00:00:01.000Z";

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn created(applied: Applied) -> Record {
        applied.outcome.into_record().unwrap()
    }

    #[test]
    fn test_create_update_delete_scenario() {
        let mut posts = Vec::new();
        let post = created(
            apply(
                CollectionKind::Posts,
                &mut posts,
                Action::Create(record(json!({"title": "X"}))),
                T0,
            )
            .unwrap(),
        );
        let id = post.id().unwrap().to_string();
        assert_eq!(post.get_str(CREATED_AT), post.get_str(UPDATED_AT));

        let updated = created(
            apply(
                CollectionKind::Posts,
                &mut posts,
                Action::Update {
                    id: id.clone(),
                    patch: record(json!({"title": "Y"})),
                },
                T1,
            )
            .unwrap(),
        );
        assert_eq!(updated.get_str("title"), Some("Y"));
        assert_eq!(updated.get_str(CREATED_AT), Some(T0));
        assert_eq!(updated.get_str(UPDATED_AT), Some(T1));

        let deleted = apply(
            CollectionKind::Posts,
            &mut posts,
            Action::Delete { id: id.clone() },
            T1,
        )
        .unwrap();
        assert!(deleted.changed);
        assert!(posts.is_empty());
    }

    #[test]
    fn test_delete_missing_is_unchanged_success() {
        let mut posts = vec![record(json!({"id": "a"}))];
        let applied = apply(
            CollectionKind::Posts,
            &mut posts,
            Action::Delete { id: "zzz".into() },
            T0,
        )
        .unwrap();
        assert!(!applied.changed);
        assert_eq!(applied.outcome, ActionOutcome::Done);
        assert_eq!(posts.len(), 1);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut posts = Vec::new();
        let err = apply(
            CollectionKind::Posts,
            &mut posts,
            Action::Update {
                id: "a".into(),
                patch: Record::new(),
            },
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_create_with_taken_id_conflicts() {
        let mut posts = vec![record(json!({"id": "a"}))];
        let err = apply(
            CollectionKind::Posts,
            &mut posts,
            Action::Create(record(json!({"id": "a"}))),
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_placement() {
        let mut categories = vec![record(json!({"id": "first"}))];
        apply(
            CollectionKind::Categories,
            &mut categories,
            Action::Create(record(json!({"name": "News"}))),
            T0,
        )
        .unwrap();
        assert_eq!(categories[0].id(), Some("first"));
        assert_eq!(categories[1].get("count"), Some(&json!(0)));

        let mut highlights = vec![record(json!({"id": "first"}))];
        apply(
            CollectionKind::Highlights,
            &mut highlights,
            Action::Create(record(json!({"title": "Hot"}))),
            T0,
        )
        .unwrap();
        assert_eq!(highlights[1].id(), Some("first"));
    }

    #[test]
    fn test_keyword_create_normalises_and_rejects_duplicates() {
        let mut keywords = Vec::new();
        let keyword = created(
            apply(
                CollectionKind::Keywords,
                &mut keywords,
                Action::Create(record(json!({"name": "  Rust "}))),
                T0,
            )
            .unwrap(),
        );
        assert_eq!(keyword.get_str("name"), Some("rust"));
        assert_eq!(keyword.get("count"), Some(&json!(1)));

        let err = apply(
            CollectionKind::Keywords,
            &mut keywords,
            Action::Create(record(json!({"name": "RUST"}))),
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let empty = apply(
            CollectionKind::Keywords,
            &mut keywords,
            Action::Create(record(json!({"name": "   "}))),
            T0,
        );
        assert!(matches!(empty, Err(AppError::Validation(_))));
        assert_eq!(keywords.len(), 1);
    }

    #[test]
    fn test_channel_create_is_upsert() {
        let mut channels = vec![record(json!({"id": "c1", "url": "http://a"}))];
        apply(
            CollectionKind::Channels,
            &mut channels,
            Action::Create(record(json!({"url": "http://a", "name": "A"}))),
            T0,
        )
        .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].get_str("name"), Some("A"));
    }

    #[test]
    fn test_poll_update_keeps_total_consistent() {
        let mut polls = Vec::new();
        let poll = created(
            apply(
                CollectionKind::Polls,
                &mut polls,
                Action::Create(record(json!({
                    "question": "Q",
                    "options": [{"id": "a", "text": "A"}]
                }))),
                T0,
            )
            .unwrap(),
        );
        let id = poll.id().unwrap().to_string();

        let updated = created(
            apply(
                CollectionKind::Polls,
                &mut polls,
                Action::Update {
                    id,
                    patch: record(json!({
                        "options": [{"id": "a", "votes": 3}, {"id": "b", "votes": 4}],
                        "totalVotes": 1
                    })),
                },
                T1,
            )
            .unwrap(),
        );
        assert_eq!(updated.get("totalVotes"), Some(&json!(7)));
    }

    #[test]
    fn test_poll_update_dedupes_voters() {
        let mut polls = vec![record(json!({
            "id": "p",
            "options": [],
            "totalVotes": 0,
            "votedUserIds": ["u1"]
        }))];
        let updated = created(
            apply(
                CollectionKind::Polls,
                &mut polls,
                Action::Update {
                    id: "p".into(),
                    patch: record(json!({"votedUserIds": ["u2", "u2", "u1", "u2"]})),
                },
                T1,
            )
            .unwrap(),
        );
        assert_eq!(updated.get("votedUserIds"), Some(&json!(["u2", "u1"])));

        let fresh = created(
            apply(
                CollectionKind::Polls,
                &mut polls,
                Action::Create(record(json!({"votedUserIds": ["u1", "u1"]}))),
                T1,
            )
            .unwrap(),
        );
        assert_eq!(fresh.get("votedUserIds"), Some(&json!(["u1"])));
    }

    #[test]
    fn test_default_survives_update_and_create_alone() {
        let mut links = vec![
            record(json!({"id": "l1"})),
            record(json!({"id": "l2"})),
        ];
        apply(
            CollectionKind::LiveLinks,
            &mut links,
            Action::SetDefault { id: "l1".into() },
            T0,
        )
        .unwrap();
        apply(
            CollectionKind::LiveLinks,
            &mut links,
            Action::Update {
                id: "l2".into(),
                patch: record(json!({"isDefault": true})),
            },
            T1,
        )
        .unwrap();
        let defaults: Vec<_> = links
            .iter()
            .filter(|l| l.flag(channels::IS_DEFAULT))
            .filter_map(Record::id)
            .collect();
        assert_eq!(defaults, vec!["l2"]);

        let link = created(
            apply(
                CollectionKind::LiveLinks,
                &mut links,
                Action::Create(record(json!({"url": "http://c", "isDefault": true}))),
                T1,
            )
            .unwrap(),
        );
        let defaults: Vec<_> = links
            .iter()
            .filter(|l| l.flag(channels::IS_DEFAULT))
            .filter_map(Record::id)
            .collect();
        assert_eq!(defaults, vec![link.id().unwrap()]);
    }

    #[test]
    fn test_unsupported_action_rejected() {
        let mut posts = Vec::new();
        let err = apply(
            CollectionKind::Posts,
            &mut posts,
            Action::SetDefault { id: "a".into() },
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidAction(_)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create(Option<u8>),
        Update(u8),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            proptest::option::of(0u8..6).prop_map(Op::Create),
            (0u8..6).prop_map(Op::Update),
            (0u8..6).prop_map(Op::Delete),
        ]
    }

    #[derive(Debug, Clone)]
    enum DefaultOp {
        SetDefault(u8),
        Update(u8, bool),
        Upsert(u8, bool),
        Create(bool),
    }

    fn default_op() -> impl Strategy<Value = DefaultOp> {
        prop_oneof![
            (0u8..6).prop_map(DefaultOp::SetDefault),
            (0u8..6, any::<bool>()).prop_map(|(n, flag)| DefaultOp::Update(n, flag)),
            (0u8..6, any::<bool>()).prop_map(|(n, flag)| DefaultOp::Upsert(n, flag)),
            any::<bool>().prop_map(DefaultOp::Create),
        ]
    }

    proptest! {
        #[test]
        fn prop_ids_stay_unique(ops in proptest::collection::vec(op(), 0..40)) {
            let mut posts = Vec::new();
            for op in ops {
                let action = match op {
                    Op::Create(Some(n)) => Action::Create(record(json!({"id": format!("p{}", n)}))),
                    Op::Create(None) => Action::Create(record(json!({"title": "t"}))),
                    Op::Update(n) => Action::Update {
                        id: format!("p{}", n),
                        patch: record(json!({"id": "p0", "title": "u"})),
                    },
                    Op::Delete(n) => Action::Delete { id: format!("p{}", n) },
                };
                let _ = apply(CollectionKind::Posts, &mut posts, action, T0);

                let ids: Vec<_> = posts.iter().filter_map(Record::id).collect();
                let unique: HashSet<_> = ids.iter().collect();
                prop_assert_eq!(ids.len(), posts.len());
                prop_assert_eq!(unique.len(), ids.len());
            }
        }

        #[test]
        fn prop_votes_match_total(votes in proptest::collection::vec(0usize..4, 0..50)) {
            let option_ids = ["a", "b", "c", "missing"];
            let mut records = vec![];
            apply(
                CollectionKind::Polls,
                &mut records,
                Action::Create(record(json!({
                    "id": "p",
                    "options": [{"id": "a"}, {"id": "b"}, {"id": "c"}]
                }))),
                T0,
            ).unwrap();

            for choice in votes {
                let before = records.clone();
                let result = apply(
                    CollectionKind::Polls,
                    &mut records,
                    Action::Vote { id: "p".into(), option_id: option_ids[choice].into(), voter_id: None },
                    T0,
                );
                if option_ids[choice] == "missing" {
                    prop_assert!(matches!(result, Err(AppError::OptionNotFound(_))));
                    prop_assert_eq!(&records, &before);
                }
                prop_assert_eq!(
                    records[0].get("totalVotes").and_then(Value::as_u64),
                    Some(polls::option_vote_sum(&records[0]))
                );
            }
        }

        #[test]
        fn prop_single_default_across_writes(ops in proptest::collection::vec(default_op(), 0..40)) {
            let mut records: Vec<Record> = (0..4)
                .map(|n| record(json!({"id": format!("c{}", n), "url": format!("http://{}", n)})))
                .collect();
            for op in ops {
                let action = match op {
                    DefaultOp::SetDefault(n) => Action::SetDefault { id: format!("c{}", n) },
                    DefaultOp::Update(n, flag) => Action::Update {
                        id: format!("c{}", n),
                        patch: record(json!({"isDefault": flag})),
                    },
                    DefaultOp::Upsert(n, flag) => Action::Upsert(
                        record(json!({"url": format!("http://{}", n), "isDefault": flag})),
                    ),
                    DefaultOp::Create(flag) => Action::Create(
                        record(json!({"url": "http://new", "isDefault": flag})),
                    ),
                };
                let _ = apply(CollectionKind::Channels, &mut records, action, T0);
                let defaults = records.iter().filter(|c| c.flag(channels::IS_DEFAULT)).count();
                prop_assert!(defaults <= 1);
            }
        }

        #[test]
        fn prop_single_default(targets in proptest::collection::vec(0u8..8, 0..30)) {
            let mut records: Vec<Record> = (0..5)
                .map(|n| record(json!({"id": format!("c{}", n), "url": format!("http://{}", n)})))
                .collect();
            for target in targets {
                apply(
                    CollectionKind::Channels,
                    &mut records,
                    Action::SetDefault { id: format!("c{}", target) },
                    T0,
                ).unwrap();
                let defaults = records.iter().filter(|c| c.flag(channels::IS_DEFAULT)).count();
                prop_assert!(defaults <= 1);
            }
        }
    }
}
