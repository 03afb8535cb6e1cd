//! Collection kinds and their fixed storage keys.

use std::fmt;
use std::str::FromStr;

use super::action::Action;
use super::record::Placement;

/// Every collection the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Posts,
    Polls,
    Categories,
    Highlights,
    Channels,
    LiveLinks,
    Keywords,
}

impl CollectionKind {
    pub const ALL: [CollectionKind; 7] = [
        CollectionKind::Posts,
        CollectionKind::Polls,
        CollectionKind::Categories,
        CollectionKind::Highlights,
        CollectionKind::Channels,
        CollectionKind::LiveLinks,
        CollectionKind::Keywords,
    ];

    /// Name used in routes and logs.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Posts => "posts",
            CollectionKind::Polls => "polls",
            CollectionKind::Categories => "categories",
            CollectionKind::Highlights => "highlights",
            CollectionKind::Channels => "channels",
            CollectionKind::LiveLinks => "live-links",
            CollectionKind::Keywords => "keywords",
        }
    }

    /// Object key of the collection's document.
    pub fn key(&self) -> &'static str {
        match self {
            CollectionKind::Posts => "posts.json",
            CollectionKind::Polls => "polls.json",
            CollectionKind::Categories => "categories.json",
            CollectionKind::Highlights => "highlights.json",
            CollectionKind::Channels => "iptv-data.json",
            CollectionKind::LiveLinks => "live-data.json",
            CollectionKind::Keywords => "keywords.json",
        }
    }

    /// Request field carrying the entity for create/update/upsert.
    pub fn payload_field(&self) -> &'static str {
        match self {
            CollectionKind::Posts => "post",
            CollectionKind::Polls => "poll",
            CollectionKind::Categories => "category",
            CollectionKind::Highlights => "highlight",
            CollectionKind::Channels => "channel",
            CollectionKind::LiveLinks => "link",
            CollectionKind::Keywords => "name",
        }
    }

    pub fn placement(&self) -> Placement {
        match self {
            CollectionKind::Categories | CollectionKind::Keywords => Placement::Append,
            _ => Placement::Prepend,
        }
    }

    /// Whether this collection understands the action.
    pub fn supports(&self, action: &Action) -> bool {
        use CollectionKind::*;

        match action {
            Action::Create(_) | Action::Delete { .. } => true,
            Action::Update { .. } => !matches!(self, Keywords),
            Action::Upsert(_) => matches!(self, Channels),
            Action::Vote { .. } | Action::UpdateStatus { .. } => matches!(self, Polls),
            Action::SetDefault { .. } | Action::ToggleFlag { .. } => {
                matches!(self, Channels | LiveLinks)
            }
            Action::TeamVote { .. } => matches!(self, LiveLinks),
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CollectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CollectionKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("Unknown collection {}", s))
    }
}
