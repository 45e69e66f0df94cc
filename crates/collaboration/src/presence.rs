/// Collaborator roster for a shared document
/// Tracks who is present and where their cursor and selection are
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Fixed palette used to tell collaborators apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserColor {
    #[serde(rename = "#FF5733")]
    Vermilion,
    #[serde(rename = "#33FF57")]
    Mint,
    #[serde(rename = "#3357FF")]
    Azure,
    #[serde(rename = "#F033FF")]
    Orchid,
    #[serde(rename = "#FF33F0")]
    Rose,
    #[serde(rename = "#33FFF0")]
    Aqua,
    #[serde(rename = "#F0FF33")]
    Lemon,
    #[serde(rename = "#FF3333")]
    Red,
    #[serde(rename = "#33FF33")]
    Green,
    #[serde(rename = "#3333FF")]
    Blue,
}

impl UserColor {
    pub const PALETTE: [UserColor; 10] = [
        Self::Vermilion,
        Self::Mint,
        Self::Azure,
        Self::Orchid,
        Self::Rose,
        Self::Aqua,
        Self::Lemon,
        Self::Red,
        Self::Green,
        Self::Blue,
    ];

    /// Pick a palette entry from the user id (deterministic)
    pub fn from_user_id(user_id: &UserId) -> Self {
        let hash = user_id
            .as_str()
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        Self::PALETTE[(hash as usize) % Self::PALETTE.len()]
    }

    pub const fn to_hex(&self) -> &'static str {
        match self {
            Self::Vermilion => "#FF5733",
            Self::Mint => "#33FF57",
            Self::Azure => "#3357FF",
            Self::Orchid => "#F033FF",
            Self::Rose => "#FF33F0",
            Self::Aqua => "#33FFF0",
            Self::Lemon => "#F0FF33",
            Self::Red => "#FF3333",
            Self::Green => "#33FF33",
            Self::Blue => "#3333FF",
        }
    }
}

/// Selected span, always `start <= end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }
}

/// Caret position plus optional selection, as character offsets into the content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
}

impl Cursor {
    pub fn new(position: usize, selection: Option<Selection>) -> Self {
        Self {
            position,
            selection,
        }
    }

    /// Keep every offset within `0..=len`.
    pub fn clamp_to(self, len: usize) -> Self {
        Self {
            position: self.position.min(len),
            selection: self
                .selection
                .map(|s| Selection::new(s.start.min(len), s.end.min(len))),
        }
    }
}

/// A participant in a shared document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorUser {
    pub id: UserId,
    pub name: String,
    pub color: UserColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
}

impl CollaboratorUser {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        let color = UserColor::from_user_id(&id);
        Self {
            id,
            name: name.into(),
            color,
            cursor: None,
        }
    }
}

/// Presence change exchanged between peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PresenceUpdate {
    #[serde(rename = "user_joined")]
    UserJoined { user: CollaboratorUser },

    #[serde(rename = "user_left")]
    UserLeft { user_id: UserId },

    #[serde(rename = "cursor_moved")]
    CursorMoved {
        user_id: UserId,
        cursor: Option<Cursor>,
    },
}

/// Collaborators in first-seen order
#[derive(Debug, Clone, Default)]
pub struct Roster {
    users: Vec<CollaboratorUser>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: Vec<CollaboratorUser>) -> Self {
        let mut roster = Self::new();
        for user in users {
            roster.upsert(user);
        }
        roster
    }

    /// Add a user or replace the existing record with the same id.
    /// Returns true when the user was not present before.
    pub fn upsert(&mut self, user: CollaboratorUser) -> bool {
        if let Some(existing) = self.users.iter_mut().find(|u| u.id == user.id) {
            *existing = user;
            false
        } else {
            self.users.push(user);
            true
        }
    }

    pub fn remove(&mut self, user_id: &UserId) -> Option<CollaboratorUser> {
        let idx = self.users.iter().position(|u| &u.id == user_id)?;
        Some(self.users.remove(idx))
    }

    pub fn get(&self, user_id: &UserId) -> Option<&CollaboratorUser> {
        self.users.iter().find(|u| &u.id == user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.get(user_id).is_some()
    }

    /// Replace a user's cursor record. Unknown users are ignored.
    pub fn set_cursor(&mut self, user_id: &UserId, cursor: Option<Cursor>) -> bool {
        match self.users.iter_mut().find(|u| &u.id == user_id) {
            Some(user) => {
                user.cursor = cursor;
                true
            }
            None => false,
        }
    }

    /// Pull every cursor back inside a document of `len` characters.
    pub fn clamp_cursors(&mut self, len: usize) {
        for user in &mut self.users {
            user.cursor = user.cursor.map(|c| c.clamp_to(len));
        }
    }

    pub fn users(&self) -> &[CollaboratorUser] {
        &self.users
    }

    /// Everyone except `user_id`
    pub fn others<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> impl Iterator<Item = &'a CollaboratorUser> + 'a {
        self.users.iter().filter(move |u| &u.id != user_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_color_from_id() {
        let user_id = UserId::from("alice");
        let color = UserColor::from_user_id(&user_id);

        assert_eq!(color, UserColor::from_user_id(&UserId::from("alice")));
        let hex = color.to_hex();
        assert!(hex.starts_with('#'));
        assert_eq!(hex.len(), 7);
    }

    #[test]
    fn test_color_serializes_as_hex() {
        let json = serde_json::to_string(&UserColor::Azure).unwrap();
        assert_eq!(json, "\"#3357FF\"");
        for color in UserColor::PALETTE {
            let json = serde_json::to_string(&color).unwrap();
            assert_eq!(json, format!("\"{}\"", color.to_hex()));
        }
    }

    #[test]
    fn test_selection_is_ordered() {
        assert_eq!(Selection::new(9, 3), Selection { start: 3, end: 9 });
    }

    #[test]
    fn test_cursor_clamp() {
        let cursor = Cursor::new(40, Some(Selection::new(10, 50))).clamp_to(20);
        assert_eq!(cursor.position, 20);
        assert_eq!(cursor.selection, Some(Selection::new(10, 20)));
    }

    #[test]
    fn test_roster_upsert_replaces_by_id() {
        let mut roster = Roster::new();
        let alice = CollaboratorUser::new(UserId::from("a"), "Alice");
        let bob = CollaboratorUser::new(UserId::from("b"), "Bob");

        assert!(roster.upsert(alice.clone()));
        assert!(roster.upsert(bob));

        let mut renamed = alice.clone();
        renamed.name = "Alice L.".to_string();
        assert!(!roster.upsert(renamed));

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.users()[0].name, "Alice L.");
    }

    #[test]
    fn test_cursor_replace_semantics() {
        let mut roster = Roster::new();
        let id = UserId::from("a");
        roster.upsert(CollaboratorUser::new(id.clone(), "Alice"));

        roster.set_cursor(&id, Some(Cursor::new(3, Some(Selection::new(1, 3)))));
        roster.set_cursor(&id, Some(Cursor::new(7, None)));

        let cursor = roster.get(&id).unwrap().cursor.unwrap();
        assert_eq!(cursor.position, 7);
        assert_eq!(cursor.selection, None);

        assert!(!roster.set_cursor(&UserId::from("ghost"), None));
    }

    #[test]
    fn test_others_excludes_self() {
        let roster = Roster::from_users(vec![
            CollaboratorUser::new(UserId::from("a"), "Alice"),
            CollaboratorUser::new(UserId::from("b"), "Bob"),
        ]);
        let me = UserId::from("a");
        let names: Vec<_> = roster.others(&me).map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Bob"]);
    }
}
