// Copyright (C) 2026 Ryan Daum <ryan.daum@gmail.com>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Maps a concrete broker subject back to the recipient-resolution rule
//! for it (spec §4.15 step 2). Deliberately independent of
//! `mudcore_subjects::SubjectRegistry`, which only builds/validates
//! subjects in the forward direction.

use mudcore_common::ids::{PlayerId, RoomId, SubzoneId};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecipientScope {
    Room(RoomId),
    Subzone(SubzoneId),
    Global,
    Whisper(PlayerId),
    System,
}

pub fn classify(subject: &str) -> Option<RecipientScope> {
    if let Some(room) = subject.strip_prefix("chat.say.") {
        return Some(RecipientScope::Room(RoomId::new(room)));
    }
    if let Some(subzone) = subject.strip_prefix("chat.local.") {
        return Some(RecipientScope::Subzone(SubzoneId::new(subzone)));
    }
    if subject == "chat.global" {
        return Some(RecipientScope::Global);
    }
    if let Some(player) = subject.strip_prefix("chat.whisper.player.") {
        return Some(RecipientScope::Whisper(PlayerId::new(player)));
    }
    if subject == "chat.system" || subject.starts_with("system.") {
        return Some(RecipientScope::System);
    }
    if let Some(room) = subject.strip_prefix("combat.") {
        return Some(RecipientScope::Room(RoomId::new(room)));
    }
    if let Some(room) = subject.strip_prefix("events.room.") {
        return Some(RecipientScope::Room(RoomId::new(room)));
    }
    None
}

pub fn is_critical_subject(subject: &str) -> bool {
    subject.starts_with("combat.")
}

/// Converts a domain-level subscribe pattern (which may end in a `*`/`>`
/// wildcard token, spec §6) into the literal byte prefix ZeroMQ's SUB
/// socket actually filters on — real ZMQ subscribe filtering is pure
/// byte-prefix matching, it has no wildcard syntax of its own. The
/// returned prefix is deliberately conservative (ends on a `.` boundary
/// when the pattern has more segments after the literal portion) so it
/// never excludes a subject the pattern should match; callers still need
/// `wildcard_matches` as a post-receipt filter, since a bare literal
/// pattern like `"chat.global"` is itself a valid ZMQ prefix of
/// `"chat.globalfoo"`.
pub fn zmq_prefix(pattern: &str) -> String {
    let tokens: Vec<&str> = pattern.split('.').collect();
    let literal: Vec<&str> = tokens.iter().take_while(|tok| **tok != "*" && **tok != ">").copied().collect();
    let mut prefix = literal.join(".");
    if literal.len() < tokens.len() {
        prefix.push('.');
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_known_pattern() {
        assert_eq!(classify("chat.say.arkham.001"), Some(RecipientScope::Room(RoomId::new("arkham.001"))));
        assert_eq!(classify("chat.local.downtown"), Some(RecipientScope::Subzone(SubzoneId::new("downtown"))));
        assert_eq!(classify("chat.global"), Some(RecipientScope::Global));
        assert_eq!(
            classify("chat.whisper.player.alice"),
            Some(RecipientScope::Whisper(PlayerId::new("alice")))
        );
        assert_eq!(classify("chat.system"), Some(RecipientScope::System));
        assert_eq!(classify("combat.arkham.001"), Some(RecipientScope::Room(RoomId::new("arkham.001"))));
        assert!(is_critical_subject("combat.arkham.001"));
        assert!(!is_critical_subject("chat.global"));
    }

    #[test]
    fn unknown_subject_classifies_to_none() {
        assert_eq!(classify("bogus.subject"), None);
    }

    #[test]
    fn zmq_prefix_stops_before_tail_wildcard() {
        assert_eq!(zmq_prefix("chat.say.>"), "chat.say.");
        assert_eq!(zmq_prefix("combat.>"), "combat.");
    }

    #[test]
    fn zmq_prefix_stops_before_star() {
        assert_eq!(zmq_prefix("chat.*.arkham.001"), "chat.");
    }

    #[test]
    fn zmq_prefix_of_a_literal_pattern_is_itself() {
        assert_eq!(zmq_prefix("chat.global"), "chat.global");
        assert_eq!(zmq_prefix("chat.system"), "chat.system");
    }
}
