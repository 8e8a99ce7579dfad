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

//! Subject Registry (spec §4.1, C1): canonical pub/sub subject patterns and
//! validation. Operations are pure and lock-free after construction — the
//! catalog is a fixed `Vec` built once at startup, mirroring the way the
//! teacher's `rpc_common` module exposes its topic constants as compile-time
//! data rather than a runtime-mutable registry.

use std::fmt;

pub use mudcore_common::error::SubjectError;

/// One segment of a subject pattern: a literal token, a named parameter
/// (filled in by `build`), or a wildcard used only on the subscriber side.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

#[derive(Clone, Debug)]
struct PatternTemplate {
    kind: &'static str,
    segments: Vec<Segment>,
}

impl PatternTemplate {
    fn new(kind: &'static str, template: &'static str) -> Self {
        let segments = template
            .split('.')
            .map(|tok| {
                if let Some(name) = tok.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
                    Segment::Param(name)
                } else {
                    Segment::Literal(tok)
                }
            })
            .collect();
        Self { kind, segments }
    }

    fn build(&self, params: &[(&str, &str)]) -> Result<String, SubjectError> {
        let mut out = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(tok) => out.push((*tok).to_string()),
                Segment::Param(name) => {
                    let value = params
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| SubjectError::MissingParam((*name).to_string()))?;
                    out.push(value.to_string());
                }
            }
        }
        Ok(out.join("."))
    }

    /// Does `subject` match this template's concrete (non-wildcard) shape?
    ///
    /// A `Param` segment's filled-in value may itself contain dots (a
    /// `room_id` of `"arkham.001"` is the spec's own canonical format), so
    /// this can't compare dot-token counts between `subject` and the
    /// template — that undercounts whenever a param value has an interior
    /// dot. Instead each literal segment consumes exactly one dot-token
    /// from the front, and a `Param` (always the last segment in every
    /// template this registry builds) consumes whatever is left.
    fn matches_concrete(&self, subject: &str) -> bool {
        let mut remaining = subject;
        for (i, seg) in self.segments.iter().enumerate() {
            let is_last = i == self.segments.len() - 1;
            match seg {
                Segment::Literal(lit) => match remaining.split_once('.') {
                    Some((head, rest)) => {
                        if head != *lit {
                            return false;
                        }
                        remaining = rest;
                    }
                    None => {
                        if !is_last || remaining != *lit {
                            return false;
                        }
                        remaining = "";
                    }
                },
                Segment::Param(_) => {
                    if is_last {
                        if remaining.is_empty() {
                            return false;
                        }
                        remaining = "";
                    } else {
                        match remaining.split_once('.') {
                            Some((head, rest)) => {
                                if head.is_empty() {
                                    return false;
                                }
                                remaining = rest;
                            }
                            None => return false,
                        }
                    }
                }
            }
        }
        remaining.is_empty()
    }
}

/// Subject kinds from spec §6 (bit-exact patterns).
pub const KIND_CHAT_SAY: &str = "chat.say";
pub const KIND_CHAT_LOCAL: &str = "chat.local";
pub const KIND_CHAT_GLOBAL: &str = "chat.global";
pub const KIND_CHAT_WHISPER: &str = "chat.whisper.player";
pub const KIND_CHAT_SYSTEM: &str = "chat.system";
pub const KIND_COMBAT: &str = "combat";
pub const KIND_EVENTS_ROOM: &str = "events.room";

pub struct SubjectRegistry {
    templates: Vec<PatternTemplate>,
}

impl Default for SubjectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubjectRegistry {
    pub fn new() -> Self {
        let templates = vec![
            PatternTemplate::new(KIND_CHAT_SAY, "chat.say.{room_id}"),
            PatternTemplate::new(KIND_CHAT_LOCAL, "chat.local.{subzone_id}"),
            PatternTemplate::new(KIND_CHAT_GLOBAL, "chat.global"),
            PatternTemplate::new(KIND_CHAT_WHISPER, "chat.whisper.player.{player_id}"),
            PatternTemplate::new(KIND_CHAT_SYSTEM, "chat.system"),
            PatternTemplate::new(KIND_COMBAT, "combat.{room_id}"),
            PatternTemplate::new(KIND_EVENTS_ROOM, "events.room.{room_id}"),
        ];
        Self { templates }
    }

    pub fn build(&self, kind: &str, params: &[(&str, &str)]) -> Result<String, SubjectError> {
        let template = self
            .templates
            .iter()
            .find(|t| t.kind == kind)
            .ok_or_else(|| SubjectError::UnknownKind(kind.to_string()))?;
        template.build(params)
    }

    /// Returns `true` if `subject` matches a known concrete pattern shape.
    pub fn validate(&self, subject: &str) -> bool {
        self.templates.iter().any(|t| t.matches_concrete(subject))
    }

    /// Strict-mode validation: returns an error instead of a bool, for
    /// publishers that must reject rather than just log (spec §4.1).
    pub fn validate_strict(&self, subject: &str) -> Result<(), SubjectError> {
        if self.validate(subject) {
            Ok(())
        } else {
            Err(SubjectError::Invalid(subject.to_string()))
        }
    }
}

/// Matches a subscriber-side pattern (which may contain `*` for one segment
/// or `>` for one-or-more tail segments) against a concrete subject.
pub fn wildcard_matches(pattern: &str, subject: &str) -> bool {
    let pat_tokens: Vec<&str> = pattern.split('.').collect();
    let subj_tokens: Vec<&str> = subject.split('.').collect();
    match_tokens(&pat_tokens, &subj_tokens)
}

fn match_tokens(pattern: &[&str], subject: &[&str]) -> bool {
    match (pattern.first(), subject.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(&">"), _) => !subject.is_empty(),
        (Some(&"*"), Some(_)) => match_tokens(&pattern[1..], &subject[1..]),
        (Some(p), Some(s)) => *p == *s && match_tokens(&pattern[1..], &subject[1..]),
        (Some(_), None) => false,
    }
}

impl fmt::Debug for SubjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRegistry")
            .field("kinds", &self.templates.iter().map(|t| t.kind).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_room_say_subject() {
        let reg = SubjectRegistry::new();
        let subj = reg.build(KIND_CHAT_SAY, &[("room_id", "arkham.001")]).unwrap();
        assert_eq!(subj, "chat.say.arkham.001");
    }

    #[test]
    fn build_unknown_kind_fails() {
        let reg = SubjectRegistry::new();
        let err = reg.build("nope", &[]).unwrap_err();
        assert!(matches!(err, SubjectError::UnknownKind(_)));
    }

    #[test]
    fn build_missing_param_fails() {
        let reg = SubjectRegistry::new();
        let err = reg.build(KIND_CHAT_SAY, &[]).unwrap_err();
        assert!(matches!(err, SubjectError::MissingParam(_)));
    }

    #[test]
    fn validate_accepts_built_subject() {
        let reg = SubjectRegistry::new();
        let subj = reg.build(KIND_COMBAT, &[("room_id", "arkham.001")]).unwrap();
        assert!(reg.validate(&subj));
        assert!(!reg.validate("bogus.subject.here"));
    }

    #[test]
    fn validate_accepts_dotted_param_value_after_literal_segments() {
        let reg = SubjectRegistry::new();
        let subj = reg.build(KIND_CHAT_SAY, &[("room_id", "arkham.001")]).unwrap();
        assert_eq!(subj, "chat.say.arkham.001");
        assert!(reg.validate(&subj));
    }

    #[test]
    fn wildcard_star_matches_one_segment() {
        assert!(wildcard_matches("chat.*.arkham.001", "chat.say.arkham.001"));
        assert!(!wildcard_matches("chat.*.arkham.001", "chat.say.local.arkham.001"));
    }

    #[test]
    fn wildcard_tail_matches_remainder() {
        assert!(wildcard_matches("chat.>", "chat.say.arkham.001"));
        assert!(!wildcard_matches("chat.>", "combat.arkham.001"));
    }

    #[test]
    fn build_then_validate_round_trips() {
        let reg = SubjectRegistry::new();
        let subj = reg
            .build(KIND_CHAT_WHISPER, &[("player_id", "bob")])
            .unwrap();
        assert_eq!(subj, "chat.whisper.player.bob");
        assert!(reg.validate(&subj));
    }
}
