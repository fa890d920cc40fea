//! # Field Extractor
//!
//! Turns the ordered field list of one embed into a [`PetRecord`], or into
//! nothing at all. Most embeds posted to the source channel are not pet
//! announcements, so "no match" is an ordinary `None` and never an error.
//!
//! ## Classification
//!
//! Every field name is lowercased and tested against a priority-ordered table
//! of [`LabelRule`]s. The first rule with a matching substring claims the
//! field; later rules are not consulted for it. Different fields are
//! classified independently, and a later field with the same label
//! overwrites the earlier value.
//!
//! ## Job id precedence
//!
//! A job id can arrive twice: as an explicit "Job ID" field and embedded in
//! a `TeleportToPlaceInstance(place, "job")` join script. Which one wins is
//! a [`JobIdPrecedence`] setting on the extractor. With the default
//! (`Explicit`) the script only fills the job id when no explicit field was
//! seen; the place id is always taken from the script.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use regex::Regex;
use static_init::dynamic;

use crate::core::record::{MessageMeta, PetRecord, RawField};

#[dynamic]
static TELEPORT_CALL: Regex =
    Regex::new(r#"TeleportToPlaceInstance\(\s*(\d+)\s*,\s*["']([\w-]+)"#).expect("valid teleport pattern");

#[dynamic]
static MARKDOWN_LINK: Regex = Regex::new(r"\[[^\]]*\]\(\s*([^)\s]+)\s*\)").expect("valid link pattern");

#[dynamic]
static BARE_URL: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://\S+").expect("valid url pattern");

/// Semantic role of an embed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldLabel {
    Name,
    Mutation,
    Generation,
    Dps,
    Tier,
    Traits,
    Players,
    JobId,
    JoinScript,
    JoinLink,
}

/// Which source of the job id wins when both are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobIdPrecedence {
    /// An explicit job id field wins; the join script only fills the gap.
    #[default]
    Explicit,
    /// The id parsed from the join script wins over an explicit field.
    Script,
}

impl FromStr for JobIdPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "explicit" => Ok(JobIdPrecedence::Explicit),
            "script" => Ok(JobIdPrecedence::Script),
            other => Err(format!("unknown job id precedence '{}' (expected 'explicit' or 'script')", other)),
        }
    }
}

impl fmt::Display for JobIdPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobIdPrecedence::Explicit => write!(f, "explicit"),
            JobIdPrecedence::Script => write!(f, "script"),
        }
    }
}

/// A label and the lowercase substrings that select it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRule {
    pub label: FieldLabel,
    pub patterns: Vec<String>,
}

impl LabelRule {
    pub fn new(label: FieldLabel, patterns: &[&str]) -> Self {
        Self {
            label,
            patterns: patterns.iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered_name: &str) -> bool {
        self.patterns.iter().any(|p| lowered_name.contains(p.as_str()))
    }
}

/// The default priority table, highest priority first.
pub fn default_rules() -> Vec<LabelRule> {
    vec![
        LabelRule::new(FieldLabel::Name, &["name"]),
        LabelRule::new(FieldLabel::Mutation, &["mutation"]),
        LabelRule::new(FieldLabel::Generation, &["generation", "gen/s", "rate"]),
        LabelRule::new(FieldLabel::Dps, &["dps", "money", "per sec"]),
        LabelRule::new(FieldLabel::Tier, &["tier", "rarity"]),
        LabelRule::new(FieldLabel::Traits, &["trait"]),
        LabelRule::new(FieldLabel::Players, &["player"]),
        LabelRule::new(FieldLabel::JobId, &["job id", "jobid", "job-id", "job_id"]),
        LabelRule::new(FieldLabel::JoinScript, &["join script", "teleport", "script"]),
        LabelRule::new(FieldLabel::JoinLink, &["join link", "link", "join"]),
    ]
}

/// # Field Extractor
///
/// Stateless apart from its configuration; one instance is shared by the
/// whole ingestion pipeline.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    rules: Vec<LabelRule>,
    job_id_precedence: JobIdPrecedence,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(default_rules(), JobIdPrecedence::default())
    }
}

/// Values collected while scanning one embed.
#[derive(Default)]
struct Draft {
    name: Option<String>,
    emoji: Option<String>,
    mutation: Option<String>,
    generation: Option<String>,
    dps: Option<String>,
    tier: Option<String>,
    traits: Option<String>,
    players: Option<String>,
    explicit_job_id: Option<String>,
    script_job_id: Option<String>,
    place_id: Option<String>,
    teleport_script: Option<String>,
    join_link: Option<String>,
}

impl FieldExtractor {
    pub fn new(rules: Vec<LabelRule>, job_id_precedence: JobIdPrecedence) -> Self {
        Self { rules, job_id_precedence }
    }

    pub fn with_job_id_precedence(mut self, job_id_precedence: JobIdPrecedence) -> Self {
        self.job_id_precedence = job_id_precedence;
        self
    }

    pub fn job_id_precedence(&self) -> JobIdPrecedence {
        self.job_id_precedence
    }

    /// First label whose patterns occur in `field_name`, ignoring case.
    pub fn classify(&self, field_name: &str) -> Option<FieldLabel> {
        let lowered = field_name.to_lowercase();
        self.rules.iter().find(|rule| rule.matches(&lowered)).map(|rule| rule.label)
    }

    /// # Extract
    ///
    /// Scans `fields` in order and builds a record stamped with
    /// `processed_at`. Returns `None` unless both a name and a job id were
    /// found.
    pub fn extract(&self, fields: &[RawField], meta: &MessageMeta, processed_at: DateTime<Utc>) -> Option<PetRecord> {
        let mut draft = Draft::default();

        for field in fields {
            let value = field.value.trim();
            if value.is_empty() {
                continue;
            }
            let Some(label) = self.classify(&field.name) else {
                continue;
            };

            match label {
                FieldLabel::Name => {
                    let (emoji, name) = split_emoji(value);
                    draft.emoji = emoji;
                    draft.name = Some(name);
                }
                FieldLabel::Mutation => draft.mutation = Some(value.to_string()),
                FieldLabel::Generation => draft.generation = Some(value.to_string()),
                FieldLabel::Dps => draft.dps = Some(value.to_string()),
                FieldLabel::Tier => draft.tier = Some(value.to_string()),
                FieldLabel::Traits => draft.traits = Some(value.to_string()),
                FieldLabel::Players => draft.players = Some(value.to_string()),
                FieldLabel::JobId => draft.explicit_job_id = Some(value.to_string()),
                FieldLabel::JoinScript => {
                    draft.teleport_script = Some(value.to_string());
                    if let Some((place_id, job_id)) = parse_teleport(value) {
                        draft.place_id = Some(place_id);
                        draft.script_job_id = Some(job_id);
                    }
                }
                FieldLabel::JoinLink => {
                    if let Some(link) = parse_join_link(value) {
                        draft.join_link = Some(link);
                    }
                }
            }
        }

        let job_id = match self.job_id_precedence {
            JobIdPrecedence::Explicit => draft.explicit_job_id.or(draft.script_job_id),
            JobIdPrecedence::Script => draft.script_job_id.or(draft.explicit_job_id),
        };

        let name = draft.name.filter(|n| !n.is_empty())?;
        let job_id = job_id.filter(|j| !j.is_empty())?;

        Some(PetRecord {
            name,
            emoji: draft.emoji,
            mutation: draft.mutation,
            tier: draft.tier,
            traits: draft.traits,
            players: draft.players,
            dps_metric: draft.dps,
            generation_metric: draft.generation,
            job_id,
            place_id: draft.place_id,
            teleport_script: draft.teleport_script,
            join_link: draft.join_link,
            found_at: meta.created_at,
            processed_at,
            message_id: meta.message_id.clone(),
            raw_fields: fields.to_vec(),
        })
    }
}

/// Splits a leading run of symbols (typically an emoji) off the name.
///
/// `"★ Shadow Fox"` becomes `(Some("★"), "Shadow Fox")`. A value with no
/// leading symbols, or made of symbols only, is returned whole.
pub fn split_emoji(value: &str) -> (Option<String>, String) {
    let value = value.trim();
    let prefix_len: usize = value
        .chars()
        .take_while(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .map(char::len_utf8)
        .sum();

    let (prefix, rest) = value.split_at(prefix_len);
    let rest = rest.trim();
    if prefix.is_empty() || rest.is_empty() {
        (None, value.to_string())
    } else {
        (Some(prefix.to_string()), rest.to_string())
    }
}

/// Pulls `(place_id, job_id)` out of a `TeleportToPlaceInstance` call.
pub fn parse_teleport(script: &str) -> Option<(String, String)> {
    let caps = TELEPORT_CALL.captures(script)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Accepts `[label](url)` or a bare `scheme://...` value.
pub fn parse_join_link(value: &str) -> Option<String> {
    let value = value.trim();
    if let Some(caps) = MARKDOWN_LINK.captures(value) {
        return Some(caps[1].to_string());
    }
    BARE_URL.find(value).map(|m| m.as_str().to_string())
}
