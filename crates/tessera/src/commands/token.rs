//! Token command

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Serialize;
use tessera_session::{header, SessionToken};

use crate::cli::{TokenCommands, TokenMergeArgs, TokenParseArgs, TokenSatisfiesArgs};
use crate::output;

pub fn run(cmd: TokenCommands) -> Result<()> {
    match cmd {
        TokenCommands::Parse(args) => output::json(&parse(&args)?),
        TokenCommands::Merge(args) => output::json(&merge(&args)?),
        TokenCommands::Satisfies(args) => output::json(&satisfies(&args)?),
    }
}

/// A token broken into its parts
#[derive(Debug, Serialize, PartialEq)]
pub struct TokenReport {
    pub token: String,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub global_lsn: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub regions: BTreeMap<u32, i64>,
}

impl From<&SessionToken> for TokenReport {
    fn from(token: &SessionToken) -> Self {
        let regions = match token {
            SessionToken::Simple(_) => BTreeMap::new(),
            SessionToken::Vector(v) => v.local_lsn_by_region().clone(),
        };
        Self {
            token: token.to_string(),
            kind: if token.is_vector() { "vector" } else { "simple" },
            version: token.version(),
            global_lsn: token.global_lsn(),
            regions,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HeaderEntryReport {
    pub partition_key_range_id: String,
    #[serde(flatten)]
    pub token: TokenReport,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ParseReport {
    Token(TokenReport),
    Header { entries: Vec<HeaderEntryReport> },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct MergeReport {
    pub merged: TokenReport,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SatisfiesReport {
    pub sufficient: bool,
    pub required: String,
    pub candidate: String,
}

fn parse_token(value: &str, what: &str) -> Result<SessionToken> {
    value
        .trim()
        .parse::<SessionToken>()
        .with_context(|| format!("Failed to parse {} token", what))
}

/// Parse a bare token, or a composite header when the input carries
/// `range:token` entries
pub fn parse(args: &TokenParseArgs) -> Result<ParseReport> {
    if !args.token.contains(':') {
        let token = parse_token(&args.token, "session")?;
        return Ok(ParseReport::Token(TokenReport::from(&token)));
    }

    let entries = header::parse_header(&args.token).context("Failed to parse session header")?;
    Ok(ParseReport::Header {
        entries: entries
            .iter()
            .map(|(pkr, token)| HeaderEntryReport {
                partition_key_range_id: pkr.clone(),
                token: TokenReport::from(token),
            })
            .collect(),
    })
}

pub fn merge(args: &TokenMergeArgs) -> Result<MergeReport> {
    let left = parse_token(&args.left, "left")?;
    let right = parse_token(&args.right, "right")?;
    let merged = left.merge(&right).context("Failed to merge tokens")?;
    Ok(MergeReport {
        merged: TokenReport::from(&merged),
    })
}

/// Compare tokens; an insufficient candidate is a result, not an error
pub fn satisfies(args: &TokenSatisfiesArgs) -> Result<SatisfiesReport> {
    let required = parse_token(&args.required, "required")?;
    let candidate = parse_token(&args.candidate, "candidate")?;
    let sufficient = candidate.compare_for_staleness(&required).is_sufficient();
    if !sufficient {
        output::warning("candidate has not caught up with the required token");
    }
    Ok(SatisfiesReport {
        sufficient,
        required: required.to_string(),
        candidate: candidate.to_string(),
    })
}
