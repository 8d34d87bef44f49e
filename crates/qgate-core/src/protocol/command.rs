//! Closed set of commands accepted at the HTTP boundary.
//!
//! Commands are parsed once from the access kind, the command name and its
//! [`CommandArgs`] into a typed variant; everything downstream matches on the
//! enum instead of re-reading strings.

use std::collections::BTreeMap;

use crate::error::{QgateError, Result};

/// Access kind. Each kind has its own permission table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    Delete,
    Call,
}

impl Access {
    pub const ALL: [Access; 4] = [Access::Read, Access::Write, Access::Delete, Access::Call];

    pub fn as_str(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Delete => "delete",
            Access::Call => "call",
        }
    }
}

/// Query arguments a command may consume besides its name and key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pub field: Option<String>,
    pub member: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub min: Option<String>,
    pub max: Option<String>,
    pub with_scores: Option<String>,
    pub score: Option<String>,
    /// Every non-routing query parameter, as sent.
    pub form: BTreeMap<String, String>,
}

impl CommandArgs {
    pub fn with_field(field: Option<&str>) -> Self {
        Self {
            field: field.map(str::to_string),
            ..Self::default()
        }
    }
}

/// One end of a sorted-set score range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// `-inf`, `+inf`, a number, or `(` followed by a number for an
    /// exclusive bound.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (exclusive, num) = match raw.strip_prefix('(') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let value = match num.to_ascii_lowercase().as_str() {
            "-inf" => f64::NEG_INFINITY,
            "inf" | "+inf" => f64::INFINITY,
            other => other
                .parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .ok_or_else(|| QgateError::BadRequest(format!("invalid score bound: {raw}")))?,
        };
        Ok(if exclusive {
            ScoreBound::Exclusive(value)
        } else {
            ScoreBound::Inclusive(value)
        })
    }

    /// Whether `score` lies above this bound used as a minimum.
    pub fn admits_from_below(self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(b) => score >= b,
            ScoreBound::Exclusive(b) => score > b,
        }
    }

    /// Whether `score` lies below this bound used as a maximum.
    pub fn admits_from_above(self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(b) => score <= b,
            ScoreBound::Exclusive(b) => score < b,
        }
    }

    /// Redis range syntax.
    pub fn to_arg(self) -> String {
        match self {
            ScoreBound::Inclusive(v) => format!("{v}"),
            ScoreBound::Exclusive(v) => format!("({v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Point read of one hash field.
    HGet { field: String },
    /// Read of several hash fields (batch).
    HMGet { fields: Vec<String> },
    /// Read of a whole hash (batch).
    HGetAll,
    /// All field names of a hash (batch).
    HKeys,
    /// All values of a hash (batch).
    HVals,
    HLen,
    HExists { field: String },
    SIsMember { member: String },
    /// Sorted-set members by rank (batch).
    ZRange {
        start: i64,
        stop: i64,
        with_scores: bool,
    },
    /// Sorted-set members by score (batch).
    ZRangeByScore {
        min: ScoreBound,
        max: ScoreBound,
        with_scores: bool,
    },
    ZRank { member: String },
    /// Write one hash field; value comes from the request body.
    HSet { field: String },
    /// Append to a list; value comes from the request body.
    RPush,
    HDel { field: String },
    Del,
    /// Remote call to the service named by the key; arguments come from a
    /// JSON object body.
    Api,
    /// Remote call whose arguments are the query parameters.
    JsApi { form: BTreeMap<String, String> },
    /// Add the body to a sorted set.
    ZAdd { score: f64 },
}

impl Command {
    /// Parse a command that takes at most a field argument.
    pub fn parse(access: Access, cmd: &str, field: Option<&str>) -> Result<Self> {
        Self::parse_with(access, cmd, &CommandArgs::with_field(field))
    }

    /// Parse a command name for the given access kind. Names are
    /// case-insensitive; a command used with the wrong access kind is
    /// rejected.
    pub fn parse_with(access: Access, cmd: &str, args: &CommandArgs) -> Result<Self> {
        let need = |name: &str, arg: &str, value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| QgateError::BadRequest(format!("{name} requires {arg}")))
        };
        let need_field = |name: &str| need(name, "field", &args.field);

        let upper = cmd.to_ascii_uppercase();
        let command = match (access, upper.as_str()) {
            (Access::Read, "HGET") => Command::HGet {
                field: need_field("HGET")?,
            },
            (Access::Read, "HMGET") => {
                let fields: Vec<String> = need_field("HMGET")?
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
                if fields.is_empty() {
                    return Err(QgateError::BadRequest("HMGET requires field".into()));
                }
                Command::HMGet { fields }
            }
            (Access::Read, "HGETALL") => Command::HGetAll,
            (Access::Read, "HKEYS") => Command::HKeys,
            (Access::Read, "HVALS") => Command::HVals,
            (Access::Read, "HLEN") => Command::HLen,
            (Access::Read, "HEXISTS") => Command::HExists {
                field: need_field("HEXISTS")?,
            },
            (Access::Read, "SISMEMBER") => Command::SIsMember {
                member: need("SISMEMBER", "member", &args.member)?,
            },
            (Access::Read, "ZRANGE") => Command::ZRange {
                start: parse_index("start", &need("ZRANGE", "start", &args.start)?)?,
                stop: parse_index("stop", &need("ZRANGE", "stop", &args.stop)?)?,
                with_scores: parse_flag(args.with_scores.as_deref())?,
            },
            (Access::Read, "ZRANGEBYSCORE") => Command::ZRangeByScore {
                min: ScoreBound::parse(&need("ZRANGEBYSCORE", "min", &args.min)?)?,
                max: ScoreBound::parse(&need("ZRANGEBYSCORE", "max", &args.max)?)?,
                with_scores: parse_flag(args.with_scores.as_deref())?,
            },
            (Access::Read, "ZRANK") => Command::ZRank {
                member: need("ZRANK", "member", &args.member)?,
            },
            (Access::Write, "HSET") => Command::HSet {
                field: need_field("HSET")?,
            },
            (Access::Write, "RPUSH") => Command::RPush,
            (Access::Delete, "HDEL") => Command::HDel {
                field: need_field("HDEL")?,
            },
            (Access::Delete, "DEL") => Command::Del,
            (Access::Call, "API") => Command::Api,
            (Access::Call, "JSAPI") => Command::JsApi {
                form: args.form.clone(),
            },
            (Access::Call, "ZADD") => {
                let raw = need("ZADD", "score", &args.score)?;
                let score = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite())
                    .ok_or_else(|| QgateError::BadRequest(format!("score must be a finite number: {raw}")))?;
                Command::ZAdd { score }
            }
            (_, "") => return Err(QgateError::BadRequest("no cmd".into())),
            (access, other) => {
                return Err(QgateError::BadRequest(format!(
                    "unsupported {} command: {other}",
                    access.as_str()
                )))
            }
        };
        Ok(command)
    }

    pub fn access(&self) -> Access {
        match self {
            Command::HGet { .. }
            | Command::HMGet { .. }
            | Command::HGetAll
            | Command::HKeys
            | Command::HVals
            | Command::HLen
            | Command::HExists { .. }
            | Command::SIsMember { .. }
            | Command::ZRange { .. }
            | Command::ZRangeByScore { .. }
            | Command::ZRank { .. } => Access::Read,
            Command::HSet { .. } | Command::RPush => Access::Write,
            Command::HDel { .. } | Command::Del => Access::Delete,
            Command::Api | Command::JsApi { .. } | Command::ZAdd { .. } => Access::Call,
        }
    }

    /// Operation name used in permission policies.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::HGet { .. } => "hget",
            Command::HMGet { .. } => "hmget",
            Command::HGetAll => "hgetall",
            Command::HKeys => "hkeys",
            Command::HVals => "hvals",
            Command::HLen => "hlen",
            Command::HExists { .. } => "hexists",
            Command::SIsMember { .. } => "sismember",
            Command::ZRange { .. } => "zrange",
            Command::ZRangeByScore { .. } => "zrangebyscore",
            Command::ZRank { .. } => "zrank",
            Command::HSet { .. } => "hset",
            Command::RPush => "rpush",
            Command::HDel { .. } => "hdel",
            Command::Del => "del",
            Command::Api => "api",
            Command::JsApi { .. } => "jsapi",
            Command::ZAdd { .. } => "zadd",
        }
    }

    /// Unscoped reads returning a whole structure rather than one field.
    pub fn is_batch(&self) -> bool {
        matches!(
            self,
            Command::HMGet { .. }
                | Command::HGetAll
                | Command::HKeys
                | Command::HVals
                | Command::ZRange { .. }
                | Command::ZRangeByScore { .. }
        )
    }

    /// Whether the key names a remote service rather than stored data.
    pub fn is_service_call(&self) -> bool {
        matches!(self, Command::Api | Command::JsApi { .. })
    }

    /// Target field, for commands that address exactly one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Command::HGet { field }
            | Command::HExists { field }
            | Command::HSet { field }
            | Command::HDel { field } => Some(field),
            _ => None,
        }
    }
}

fn parse_index(name: &str, raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| QgateError::BadRequest(format!("{name} must be an integer: {raw}")))
}

fn parse_flag(raw: Option<&str>) -> Result<bool> {
    match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(QgateError::BadRequest(format!(
            "withscores must be true or false: {other}"
        ))),
    }
}
