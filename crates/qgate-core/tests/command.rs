//! Command parsing tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::BTreeMap;

use qgate_core::protocol::command::{Access, Command, CommandArgs, ScoreBound};

#[test]
fn parses_case_insensitively() {
    let c = Command::parse(Access::Read, "hget", Some("name")).unwrap();
    assert_eq!(c, Command::HGet { field: "name".into() });
    assert_eq!(c.verb(), "hget");
    assert!(!c.is_batch());
    assert_eq!(c.field(), Some("name"));
}

#[test]
fn batch_reads_are_flagged() {
    for cmd in ["HGETALL", "HKEYS", "HVALS"] {
        let c = Command::parse(Access::Read, cmd, None).unwrap();
        assert!(c.is_batch(), "{cmd}");
        assert_eq!(c.access(), Access::Read);
    }
    let c = Command::parse(Access::Read, "HMGET", Some("a, b,,c")).unwrap();
    assert_eq!(
        c,
        Command::HMGet {
            fields: vec!["a".into(), "b".into(), "c".into()]
        }
    );
    assert!(c.is_batch());
}

#[test]
fn field_is_required_where_addressed() {
    for (access, cmd) in [
        (Access::Read, "HGET"),
        (Access::Read, "HEXISTS"),
        (Access::Write, "HSET"),
        (Access::Delete, "HDEL"),
    ] {
        let err = Command::parse(access, cmd, None).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST", "{cmd}");
        assert!(Command::parse(access, cmd, Some("")).is_err());
    }
}

#[test]
fn command_must_match_access_kind() {
    assert!(Command::parse(Access::Read, "HSET", Some("f")).is_err());
    assert!(Command::parse(Access::Write, "HGET", Some("f")).is_err());
    assert!(Command::parse(Access::Read, "API", None).is_err());
    assert!(Command::parse(Access::Call, "", None).is_err());
    assert_eq!(Command::parse(Access::Call, "api", None).unwrap(), Command::Api);
    assert_eq!(Command::parse(Access::Delete, "DEL", None).unwrap().access(), Access::Delete);
}

fn args(pairs: &[(&str, &str)]) -> CommandArgs {
    let get = |name: &str| {
        pairs
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string())
    };
    CommandArgs {
        field: get("field"),
        member: get("member"),
        start: get("start"),
        stop: get("stop"),
        min: get("min"),
        max: get("max"),
        with_scores: get("withscores"),
        score: get("score"),
        form: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[test]
fn sorted_set_ranges_are_batch_reads() {
    let c = Command::parse_with(
        Access::Read,
        "zrange",
        &args(&[("start", "0"), ("stop", "-1"), ("withscores", "true")]),
    )
    .unwrap();
    assert_eq!(
        c,
        Command::ZRange {
            start: 0,
            stop: -1,
            with_scores: true
        }
    );
    assert!(c.is_batch());
    assert_eq!(c.verb(), "zrange");

    let c = Command::parse_with(
        Access::Read,
        "ZRANGEBYSCORE",
        &args(&[("min", "(1.5"), ("max", "+inf")]),
    )
    .unwrap();
    assert_eq!(
        c,
        Command::ZRangeByScore {
            min: ScoreBound::Exclusive(1.5),
            max: ScoreBound::Inclusive(f64::INFINITY),
            with_scores: false
        }
    );
    assert!(c.is_batch());

    // member lookups address one element
    let c = Command::parse_with(Access::Read, "ZRANK", &args(&[("member", "bob")])).unwrap();
    assert!(!c.is_batch());
    let c = Command::parse_with(Access::Read, "SISMEMBER", &args(&[("member", "x")])).unwrap();
    assert_eq!(c.verb(), "sismember");
}

#[test]
fn sorted_set_arguments_are_validated() {
    for bad in [
        args(&[("stop", "1")]),
        args(&[("start", "a"), ("stop", "1")]),
        args(&[("start", "0"), ("stop", "1"), ("withscores", "maybe")]),
    ] {
        let err = Command::parse_with(Access::Read, "ZRANGE", &bad).unwrap_err();
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
    }
    assert!(Command::parse_with(Access::Read, "ZRANGEBYSCORE", &args(&[("min", "x"), ("max", "1")])).is_err());
    assert!(Command::parse_with(Access::Read, "ZRANK", &args(&[])).is_err());
    assert!(Command::parse_with(Access::Call, "ZADD", &args(&[("score", "NaN")])).is_err());
    assert!(Command::parse_with(Access::Call, "ZADD", &args(&[])).is_err());
}

#[test]
fn call_commands() {
    let c = Command::parse_with(Access::Call, "zadd", &args(&[("score", "2.5")])).unwrap();
    assert_eq!(c, Command::ZAdd { score: 2.5 });
    assert_eq!(c.access(), Access::Call);
    assert!(!c.is_service_call());

    let c = Command::parse_with(Access::Call, "JSAPI", &args(&[("q", "rust")])).unwrap();
    assert_eq!(
        c,
        Command::JsApi {
            form: BTreeMap::from([("q".to_string(), "rust".to_string())])
        }
    );
    assert!(c.is_service_call());
    assert!(Command::Api.is_service_call());
}

#[test]
fn score_bounds() {
    assert_eq!(ScoreBound::parse("-inf").unwrap(), ScoreBound::Inclusive(f64::NEG_INFINITY));
    assert_eq!(ScoreBound::parse("3").unwrap().to_arg(), "3");
    assert_eq!(ScoreBound::parse("(3").unwrap().to_arg(), "(3");

    let min = ScoreBound::Exclusive(1.0);
    assert!(!min.admits_from_below(1.0));
    assert!(min.admits_from_below(1.1));
    let max = ScoreBound::Inclusive(2.0);
    assert!(max.admits_from_above(2.0));
    assert!(!max.admits_from_above(2.1));
}
