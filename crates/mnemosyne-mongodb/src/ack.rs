//! Translation of raw store acknowledgements into outcomes

use bson::{Bson, Document as BsonDocument};
use mnemosyne_common::{MnemosyneError, Result};

/// What a driver write primitive returned
#[derive(Debug, Clone, PartialEq)]
pub enum RawAck {
    /// Acknowledgement mapping such as `{ok, n, err, errmsg, code}`
    Document(BsonDocument),
    /// Bare success flag, as returned for unacknowledged writes
    Unacknowledged(bool),
}

impl RawAck {
    /// `{ok: 1}`
    pub fn ok() -> Self {
        RawAck::Document(bson::doc! { "ok": 1 })
    }
}

/// Failure details extracted from an acknowledgement
struct Failure {
    code: Option<i32>,
    message: String,
}

fn numeric(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        Bson::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn text(doc: &BsonDocument, key: &str) -> Option<String> {
    match doc.get(key)? {
        Bson::Null => None,
        Bson::String(s) if s.is_empty() => None,
        Bson::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Inspect `{ok, err, errmsg, code}`.
///
/// `ok == 1` with no `err`/`errmsg` succeeds; anything else fails with
/// `"<label> error[: <err>][: <errmsg>]"`.
fn inspect(label: &str, doc: &BsonDocument) -> Option<Failure> {
    let ok = doc.get("ok").and_then(numeric).unwrap_or(1.0);
    let err = text(doc, "err");
    let errmsg = text(doc, "errmsg");

    if ok == 1.0 && err.is_none() && errmsg.is_none() {
        return None;
    }

    let message = match (err, errmsg) {
        (Some(err), Some(errmsg)) => format!("{} error: {}: {}", label, err, errmsg),
        (Some(detail), None) | (None, Some(detail)) => format!("{} error: {}", label, detail),
        (None, None) => format!("{} error", label),
    };
    let code = doc.get("code").and_then(numeric).map(|c| c as i32);
    Some(Failure { code, message })
}

/// Outcome of a write primitive.
///
/// With an acknowledged concern the returned mapping is inspected for error
/// fields. With an unacknowledged concern only a `false` return fails, and
/// the failure carries no code or detail.
pub fn check_write(label: &str, ack: RawAck, acknowledged: bool) -> Result<BsonDocument> {
    match ack {
        RawAck::Unacknowledged(true) => Ok(BsonDocument::new()),
        RawAck::Unacknowledged(false) => Err(MnemosyneError::write(None, format!("{} error", label))),
        RawAck::Document(doc) if !acknowledged => Ok(doc),
        RawAck::Document(doc) => match inspect(label, &doc) {
            None => Ok(doc),
            Some(f) => Err(MnemosyneError::WriteError {
                code: f.code,
                message: f.message,
            }),
        },
    }
}

/// Outcome of a non-write command (aggregate, distinct, count, ...)
pub fn check_command(label: &str, reply: BsonDocument) -> Result<BsonDocument> {
    match inspect(label, &reply) {
        None => Ok(reply),
        Some(f) => Err(MnemosyneError::Command {
            code: f.code,
            message: f.message,
        }),
    }
}

/// True for the reply to dropping a namespace that does not exist
pub fn is_namespace_not_found(reply: &BsonDocument) -> bool {
    let code = reply.get("code").and_then(numeric);
    code == Some(26.0) || text(reply, "errmsg").as_deref() == Some("ns not found")
}
