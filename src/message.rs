use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier naming a category of server-pushed message.
///
/// Tags are matched by exact equality; there is no wildcard or prefix
/// matching. The tag set belongs to the embedding protocol, so `Tag` is an
/// extensible string rather than a closed enum — embedders with a fixed
/// protocol can keep their tags behind constants.
///
/// # Examples
///
/// ```
/// use tagrelay::message::Tag;
///
/// let tag = Tag::new("weekly_rank");
/// assert_eq!(tag.as_str(), "weekly_rank");
/// assert_eq!(tag, Tag::from("weekly_rank"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server result code attached to every pushed message.
///
/// The router never interprets result codes; each handler decides which
/// codes it acts on. Zero is the conventional success value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    #[must_use]
    pub fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tagged message decoded from a server push.
///
/// Messages arrive only inside a batch: the ordered sequence delivered by
/// one network receive event. The payload stays opaque JSON — decoding it
/// into feature types is the handler's business.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use tagrelay::message::{Message, ResultCode};
///
/// let message = Message::ok("daily_bonus", json!({"day": 3}));
/// assert!(message.code().is_success());
/// assert_eq!(message.tag().as_str(), "daily_bonus");
///
/// let rejected = Message::failed("shop", ResultCode(1201));
/// assert!(!rejected.code().is_success());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    tag: Tag,
    code: ResultCode,
    payload: Value,
}

impl Message {
    #[must_use]
    pub fn new(tag: impl Into<Tag>, code: ResultCode, payload: Value) -> Self {
        Self {
            tag: tag.into(),
            code,
            payload,
        }
    }

    /// Success-coded message with a payload.
    #[must_use]
    pub fn ok(tag: impl Into<Tag>, payload: Value) -> Self {
        Self::new(tag, ResultCode::SUCCESS, payload)
    }

    /// Failure-coded message; the server sends no payload with these.
    #[must_use]
    pub fn failed(tag: impl Into<Tag>, code: ResultCode) -> Self {
        Self::new(tag, code, Value::Null)
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn code(&self) -> ResultCode {
        self.code
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
