use chrono::{DateTime, Utc};
use ciborium::tag;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// CBOR tag the server reserves for datetimes
pub const TAG_DATETIME: u64 = 12;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// An RPC request as it goes over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<P> {
    pub id: u32,
    pub method: String,
    pub params: P,
}

/// Credentials for the `signin` method, scoped to a namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsUserAuth {
    pub ns: String,
    pub user: String,
    pub pass: String,
}

/// A UTC instant encoded as tag 12 over `[seconds, nanoseconds]`.
///
/// A missing timestamp is an `Option::<Datetime>::None`, which encodes as a
/// plain null and never as a tag wrapping null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datetime(pub DateTime<Utc>);

impl Datetime {
    /// Rebuild an instant from its wire parts. `nanos` must be in `0..1e9`.
    pub fn from_parts(secs: i64, nanos: i64) -> Option<Self> {
        if !(0..NANOS_PER_SEC).contains(&nanos) {
            return None;
        }
        DateTime::from_timestamp(secs, nanos as u32).map(Datetime)
    }

    pub fn secs(&self) -> i64 {
        self.0.timestamp()
    }

    pub fn nanos(&self) -> i64 {
        i64::from(self.0.timestamp_subsec_nanos())
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Datetime {
    fn from(instant: DateTime<Utc>) -> Self {
        Datetime(instant)
    }
}

impl Serialize for Datetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        tag::Required::<_, TAG_DATETIME>((self.secs(), self.nanos())).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Datetime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag::Required((secs, nanos)) =
            tag::Required::<(i64, i64), TAG_DATETIME>::deserialize(deserializer)?;
        Datetime::from_parts(secs, nanos).ok_or_else(|| {
            D::Error::custom(format!("datetime out of range: [{}, {}]", secs, nanos))
        })
    }
}
