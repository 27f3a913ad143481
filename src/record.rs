//! Deal record data model.
//!
//! The payloads are opaque to this layer: the core only ever reads the
//! referenced unit ids and the optional project code out of them, everything
//! else (pricing, client info, floor plans) travels as caller-owned bytes.

use chrono::{DateTime, TimeZone, Utc};

use crate::state::DealState;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl<T: TimeZone + PartialEq> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl<T: TimeZone + Eq> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Structured-but-opaque deal payload. `unit_ids` and `project_code` are the
/// only fields this layer interprets.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Default, PartialEq, Eq)]
pub struct DealPayload {
    #[n(0)]
    pub unit_ids: Vec<String>,
    #[n(1)]
    pub project_code: Option<String>,
    /// Caller-owned structured data (pricing, client info), not interpreted.
    #[n(2)]
    pub body: Vec<u8>,
}

/// A negotiated sale document tracked through the state machine.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct DealRecord {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub state: DealState,
    /// Optimistic-concurrency token. Starts at 1, increments by exactly 1
    /// per committed update.
    #[n(2)]
    pub version: u64,
    #[n(3)]
    pub owner_id: String,
    #[n(4)]
    pub project_id: Option<String>,
    #[n(5)]
    pub payload: DealPayload,
    #[n(6)]
    pub aux_payload: Option<Vec<u8>>,
    #[n(7)]
    pub map_payload: Option<Vec<u8>>,
    #[n(8)]
    pub comment: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
}

/// Input for creating a new deal record.
#[derive(Debug, Clone, Default)]
pub struct DealDraft {
    pub project_id: Option<String>,
    pub payload: DealPayload,
    pub aux_payload: Option<Vec<u8>>,
    pub map_payload: Option<Vec<u8>>,
    pub comment: Option<String>,
}

/// Partial update for an existing deal record. `state` is a raw string,
/// normalized at the service boundary.
#[derive(Debug, Clone, Default)]
pub struct DealPatch {
    /// Expected version as seen by the caller. When supplied and stale the
    /// update fails with `Conflict` before anything else runs.
    pub version: Option<u64>,
    pub state: Option<String>,
    pub payload: Option<DealPayload>,
    pub aux_payload: Option<Vec<u8>>,
    pub map_payload: Option<Vec<u8>>,
    pub comment: Option<String>,
}

impl DealRecord {
    /// Fresh record at `version = 1, state = pending`.
    pub fn new(id: String, owner_id: String, project_id: Option<String>, draft: DealDraft) -> Self {
        let now = TimeStamp::now();
        Self {
            id,
            state: DealState::Pending,
            version: 1,
            owner_id,
            project_id,
            payload: draft.payload,
            aux_payload: draft.aux_payload,
            map_payload: draft.map_payload,
            comment: draft.comment,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Apply a patch, producing the successor revision. The version check
    /// itself belongs to the service and the store; this only carries the
    /// field merge and the `version + 1` / `updated_at` stamping.
    pub fn apply_patch(&self, patch: &DealPatch, next_state: Option<DealState>) -> Self {
        let mut next = self.clone();
        if let Some(state) = next_state {
            next.state = state;
        }
        if let Some(payload) = &patch.payload {
            next.payload = payload.clone();
        }
        if let Some(aux) = &patch.aux_payload {
            next.aux_payload = Some(aux.clone());
        }
        if let Some(map) = &patch.map_payload {
            next.map_payload = Some(map.clone());
        }
        if let Some(comment) = &patch.comment {
            next.comment = Some(comment.clone());
        }
        next.version = self.version + 1;
        next.updated_at = TimeStamp::now();
        next
    }
}
