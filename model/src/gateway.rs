//! Wire shapes for Discord's v10 gateway WebSocket protocol (§6.1).
//!
//! Only what the session state machine needs to drive IDENTIFY/RESUME,
//! heartbeating, and dispatch decoding is modeled here. Individual event
//! payloads (`GUILD_CREATE`, `INTERACTION_CREATE`, ...) are left as raw JSON;
//! decoding them further is a collaborator's job (see spec §1 non-goals).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt::{Display, Formatter, Result as FmtResult};

bitflags! {
    /// Gateway intents, as a bitmask sent in the IDENTIFY payload.
    ///
    /// Only a handful of commonly-used flags are named; the bitmask itself
    /// is opaque to this crate and passed straight through to Discord.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Intents: u64 {
        const GUILDS = 1 << 0;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MODERATION = 1 << 2;
        const GUILD_EMOJIS_AND_STICKERS = 1 << 3;
        const GUILD_VOICE_STATES = 1 << 7;
        const GUILD_PRESENCES = 1 << 8;
        const GUILD_MESSAGES = 1 << 9;
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        const DIRECT_MESSAGES = 1 << 12;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

/// Opcodes used by the v10 gateway. Values are fixed by Discord and must not
/// be renumbered.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Opcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

/// A raw, not-yet-fully-decoded inbound frame.
///
/// `d` is kept as [`serde_json::Value`] because its shape depends on `op`
/// (and, for `Dispatch`, on `t`); callers narrow it with
/// [`InboundPayload::into_dispatch`] or by deserializing `d` directly for the
/// other opcodes.
#[derive(Clone, Debug, Deserialize)]
pub struct InboundPayload {
    pub op: Opcode,
    #[serde(default)]
    pub d: serde_json::Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// `d` payload of a `Hello` (opcode 10) frame.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// `d` payload of an `Invalid Session` (opcode 9) frame: whether the session
/// may be resumed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct InvalidSessionData(pub bool);

/// The fields of `READY` that the session engine itself needs; the rest of
/// the payload is handed to the dispatcher untouched.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ReadyData {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

/// Outbound `properties` object of an IDENTIFY payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    pub fn new(library_name: impl Into<String>) -> Self {
        let name = library_name.into();
        Self { os: std::env::consts::OS.to_owned(), browser: name.clone(), device: name }
    }
}

/// `d` payload of an outbound `Identify` (opcode 2) frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentifyInfo {
    pub token: String,
    pub intents: Intents,
    pub properties: IdentifyProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,
}

/// Full outbound `Identify` frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentifyPayload {
    pub op: Opcode,
    pub d: IdentifyInfo,
}

impl IdentifyPayload {
    pub fn new(token: String, intents: Intents, shard: Option<(u32, u32)>) -> Self {
        Self {
            op: Opcode::Identify,
            d: IdentifyInfo {
                token,
                intents,
                properties: IdentifyProperties::new("shardline"),
                shard: shard.map(|(id, total)| [id, total]),
            },
        }
    }
}

/// `d` payload of an outbound `Resume` (opcode 6) frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResumeInfo {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Full outbound `Resume` frame.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ResumePayload {
    pub op: Opcode,
    pub d: ResumeInfo,
}

impl ResumePayload {
    pub fn new(token: String, session_id: String, seq: u64) -> Self {
        Self { op: Opcode::Resume, d: ResumeInfo { token, session_id, seq } }
    }
}

/// Outbound `Heartbeat` (opcode 1) frame. `d` is the last sequence number
/// seen, or `null` if none has been received yet.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatPayload {
    pub op: Opcode,
    pub d: Option<u64>,
}

impl HeartbeatPayload {
    pub const fn new(seq: Option<u64>) -> Self {
        Self { op: Opcode::Heartbeat, d: seq }
    }
}

/// A decoded `Dispatch` (opcode 0) event: the event name, the sequence
/// number it was sent with, and its still-undecoded payload.
///
/// Per the design notes, individual event kinds are not separate callback
/// types; a single dispatcher receives this tagged value and switches on
/// [`DispatchEvent::name`].
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchEvent {
    pub name: String,
    pub sequence: u64,
    pub data: serde_json::Value,
}

impl Display for DispatchEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} (seq {})", self.name, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_omits_shard_when_single_shard() {
        let payload = IdentifyPayload::new("t".into(), Intents::GUILDS, None);
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["d"].get("shard").is_none());
    }

    #[test]
    fn identify_includes_shard_pair() {
        let payload = IdentifyPayload::new("t".into(), Intents::GUILDS, Some((1, 4)));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["d"]["shard"], serde_json::json!([1, 4]));
    }

    #[test]
    fn opcode_round_trips_through_json() {
        for op in [
            Opcode::Dispatch,
            Opcode::Heartbeat,
            Opcode::Identify,
            Opcode::Resume,
            Opcode::Reconnect,
            Opcode::RequestGuildMembers,
            Opcode::InvalidSession,
            Opcode::Hello,
            Opcode::HeartbeatAck,
        ] {
            let json = serde_json::to_string(&op).unwrap();
            let back: Opcode = serde_json::from_str(&json).unwrap();
            assert_eq!(serde_json::to_string(&back).unwrap(), json);
        }
    }

    #[test]
    fn hello_deserializes_from_inbound_payload() {
        let raw = serde_json::json!({"op": 10, "d": {"heartbeat_interval": 41250}});
        let payload: InboundPayload = serde_json::from_value(raw).unwrap();
        assert!(matches!(payload.op, Opcode::Hello));
        let hello: HelloData = serde_json::from_value(payload.d).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }
}
