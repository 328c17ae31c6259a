//! Control-plane message types.
//!
//! Both directions are single serde-tagged enums; the `type` field names
//! the message kind on the wire. Per-assignment event order is
//! significant and preserved end-to-end by the agent's single outbound
//! queue.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_schema::Definition;
use weft_state::{Envelope, StateSchema};

/// Severity of a LOG event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The kind of an assignment event. Terminal kinds close the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Bound,
    Queued,
    Progress,
    Log,
    Yield,
    Done,
    Error,
    Critical,
    Cancelled,
    Interrupted,
    Paused,
    Resumed,
}

impl EventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::Done
                | EventKind::Error
                | EventKind::Critical
                | EventKind::Cancelled
                | EventKind::Interrupted
        )
    }
}

/// A server-initiated request to invoke an implementation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assign {
    pub assignment: String,
    /// Server-side implementation id or the bare interface name.
    pub implementation: String,
    #[serde(default)]
    pub args: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// One event in an assignment's outbound stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub assignment: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    pub ts: DateTime<Utc>,
}

impl AssignmentEvent {
    pub fn new(assignment: impl Into<String>, kind: EventKind) -> Self {
        AssignmentEvent {
            assignment: assignment.into(),
            kind,
            level: None,
            returns: None,
            message: None,
            percentage: None,
            ts: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_returns(mut self, returns: BTreeMap<String, Value>) -> Self {
        self.returns = Some(returns);
        self
    }
}

/// One hosted implementation, announced at session INIT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImplementationAnnouncement {
    pub interface: String,
    /// Content hash of the definition; lets the server reuse a known
    /// schema without re-reading the payload.
    pub hash: String,
    pub definition: Definition,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dynamic: bool,
}

/// One replicated state, announced with its current snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateAnnouncement {
    pub name: String,
    pub schema: StateSchema,
    pub snapshot: Value,
    pub rev: u64,
}

/// Session opener. On reconnect the announced revisions let the server
/// decide between accepting deltas and requesting a catch-up.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Init {
    pub instance_id: String,
    pub implementations: Vec<ImplementationAnnouncement>,
    pub states: Vec<StateAnnouncement>,
    /// Set when the replay buffer overflowed or aged out during an
    /// outage and the server must reconcile assignment states itself.
    #[serde(default)]
    pub needs_reconciliation: bool,
}

/// Server-assigned stable ids, returned for an INIT.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Bindings {
    /// interface → implementation id
    #[serde(default)]
    pub implementations: HashMap<String, String>,
    /// state name → state id
    #[serde(default)]
    pub states: HashMap<String, String>,
}

/// Messages the server sends to the agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToAgentMessage {
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Assign(Assign),
    Cancel {
        assignment: String,
    },
    Interrupt {
        assignment: String,
    },
    Pause {
        assignment: String,
    },
    Resume {
        assignment: String,
    },
    Provide {
        implementation: String,
    },
    Unprovide {
        implementation: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    InitReply {
        bindings: Bindings,
    },
    Catchup {
        state_name: String,
        from_rev: u64,
    },
}

/// Messages the agent sends to the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FromAgentMessage {
    Init(Init),
    Event(AssignmentEvent),
    Envelope(Envelope),
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Ack {
        message_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_messages_are_tagged_by_type() {
        let msg: ToAgentMessage =
            serde_json::from_value(json!({"type": "CANCEL", "assignment": "a-1"})).unwrap();
        assert!(matches!(msg, ToAgentMessage::Cancel { assignment } if assignment == "a-1"));

        let msg: ToAgentMessage = serde_json::from_value(json!({
            "type": "ASSIGN",
            "assignment": "a-2",
            "implementation": "impl-7",
            "args": {"x": 1},
        }))
        .unwrap();
        match msg {
            ToAgentMessage::Assign(assign) => {
                assert_eq!(assign.args["x"], json!(1));
                assert!(assign.user.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn event_serializes_with_kind_and_skips_empty_fields() {
        let event = AssignmentEvent::new("a-1", EventKind::Progress);
        let json = serde_json::to_value(FromAgentMessage::Event(event)).unwrap();
        assert_eq!(json["type"], "EVENT");
        assert_eq!(json["kind"], "PROGRESS");
        assert!(json.get("returns").is_none());
    }

    #[test]
    fn terminal_kinds_are_exactly_the_five() {
        let terminal = [
            EventKind::Done,
            EventKind::Error,
            EventKind::Critical,
            EventKind::Cancelled,
            EventKind::Interrupted,
        ];
        for kind in terminal {
            assert!(kind.is_terminal());
        }
        for kind in [
            EventKind::Bound,
            EventKind::Queued,
            EventKind::Progress,
            EventKind::Log,
            EventKind::Yield,
            EventKind::Paused,
            EventKind::Resumed,
        ] {
            assert!(!kind.is_terminal());
        }
    }
}
