use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::state::GridPoint;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("line is not valid JSON: {0}")]
    NotJson(#[source] serde_json::Error),
    #[error("event envelope is not a JSON object")]
    NotAnObject,
    #[error("event envelope has no string `type` field")]
    MissingType,
    #[error("malformed `{kind}` payload at {path}: {source}")]
    BadPayload {
        kind: String,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The fixed inbound vocabulary. Unknown tags land in `Passthrough` and
/// flow through untouched, so new event kinds need no decoder change.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    AgentRegistered {
        agent_id: String,
        name: String,
        color: Option<String>,
        position: Option<GridPoint>,
    },
    AgentLeft {
        agent_id: String,
    },
    AgentWait {
        agent_id: String,
    },
    AgentMoved {
        agent_id: String,
        position: GridPoint,
    },
    MessageAdded {
        message_id: Option<String>,
        from: String,
        to: Option<String>,
        content: String,
    },
    MessageCleared,
    TaskAdded {
        task_id: String,
        description: String,
        position: Option<GridPoint>,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskCancelled {
        task_id: String,
    },
    TaskMoved {
        task_id: String,
        position: GridPoint,
    },
    SystemReset,
    Passthrough {
        kind: String,
        payload: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRegisteredWire {
    agent_id: String,
    name: Option<String>,
    color: Option<String>,
    position: Option<GridPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentRefWire {
    agent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentMovedWire {
    agent_id: String,
    position: GridPoint,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageAddedWire {
    message_id: Option<String>,
    from: String,
    to: Option<String>,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskAddedWire {
    task_id: String,
    description: Option<String>,
    position: Option<GridPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskAssignedWire {
    task_id: String,
    agent_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRefWire {
    task_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskMovedWire {
    task_id: String,
    position: GridPoint,
}

/// Decodes one newline-delimited JSON envelope `{ "type": tag, ...payload }`.
pub fn decode_line(line: &str) -> Result<InboundEvent, DecodeError> {
    let envelope: Value = serde_json::from_str(line).map_err(DecodeError::NotJson)?;
    if !envelope.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let kind = envelope
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match kind.as_str() {
        "agent:registered" => {
            let wire: AgentRegisteredWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::AgentRegistered {
                name: wire.name.unwrap_or_else(|| wire.agent_id.clone()),
                agent_id: wire.agent_id,
                color: wire.color,
                position: wire.position,
            })
        }
        "agent:left" => {
            let wire: AgentRefWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::AgentLeft {
                agent_id: wire.agent_id,
            })
        }
        "agent:wait" => {
            let wire: AgentRefWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::AgentWait {
                agent_id: wire.agent_id,
            })
        }
        "agent:moved" => {
            let wire: AgentMovedWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::AgentMoved {
                agent_id: wire.agent_id,
                position: wire.position,
            })
        }
        "message:added" => {
            let wire: MessageAddedWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::MessageAdded {
                message_id: wire.message_id,
                from: wire.from,
                to: wire.to,
                content: wire.content,
            })
        }
        "message:cleared" => Ok(InboundEvent::MessageCleared),
        "task:added" => {
            let wire: TaskAddedWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::TaskAdded {
                description: wire.description.unwrap_or_default(),
                task_id: wire.task_id,
                position: wire.position,
            })
        }
        "task:assigned" => {
            let wire: TaskAssignedWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::TaskAssigned {
                task_id: wire.task_id,
                agent_id: wire.agent_id,
            })
        }
        "task:completed" => {
            let wire: TaskRefWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::TaskCompleted {
                task_id: wire.task_id,
            })
        }
        "task:cancelled" => {
            let wire: TaskRefWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::TaskCancelled {
                task_id: wire.task_id,
            })
        }
        "task:moved" => {
            let wire: TaskMovedWire = decode_payload(&kind, &envelope)?;
            Ok(InboundEvent::TaskMoved {
                task_id: wire.task_id,
                position: wire.position,
            })
        }
        "system:reset" => Ok(InboundEvent::SystemReset),
        _ => Ok(InboundEvent::Passthrough {
            kind,
            payload: envelope,
        }),
    }
}

/// Typed payload decode with the exact failing path preserved for the
/// malformed-input log line.
fn decode_payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    envelope: &Value,
) -> Result<T, DecodeError> {
    serde_path_to_error::deserialize(envelope).map_err(|err| {
        let path = err.path().to_string();
        DecodeError::BadPayload {
            kind: kind.to_string(),
            path,
            source: err.into_inner(),
        }
    })
}
