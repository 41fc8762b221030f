use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::state::{
    AgentRecord, AgentStatus, CanonicalState, FieldChange, GridPoint, MessageRecord, TaskRecord,
    TaskStatus,
};
use super::wire::{decode_line, InboundEvent};

/// Typed notification emitted after canonical state has fully mutated.
/// Serialized verbatim onto the outbound feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    AgentRegistered {
        agent: AgentRecord,
    },
    AgentLeft {
        agent_id: String,
    },
    AgentStateChanged {
        agent_id: String,
        from: AgentStatus,
        to: AgentStatus,
    },
    AgentUpdated {
        agent: AgentRecord,
        changes: Vec<FieldChange>,
    },
    AgentMoved {
        agent_id: String,
        position: GridPoint,
    },
    MessageAdded {
        message: MessageRecord,
    },
    MessagesCleared,
    TaskAdded {
        task: TaskRecord,
    },
    TaskAssigned {
        task_id: String,
        agent_id: String,
    },
    TaskCompleted {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
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

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEventRecord {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: DomainEvent,
}

fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts the inbound line stream into canonical state plus domain
/// events. Events are processed strictly in arrival order; within one
/// inbound event every state mutation lands before any domain event is
/// handed to subscribers. One bad line never halts the stream.
pub struct ProtocolAdapter {
    state: CanonicalState,
    clock: fn() -> u64,
    next_message_seq: u64,
    events_applied: u64,
    malformed_dropped: u64,
}

impl Default for ProtocolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolAdapter {
    pub fn new() -> Self {
        Self::with_clock(system_now_ms)
    }

    /// Injectable clock so tests get deterministic timestamps.
    pub fn with_clock(clock: fn() -> u64) -> Self {
        Self {
            state: CanonicalState::new(),
            clock,
            next_message_seq: 0,
            events_applied: 0,
            malformed_dropped: 0,
        }
    }

    pub fn state(&self) -> &CanonicalState {
        &self.state
    }

    pub fn events_applied(&self) -> u64 {
        self.events_applied
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped
    }

    /// Decodes and applies one raw line. Malformed lines are logged,
    /// counted, and dropped without touching canonical state.
    pub fn apply_line(&mut self, line: &str) -> Vec<DomainEventRecord> {
        match decode_line(line) {
            Ok(event) => self.apply(event),
            Err(error) => {
                self.malformed_dropped = self.malformed_dropped.saturating_add(1);
                warn!(error = %error, "malformed_event_dropped");
                Vec::new()
            }
        }
    }

    pub fn apply(&mut self, event: InboundEvent) -> Vec<DomainEventRecord> {
        let now = (self.clock)();
        let mut events = Vec::new();

        match event {
            InboundEvent::AgentRegistered {
                agent_id,
                name,
                color,
                position,
            } => {
                // Last-write-wins: re-registration replaces the record.
                let record = AgentRecord {
                    id: agent_id.clone(),
                    name,
                    color,
                    status: AgentStatus::Idle,
                    position,
                    registered_at_ms: now,
                    last_active_ms: now,
                };
                self.state.agents.insert(agent_id, record.clone());
                events.push(DomainEvent::AgentRegistered { agent: record });
            }
            InboundEvent::AgentLeft { agent_id } => {
                if self.state.agents.remove(&agent_id).is_some() {
                    events.push(DomainEvent::AgentLeft { agent_id });
                } else {
                    debug!(agent_id = %agent_id, "agent_left_unknown_ignored");
                }
            }
            InboundEvent::AgentWait { agent_id } => {
                self.touch_agent(&agent_id, AgentStatus::Waiting, now, &mut events);
            }
            InboundEvent::AgentMoved { agent_id, position } => {
                if let Some(agent) = self.state.agents.get_mut(&agent_id) {
                    agent.position = Some(position);
                }
                // Forwarded verbatim even when the agent is unknown.
                events.push(DomainEvent::AgentMoved { agent_id, position });
            }
            InboundEvent::MessageAdded {
                message_id,
                from,
                to,
                content,
            } => {
                let id = message_id.unwrap_or_else(|| {
                    self.next_message_seq = self.next_message_seq.saturating_add(1);
                    format!("msg-{}", self.next_message_seq)
                });
                let record = MessageRecord {
                    id,
                    from: from.clone(),
                    to,
                    content,
                    at_ms: now,
                };
                self.state.messages.push(record.clone());
                events.push(DomainEvent::MessageAdded { message: record });
                self.touch_agent(&from, AgentStatus::Active, now, &mut events);
            }
            InboundEvent::MessageCleared => {
                self.state.messages.clear();
                events.push(DomainEvent::MessagesCleared);
            }
            InboundEvent::TaskAdded {
                task_id,
                description,
                position,
            } => {
                let record = TaskRecord {
                    id: task_id.clone(),
                    description,
                    status: TaskStatus::Pending,
                    assigned_to: None,
                    position,
                    created_at_ms: now,
                    completed_at_ms: None,
                };
                self.state.tasks.insert(task_id, record.clone());
                events.push(DomainEvent::TaskAdded { task: record });
            }
            InboundEvent::TaskAssigned { task_id, agent_id } => {
                let Some(task) = self.state.tasks.get_mut(&task_id) else {
                    debug!(task_id = %task_id, "task_assigned_unknown_ignored");
                    return self.finish(now, events);
                };
                task.status = TaskStatus::Assigned;
                // The assignee identity is recorded even if no such agent
                // is currently registered.
                task.assigned_to = Some(agent_id.clone());
                events.push(DomainEvent::TaskAssigned {
                    task_id,
                    agent_id: agent_id.clone(),
                });
                self.touch_agent(&agent_id, AgentStatus::Working, now, &mut events);
            }
            InboundEvent::TaskCompleted { task_id } => {
                let Some(task) = self.state.tasks.get_mut(&task_id) else {
                    debug!(task_id = %task_id, "task_completed_unknown_ignored");
                    return self.finish(now, events);
                };
                task.status = TaskStatus::Completed;
                task.completed_at_ms = Some(now.max(task.created_at_ms));
                let assignee = task.assigned_to.clone();
                events.push(DomainEvent::TaskCompleted {
                    task_id,
                    agent_id: assignee.clone(),
                });
                if let Some(agent_id) = assignee {
                    self.touch_agent(&agent_id, AgentStatus::Idle, now, &mut events);
                }
            }
            InboundEvent::TaskCancelled { task_id } => {
                let Some(task) = self.state.tasks.get_mut(&task_id) else {
                    debug!(task_id = %task_id, "task_cancelled_unknown_ignored");
                    return self.finish(now, events);
                };
                // Only pending or assigned tasks can be cancelled; work in
                // progress and terminal tasks refuse the transition.
                if !matches!(task.status, TaskStatus::Pending | TaskStatus::Assigned) {
                    warn!(
                        task_id = %task_id,
                        status = ?task.status,
                        "task_cancel_rejected"
                    );
                    return self.finish(now, events);
                }
                task.status = TaskStatus::Cancelled;
                let assignee = task.assigned_to.clone();
                events.push(DomainEvent::TaskCancelled { task_id });
                if let Some(agent_id) = assignee {
                    self.touch_agent(&agent_id, AgentStatus::Idle, now, &mut events);
                }
            }
            InboundEvent::TaskMoved { task_id, position } => {
                let Some(task) = self.state.tasks.get_mut(&task_id) else {
                    debug!(task_id = %task_id, "task_moved_unknown_ignored");
                    return self.finish(now, events);
                };
                task.position = Some(position);
                events.push(DomainEvent::TaskMoved { task_id, position });
            }
            InboundEvent::SystemReset => {
                self.state.clear();
                events.push(DomainEvent::SystemReset);
            }
            InboundEvent::Passthrough { kind, payload } => {
                events.push(DomainEvent::Passthrough { kind, payload });
            }
        }

        self.finish(now, events)
    }

    /// Lifecycle bump for an existing agent: updates status and
    /// last-active, then emits the state-changed / updated pair. The
    /// state-changed half is skipped when the status did not actually
    /// change (a repeated `wait`, a chatty `active` sender); the updated
    /// half always fires so full-record subscribers see the refresh.
    /// Unknown agents are a silent no-op.
    fn touch_agent(
        &mut self,
        agent_id: &str,
        status: AgentStatus,
        now: u64,
        events: &mut Vec<DomainEvent>,
    ) {
        let Some(agent) = self.state.agents.get_mut(agent_id) else {
            return;
        };
        let previous = agent.status;
        let previous_active = agent.last_active_ms;
        agent.status = status;
        agent.last_active_ms = now;

        let mut changes = Vec::new();
        if previous != status {
            changes.push(FieldChange {
                field: "status",
                from: format!("{previous:?}").to_lowercase(),
                to: format!("{status:?}").to_lowercase(),
            });
        }
        if previous_active != now {
            changes.push(FieldChange {
                field: "lastActiveMs",
                from: previous_active.to_string(),
                to: now.to_string(),
            });
        }
        let snapshot = agent.clone();

        if previous != status {
            events.push(DomainEvent::AgentStateChanged {
                agent_id: agent_id.to_string(),
                from: previous,
                to: status,
            });
        }
        events.push(DomainEvent::AgentUpdated {
            agent: snapshot,
            changes,
        });
    }

    fn finish(&mut self, now: u64, events: Vec<DomainEvent>) -> Vec<DomainEventRecord> {
        self.events_applied = self.events_applied.saturating_add(events.len() as u64);
        events
            .into_iter()
            .map(|event| DomainEventRecord { at_ms: now, event })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_clock() -> u64 {
        1_700_000_000_000
    }

    fn adapter() -> ProtocolAdapter {
        ProtocolAdapter::with_clock(fixed_clock)
    }

    fn kinds(records: &[DomainEventRecord]) -> Vec<&'static str> {
        records
            .iter()
            .map(|record| match &record.event {
                DomainEvent::AgentRegistered { .. } => "agent_registered",
                DomainEvent::AgentLeft { .. } => "agent_left",
                DomainEvent::AgentStateChanged { .. } => "agent_state_changed",
                DomainEvent::AgentUpdated { .. } => "agent_updated",
                DomainEvent::AgentMoved { .. } => "agent_moved",
                DomainEvent::MessageAdded { .. } => "message_added",
                DomainEvent::MessagesCleared => "messages_cleared",
                DomainEvent::TaskAdded { .. } => "task_added",
                DomainEvent::TaskAssigned { .. } => "task_assigned",
                DomainEvent::TaskCompleted { .. } => "task_completed",
                DomainEvent::TaskCancelled { .. } => "task_cancelled",
                DomainEvent::TaskMoved { .. } => "task_moved",
                DomainEvent::SystemReset => "system_reset",
                DomainEvent::Passthrough { .. } => "passthrough",
            })
            .collect()
    }

    fn register(adapter: &mut ProtocolAdapter, id: &str) -> Vec<DomainEventRecord> {
        adapter.apply(InboundEvent::AgentRegistered {
            agent_id: id.to_string(),
            name: id.to_string(),
            color: None,
            position: None,
        })
    }

    fn add_task(adapter: &mut ProtocolAdapter, id: &str) {
        adapter.apply(InboundEvent::TaskAdded {
            task_id: id.to_string(),
            description: "desc".to_string(),
            position: None,
        });
    }

    #[test]
    fn registration_creates_idle_agent_and_fires_once() {
        let mut a = adapter();
        let records = register(&mut a, "a1");

        assert_eq!(kinds(&records), vec!["agent_registered"]);
        let agent = a.state().agent("a1").expect("agent");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.registered_at_ms, fixed_clock());
    }

    #[test]
    fn re_registration_overwrites_without_error() {
        let mut a = adapter();
        register(&mut a, "a1");
        let records = a.apply(InboundEvent::AgentRegistered {
            agent_id: "a1".to_string(),
            name: "Renamed".to_string(),
            color: Some("#fff".to_string()),
            position: None,
        });

        assert_eq!(kinds(&records), vec!["agent_registered"]);
        assert_eq!(a.state().agent_count(), 1);
        assert_eq!(a.state().agent("a1").expect("agent").name, "Renamed");
    }

    #[test]
    fn left_deletes_and_is_silent_for_unknown() {
        let mut a = adapter();
        register(&mut a, "a1");

        let gone = a.apply(InboundEvent::AgentLeft {
            agent_id: "a1".to_string(),
        });
        assert_eq!(kinds(&gone), vec!["agent_left"]);
        assert!(a.state().agent("a1").is_none());

        let absent = a.apply(InboundEvent::AgentLeft {
            agent_id: "ghost".to_string(),
        });
        assert!(absent.is_empty());
    }

    #[test]
    fn wait_emits_state_changed_and_updated_pair() {
        let mut a = adapter();
        register(&mut a, "a1");
        let records = a.apply(InboundEvent::AgentWait {
            agent_id: "a1".to_string(),
        });

        assert_eq!(kinds(&records), vec!["agent_state_changed", "agent_updated"]);
        let DomainEvent::AgentStateChanged { from, to, .. } = &records[0].event else {
            panic!("wrong event");
        };
        assert_eq!(*from, AgentStatus::Idle);
        assert_eq!(*to, AgentStatus::Waiting);
        let DomainEvent::AgentUpdated { changes, .. } = &records[1].event else {
            panic!("wrong event");
        };
        assert!(changes.iter().any(|change| change.field == "status"));
    }

    #[test]
    fn wait_for_unknown_agent_is_a_no_op() {
        let mut a = adapter();
        let records = a.apply(InboundEvent::AgentWait {
            agent_id: "ghost".to_string(),
        });
        assert!(records.is_empty());
    }

    #[test]
    fn repeated_wait_skips_state_changed_but_still_updates() {
        let mut a = adapter();
        register(&mut a, "a1");
        a.apply(InboundEvent::AgentWait {
            agent_id: "a1".to_string(),
        });
        let records = a.apply(InboundEvent::AgentWait {
            agent_id: "a1".to_string(),
        });
        assert_eq!(kinds(&records), vec!["agent_updated"]);
    }

    #[test]
    fn message_records_even_when_receiver_is_unknown() {
        let mut a = adapter();
        register(&mut a, "a1");
        let records = a.apply(InboundEvent::MessageAdded {
            message_id: None,
            from: "a1".to_string(),
            to: Some("nobody".to_string()),
            content: "hello".to_string(),
        });

        assert_eq!(
            kinds(&records),
            vec!["message_added", "agent_state_changed", "agent_updated"]
        );
        assert_eq!(a.state().message_count(), 1);
        assert_eq!(
            a.state().agent("a1").expect("agent").status,
            AgentStatus::Active
        );
    }

    #[test]
    fn message_from_unknown_sender_still_records() {
        let mut a = adapter();
        let records = a.apply(InboundEvent::MessageAdded {
            message_id: None,
            from: "stranger".to_string(),
            to: None,
            content: "hi".to_string(),
        });
        assert_eq!(kinds(&records), vec!["message_added"]);
        assert_eq!(a.state().message_count(), 1);
    }

    #[test]
    fn message_cleared_empties_history() {
        let mut a = adapter();
        a.apply(InboundEvent::MessageAdded {
            message_id: None,
            from: "a".to_string(),
            to: None,
            content: "x".to_string(),
        });
        let records = a.apply(InboundEvent::MessageCleared);
        assert_eq!(kinds(&records), vec!["messages_cleared"]);
        assert_eq!(a.state().message_count(), 0);
    }

    #[test]
    fn assignment_marks_task_and_agent() {
        let mut a = adapter();
        register(&mut a, "a1");
        add_task(&mut a, "t1");
        let records = a.apply(InboundEvent::TaskAssigned {
            task_id: "t1".to_string(),
            agent_id: "a1".to_string(),
        });

        assert_eq!(
            kinds(&records),
            vec!["task_assigned", "agent_state_changed", "agent_updated"]
        );
        let task = a.state().task("t1").expect("task");
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_to.as_deref(), Some("a1"));
        assert_eq!(
            a.state().agent("a1").expect("agent").status,
            AgentStatus::Working
        );
    }

    #[test]
    fn assignment_to_absent_agent_still_records_identity() {
        let mut a = adapter();
        add_task(&mut a, "t1");
        let records = a.apply(InboundEvent::TaskAssigned {
            task_id: "t1".to_string(),
            agent_id: "future-agent".to_string(),
        });

        assert_eq!(kinds(&records), vec!["task_assigned"]);
        assert_eq!(
            a.state().task("t1").expect("task").assigned_to.as_deref(),
            Some("future-agent")
        );
    }

    #[test]
    fn assignment_of_unknown_task_is_a_no_op() {
        let mut a = adapter();
        register(&mut a, "a1");
        let records = a.apply(InboundEvent::TaskAssigned {
            task_id: "ghost".to_string(),
            agent_id: "a1".to_string(),
        });
        assert!(records.is_empty());
        assert_eq!(
            a.state().agent("a1").expect("agent").status,
            AgentStatus::Idle
        );
    }

    #[test]
    fn completion_stamps_time_and_frees_the_assignee() {
        let mut a = adapter();
        register(&mut a, "a1");
        add_task(&mut a, "t1");
        a.apply(InboundEvent::TaskAssigned {
            task_id: "t1".to_string(),
            agent_id: "a1".to_string(),
        });
        let records = a.apply(InboundEvent::TaskCompleted {
            task_id: "t1".to_string(),
        });

        assert_eq!(
            kinds(&records),
            vec!["task_completed", "agent_state_changed", "agent_updated"]
        );
        let task = a.state().task("t1").expect("task");
        assert_eq!(task.status, TaskStatus::Completed);
        let completed_at = task.completed_at_ms.expect("completed");
        assert!(completed_at >= task.created_at_ms);
        assert_eq!(
            a.state().agent("a1").expect("agent").status,
            AgentStatus::Idle
        );
    }

    #[test]
    fn cancel_allowed_from_pending_and_assigned_only() {
        let mut a = adapter();
        register(&mut a, "a1");
        add_task(&mut a, "t1");
        a.apply(InboundEvent::TaskAssigned {
            task_id: "t1".to_string(),
            agent_id: "a1".to_string(),
        });
        let records = a.apply(InboundEvent::TaskCancelled {
            task_id: "t1".to_string(),
        });
        assert_eq!(
            kinds(&records),
            vec!["task_cancelled", "agent_state_changed", "agent_updated"]
        );
        assert_eq!(
            a.state().task("t1").expect("task").status,
            TaskStatus::Cancelled
        );

        // Terminal tasks refuse another cancel.
        let again = a.apply(InboundEvent::TaskCancelled {
            task_id: "t1".to_string(),
        });
        assert!(again.is_empty());
    }

    #[test]
    fn moves_update_position_without_lifecycle_change() {
        let mut a = adapter();
        register(&mut a, "a1");
        let position = GridPoint {
            x: 4,
            y: 5,
            z: None,
        };
        let records = a.apply(InboundEvent::AgentMoved {
            agent_id: "a1".to_string(),
            position,
        });

        assert_eq!(kinds(&records), vec!["agent_moved"]);
        let agent = a.state().agent("a1").expect("agent");
        assert_eq!(agent.position, Some(position));
        assert_eq!(agent.status, AgentStatus::Idle);
    }

    #[test]
    fn agent_move_forwarded_even_for_unknown_agent() {
        let mut a = adapter();
        let records = a.apply(InboundEvent::AgentMoved {
            agent_id: "ghost".to_string(),
            position: GridPoint {
                x: 0,
                y: 0,
                z: None,
            },
        });
        assert_eq!(kinds(&records), vec!["agent_moved"]);
    }

    #[test]
    fn task_move_dropped_for_unknown_task() {
        let mut a = adapter();
        let records = a.apply(InboundEvent::TaskMoved {
            task_id: "ghost".to_string(),
            position: GridPoint {
                x: 1,
                y: 1,
                z: None,
            },
        });
        assert!(records.is_empty());
    }

    #[test]
    fn reset_clears_everything_and_fires_once() {
        let mut a = adapter();
        register(&mut a, "a1");
        add_task(&mut a, "t1");
        a.apply(InboundEvent::MessageAdded {
            message_id: None,
            from: "a1".to_string(),
            to: None,
            content: "x".to_string(),
        });

        let records = a.apply(InboundEvent::SystemReset);
        assert_eq!(kinds(&records), vec!["system_reset"]);
        assert_eq!(a.state().agent_count(), 0);
        assert_eq!(a.state().task_count(), 0);
        assert_eq!(a.state().message_count(), 0);
    }

    #[test]
    fn malformed_line_is_counted_and_dropped() {
        let mut a = adapter();
        assert!(a.apply_line("{{nope").is_empty());
        assert!(a.apply_line(r#"{"type":"agent:wait"}"#).is_empty());
        assert_eq!(a.malformed_dropped(), 2);
        assert_eq!(a.state().agent_count(), 0);
    }

    #[test]
    fn well_formed_line_round_trips_through_decode() {
        let mut a = adapter();
        let records =
            a.apply_line(r#"{"type":"agent:registered","agentId":"a1","name":"Ada"}"#);
        assert_eq!(kinds(&records), vec!["agent_registered"]);
        assert_eq!(records[0].at_ms, fixed_clock());
    }

    #[test]
    fn passthrough_preserves_kind_and_payload() {
        let mut a = adapter();
        let records = a.apply_line(r#"{"type":"custom:spark","level":3}"#);
        assert_eq!(kinds(&records), vec!["passthrough"]);
        let DomainEvent::Passthrough { kind, payload } = &records[0].event else {
            panic!("wrong event");
        };
        assert_eq!(kind, "custom:spark");
        assert_eq!(payload["level"], 3);
    }

    #[test]
    fn outbound_records_serialize_with_flattened_type_tag() {
        let mut a = adapter();
        let records = register(&mut a, "a1");
        let json = serde_json::to_value(&records[0]).expect("serialize");
        assert_eq!(json["type"], "agent_registered");
        assert_eq!(json["at_ms"], fixed_clock());
        assert_eq!(json["agent"]["id"], "a1");
    }
}
