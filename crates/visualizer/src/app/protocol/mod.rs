pub mod adapter;
pub mod state;
pub mod wire;

pub use adapter::{DomainEvent, DomainEventRecord, ProtocolAdapter};
pub use state::{
    AgentRecord, AgentStatus, CanonicalState, FieldChange, GridPoint, MessageRecord, TaskRecord,
    TaskStatus,
};
pub use wire::{decode_line, DecodeError, InboundEvent};
