//! Tipos del modelo: flujos, sesiones y pasos de ejecución.

pub mod flow;
pub mod session;
pub mod step;

pub use flow::{Connection, ConnectionSpec, Flow, FlowFilter, FlowGraph, FlowPatch, FlowSpec, Node, NodePatch, NodeSpec};
pub use session::{Interaction, NewInteraction, NewSession, Session, SessionFilter, SessionSummary, UserInput};
pub use step::{EmittedMessage, ExecutionStep, NewExecutionStep, NewTraceAccess, StepResult};
