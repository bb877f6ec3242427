//! Core logic for itinera: the plan generation coordinator, the circuit
//! breaker guarding the external workflow service, the credit guard, and the
//! workflow-service client.

pub mod breaker;
pub mod coordinator;
pub mod credits;
pub mod workflow;
