pub mod context;
pub mod executor;
pub mod execution_service;
pub mod node_api;
pub mod nodes;
pub mod parser;
pub mod registry;
pub mod retrieval;
pub mod sandbox;
pub mod scheduler;
pub mod template;
pub mod validator;

pub use context::{apply_patch, merge_wave_patches, ContextPatch};
pub use execution_service::{ExecutionService, TriggerResult};
pub use executor::{NodeRunOutcome, NodeRunner};
pub use node_api::{NodeContext, NodeExecutionError, NodeHandler, NodeInput, NodeOutput, ValidationOutcome};
pub use parser::WorkflowParser;
pub use registry::NodeRegistry;
pub use scheduler::{ExecutionResult, WorkflowScheduler};
pub use validator::WorkflowValidator;
