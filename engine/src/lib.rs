pub mod assemble;
pub mod classify;
pub mod context;
pub mod correlate;
pub mod engine;
pub mod helm;
pub mod recommend;

#[cfg(test)]
pub mod testutil;

pub use assemble::{Assembler, CompletionProvider, smart_truncate};
pub use classify::Classifier;
pub use context::{
    ArgoLink, Category, Issue, IssueSource, ResourceContext, Severity, SourceLink,
};
pub use correlate::{ChangeRef, Correlator, TracedResource};
pub use engine::{Engine, EngineError, EngineRequest, EngineResponse, NamespaceAnalysis};
pub use helm::HelmRenderer;
pub use recommend::{recommend, recommendations_for};
