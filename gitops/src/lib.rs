pub mod client;
pub mod models;
pub mod url;

pub use client::{ArgoClient, GitOpsClient};
pub use models::{Application, HistoryEntry, ResourceTree, TreeNode};
pub use url::{environment_from_app, extract_project_path};
