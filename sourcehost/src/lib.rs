pub mod client;
pub mod models;

pub use client::{GitLabClient, SourceHostClient};
pub use models::{Commit, Deployment, Diff, FlexTime, MergeRequest, Pipeline, Project};
