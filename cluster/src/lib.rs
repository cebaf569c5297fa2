pub mod client;
pub mod error;
pub mod health;
pub mod relations;
pub mod resolver;
pub mod resource;
pub mod topology;

pub use client::{ClusterClient, DiscoveredGroup, DiscoveredResource, KubeClusterClient};
pub use error::Error;
pub use health::HealthStatus;
pub use relations::{RelationType, Relationship};
pub use resolver::{ResolvedKind, Resolver};
pub use resource::{Event, KubeResource, ObjectRef};
pub use topology::{NamespaceTopology, map_namespace};
