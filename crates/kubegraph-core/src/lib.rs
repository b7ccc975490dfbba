//! Kubegraph Core - Entity identity and typed resource data
//!
//! This crate defines what the rest of Kubegraph talks about: which cluster
//! resources are tracked, how they are identified, and which of their
//! fields the relationship rules consume.
//!
//! Raw cluster objects are decoded exactly once, at ingestion, into
//! [`EntityProperties`]. Everything downstream pattern-matches on that
//! enum instead of probing untyped JSON.
//!
//! # Example
//!
//! ```
//! use kubegraph_core::{decode_object, ResourceKind};
//! use serde_json::json;
//!
//! let pod = json!({
//!     "metadata": { "name": "web-0", "namespace": "shop", "labels": { "app": "web" } },
//!     "spec": { "nodeName": "n1" },
//! });
//!
//! let (key, props) = decode_object(ResourceKind::Pod, &pod).unwrap();
//! assert_eq!(key.to_string(), "Pod/shop/web-0");
//! assert_eq!(props.labels().get("app").map(String::as_str), Some("web"));
//! ```

mod decode;
mod error;
mod key;
mod properties;

pub use decode::decode_object;
pub use error::{DecodeError, Result};
pub use key::{EntityKey, ResourceKind};
pub use properties::{
    ConfigMapProperties, DeploymentProperties, EntityProperties, Labels, NodeProperties, OwnerRef,
    PodProperties, ReplicaSetProperties, ServiceProperties,
};
