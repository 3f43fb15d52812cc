//! Authority lookup and approver resolution.

pub mod registry;
pub mod resolver;

pub use registry::{AuthorityQuery, AuthorityRegistry, ConfigurationIssue, IssueKind, RegistryError};
pub use resolver::{resolve, ApproverSource, ResolvedApprover};
