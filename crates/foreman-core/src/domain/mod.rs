//! Domain - ドメインモデル（ids, issue, lifecycle label, record, events）

pub mod events;
pub mod ids;
pub mod issue;
pub mod label;
pub mod record;

pub use events::IssueCompletionEvent;
pub use ids::{ContainerId, IssueId, IssueIid, ProjectId};
pub use issue::{Issue, IssueState, LabelChange};
pub use label::{LifecycleLabel, UnknownLabel};
pub use record::IssueRecord;
