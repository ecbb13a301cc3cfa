//! App - アプリケーション層
//!
//! ports と scheduler, lifecycle state machine, retry coordinator を組み合わせて
//! オーケストレーションを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: 構築とワイヤリング（fail-fast 検証つき）
//! - **PollingOrchestrator**: start / stop、tick ごとの discovery と label sweep
//! - **ContainerWorkflow**: TODO → WIP、provision、delegate、retry / escalate
//! - **AdmissionRule**: 発見した issue を受け入れるかの判定
//! - **CompletionListeners**: 完了イベントの fan-out

pub mod admission;
pub mod builder;
pub mod listeners;
pub mod orchestrator;
pub mod workflow;

pub use self::admission::{AdmissionMode, AdmissionRule, Rejection};
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::listeners::{CompletionListener, CompletionListeners, ListenerHandle};
pub use self::orchestrator::PollingOrchestrator;
pub use self::workflow::{ContainerWorkflow, WorkflowOutcome};

use std::future::Future;
use std::time::Duration;

use crate::error::ForemanError;

/// Bound one outbound call. `on_timeout` builds the port-specific error.
pub(crate) async fn bounded<T, E, F>(
    limit: Duration,
    call: F,
    on_timeout: fn(Duration) -> E,
) -> Result<T, ForemanError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ForemanError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(on_timeout(limit).into()),
    }
}
