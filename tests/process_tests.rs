use std::sync::Arc;

use async_trait::async_trait;

use gangway::errors::Result;
use gangway::transport::process::{
    ControlCommands, ProcOutcome, ProcessApi, ProcessIdentity, ProcessManagerClient, ProcessOp, RawHostResult,
    ResourceLimits, CODE_ALREADY_NOT_RUNNING, CODE_ALREADY_REGISTERED, CODE_EXECUTING, CODE_SUCCESS,
};

struct FakeProcessApi;

#[async_trait]
impl ProcessApi for FakeProcessApi {
    async fn register(
        &self,
        hosts: &[String],
        _control: &ControlCommands,
        _identity: &ProcessIdentity,
        _limits: &ResourceLimits,
    ) -> Result<Vec<RawHostResult>> {
        Ok(hosts
            .iter()
            .enumerate()
            .map(|(i, host)| RawHostResult {
                host: host.clone(),
                code: if i == 0 { CODE_SUCCESS } else { CODE_ALREADY_REGISTERED },
                message: String::new(),
            })
            .collect())
    }

    async fn operate(&self, _op: ProcessOp, _hosts: &[String]) -> Result<String> {
        Ok("task-9".to_string())
    }

    async fn poll(&self, _task_id: &str) -> Result<Vec<RawHostResult>> {
        Ok(vec![
            RawHostResult {
                host: "h1".into(),
                code: CODE_ALREADY_NOT_RUNNING,
                message: "proc not exists".into(),
            },
            RawHostResult {
                host: "h2".into(),
                code: CODE_EXECUTING,
                message: String::new(),
            },
            RawHostResult {
                host: "h3".into(),
                code: 7,
                message: "spawn failed".into(),
            },
        ])
    }
}

fn identity() -> (ControlCommands, ProcessIdentity, ResourceLimits) {
    (
        ControlCommands {
            start: "./agent start".into(),
            stop: "./agent stop".into(),
            restart: "./agent restart".into(),
            reload: "./agent reload".into(),
        },
        ProcessIdentity {
            user: "root".into(),
            proc_name: "monitor-agent".into(),
            setup_path: "/usr/local/agent/bin".into(),
        },
        ResourceLimits {
            cpu_percent: 10.0,
            mem_percent: 10.0,
        },
    )
}

#[tokio::test]
async fn register_classifies_already_registered_as_success() {
    let client = ProcessManagerClient::new(Arc::new(FakeProcessApi));
    let (control, ident, limits) = identity();
    let results = client
        .register(&["h1".into(), "h2".into()], &control, &ident, &limits)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.outcome == ProcOutcome::Success));
}

#[tokio::test]
async fn poll_classifies_the_full_code_table() {
    let client = ProcessManagerClient::new(Arc::new(FakeProcessApi));
    let task_id = client.operate(ProcessOp::Stop, &["h1".into(), "h2".into(), "h3".into()]).await.unwrap();
    assert_eq!(task_id, "task-9");

    let results = client.poll(&task_id).await.unwrap();
    assert_eq!(results[0].outcome, ProcOutcome::Success, "already not running is the desired end state");
    assert_eq!(results[1].outcome, ProcOutcome::Pending);
    assert_eq!(results[2].outcome, ProcOutcome::Failed);
    assert_eq!(results[2].message, "spawn failed");
}
