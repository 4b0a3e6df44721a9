//! Coalescing signatures.
//!
//! Requests that would produce identical backend jobs hash to the same
//! signature: the sorted file list for pushes, script text plus params
//! for executions. The hash is the batching identity, nothing more.

use sha2::{Digest, Sha256};

use crate::transport::JobPayload;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn of_files(files: &[String]) -> Signature {
        let mut sorted: Vec<&str> = files.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        let mut hasher = Sha256::new();
        for file in sorted {
            hasher.update(file.as_bytes());
            hasher.update([0u8]);
        }
        Signature(format!("{:x}", hasher.finalize()))
    }

    pub fn of_script(script: &str, params: &[String]) -> Signature {
        let mut hasher = Sha256::new();
        hasher.update(script.as_bytes());
        for param in params {
            hasher.update([0u8]);
            hasher.update(param.as_bytes());
        }
        Signature(format!("{:x}", hasher.finalize()))
    }

    pub fn of_payload(payload: &JobPayload) -> Signature {
        match payload {
            JobPayload::PushFiles { files } => Signature::of_files(files),
            JobPayload::RunScript { script, params } => Signature::of_script(script, params),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
