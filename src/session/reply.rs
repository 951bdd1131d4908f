//! Records handed back to the front end

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::PipelineOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
}

/// Reply to one submission.
///
/// Always `ok`: compile errors, link errors and internal failures show up
/// as diagnostics on the error channel, never as a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReply {
    pub status: ReplyStatus,
    pub execution_count: u64,
    pub payload: Vec<Value>,
    pub user_expressions: Map<String, Value>,
}

impl ExecutionReply {
    pub fn ok(execution_count: u64) -> Self {
        Self {
            status: ReplyStatus::Ok,
            execution_count,
            payload: Vec::new(),
            user_expressions: Map::new(),
        }
    }
}

/// The wire reply plus what actually happened, for callers that care
#[derive(Debug)]
pub struct SubmissionReport {
    pub reply: ExecutionReply,
    pub outcome: crate::Result<PipelineOutcome>,
}

impl SubmissionReport {
    /// True when the program was built and run to completion
    pub fn executed(&self) -> bool {
        matches!(&self.outcome, Ok(outcome) if outcome.executed())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub name: String,
    pub mimetype: String,
    pub file_extension: String,
}

/// Static description of the kernel, as reported by `info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInfo {
    pub implementation: String,
    pub implementation_version: String,
    pub language: String,
    pub language_version: String,
    pub language_info: LanguageInfo,
    pub banner: String,
}

impl Default for KernelInfo {
    fn default() -> Self {
        Self {
            implementation: env!("CARGO_PKG_NAME").to_string(),
            implementation_version: env!("CARGO_PKG_VERSION").to_string(),
            language: "asm".to_string(),
            language_version: "asm".to_string(),
            language_info: LanguageInfo {
                name: "text/x-asm".to_string(),
                mimetype: "text/x-asm".to_string(),
                file_extension: ".asm".to_string(),
            },
            banner: "ASM kernel.\nUses yasm and gcc, creates source code files and \
                     executables in temporary folder.\n"
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_wire_format() {
        let json = serde_json::to_string(&ExecutionReply::ok(7)).unwrap();
        assert_eq!(
            json,
            r#"{"status":"ok","execution_count":7,"payload":[],"user_expressions":{}}"#
        );
    }

    #[test]
    fn test_kernel_info() {
        let info = KernelInfo::default();
        assert_eq!(info.language, "asm");
        assert_eq!(info.language_info.file_extension, ".asm");
        assert!(info.banner.starts_with("ASM kernel."));

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["language_info"]["mimetype"], "text/x-asm");
    }
}
