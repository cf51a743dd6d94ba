use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a task's model output is shaped on the wire.
///
/// Fixed per task. The snake_case name doubles as the workspace directory
/// prefix (`{mode}_{task_id}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// A single HTML page in plain text with fenced blocks.
    Html,
    /// HTML, CSS and JS files in plain text with fenced blocks.
    MultiFile,
    /// A project written through tool calls, streamed as JSON messages.
    VueProject,
}

impl OutputMode {
    pub const ALL: [OutputMode; 3] = [Self::Html, Self::MultiFile, Self::VueProject];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::MultiFile => "multi_file",
            Self::VueProject => "vue_project",
        }
    }

    /// Whether completed output is run through the code extractor.
    pub fn extracts_code(self) -> bool {
        matches!(self, Self::Html | Self::MultiFile)
    }

    /// Whether completion kicks off the build pipeline.
    pub fn triggers_build(self) -> bool {
        matches!(self, Self::VueProject)
    }

    /// Directory name of a task's workspace under the output root.
    pub fn workspace_dir_name(self, task_id: &str) -> String {
        format!("{}_{task_id}", self.as_str())
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Self::Html),
            "multi_file" | "multi-file" => Ok(Self::MultiFile),
            "vue_project" | "vue-project" => Ok(Self::VueProject),
            other => Err(Error::InvalidInput(format!("unknown output mode '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_dir_uses_mode_prefix() {
        assert_eq!(OutputMode::Html.workspace_dir_name("7"), "html_7");
        assert_eq!(OutputMode::MultiFile.workspace_dir_name("7"), "multi_file_7");
        assert_eq!(OutputMode::VueProject.workspace_dir_name("7"), "vue_project_7");
    }

    #[test]
    fn parse_accepts_both_separators() {
        assert_eq!("multi-file".parse::<OutputMode>().unwrap(), OutputMode::MultiFile);
        assert_eq!("VUE_PROJECT".parse::<OutputMode>().unwrap(), OutputMode::VueProject);
        assert!("react".parse::<OutputMode>().is_err());
    }

    #[test]
    fn only_tool_protocol_builds() {
        for mode in OutputMode::ALL {
            assert_eq!(mode.triggers_build(), !mode.extracts_code());
        }
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&OutputMode::MultiFile).unwrap();
        assert_eq!(json, "\"multi_file\"");
    }
}
