use crate::events::{AttributeName, AttributeValue};
use crate::state::CommandName;
use serde_json::Value;
use std::path::PathBuf;

pub const COMMANDS: &[CommandName] = &[
    CommandName::On,
    CommandName::Off,
    CommandName::Standby,
    CommandName::InitSysParam,
    CommandName::ForceState,
    CommandName::ForceHealthState,
];

/// Key marking an InitSysParam document that points at remote data rather
/// than carrying the parameters inline.
const DATA_SOURCES_KEY: &str = "tm_data_sources";
const DATA_FILEPATH_KEY: &str = "tm_data_filepath";

/// How an InitSysParam argument supplies the system parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum SysParamSource {
    /// Parameters given directly; applied synchronously.
    Inline(Value),
    /// Parameters fetched from a data source; applied by a long-running task.
    Uri { file_path: Option<PathBuf> },
}

impl SysParamSource {
    pub fn classify(document: &Value) -> Self {
        if document.get(DATA_SOURCES_KEY).is_some() {
            let file_path = document
                .get(DATA_FILEPATH_KEY)
                .and_then(Value::as_str)
                .map(PathBuf::from);
            SysParamSource::Uri { file_path }
        } else {
            SysParamSource::Inline(document.clone())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ControllerAttributes {
    sys_param: String,
    source_sys_param: String,
}

impl ControllerAttributes {
    pub fn sys_param(&self) -> &str {
        &self.sys_param
    }

    pub fn source_sys_param(&self) -> &str {
        &self.source_sys_param
    }

    pub fn apply_inline(&mut self, document: &Value) -> Vec<(AttributeName, AttributeValue)> {
        self.sys_param = document.to_string();
        self.source_sys_param.clear();
        self.updates()
    }

    /// Record the loaded parameters of a URI-style request. `loaded` is
    /// `None` when the data source could not be read.
    pub fn apply_uri(&mut self, source: &str, loaded: Option<String>) -> Vec<(AttributeName, AttributeValue)> {
        self.source_sys_param = source.to_string();
        self.sys_param = loaded.unwrap_or_default();
        self.updates()
    }

    fn updates(&self) -> Vec<(AttributeName, AttributeValue)> {
        vec![
            (AttributeName::SysParam, AttributeValue::Text(self.sys_param.clone())),
            (AttributeName::SourceSysParam, AttributeValue::Text(self.source_sys_param.clone())),
        ]
    }

    pub fn read(&self, attribute: AttributeName) -> Option<AttributeValue> {
        match attribute {
            AttributeName::SysParam => Some(AttributeValue::Text(self.sys_param.clone())),
            AttributeName::SourceSysParam => Some(AttributeValue::Text(self.source_sys_param.clone())),
            _ => None,
        }
    }
}

/// Read a URI-style sys-param data file and check it holds JSON.
pub async fn load_sys_param(file_path: Option<PathBuf>) -> Result<String, String> {
    let path = file_path.ok_or_else(|| format!("missing {DATA_FILEPATH_KEY}"))?;
    let contents = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    serde_json::from_str::<Value>(&contents)
        .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;
    Ok(contents)
}
