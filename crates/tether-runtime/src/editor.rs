//! Shared editor model
//!
//! Both processes declare this exact shape; entity ids follow from the member
//! names, so they must not be renamed independently on either side.

use serde::Serialize;
use tether_core::{TetherError, TetherResult, WireReader, WireValue, WireWriter};
use tether_model::{Call, Member, Model, Property, Signal};

/// Root name of [`EditorModel`]
pub const EDITOR_MODEL_ROOT: &str = "editor";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LogEventType {
    Error,
    Warning,
    Message,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum LogEventMode {
    Edit,
    Play,
}

impl WireValue for LogEventType {
    fn write(&self, w: &mut WireWriter) {
        w.write_u8(match self {
            LogEventType::Error => 0,
            LogEventType::Warning => 1,
            LogEventType::Message => 2,
        });
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        match r.read_u8()? {
            0 => Ok(LogEventType::Error),
            1 => Ok(LogEventType::Warning),
            2 => Ok(LogEventType::Message),
            other => Err(TetherError::InvalidWireFormat(format!(
                "unknown log event type {other}"
            ))),
        }
    }
}

impl WireValue for LogEventMode {
    fn write(&self, w: &mut WireWriter) {
        w.write_u8(match self {
            LogEventMode::Edit => 0,
            LogEventMode::Play => 1,
        });
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        match r.read_u8()? {
            0 => Ok(LogEventMode::Edit),
            1 => Ok(LogEventMode::Play),
            other => Err(TetherError::InvalidWireFormat(format!(
                "unknown log event mode {other}"
            ))),
        }
    }
}

/// One editor console entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    #[serde(rename = "type")]
    pub kind: LogEventType,
    pub mode: LogEventMode,
    pub message: String,
    pub stack_trace: String,
}

impl WireValue for LogEvent {
    fn write(&self, w: &mut WireWriter) {
        self.kind.write(w);
        self.mode.write(w);
        w.write_str(&self.message);
        w.write_str(&self.stack_trace);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        Ok(LogEvent {
            kind: LogEventType::read(r)?,
            mode: LogEventMode::read(r)?,
            message: r.read_string()?,
            stack_trace: r.read_string()?,
        })
    }
}

/// Open `path` with the caret at `line`/`col`; zero means "not given"
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OpenFileArgs {
    pub path: String,
    pub line: i32,
    pub col: i32,
}

impl WireValue for OpenFileArgs {
    fn write(&self, w: &mut WireWriter) {
        w.write_str(&self.path);
        w.write_i32(self.line);
        w.write_i32(self.col);
    }

    fn read(r: &mut WireReader<'_>) -> TetherResult<Self> {
        Ok(OpenFileArgs {
            path: r.read_string()?,
            line: r.read_i32()?,
            col: r.read_i32()?,
        })
    }
}

#[derive(Debug, Default)]
pub struct LogModel {
    pub log: Signal<LogEvent>,
}

impl Model for LogModel {
    fn members(&self) -> Vec<(&'static str, Member<'_>)> {
        vec![("log", Member::Entity(self.log.entity()))]
    }
}

/// The object graph shared by the editor and the tool
#[derive(Debug, Default)]
pub struct EditorModel {
    pub play: Property<bool>,
    pub pause: Property<bool>,
    pub step: Call<(), ()>,
    pub plugin_version: Property<String>,
    pub tool_process_id: Property<i32>,
    pub application_path: Property<String>,
    pub application_version: Property<String>,
    pub log_model: LogModel,
    pub is_client_connected: Call<(), bool>,
    pub open_file_line_col: Call<OpenFileArgs, bool>,
    pub update_plugin: Call<String, bool>,
    pub refresh: Call<(), ()>,
}

impl EditorModel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Model for EditorModel {
    fn members(&self) -> Vec<(&'static str, Member<'_>)> {
        vec![
            ("play", Member::Entity(self.play.entity())),
            ("pause", Member::Entity(self.pause.entity())),
            ("step", Member::Entity(self.step.entity())),
            ("pluginVersion", Member::Entity(self.plugin_version.entity())),
            ("toolProcessId", Member::Entity(self.tool_process_id.entity())),
            ("applicationPath", Member::Entity(self.application_path.entity())),
            (
                "applicationVersion",
                Member::Entity(self.application_version.entity()),
            ),
            ("logModel", Member::Model(&self.log_model)),
            (
                "isClientConnected",
                Member::Entity(self.is_client_connected.entity()),
            ),
            (
                "openFileLineCol",
                Member::Entity(self.open_file_line_col.entity()),
            ),
            ("updatePlugin", Member::Entity(self.update_plugin.entity())),
            ("refresh", Member::Entity(self.refresh.entity())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tether_model::collect;

    #[test]
    fn test_model_shape() {
        let model = EditorModel::new();
        let targets = collect(EDITOR_MODEL_ROOT, &model).unwrap();
        assert_eq!(targets.len(), 12);
        assert!(targets
            .iter()
            .any(|t| t.path == "editor.logModel.log"));
    }

    #[test]
    fn test_log_event_json() {
        let event = LogEvent {
            kind: LogEventType::Warning,
            mode: LogEventMode::Play,
            message: "careful".into(),
            stack_trace: "at Foo()".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Warning");
        assert_eq!(json["mode"], "Play");
        assert_eq!(json["stackTrace"], "at Foo()");
    }

    #[test]
    fn test_unknown_enum_rejected() {
        assert!(LogEventType::decode(&[3]).is_err());
        assert!(LogEventMode::decode(&[2]).is_err());
    }

    proptest! {
        #[test]
        fn prop_open_file_args_survive_wire(path in ".*", line in any::<i32>(), col in any::<i32>()) {
            let args = OpenFileArgs { path, line, col };
            prop_assert_eq!(OpenFileArgs::decode(&args.encode()).unwrap(), args);
        }
    }
}
