//! Portable settings file: global sensitivity plus per-module settings.
//!
//! Import matches saved entries to the session's modules by list position.
//! An entry whose kind differs from the module at the same position is
//! skipped; nothing is reordered or matched by kind.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    modules::{ModuleKind, Position},
    session::Session,
    Result,
};

pub const SETTINGS_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsFile {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<f32>,
    /// `None` marks an entry that could not be read; it still occupies its
    /// slot so later entries keep their positions.
    #[serde(default, deserialize_with = "lenient_entries")]
    pub modules: Vec<Option<ModuleEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    pub settings: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

/// Outcome of [`SettingsFile::import`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub applied: usize,
    pub skipped: usize,
}

fn default_version() -> String {
    SETTINGS_VERSION.to_string()
}

fn lenient_entries<'de, D>(deserializer: D) -> std::result::Result<Vec<Option<ModuleEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(index, %err, "unreadable module entry");
                None
            }
        })
        .collect())
}

impl SettingsFile {
    /// Captures the session's sensitivity and every module's settings in
    /// registration order.
    pub fn export(session: &Session) -> Result<Self> {
        let modules = session
            .registry()
            .iter()
            .map(|module| {
                Ok(Some(ModuleEntry {
                    kind: module.kind(),
                    settings: module.settings_json()?,
                    position: Some(module.position()),
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            version: SETTINGS_VERSION.to_string(),
            sensitivity: Some(session.sensitivity()),
            modules,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(text)?;
        if file.version != SETTINGS_VERSION {
            tracing::warn!(version = %file.version, "settings file version differs");
        }
        Ok(file)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        tracing::info!(path = %path.as_ref().display(), modules = self.modules.len(), "settings saved");
        Ok(())
    }

    /// Applies the file to the session's existing modules. Failures are
    /// local: a skipped entry leaves its module untouched.
    pub fn import(&self, session: &mut Session) -> ImportReport {
        if let Some(sensitivity) = self.sensitivity {
            session.set_sensitivity(sensitivity);
        }

        let mut report = ImportReport::default();
        let mut modules = session.registry_mut().iter_mut();
        for (index, entry) in self.modules.iter().enumerate() {
            let Some(module) = modules.next() else {
                report.skipped += self.modules.len() - index;
                tracing::warn!(
                    extra = self.modules.len() - index,
                    "settings file has more entries than modules"
                );
                break;
            };
            let Some(entry) = entry else {
                report.skipped += 1;
                continue;
            };
            if entry.kind != module.kind() {
                tracing::warn!(index, saved = %entry.kind, found = %module.kind(), "kind mismatch, entry skipped");
                report.skipped += 1;
                continue;
            }
            if let Err(err) = module.merge_settings_json(&entry.settings) {
                tracing::warn!(index, %err, "settings rejected, entry skipped");
                report.skipped += 1;
                continue;
            }
            if let Some(position) = entry.position {
                module.set_position(Position::new(position.x, position.y));
            }
            report.applied += 1;
        }
        tracing::info!(applied = report.applied, skipped = report.skipped, "settings imported");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ui::ControlValue, AppConfig};

    fn session_with(kinds: &[ModuleKind]) -> Session {
        let mut session = Session::new(AppConfig::default()).unwrap();
        for &kind in kinds {
            session.add_module(kind);
        }
        session
    }

    #[test]
    fn round_trip_reproduces_settings_and_positions() {
        let kinds = [ModuleKind::Speaker, ModuleKind::Spectrum, ModuleKind::Neon];
        let mut source = session_with(&kinds);
        source.set_sensitivity(1.3);
        {
            let mut modules = source.registry_mut().iter_mut();
            let speaker = modules.next().unwrap();
            speaker.apply_control("size", 0.4_f32.into()).unwrap();
            speaker.set_position(Position::new(0.2, 0.8));
            let spectrum = modules.next().unwrap();
            spectrum.apply_control("type", ControlValue::from("matrix")).unwrap();
            let neon = modules.next().unwrap();
            neon.apply_control("text", ControlValue::from("DROP")).unwrap();
        }

        let text = SettingsFile::export(&source).unwrap().to_json().unwrap();
        let mut target = session_with(&kinds);
        let report = SettingsFile::from_json(&text).unwrap().import(&mut target);
        assert_eq!(report, ImportReport { applied: 3, skipped: 0 });
        assert_eq!(target.sensitivity(), 1.3);

        for (a, b) in source.registry().iter().zip(target.registry().iter()) {
            assert_eq!(a.settings_json().unwrap(), b.settings_json().unwrap());
            assert_eq!(a.position(), b.position());
        }
    }

    #[test]
    fn kind_mismatch_is_skipped_positionally() {
        let source = session_with(&[ModuleKind::Neon, ModuleKind::Speaker]);
        let file = SettingsFile::export(&source).unwrap();

        let mut target = session_with(&[ModuleKind::Speaker, ModuleKind::Speaker]);
        let before = target.registry().iter().next().unwrap().settings_json().unwrap();
        let report = file.import(&mut target);
        assert_eq!(report, ImportReport { applied: 1, skipped: 1 });
        let after = target.registry().iter().next().unwrap().settings_json().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn malformed_entries_keep_their_slot() {
        let text = r#"{
            "version": "2.0",
            "modules": [
                { "type": "hologram", "settings": {} },
                { "type": "neon", "settings": { "text": "HELLO" }, "position": { "x": 1.5, "y": 0.25 } }
            ]
        }"#;
        let file = SettingsFile::from_json(text).unwrap();
        assert!(file.modules[0].is_none());
        assert!(file.sensitivity.is_none());

        let mut target = session_with(&[ModuleKind::Neon, ModuleKind::Neon]);
        let report = file.import(&mut target);
        assert_eq!(report, ImportReport { applied: 1, skipped: 1 });
        assert_eq!(target.sensitivity(), 0.7);

        let second = target.registry().iter().nth(1).unwrap();
        assert_eq!(second.settings_json().unwrap()["text"], "HELLO");
        assert_eq!(second.position(), Position::new(1.0, 0.25));
    }

    #[test]
    fn bad_settings_values_leave_module_untouched() {
        let mut target = session_with(&[ModuleKind::Speaker]);
        let before = target.registry().iter().next().unwrap().settings_json().unwrap();
        let file = SettingsFile {
            version: SETTINGS_VERSION.into(),
            sensitivity: None,
            modules: vec![Some(ModuleEntry {
                kind: ModuleKind::Speaker,
                settings: serde_json::json!({ "size": "huge" }),
                position: Some(Position::new(0.1, 0.1)),
            })],
        };
        let report = file.import(&mut target);
        assert_eq!(report.skipped, 1);
        let module = target.registry().iter().next().unwrap();
        assert_eq!(module.settings_json().unwrap(), before);
        assert_eq!(module.position(), Position::CENTER);
    }

    #[test]
    fn out_of_range_entries_are_skipped_and_rendering_survives() {
        let kinds = [ModuleKind::Speaker, ModuleKind::Spectrum, ModuleKind::Neon];
        let mut target = session_with(&kinds);
        let before: Vec<Value> = target
            .registry()
            .iter()
            .map(|module| module.settings_json().unwrap())
            .collect();
        let text = r#"{
            "version": "2.0",
            "modules": [
                { "type": "speaker", "settings": { "size": 1e12 }, "position": { "x": 0.1, "y": 0.1 } },
                { "type": "spectrum", "settings": { "barCount": 5000000 } },
                { "type": "neon", "settings": { "sparkCount": 1000000, "text": "LOUD" } }
            ]
        }"#;
        let report = SettingsFile::from_json(text).unwrap().import(&mut target);
        assert_eq!(report, ImportReport { applied: 0, skipped: 3 });

        for (module, saved) in target.registry().iter().zip(&before) {
            assert_eq!(&module.settings_json().unwrap(), saved);
            assert_eq!(module.position(), Position::CENTER);
        }

        let mut canvas = crate::canvas::RasterCanvas::new(64, 36);
        target.analyze();
        target.update_modules();
        crate::render::draw_frame(&mut target, &mut canvas);
    }

    #[test]
    fn surplus_entries_are_counted() {
        let source = session_with(&[ModuleKind::Neon, ModuleKind::Neon, ModuleKind::Neon]);
        let file = SettingsFile::export(&source).unwrap();
        let mut target = session_with(&[ModuleKind::Neon]);
        assert_eq!(file.import(&mut target), ImportReport { applied: 1, skipped: 2 });
    }

    #[test]
    fn export_uses_type_key() {
        let source = session_with(&[ModuleKind::Spectrum]);
        let json: Value = serde_json::from_str(&SettingsFile::export(&source).unwrap().to_json().unwrap()).unwrap();
        assert_eq!(json["version"], "2.0");
        assert_eq!(json["modules"][0]["type"], "spectrum");
        assert!(json["modules"][0]["position"]["x"].is_number());
    }
}
