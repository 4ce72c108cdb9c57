//! Experiment configuration files: the scenario and eHMI catalogues and the
//! participant table that orders them into a session.

use crate::ehmi::EhmiMode;
use anyhow::{anyhow, bail, Context};
use csv::StringRecord;
use log::warn;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Reads headerless comma-separated rows with their line numbers. Blank
/// lines are skipped and rows may have any number of fields.
fn read_rows<R: Read>(reader: R) -> anyhow::Result<Vec<(u64, StringRecord)>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut rows = vec![];
    for record in rdr.records() {
        let record = record.context("malformed CSV row")?;
        let line = record.position().map_or(0, |pos| pos.line());
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push((line, record));
    }
    Ok(rows)
}

/// Reads a `key,value` row.
fn key_value(line: u64, record: &StringRecord) -> anyhow::Result<(&str, &str)> {
    match (record.get(0), record.get(1)) {
        (Some(key), Some(value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("line {line}: expected `key,value`"),
    }
}

fn open(path: &Path) -> anyhow::Result<File> {
    File::open(path).with_context(|| format!("cannot open {}", path.display()))
}

/// Scene identifiers by scenario key, in file order.
#[derive(Clone, Debug, Default)]
pub struct ScenarioCatalog {
    scenes: Vec<(String, String)>,
}

impl ScenarioCatalog {
    /// Reads `key,scene_name` rows.
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut scenes = vec![];
        for (line, record) in read_rows(reader)? {
            let (key, scene) = key_value(line, &record)?;
            scenes.push((key.to_string(), scene.to_string()));
        }
        Ok(Self { scenes })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Self::from_reader(open(path)?).with_context(|| format!("in {}", path.display()))
    }

    /// The scene of a scenario key.
    pub fn scene(&self, key: &str) -> Option<&str> {
        self.scenes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, scene)| scene.as_str())
    }

    /// The scenario keys, in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.scenes.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

/// eHMI modes by key, in file order.
#[derive(Clone, Debug, Default)]
pub struct EhmiCatalog {
    modes: Vec<(String, EhmiMode)>,
}

impl EhmiCatalog {
    /// Reads `key,ehmi_name` rows.
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut modes = vec![];
        for (line, record) in read_rows(reader)? {
            let (key, name) = key_value(line, &record)?;
            let mode = name
                .parse()
                .with_context(|| format!("line {line}: bad eHMI for key {key}"))?;
            modes.push((key.to_string(), mode));
        }
        Ok(Self { modes })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Self::from_reader(open(path)?).with_context(|| format!("in {}", path.display()))
    }

    pub fn mode(&self, key: &str) -> Option<EhmiMode> {
        self.modes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, mode)| *mode)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.modes.iter().map(|(key, _)| key.as_str())
    }
}

/// One scenario of a participant's session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEntry {
    /// The scenario key.
    pub scenario: String,
    /// The eHMI key.
    pub ehmi: String,
}

impl SessionEntry {
    /// Parses `scenario:ehmi`.
    fn parse(line: u64, text: &str) -> anyhow::Result<Self> {
        let (scenario, ehmi) = text
            .split_once(':')
            .ok_or_else(|| anyhow!("line {line}: expected `scenario:ehmi`, found {text:?}"))?;
        Ok(Self {
            scenario: scenario.trim().to_string(),
            ehmi: ehmi.trim().to_string(),
        })
    }
}

/// The result of looking up a participant ID typed by the experimenter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupStatus {
    Found(Vec<SessionEntry>),
    NotFound(i64),
    /// The text is not an integer.
    InvalidId,
}

impl LookupStatus {
    /// The status line shown to the experimenter.
    pub fn message(&self) -> &'static str {
        match self {
            Self::Found(_) => "ID Found!",
            Self::NotFound(_) => "ID Not Found!",
            Self::InvalidId => "Invalid ID!",
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Session orders by participant ID.
#[derive(Clone, Debug, Default)]
pub struct ParticipantTable {
    rows: Vec<(i64, Vec<SessionEntry>)>,
}

impl ParticipantTable {
    /// Reads `id,scenario:ehmi,...` rows. Empty trailing fields are ignored.
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rows = vec![];
        for (line, record) in read_rows(reader)? {
            let id_text = record.get(0).unwrap_or_default();
            let id: i64 = id_text
                .parse()
                .with_context(|| format!("line {line}: participant ID {id_text:?} is not an integer"))?;
            let entries = record
                .iter()
                .skip(1)
                .filter(|field| !field.is_empty())
                .map(|field| SessionEntry::parse(line, field))
                .collect::<anyhow::Result<Vec<_>>>()?;
            rows.push((id, entries));
        }
        Ok(Self { rows })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Self::from_reader(open(path)?).with_context(|| format!("in {}", path.display()))
    }

    /// Looks up the session of the ID typed as `text`. The first row with a
    /// matching ID wins.
    pub fn lookup(&self, text: &str) -> LookupStatus {
        let Ok(id) = text.trim().parse::<i64>() else {
            warn!("Participant ID {text:?} is not a number");
            return LookupStatus::InvalidId;
        };
        match self.rows.iter().find(|(row_id, _)| *row_id == id) {
            Some((_, entries)) => LookupStatus::Found(entries.clone()),
            None => {
                warn!("Participant ID {id} not found");
                LookupStatus::NotFound(id)
            }
        }
    }
}

/// The ordered scenes of a session and the eHMI shown in each.
#[derive(Clone, Debug, Default)]
pub struct SessionPlan {
    scenes: Vec<(String, EhmiMode)>,
    index: usize,
}

impl SessionPlan {
    /// Resolves a participant's entries against the catalogues.
    pub fn resolve(
        entries: &[SessionEntry],
        scenarios: &ScenarioCatalog,
        ehmis: &EhmiCatalog,
    ) -> anyhow::Result<Self> {
        let scenes = entries
            .iter()
            .map(|entry| {
                let scene = scenarios
                    .scene(&entry.scenario)
                    .with_context(|| format!("unknown scenario key {:?}", entry.scenario))?;
                let mode = ehmis
                    .mode(&entry.ehmi)
                    .with_context(|| format!("unknown eHMI key {:?}", entry.ehmi))?;
                Ok((scene.to_string(), mode))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { scenes, index: 0 })
    }

    /// The scene being run.
    pub fn current(&self) -> Option<(&str, EhmiMode)> {
        self.scenes
            .get(self.index)
            .map(|(scene, mode)| (scene.as_str(), *mode))
    }

    /// Moves to the next scene. After the last scene the plan empties and
    /// the session returns to the start screen.
    pub fn next(&mut self) -> Option<(&str, EhmiMode)> {
        if self.scenes.is_empty() {
            return None;
        }
        self.index += 1;
        if self.index >= self.scenes.len() {
            self.scenes.clear();
            self.index = 0;
            return None;
        }
        self.current()
    }

    /// The zero-based position of the current scene.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SCENES: &str = "1,Crossing_Day\n2,Crossing_Night\n";
    const EHMIS: &str = "a,Intention\nb,Instruction\nc,No_EHMI\n";
    const PARTICIPANTS: &str = "101,1:a,2:c\n102,2:b,\n\n103,1:b,2:b,1:c\n";

    fn catalogues() -> (ScenarioCatalog, EhmiCatalog) {
        (
            ScenarioCatalog::from_reader(SCENES.as_bytes()).unwrap(),
            EhmiCatalog::from_reader(EHMIS.as_bytes()).unwrap(),
        )
    }

    #[test]
    fn catalogues_keep_file_order() {
        let (scenes, ehmis) = catalogues();
        assert_eq!(scenes.keys().collect::<Vec<_>>(), ["1", "2"]);
        assert_eq!(scenes.scene("2"), Some("Crossing_Night"));
        assert_eq!(scenes.scene("3"), None);
        assert_eq!(ehmis.mode("c"), Some(EhmiMode::Disabled));
    }

    #[test]
    fn lookup_statuses() {
        let table = ParticipantTable::from_reader(PARTICIPANTS.as_bytes()).unwrap();

        let found = table.lookup(" 102 ");
        assert_eq!(found.message(), "ID Found!");
        assert_eq!(
            found,
            LookupStatus::Found(vec![SessionEntry {
                scenario: "2".into(),
                ehmi: "b".into(),
            }])
        );

        assert_eq!(table.lookup("7"), LookupStatus::NotFound(7));
        assert_eq!(table.lookup("7").message(), "ID Not Found!");
        assert_eq!(table.lookup("abc"), LookupStatus::InvalidId);
        assert_eq!(table.lookup("abc").message(), "Invalid ID!");
    }

    #[test]
    fn malformed_rows_report_their_line() {
        let err = ParticipantTable::from_reader("1,1:a\nx,1:a\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));

        let err = ParticipantTable::from_reader("1,1a\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("scenario:ehmi"));

        let err = EhmiCatalog::from_reader("a,Hologram\n".as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("Hologram"));

        assert!(ScenarioCatalog::from_reader("1\n".as_bytes()).is_err());
    }

    #[test]
    fn session_plan_wraps_to_start() {
        let (scenes, ehmis) = catalogues();
        let table = ParticipantTable::from_reader(PARTICIPANTS.as_bytes()).unwrap();
        let LookupStatus::Found(entries) = table.lookup("101") else {
            panic!("participant 101 missing");
        };
        let mut plan = SessionPlan::resolve(&entries, &scenes, &ehmis).unwrap();

        assert_eq!(plan.current(), Some(("Crossing_Day", EhmiMode::Intention)));
        assert_eq!(plan.next(), Some(("Crossing_Night", EhmiMode::Disabled)));
        assert_eq!(plan.next(), None);
        assert!(plan.is_empty());
        assert_eq!(plan.next(), None);
    }

    #[test]
    fn unknown_keys_fail_to_resolve() {
        let (scenes, ehmis) = catalogues();
        let entries = [SessionEntry {
            scenario: "9".into(),
            ehmi: "a".into(),
        }];
        let err = SessionPlan::resolve(&entries, &scenes, &ehmis).unwrap_err();
        assert!(err.to_string().contains("\"9\""));
    }
}
