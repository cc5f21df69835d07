use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use chrono::{DateTime, Utc};
use serde::Serialize;
use walkdir::WalkDir;
use crate::cancel::CancelToken;
use crate::error::{DocumentError, FatalError};
use crate::master::{DeviceRecord, FleetDefaults, MasterLoader, serial_in_range};
use crate::rewriter::{RewriteOutcome, rewrite};
use crate::rules::{RuleSwitches, RuleTable};

pub const STATIONS_DIR: &str = "stations";
pub const CORRECTED_DIR: &str = "modified_stations";
pub const DEFAULT_MASTER_FILE: &str = "Exprivia Mira probes configurations V2.1.csv";
pub const DEFAULT_FIRMWARE: &str = "1.5.6";

pub fn config_filename(firmware: &str) -> String { format!("ConfigV{}ExpriviaN.xml", firmware) }

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub root: PathBuf,
    pub master_file: String,
    pub input_firmware: String,
    pub output_firmware: String,
    pub switches: RuleSwitches,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            master_file: DEFAULT_MASTER_FILE.to_string(),
            input_firmware: DEFAULT_FIRMWARE.to_string(),
            output_firmware: DEFAULT_FIRMWARE.to_string(),
            switches: RuleSwitches::default(),
        }
    }
}

impl Settings {
    pub fn master_path(&self) -> PathBuf { self.root.join(&self.master_file) }
    pub fn stations_dir(&self) -> PathBuf { self.root.join(STATIONS_DIR) }
    pub fn corrected_dir(&self) -> PathBuf { self.root.join(CORRECTED_DIR) }
    pub fn input_filename(&self) -> String { config_filename(&self.input_firmware) }
    pub fn output_filename(&self) -> String { config_filename(&self.output_firmware) }
}

/// Advisory progress notifications for the presentation side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Range { min: u64, max: u64 },
    Advance(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase { Init, LoadDefaults, LoadRecords, Scanning, Summarizing, Done }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub invalid_serial: usize,
    pub no_master_record: usize,
    pub failed: usize,
    pub corrected: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus { Corrected, Unchanged, Failed, NoMasterRecord, InvalidSerial }

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceStatus::Corrected => "corrected",
            DeviceStatus::Unchanged => "unchanged",
            DeviceStatus::Failed => "failed",
            DeviceStatus::NoMasterRecord => "no_master_record",
            DeviceStatus::InvalidSerial => "invalid_serial",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceOutcome {
    pub directory: String,
    pub serial: Option<u32>,
    pub status: DeviceStatus,
    pub corrections: usize,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub switches: RuleSwitches,
    pub master_file: String,
    pub input_filename: String,
    pub output_filename: String,
    pub defaults: FleetDefaults,
    pub master_records: usize,
    pub master_rows_rejected: usize,
    pub stats: RunStats,
    pub unmatched: Vec<u32>,
    pub cancelled: bool,
    pub outcomes: Vec<DeviceOutcome>,
}

pub struct Reconciler<'a> {
    settings: &'a Settings,
    rules: RuleTable,
    defaults: FleetDefaults,
    records: BTreeMap<u32, DeviceRecord>,
    cancel: CancelToken,
    progress: Option<Sender<Progress>>,
    stats: RunStats,
    outcomes: Vec<DeviceOutcome>,
}

impl<'a> Reconciler<'a> {
    pub fn new(settings: &'a Settings, defaults: FleetDefaults, records: BTreeMap<u32, DeviceRecord>, cancel: CancelToken, progress: Option<Sender<Progress>>) -> Self {
        Self {
            settings,
            rules: RuleTable::new(settings.switches),
            defaults,
            records,
            cancel,
            progress,
            stats: RunStats::default(),
            outcomes: Vec::new(),
        }
    }

    fn notify(&self, p: Progress) {
        if let Some(tx) = self.progress.as_ref() { let _ = tx.send(p); }
    }

    pub fn stats(&self) -> RunStats { self.stats }

    pub fn outcomes(&self) -> &[DeviceOutcome] { &self.outcomes }

    pub fn records(&self) -> &BTreeMap<u32, DeviceRecord> { &self.records }

    /// Entries directly under the stations directory, sorted by name.
    fn station_entries(&self) -> Vec<walkdir::DirEntry> {
        WalkDir::new(self.settings.stations_dir())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|r| match r {
                Ok(de) => Some(de),
                Err(e) => {
                    log::warn!("Skipping unreadable station entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Visits every entry of the stations directory until done or cancelled.
    pub fn scan(&mut self) {
        let entries = self.station_entries();
        self.scan_entries(&entries);
    }

    fn scan_entries(&mut self, entries: &[walkdir::DirEntry]) {
        self.notify(Progress::Range { min: 0, max: entries.len() as u64 });
        for (i, de) in entries.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::warn!("Scan cancelled after {} of {} entries", i, entries.len());
                break;
            }
            self.visit(de);
            self.notify(Progress::Advance(i as u64 + 1));
        }
    }

    fn visit(&mut self, de: &walkdir::DirEntry) {
        if !de.file_type().is_dir() { return; }
        let name = de.file_name().to_string_lossy().into_owned();
        let outcome = self.check_directory(&name);
        self.outcomes.push(outcome);
    }

    fn check_directory(&mut self, name: &str) -> DeviceOutcome {
        self.stats.processed += 1;
        let serial = name.parse::<u32>().ok();
        let outcome = |status, detail: Option<String>| DeviceOutcome { directory: name.to_string(), serial, status, corrections: 0, detail };
        let Some(serial) = serial.filter(|s| serial_in_range(*s)) else {
            log::error!("Cannot check station file dir {}: invalid station serial.", name);
            self.stats.invalid_serial += 1;
            return outcome(DeviceStatus::InvalidSerial, None);
        };
        let Some(record) = self.records.get_mut(&serial) else {
            log::error!("Cannot check station file dir {}: corresponding master configuration not found.", serial);
            self.stats.no_master_record += 1;
            return outcome(DeviceStatus::NoMasterRecord, None);
        };
        record.checked = true;
        let record = record.clone();
        match self.correct_device(&record) {
            Ok(o) if o.dirty => {
                self.stats.corrected += 1;
                DeviceOutcome { corrections: o.corrections.len(), ..outcome(DeviceStatus::Corrected, None) }
            }
            Ok(_) => outcome(DeviceStatus::Unchanged, None),
            Err(e) => {
                log::error!("Failure while handling the station file of probe {}: {}", serial, e);
                self.stats.failed += 1;
                outcome(DeviceStatus::Failed, Some(e.to_string()))
            }
        }
    }

    /// Rewrites one device document into a temporary file and moves it into
    /// the corrected area when something changed. The temporary is removed
    /// on every other path.
    fn correct_device(&self, record: &DeviceRecord) -> Result<RewriteOutcome, DocumentError> {
        let input = self.settings.stations_dir().join(record.serial.to_string()).join(self.settings.input_filename());
        let file = File::open(&input).map_err(|source| DocumentError::Open { path: input.clone(), source })?;
        let mut tmp = tempfile::Builder::new().prefix(".probecheck-").suffix(".xml").tempfile_in(&self.settings.root)?;
        let outcome = rewrite(BufReader::new(file), BufWriter::new(tmp.as_file_mut()), record, &self.defaults, &self.rules)?;
        if outcome.dirty {
            let dest = corrected_path(self.settings, record.serial);
            let dir = self.settings.corrected_dir().join(record.serial.to_string());
            fs::create_dir_all(&dir).map_err(|source| DocumentError::Persist { path: dir.clone(), source })?;
            tmp.persist(&dest).map_err(|e| DocumentError::Persist { path: dest.clone(), source: e.error })?;
            log::info!("Corrected station file written: {}", dest.to_string_lossy());
        }
        Ok(outcome)
    }

    pub fn unmatched(&self) -> Vec<u32> {
        self.records.values().filter(|r| !r.checked).map(|r| r.serial).collect()
    }
}

fn enter(phase: Phase) { log::debug!("Phase: {:?}", phase); }

fn prepare_root(settings: &Settings) -> Result<(), FatalError> {
    let stations = settings.stations_dir();
    if !settings.root.is_dir() || !stations.is_dir() {
        return Err(FatalError::RootNotFound { path: settings.root.clone() });
    }
    log::info!("App path: {}", settings.root.to_string_lossy());
    let corrected = settings.corrected_dir();
    if corrected.exists() {
        fs::remove_dir_all(&corrected).map_err(|source| FatalError::CorrectedAreaReset { path: corrected.clone(), source })?;
    }
    Ok(())
}

/// Full run: load the master file, reconcile every station directory, summarize.
pub fn run(settings: &Settings, cancel: CancelToken, progress: Option<Sender<Progress>>) -> Result<RunSummary, FatalError> {
    let started = Utc::now();
    log::info!("Check starting.");
    enter(Phase::Init);
    prepare_root(settings)?;

    enter(Phase::LoadDefaults);
    log::info!("Begin reading master configurations from {}", settings.master_path().to_string_lossy());
    let mut loader = MasterLoader::open(&settings.master_path())?;
    let defaults = loader.read_defaults()?;

    enter(Phase::LoadRecords);
    let loaded = loader.read_records(&cancel)?;
    log::info!("Reading master configurations done ({} found, {} rows rejected).", loaded.records.len(), loaded.rows_rejected);

    let mut rec = Reconciler::new(settings, defaults, loaded.records, cancel.clone(), progress);
    if !loaded.cancelled {
        enter(Phase::Scanning);
        rec.scan();
    }

    enter(Phase::Summarizing);
    let summary = RunSummary {
        started,
        finished: Utc::now(),
        switches: rec.rules.switches(),
        master_file: settings.master_file.clone(),
        input_filename: settings.input_filename(),
        output_filename: settings.output_filename(),
        defaults,
        master_records: rec.records().len(),
        master_rows_rejected: loaded.rows_rejected,
        stats: rec.stats(),
        unmatched: rec.unmatched(),
        cancelled: cancel.is_cancelled(),
        outcomes: rec.outcomes().to_vec(),
    };
    enter(Phase::Done);
    log::info!("Check done.");
    Ok(summary)
}

/// True when a corrected document for `serial` was written.
#[cfg(test)]
pub fn corrected_exists(settings: &Settings, serial: u32) -> bool {
    corrected_path(settings, serial).is_file()
}

pub fn corrected_path(settings: &Settings, serial: u32) -> PathBuf {
    settings.corrected_dir().join(serial.to_string()).join(settings.output_filename())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    const MASTER: &str = concat!(
        "MIRA SN,PROBE IP,SUBNET MASK,GATEWAY,Central 0 IP,Central 0 SNTP,Global NTP List,New Updater IP\r\n",
        "30001,10.0.0.2,255.255.255.0,10.0.0.1,172.16.0.10:4000,172.16.0.11,172.16.0.12,172.16.0.20:5000\r\n",
        "30123,10.0.0.5,255.255.255.0,10.0.0.1,,,,\r\n",
        "30200,10.0.1.5,255.255.255.0,10.0.1.1,,,,\r\n",
        "30300,10.0.2.5,255.255.255.0,10.0.2.1,,,,\r\n",
    );

    fn doc(ip: &str) -> String {
        format!(
            "<?xml version=\"1.0\"?>\n<ConfigurationEntries><Category name=\"Devices\"><Category name=\"Ethernet\"><Entry name=\"StaticIp\"><Element name=\"Ip Address\">{}</Element></Entry></Category></Category></ConfigurationEntries>\n",
            ip
        )
    }

    fn setup() -> (TempDir, Settings) {
        let dir = TempDir::new().unwrap();
        let settings = Settings { root: dir.path().to_path_buf(), ..Default::default() };
        fs::write(settings.master_path(), MASTER).unwrap();
        fs::create_dir_all(settings.stations_dir()).unwrap();
        (dir, settings)
    }

    fn station(settings: &Settings, name: &str, body: Option<&str>) {
        let d = settings.stations_dir().join(name);
        fs::create_dir_all(&d).unwrap();
        if let Some(b) = body { fs::write(d.join(settings.input_filename()), b).unwrap(); }
    }

    #[test]
    fn reconciles_fleet() {
        let (_dir, settings) = setup();
        station(&settings, "30123", Some(&doc("10.0.0.9")));
        station(&settings, "30200", Some(&doc("167772421")));
        station(&settings, "30300", None);
        station(&settings, "31000", None);
        station(&settings, "30555", None);
        station(&settings, "notes", None);
        fs::write(settings.stations_dir().join("readme.txt"), "x").unwrap();

        let (tx, rx) = mpsc::channel();
        let s = run(&settings, CancelToken::new(), Some(tx)).unwrap();
        assert_eq!(s.stats, RunStats { processed: 6, invalid_serial: 2, no_master_record: 1, failed: 1, corrected: 1 });
        assert_eq!(s.unmatched, vec![30001]);
        assert!(!s.cancelled);
        assert_eq!(s.master_records, 4);

        let fixed = fs::read_to_string(corrected_path(&settings, 30123)).unwrap();
        assert!(fixed.contains(">167772165<"));
        assert!(!corrected_exists(&settings, 30200));

        let events: Vec<Progress> = rx.try_iter().collect();
        assert_eq!(events.first(), Some(&Progress::Range { min: 0, max: 7 }));
        assert_eq!(events.last(), Some(&Progress::Advance(7)));

        let leftovers: Vec<_> = fs::read_dir(&settings.root).unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".probecheck-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn out_of_range_directory_is_never_looked_up() {
        let (_dir, settings) = setup();
        let mut records = BTreeMap::new();
        let r = DeviceRecord::new(29999, crate::codec::AddressValue::parse("10.0.0.5"), crate::codec::AddressValue::parse("255.0.0.0"), crate::codec::AddressValue::parse("10.0.0.1"));
        records.insert(29999, r);
        station(&settings, "29999", None);
        let defaults = FleetDefaults {
            primary_address: crate::codec::AddressValue::parse("1.1.1.1"),
            primary_port: crate::codec::PortValue::new(1),
            primary_time_source: crate::codec::AddressValue::parse("1.1.1.2"),
            global_time_source: crate::codec::AddressValue::parse("1.1.1.3"),
            updater_address: crate::codec::AddressValue::parse("1.1.1.4"),
            updater_port: crate::codec::PortValue::new(2),
        };
        let mut rec = Reconciler::new(&settings, defaults, records, CancelToken::new(), None);
        rec.scan();
        assert_eq!(rec.stats().invalid_serial, 1);
        assert_eq!(rec.stats().no_master_record, 0);
        assert!(!rec.records()[&29999].checked);
        assert_eq!(rec.unmatched(), vec![29999]);
    }

    #[test]
    fn cancelled_scan_visits_nothing_more() {
        let (_dir, settings) = setup();
        station(&settings, "30123", Some(&doc("10.0.0.9")));
        let cancel = CancelToken::new();
        let mut loader = MasterLoader::open(&settings.master_path()).unwrap();
        let defaults = loader.read_defaults().unwrap();
        let loaded = loader.read_records(&cancel).unwrap();
        let mut rec = Reconciler::new(&settings, defaults, loaded.records, cancel.clone(), None);
        cancel.cancel();
        rec.scan();
        assert_eq!(rec.stats(), RunStats::default());
        assert!(rec.outcomes().is_empty());
        assert_eq!(rec.unmatched(), vec![30001, 30123, 30200, 30300]);
    }

    #[test]
    fn cancel_after_first_directory_keeps_partial_counts() {
        let (_dir, settings) = setup();
        station(&settings, "30123", Some(&doc("10.0.0.9")));
        station(&settings, "30200", Some(&doc("10.0.0.9")));
        station(&settings, "30300", Some(&doc("10.0.0.9")));
        let cancel = CancelToken::new();
        let mut loader = MasterLoader::open(&settings.master_path()).unwrap();
        let defaults = loader.read_defaults().unwrap();
        let loaded = loader.read_records(&cancel).unwrap();
        let (tx, rx) = mpsc::channel();
        let mut rec = Reconciler::new(&settings, defaults, loaded.records, cancel.clone(), Some(tx));

        let entries = rec.station_entries();
        assert_eq!(entries.len(), 3);
        rec.visit(&entries[0]);
        cancel.cancel();
        rec.scan_entries(&entries[1..]);

        assert_eq!(rec.stats(), RunStats { processed: 1, corrected: 1, ..Default::default() });
        assert_eq!(rec.outcomes().len(), 1);
        assert_eq!(rec.unmatched(), vec![30001, 30200, 30300]);
        assert!(corrected_exists(&settings, 30123));
        assert!(!corrected_exists(&settings, 30200));
        let events: Vec<Progress> = rx.try_iter().collect();
        assert_eq!(events, vec![Progress::Range { min: 0, max: 2 }]);
    }

    #[test]
    fn cancelled_run_still_summarizes() {
        let (_dir, settings) = setup();
        station(&settings, "30123", Some(&doc("10.0.0.9")));
        let cancel = CancelToken::new();
        cancel.cancel();
        let s = run(&settings, cancel, None).unwrap();
        assert!(s.cancelled);
        assert_eq!(s.stats, RunStats::default());
        assert_eq!(s.master_records, 1);
        assert_eq!(s.unmatched, vec![30001]);
        assert!(crate::report::render_text(&s).contains("(cancelled)"));
    }

    #[test]
    fn summary_switches_come_from_rule_table() {
        let (_dir, mut settings) = setup();
        settings.switches.check_time_intervals = true;
        let s = run(&settings, CancelToken::new(), None).unwrap();
        assert!(s.switches.check_time_intervals);
        assert!(!s.switches.check_service_mode);
    }

    #[test]
    fn unreadable_stations_listing_yields_no_entries() {
        let (_dir, settings) = setup();
        fs::remove_dir_all(settings.stations_dir()).unwrap();
        let defaults = FleetDefaults {
            primary_address: crate::codec::AddressValue::parse("1.1.1.1"),
            primary_port: crate::codec::PortValue::new(1),
            primary_time_source: crate::codec::AddressValue::parse("1.1.1.2"),
            global_time_source: crate::codec::AddressValue::parse("1.1.1.3"),
            updater_address: crate::codec::AddressValue::parse("1.1.1.4"),
            updater_port: crate::codec::PortValue::new(2),
        };
        let mut rec = Reconciler::new(&settings, defaults, BTreeMap::new(), CancelToken::new(), None);
        assert!(rec.station_entries().is_empty());
        rec.scan();
        assert_eq!(rec.stats(), RunStats::default());
    }

    #[test]
    fn missing_stations_dir_is_fatal() {
        let dir = TempDir::new().unwrap();
        let settings = Settings { root: dir.path().to_path_buf(), ..Default::default() };
        assert!(matches!(run(&settings, CancelToken::new(), None), Err(FatalError::RootNotFound { .. })));
    }

    #[test]
    fn missing_master_file_is_fatal() {
        let (_dir, settings) = setup();
        fs::remove_file(settings.master_path()).unwrap();
        assert!(matches!(run(&settings, CancelToken::new(), None), Err(FatalError::MasterOpen { .. })));
    }

    #[test]
    fn previous_corrected_area_is_cleared() {
        let (_dir, settings) = setup();
        let stale = settings.corrected_dir().join("30999");
        fs::create_dir_all(&stale).unwrap();
        station(&settings, "30123", Some(&doc("167772165")));
        let s = run(&settings, CancelToken::new(), None).unwrap();
        assert_eq!(s.stats.corrected, 0);
        assert!(!stale.exists());
        assert!(!settings.corrected_dir().exists());
    }
}
